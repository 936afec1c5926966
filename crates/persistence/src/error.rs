//! Persistence error type

use thiserror::Error;

use admissions_agent_core::CollaboratorError;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("connection error: {0}")]
    Connection(#[from] scylla::transport::errors::NewSessionError),

    #[error("query error: {0}")]
    Query(#[from] scylla::transport::errors::QueryError),

    #[error("schema error: {0}")]
    SchemaError(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<PersistenceError> for CollaboratorError {
    fn from(e: PersistenceError) -> Self {
        match e {
            PersistenceError::NotFound(what) => CollaboratorError::NotFound(what),
            PersistenceError::InvalidData(what) => CollaboratorError::InvalidData(what),
            other => CollaboratorError::Store(other.to_string()),
        }
    }
}
