//! Shared error type for collaborator seams
//!
//! Every external collaborator (persistence, CRM, language model) surfaces
//! failures through this one enum so callers can catch, log, and degrade at
//! the call site without knowing the backend.

use thiserror::Error;

/// Failure reported by an external collaborator.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Persistence backend failure (query, connection, schema)
    #[error("store error: {0}")]
    Store(String),

    /// CRM / messaging API failure
    #[error("crm error: {0}")]
    Crm(String),

    /// Language model invocation failure
    #[error("model error: {0}")]
    Model(String),

    /// A row or payload did not have the expected shape
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Lookup target does not exist
    #[error("not found: {0}")]
    NotFound(String),
}

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;
