//! CRM / messaging client
//!
//! HTTP client for the multi-location CRM: outbound messages, tags, contact
//! fields, notes, and native conversation history. Credentials are selected
//! per location from the campus registry's token environment variables, with
//! a fallback token for unknown locations.

pub mod client;

use thiserror::Error;

pub use client::HttpCrmClient;

/// CRM API failure.
#[derive(Debug, Error)]
pub enum CrmError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("api error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for CrmError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

impl From<CrmError> for admissions_agent_core::CollaboratorError {
    fn from(e: CrmError) -> Self {
        Self::Crm(e.to_string())
    }
}
