//! Language model integration
//!
//! One concrete backend against the Anthropic Messages API with native tool
//! use. The rest of the system only sees `core::LanguageModel`, so a scripted
//! fake drops in for tests.

pub mod claude;

use thiserror::Error;

pub use claude::{ClaudeBackend, ClaudeConfig};

/// LLM invocation failure.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

impl From<LlmError> for admissions_agent_core::CollaboratorError {
    fn from(e: LlmError) -> Self {
        Self::Model(e.to_string())
    }
}
