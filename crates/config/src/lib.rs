//! Configuration for the admissions agent
//!
//! Two layers:
//! - [`Settings`]: process configuration (server, model, persistence, CRM),
//!   loaded from an optional file plus `APP__`-prefixed environment variables.
//! - Domain data: the campus registry and the objection playbook, loaded from
//!   YAML files with compiled-in defaults when the files are absent.

pub mod locations;
pub mod objections;
pub mod settings;

use thiserror::Error;

pub use locations::{LocationConfig, LocationRegistry, Program};
pub use objections::{ObjectionCatalog, ObjectionEntry};
pub use settings::{
    CrmSettings, DomainPaths, LlmSettings, PersistenceSettings, RuntimeEnvironment,
    ServerSettings, Settings,
};

/// Configuration loading/validation failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("failed to read domain data file {path}: {source}")]
    DomainFile {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse domain data file {path}: {source}")]
    DomainParse {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
