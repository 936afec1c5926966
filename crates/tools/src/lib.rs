//! Model-facing lookup tools
//!
//! The model is bound to exactly three lookups: campus info, the level
//! catalogue (with canonical URLs), and the objection playbook. Tool dispatch
//! is a closed enum matched by name — an unknown tool name is an explicit
//! error result, never a panic and never a silent drop.

pub mod kind;
pub mod router;

use thiserror::Error;

pub use kind::ToolKind;
pub use router::ToolRouter;

/// Tool dispatch failure.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: &'static str, reason: String },
}
