//! Conversation turn types
//!
//! Turns are append-only and owned by the conversation store; the agent only
//! reads and appends them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "assistant" => Self::Assistant,
            _ => Self::User,
        }
    }
}

/// One persisted conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    /// Free-form metadata (handoff type, model continuation token, ...)
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
            metadata: None,
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
            metadata: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn is_assistant(&self) -> bool {
        self.role == TurnRole::Assistant
    }

    pub fn is_user(&self) -> bool {
        self.role == TurnRole::User
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trip() {
        assert_eq!(TurnRole::from_str("assistant"), TurnRole::Assistant);
        assert_eq!(TurnRole::from_str("user"), TurnRole::User);
        assert_eq!(TurnRole::from_str("garbage"), TurnRole::User);
        assert_eq!(TurnRole::Assistant.as_str(), "assistant");
    }

    #[test]
    fn turn_builders() {
        let turn = Turn::assistant("hola").with_metadata(serde_json::json!({"type": "handoff"}));
        assert!(turn.is_assistant());
        assert_eq!(turn.metadata.unwrap()["type"], "handoff");
    }
}
