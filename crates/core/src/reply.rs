//! Structured reply emitted by the dialogue state machine

use serde::{Deserialize, Serialize};

use crate::lead::CapturedFields;

/// Final, guarded output of one agent invocation.
///
/// `is_relevant` and `detected_campus` are recomputed deterministically from
/// the final message text; the model's own claims are never trusted verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredReply {
    pub is_relevant: bool,
    pub message: String,
    /// Normalized campus id ("puebla", "pozarica", "coatzacoalcos"), empty if
    /// the final text names none
    pub detected_campus: String,
    /// Slots captured during this turn
    #[serde(default)]
    pub captured: CapturedFields,
}

impl StructuredReply {
    pub fn relevant(message: impl Into<String>, detected_campus: impl Into<String>) -> Self {
        Self {
            is_relevant: true,
            message: message.into(),
            detected_campus: detected_campus.into(),
            captured: CapturedFields::default(),
        }
    }
}
