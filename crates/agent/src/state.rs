//! Transient per-invocation agent state

use admissions_agent_core::{LeadState, Message, StructuredReply};

/// Everything one dialogue-machine run needs and produces. Built fresh per
/// inbound message; nothing here is shared across requests.
#[derive(Debug)]
pub struct AgentState {
    /// Fused turn list (history + current message + injected notes)
    pub messages: Vec<Message>,
    pub contact_id: String,
    pub user_name: String,
    /// Campus resolved from the conversation's CRM location ("Puebla")
    pub campus_context: String,
    pub location_id: String,
    /// Snapshot of the persisted lead state
    pub lead_state: Option<LeadState>,
    pub is_first_turn: bool,
    /// Set by the kill-switch gate when the intake is complete
    pub data_collected: bool,
    pub post_booking_mode: bool,
    /// Final structured output, set by the Format state
    pub reply: Option<StructuredReply>,
}

impl AgentState {
    pub fn new(
        messages: Vec<Message>,
        contact_id: impl Into<String>,
        user_name: impl Into<String>,
        campus_context: impl Into<String>,
        location_id: impl Into<String>,
        lead_state: Option<LeadState>,
        post_booking_mode: bool,
    ) -> Self {
        Self {
            messages,
            contact_id: contact_id.into(),
            user_name: user_name.into(),
            campus_context: campus_context.into(),
            location_id: location_id.into(),
            lead_state,
            is_first_turn: false,
            data_collected: false,
            post_booking_mode,
            reply: None,
        }
    }

    /// Content of the newest user message, if any.
    pub fn latest_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == admissions_agent_core::Role::User)
            .map(|m| m.content.as_str())
    }

    /// All user text across the accumulated turn list.
    pub fn all_user_text(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == admissions_agent_core::Role::User)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
