//! Persistence collaborator traits

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CollaboratorResult;
use crate::lead::{BookingState, CapturedFields, LeadState};
use crate::conversation::Turn;

/// Conversation history plus the human-takeover flag, keyed by contact id.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Find the conversation row for a contact or create one.
    async fn get_or_create_conversation(
        &self,
        contact_id: &str,
        location_id: &str,
        channel: &str,
    ) -> CollaboratorResult<Uuid>;

    /// Append one turn to a conversation.
    async fn append_turn(&self, conversation_id: Uuid, turn: &Turn) -> CollaboratorResult<()>;

    /// Chronological history for a contact, oldest first.
    async fn history(&self, contact_id: &str, limit: usize) -> CollaboratorResult<Vec<Turn>>;

    /// Whether an assistant turn with this content was persisted by the bot
    /// for this contact. Exact match first, then a 40-character-prefix match
    /// to tolerate transport-side rewriting.
    async fn assistant_turn_exists(
        &self,
        contact_id: &str,
        content: &str,
    ) -> CollaboratorResult<bool>;

    /// Re-key a conversation after a contact transfer. Returns false when the
    /// source contact had no conversation.
    async fn migrate_conversation(
        &self,
        old_contact_id: &str,
        new_contact_id: &str,
        new_location_id: &str,
    ) -> CollaboratorResult<bool>;

    /// Sticky human-takeover flag.
    async fn human_active(&self, contact_id: &str) -> CollaboratorResult<bool>;

    async fn set_human_active(&self, contact_id: &str, active: bool) -> CollaboratorResult<()>;
}

/// Lead intake records.
#[async_trait]
pub trait LeadStateStore: Send + Sync {
    async fn get_or_create(
        &self,
        contact_id: &str,
        location_id: &str,
    ) -> CollaboratorResult<LeadState>;

    /// Monotonic merge of captured fields; returns the updated record.
    async fn merge(
        &self,
        contact_id: &str,
        captured: &CapturedFields,
    ) -> CollaboratorResult<LeadState>;

    async fn mark_booking_sent(&self, contact_id: &str) -> CollaboratorResult<()>;

    /// Returns the incremented counter value.
    async fn increment_post_booking(&self, contact_id: &str) -> CollaboratorResult<u32>;

    async fn update_score(&self, contact_id: &str, score: u32) -> CollaboratorResult<()>;

    async fn booking_state(&self, contact_id: &str) -> CollaboratorResult<BookingState>;
}

/// A human advisor who can receive booked appointments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Advisor {
    pub id: Uuid,
    pub name: String,
    pub location_id: String,
    pub booking_link: String,
    pub assigned_count: u32,
    /// CRM user id, when the advisor is mapped to a CRM seat
    pub crm_user_id: Option<String>,
    pub is_active: bool,
}

/// Advisor rotation per location.
#[async_trait]
pub trait AdvisorDirectory: Send + Sync {
    /// Least-assigned active advisor for a location.
    async fn next_advisor(&self, location_id: &str) -> CollaboratorResult<Option<Advisor>>;

    /// Advisor mapped to a CRM user id (contact's assigned seat).
    async fn advisor_by_crm_user(&self, crm_user_id: &str) -> CollaboratorResult<Option<Advisor>>;

    async fn increment_assigned(&self, advisor_id: Uuid) -> CollaboratorResult<()>;

    /// Fallback booking link when no advisor is available.
    fn default_booking_link(&self) -> &str;
}
