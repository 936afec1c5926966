//! CRM / messaging collaborator trait

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::channel::Channel;
use crate::error::CollaboratorResult;

/// Contact record as reported by the CRM.
#[derive(Debug, Clone, Default)]
pub struct CrmContact {
    pub id: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    /// CRM user id the lead is assigned to
    pub assigned_to: Option<String>,
    /// Social handle/profile when the contact originated on FB/IG
    pub profile_handle: Option<String>,
}

/// One message as observed on the CRM transport.
#[derive(Debug, Clone)]
pub struct CrmMessage {
    pub direction: String,
    pub body: String,
    pub date_added: DateTime<Utc>,
}

impl CrmMessage {
    pub fn is_outbound(&self) -> bool {
        self.direction == "outbound"
    }
}

/// CRM and outbound messaging operations, multi-location aware.
#[async_trait]
pub trait CrmApi: Send + Sync {
    /// Send a message. `conversation_id` carries the native transport handle
    /// when one is required (FB/IG); phone-based channels pass `None`.
    async fn send_message(
        &self,
        contact_id: &str,
        text: &str,
        channel: Channel,
        conversation_id: Option<&str>,
        location_id: &str,
    ) -> CollaboratorResult<()>;

    async fn add_tag(&self, contact_id: &str, tag: &str, location_id: &str)
        -> CollaboratorResult<()>;

    async fn remove_tag(
        &self,
        contact_id: &str,
        tag: &str,
        location_id: &str,
    ) -> CollaboratorResult<()>;

    async fn update_contact_fields(
        &self,
        contact_id: &str,
        fields: &HashMap<String, String>,
        location_id: &str,
    ) -> CollaboratorResult<()>;

    async fn get_contact(
        &self,
        contact_id: &str,
        location_id: &str,
    ) -> CollaboratorResult<Option<CrmContact>>;

    /// Create a contact under a location; returns the new contact id.
    async fn create_contact(
        &self,
        location_id: &str,
        name: Option<&str>,
        phone: Option<&str>,
        email: Option<&str>,
    ) -> CollaboratorResult<String>;

    async fn delete_contact(&self, contact_id: &str, location_id: &str)
        -> CollaboratorResult<()>;

    async fn add_note(
        &self,
        contact_id: &str,
        body: &str,
        location_id: &str,
    ) -> CollaboratorResult<()>;

    /// Resolve the native conversation handle for a contact.
    async fn find_conversation_id(
        &self,
        contact_id: &str,
        location_id: &str,
    ) -> CollaboratorResult<Option<String>>;

    /// Most recent native messages, newest first.
    async fn recent_messages(
        &self,
        conversation_id: &str,
        location_id: &str,
        limit: usize,
    ) -> CollaboratorResult<Vec<CrmMessage>>;
}
