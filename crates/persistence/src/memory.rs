//! In-memory store implementations
//!
//! Used when persistence is disabled and by the test suites. Same trait
//! behavior as the ScyllaDB stores, including the monotonic lead-state merge
//! and the least-assigned advisor rotation.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use admissions_agent_core::{
    Advisor, AdvisorDirectory, BookingState, CapturedFields, CollaboratorResult,
    ConversationStore, LeadState, LeadStateStore, Turn,
};

use crate::DEFAULT_BOOKING_LINK;

#[derive(Debug, Clone)]
struct ConversationRecord {
    id: Uuid,
    location_id: String,
    channel: String,
    human_active: bool,
}

#[derive(Default)]
struct ConversationInner {
    by_contact: HashMap<String, ConversationRecord>,
    turns: HashMap<Uuid, Vec<Turn>>,
}

/// In-memory conversation store.
#[derive(Default)]
pub struct InMemoryConversationStore {
    inner: RwLock<ConversationInner>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a contact with existing history (test support).
    pub fn seed_history(&self, contact_id: &str, location_id: &str, turns: Vec<Turn>) {
        let mut inner = self.inner.write();
        let id = Uuid::new_v4();
        inner.by_contact.insert(
            contact_id.to_string(),
            ConversationRecord {
                id,
                location_id: location_id.to_string(),
                channel: "seed".to_string(),
                human_active: false,
            },
        );
        inner.turns.insert(id, turns);
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get_or_create_conversation(
        &self,
        contact_id: &str,
        location_id: &str,
        channel: &str,
    ) -> CollaboratorResult<Uuid> {
        let mut inner = self.inner.write();
        if let Some(record) = inner.by_contact.get(contact_id) {
            return Ok(record.id);
        }
        let id = Uuid::new_v4();
        inner.by_contact.insert(
            contact_id.to_string(),
            ConversationRecord {
                id,
                location_id: location_id.to_string(),
                channel: channel.to_string(),
                human_active: false,
            },
        );
        inner.turns.insert(id, Vec::new());
        Ok(id)
    }

    async fn append_turn(&self, conversation_id: Uuid, turn: &Turn) -> CollaboratorResult<()> {
        let mut inner = self.inner.write();
        inner.turns.entry(conversation_id).or_default().push(turn.clone());
        Ok(())
    }

    async fn history(&self, contact_id: &str, limit: usize) -> CollaboratorResult<Vec<Turn>> {
        let inner = self.inner.read();
        let Some(record) = inner.by_contact.get(contact_id) else {
            return Ok(Vec::new());
        };
        let turns = inner.turns.get(&record.id).cloned().unwrap_or_default();
        Ok(turns.into_iter().take(limit).collect())
    }

    async fn assistant_turn_exists(
        &self,
        contact_id: &str,
        content: &str,
    ) -> CollaboratorResult<bool> {
        let clean = content.replace('\u{200B}', "").trim().to_string();
        if clean.is_empty() {
            return Ok(false);
        }
        let prefix: String = clean.chars().take(40).collect();

        let inner = self.inner.read();
        let Some(record) = inner.by_contact.get(contact_id) else {
            return Ok(false);
        };
        let found = inner
            .turns
            .get(&record.id)
            .map(|turns| {
                turns.iter().filter(|t| t.is_assistant()).any(|t| {
                    let stored = t.content.replace('\u{200B}', "");
                    let stored = stored.trim();
                    stored == clean
                        || (clean.chars().count() >= 40 && stored.starts_with(&prefix))
                })
            })
            .unwrap_or(false);
        Ok(found)
    }

    async fn migrate_conversation(
        &self,
        old_contact_id: &str,
        new_contact_id: &str,
        new_location_id: &str,
    ) -> CollaboratorResult<bool> {
        let mut inner = self.inner.write();
        let Some(mut record) = inner.by_contact.remove(old_contact_id) else {
            return Ok(false);
        };
        record.location_id = new_location_id.to_string();
        inner.by_contact.insert(new_contact_id.to_string(), record);
        Ok(true)
    }

    async fn human_active(&self, contact_id: &str) -> CollaboratorResult<bool> {
        let inner = self.inner.read();
        Ok(inner
            .by_contact
            .get(contact_id)
            .map(|r| r.human_active)
            .unwrap_or(false))
    }

    async fn set_human_active(&self, contact_id: &str, active: bool) -> CollaboratorResult<()> {
        let mut inner = self.inner.write();
        if let Some(record) = inner.by_contact.get_mut(contact_id) {
            record.human_active = active;
        } else {
            let id = Uuid::new_v4();
            inner.by_contact.insert(
                contact_id.to_string(),
                ConversationRecord {
                    id,
                    location_id: String::new(),
                    channel: String::new(),
                    human_active: active,
                },
            );
            inner.turns.insert(id, Vec::new());
        }
        Ok(())
    }
}

/// In-memory lead state store.
#[derive(Default)]
pub struct InMemoryLeadStateStore {
    leads: RwLock<HashMap<String, LeadState>>,
}

impl InMemoryLeadStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeadStateStore for InMemoryLeadStateStore {
    async fn get_or_create(
        &self,
        contact_id: &str,
        location_id: &str,
    ) -> CollaboratorResult<LeadState> {
        let mut leads = self.leads.write();
        Ok(leads
            .entry(contact_id.to_string())
            .or_insert_with(|| LeadState::new(contact_id, location_id))
            .clone())
    }

    async fn merge(
        &self,
        contact_id: &str,
        captured: &CapturedFields,
    ) -> CollaboratorResult<LeadState> {
        let mut leads = self.leads.write();
        let lead = leads
            .entry(contact_id.to_string())
            .or_insert_with(|| LeadState::new(contact_id, ""));
        lead.merge(captured);
        Ok(lead.clone())
    }

    async fn mark_booking_sent(&self, contact_id: &str) -> CollaboratorResult<()> {
        let mut leads = self.leads.write();
        let lead = leads
            .entry(contact_id.to_string())
            .or_insert_with(|| LeadState::new(contact_id, ""));
        lead.booking_sent_at = Some(chrono::Utc::now());
        Ok(())
    }

    async fn increment_post_booking(&self, contact_id: &str) -> CollaboratorResult<u32> {
        let mut leads = self.leads.write();
        let lead = leads
            .entry(contact_id.to_string())
            .or_insert_with(|| LeadState::new(contact_id, ""));
        lead.post_booking_count += 1;
        Ok(lead.post_booking_count)
    }

    async fn update_score(&self, contact_id: &str, score: u32) -> CollaboratorResult<()> {
        let mut leads = self.leads.write();
        if let Some(lead) = leads.get_mut(contact_id) {
            lead.score = score;
        }
        Ok(())
    }

    async fn booking_state(&self, contact_id: &str) -> CollaboratorResult<BookingState> {
        let leads = self.leads.read();
        Ok(leads
            .get(contact_id)
            .map(|l| BookingState {
                sent: l.booking_sent_at.is_some(),
                post_booking_count: l.post_booking_count,
            })
            .unwrap_or_default())
    }
}

/// In-memory advisor directory with least-assigned rotation.
pub struct InMemoryAdvisorDirectory {
    advisors: RwLock<Vec<Advisor>>,
    default_link: String,
}

impl InMemoryAdvisorDirectory {
    pub fn new(advisors: Vec<Advisor>) -> Self {
        Self { advisors: RwLock::new(advisors), default_link: DEFAULT_BOOKING_LINK.to_string() }
    }

    pub fn with_default_link(mut self, link: impl Into<String>) -> Self {
        self.default_link = link.into();
        self
    }
}

#[async_trait]
impl AdvisorDirectory for InMemoryAdvisorDirectory {
    async fn next_advisor(&self, location_id: &str) -> CollaboratorResult<Option<Advisor>> {
        let advisors = self.advisors.read();
        Ok(advisors
            .iter()
            .filter(|a| a.is_active && a.location_id == location_id)
            .min_by_key(|a| a.assigned_count)
            .cloned())
    }

    async fn advisor_by_crm_user(&self, crm_user_id: &str) -> CollaboratorResult<Option<Advisor>> {
        let advisors = self.advisors.read();
        Ok(advisors
            .iter()
            .find(|a| a.is_active && a.crm_user_id.as_deref() == Some(crm_user_id))
            .cloned())
    }

    async fn increment_assigned(&self, advisor_id: Uuid) -> CollaboratorResult<()> {
        let mut advisors = self.advisors.write();
        if let Some(advisor) = advisors.iter_mut().find(|a| a.id == advisor_id) {
            advisor.assigned_count += 1;
        }
        Ok(())
    }

    fn default_booking_link(&self) -> &str {
        &self.default_link
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advisor(name: &str, location: &str, assigned: u32) -> Advisor {
        Advisor {
            id: Uuid::new_v4(),
            name: name.to_string(),
            location_id: location.to_string(),
            booking_link: format!("https://agenda.leadlink.mx/widget/booking/{}", name),
            assigned_count: assigned,
            crm_user_id: None,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn conversation_round_trip_and_exists_probe() {
        let store = InMemoryConversationStore::new();
        let conv = store.get_or_create_conversation("c1", "loc1", "whatsapp").await.unwrap();
        store.append_turn(conv, &Turn::user("hola")).await.unwrap();
        store
            .append_turn(conv, &Turn::assistant("\u{200B}¡Hola! Soy Emma 🦉, la asistente de admisiones."))
            .await
            .unwrap();

        let history = store.history("c1", 10).await.unwrap();
        assert_eq!(history.len(), 2);

        // Marker-insensitive exact match
        assert!(store
            .assistant_turn_exists("c1", "¡Hola! Soy Emma 🦉, la asistente de admisiones.")
            .await
            .unwrap());
        assert!(!store.assistant_turn_exists("c1", "otro texto").await.unwrap());
    }

    #[tokio::test]
    async fn prefix_match_requires_forty_chars() {
        let store = InMemoryConversationStore::new();
        let conv = store.get_or_create_conversation("c1", "loc1", "x").await.unwrap();
        let long = "Este es un mensaje suficientemente largo para la comparación por prefijo del bot";
        store.append_turn(conv, &Turn::assistant(long)).await.unwrap();

        let probe = format!("{} (editado por el transporte)", long);
        assert!(store.assistant_turn_exists("c1", &probe).await.unwrap());
    }

    #[tokio::test]
    async fn human_flag_persists_and_migration_rekeys() {
        let store = InMemoryConversationStore::new();
        store.get_or_create_conversation("c1", "loc1", "x").await.unwrap();
        store.set_human_active("c1", true).await.unwrap();
        assert!(store.human_active("c1").await.unwrap());

        assert!(store.migrate_conversation("c1", "c2", "loc2").await.unwrap());
        assert!(!store.human_active("c1").await.unwrap());
        assert!(store.human_active("c2").await.unwrap());
        assert!(!store.migrate_conversation("missing", "c3", "loc3").await.unwrap());
    }

    #[tokio::test]
    async fn lead_store_merge_is_monotonic_through_the_trait() {
        let store = InMemoryLeadStateStore::new();
        store.get_or_create("c1", "loc1").await.unwrap();

        let lead = store
            .merge(
                "c1",
                &CapturedFields { campus: Some("puebla".into()), ..Default::default() },
            )
            .await
            .unwrap();
        assert_eq!(lead.current_step, 2);

        let lead = store
            .merge("c1", &CapturedFields { campus: Some(String::new()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(lead.campus.as_deref(), Some("puebla"));
    }

    #[tokio::test]
    async fn advisor_rotation_prefers_least_assigned() {
        let a = advisor("ana", "loc1", 3);
        let b = advisor("bruno", "loc1", 1);
        let c = advisor("carla", "loc2", 0);
        let b_id = b.id;
        let directory = InMemoryAdvisorDirectory::new(vec![a, b, c]);

        let next = directory.next_advisor("loc1").await.unwrap().unwrap();
        assert_eq!(next.name, "bruno");

        directory.increment_assigned(b_id).await.unwrap();
        directory.increment_assigned(b_id).await.unwrap();
        directory.increment_assigned(b_id).await.unwrap();
        let next = directory.next_advisor("loc1").await.unwrap().unwrap();
        assert_eq!(next.name, "ana");

        assert!(directory.next_advisor("loc9").await.unwrap().is_none());
        assert_eq!(directory.default_booking_link(), DEFAULT_BOOKING_LINK);
    }
}
