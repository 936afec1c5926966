//! Conversation persistence using ScyllaDB

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use admissions_agent_core::{
    CollaboratorError, CollaboratorResult, ConversationStore, Turn, TurnRole,
};

use crate::{PersistenceError, ScyllaClient};

/// Recent turns scanned for the bot-authorship probe.
const EXISTS_SCAN_LIMIT: usize = 50;

/// ScyllaDB implementation of the conversation store.
#[derive(Clone)]
pub struct ScyllaConversationStore {
    client: ScyllaClient,
}

impl ScyllaConversationStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }

    async fn conversation_id(&self, contact_id: &str) -> Result<Option<Uuid>, PersistenceError> {
        let query = format!(
            "SELECT id FROM {}.conversations WHERE contact_id = ?",
            self.client.keyspace()
        );
        let result = self.client.session().query_unpaged(query, (contact_id,)).await?;
        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                let (id,): (Uuid,) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    async fn turns_for(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Turn>, PersistenceError> {
        let query = format!(
            "SELECT role, content, metadata_json, created_at FROM {}.messages \
             WHERE conversation_id = ? LIMIT ?",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, (conversation_id, limit as i32))
            .await?;

        let mut turns = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                let (role, content, metadata_json, created_at): (
                    String,
                    String,
                    Option<String>,
                    i64,
                ) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;
                turns.push(Turn {
                    role: TurnRole::from_str(&role),
                    content,
                    metadata: metadata_json.and_then(|m| serde_json::from_str(&m).ok()),
                    created_at: chrono::DateTime::from_timestamp_millis(created_at)
                        .unwrap_or_else(Utc::now),
                });
            }
        }
        Ok(turns)
    }
}

#[async_trait]
impl ConversationStore for ScyllaConversationStore {
    async fn get_or_create_conversation(
        &self,
        contact_id: &str,
        location_id: &str,
        channel: &str,
    ) -> CollaboratorResult<Uuid> {
        if let Some(id) = self.conversation_id(contact_id).await.map_err(CollaboratorError::from)? {
            return Ok(id);
        }

        let id = Uuid::new_v4();
        let query = format!(
            "INSERT INTO {}.conversations \
             (contact_id, id, location_id, channel, status, is_human_active, created_at) \
             VALUES (?, ?, ?, ?, 'active', false, ?)",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                query,
                (contact_id, id, location_id, channel, Utc::now().timestamp_millis()),
            )
            .await
            .map_err(PersistenceError::from)
            .map_err(CollaboratorError::from)?;

        tracing::info!(contact_id = %contact_id, conversation_id = %id, "Conversation created");
        Ok(id)
    }

    async fn append_turn(&self, conversation_id: Uuid, turn: &Turn) -> CollaboratorResult<()> {
        let metadata_json = turn
            .metadata
            .as_ref()
            .and_then(|m| serde_json::to_string(m).ok());
        let query = format!(
            "INSERT INTO {}.messages \
             (conversation_id, message_id, role, content, metadata_json, created_at) \
             VALUES (?, now(), ?, ?, ?, ?)",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                query,
                (
                    conversation_id,
                    turn.role.as_str(),
                    &turn.content,
                    metadata_json,
                    turn.created_at.timestamp_millis(),
                ),
            )
            .await
            .map_err(PersistenceError::from)
            .map_err(CollaboratorError::from)?;

        tracing::debug!(
            conversation_id = %conversation_id,
            role = turn.role.as_str(),
            chars = turn.content.len(),
            "Turn persisted"
        );
        Ok(())
    }

    async fn history(&self, contact_id: &str, limit: usize) -> CollaboratorResult<Vec<Turn>> {
        let Some(id) = self.conversation_id(contact_id).await.map_err(CollaboratorError::from)?
        else {
            tracing::debug!(contact_id = %contact_id, "No conversation yet");
            return Ok(Vec::new());
        };
        self.turns_for(id, limit).await.map_err(CollaboratorError::from)
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

        let Some(id) = self.conversation_id(contact_id).await.map_err(CollaboratorError::from)?
        else {
            return Ok(false);
        };
        let turns = self
            .turns_for(id, EXISTS_SCAN_LIMIT)
            .await
            .map_err(CollaboratorError::from)?;

        let prefix: String = clean.chars().take(40).collect();
        let found = turns.iter().filter(|t| t.is_assistant()).any(|t| {
            let stored = t.content.replace('\u{200B}', "");
            let stored = stored.trim();
            stored == clean || (clean.chars().count() >= 40 && stored.starts_with(&prefix))
        });
        Ok(found)
    }

    async fn migrate_conversation(
        &self,
        old_contact_id: &str,
        new_contact_id: &str,
        new_location_id: &str,
    ) -> CollaboratorResult<bool> {
        let Some(id) =
            self.conversation_id(old_contact_id).await.map_err(CollaboratorError::from)?
        else {
            tracing::info!(contact_id = %old_contact_id, "No conversation to migrate");
            return Ok(false);
        };

        // Same conversation UUID under the new contact key; turns stay
        // attached to the UUID
        let insert = format!(
            "INSERT INTO {}.conversations \
             (contact_id, id, location_id, channel, status, is_human_active, created_at) \
             VALUES (?, ?, ?, 'migrated', 'active', false, ?)",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                insert,
                (new_contact_id, id, new_location_id, Utc::now().timestamp_millis()),
            )
            .await
            .map_err(PersistenceError::from)
            .map_err(CollaboratorError::from)?;

        let delete = format!(
            "DELETE FROM {}.conversations WHERE contact_id = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(delete, (old_contact_id,))
            .await
            .map_err(PersistenceError::from)
            .map_err(CollaboratorError::from)?;

        tracing::info!(from = %old_contact_id, to = %new_contact_id, "Conversation migrated");
        Ok(true)
    }

    async fn human_active(&self, contact_id: &str) -> CollaboratorResult<bool> {
        let query = format!(
            "SELECT is_human_active FROM {}.conversations WHERE contact_id = ?",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, (contact_id,))
            .await
            .map_err(PersistenceError::from)
            .map_err(CollaboratorError::from)?;

        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                let (active,): (Option<bool>,) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))
                    .map_err(CollaboratorError::from)?;
                return Ok(active.unwrap_or(false));
            }
        }
        Ok(false)
    }

    async fn set_human_active(&self, contact_id: &str, active: bool) -> CollaboratorResult<()> {
        let takeover_at = active.then(|| Utc::now().timestamp_millis());
        let query = format!(
            "UPDATE {}.conversations SET is_human_active = ?, human_takeover_at = ? \
             WHERE contact_id = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(query, (active, takeover_at, contact_id))
            .await
            .map_err(PersistenceError::from)
            .map_err(CollaboratorError::from)?;

        tracing::info!(contact_id = %contact_id, active, "Human takeover flag updated");
        Ok(())
    }
}
