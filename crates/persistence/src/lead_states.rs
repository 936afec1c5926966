//! Lead state persistence using ScyllaDB

use async_trait::async_trait;
use chrono::Utc;

use admissions_agent_core::{
    BookingState, CapturedFields, CollaboratorError, CollaboratorResult, LeadState,
    LeadStateStore,
};

use crate::{PersistenceError, ScyllaClient};

/// ScyllaDB implementation of the lead state store.
#[derive(Clone)]
pub struct ScyllaLeadStateStore {
    client: ScyllaClient,
}

impl ScyllaLeadStateStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }

    async fn fetch(&self, contact_id: &str) -> Result<Option<LeadState>, PersistenceError> {
        let query = format!(
            "SELECT contact_id, location_id, campus, level, guardian_name, phone, email, \
             current_step, is_complete, booking_sent_at, post_booking_count, score \
             FROM {}.lead_states WHERE contact_id = ?",
            self.client.keyspace()
        );
        let result = self.client.session().query_unpaged(query, (contact_id,)).await?;

        let Some(rows) = result.rows else { return Ok(None) };
        let Some(row) = rows.into_iter().next() else { return Ok(None) };

        let (
            contact_id,
            location_id,
            campus,
            level,
            guardian_name,
            phone,
            email,
            current_step,
            is_complete,
            booking_sent_at,
            post_booking_count,
            score,
        ): (
            String,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<i32>,
            Option<bool>,
            Option<i64>,
            Option<i32>,
            Option<i32>,
        ) = row
            .into_typed()
            .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

        Ok(Some(LeadState {
            contact_id,
            location_id: location_id.unwrap_or_default(),
            campus,
            level,
            guardian_name,
            phone,
            email,
            current_step: current_step.unwrap_or(1).clamp(1, 5) as u8,
            is_complete: is_complete.unwrap_or(false),
            booking_sent_at: booking_sent_at.and_then(chrono::DateTime::from_timestamp_millis),
            post_booking_count: post_booking_count.unwrap_or(0).max(0) as u32,
            score: score.unwrap_or(0).max(0) as u32,
        }))
    }

    async fn write(&self, lead: &LeadState) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.lead_states \
             (contact_id, location_id, campus, level, guardian_name, phone, email, \
              current_step, is_complete, booking_sent_at, post_booking_count, score) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                query,
                (
                    &lead.contact_id,
                    &lead.location_id,
                    &lead.campus,
                    &lead.level,
                    &lead.guardian_name,
                    &lead.phone,
                    &lead.email,
                    lead.current_step as i32,
                    lead.is_complete,
                    lead.booking_sent_at.map(|t| t.timestamp_millis()),
                    lead.post_booking_count as i32,
                    lead.score as i32,
                ),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LeadStateStore for ScyllaLeadStateStore {
    async fn get_or_create(
        &self,
        contact_id: &str,
        location_id: &str,
    ) -> CollaboratorResult<LeadState> {
        if let Some(lead) = self.fetch(contact_id).await.map_err(CollaboratorError::from)? {
            return Ok(lead);
        }

        let lead = LeadState::new(contact_id, location_id);
        self.write(&lead).await.map_err(CollaboratorError::from)?;
        tracing::info!(contact_id = %contact_id, "Lead state created");
        Ok(lead)
    }

    async fn merge(
        &self,
        contact_id: &str,
        captured: &CapturedFields,
    ) -> CollaboratorResult<LeadState> {
        let mut lead = self.get_or_create(contact_id, "").await?;
        if lead.merge(captured) {
            self.write(&lead).await.map_err(CollaboratorError::from)?;
            tracing::info!(
                contact_id = %contact_id,
                step = lead.current_step,
                complete = lead.is_complete,
                "Lead state updated"
            );
        }
        Ok(lead)
    }

    async fn mark_booking_sent(&self, contact_id: &str) -> CollaboratorResult<()> {
        let query = format!(
            "UPDATE {}.lead_states SET booking_sent_at = ? WHERE contact_id = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(query, (Utc::now().timestamp_millis(), contact_id))
            .await
            .map_err(PersistenceError::from)
            .map_err(CollaboratorError::from)?;
        tracing::info!(contact_id = %contact_id, "Booking sent marked");
        Ok(())
    }

    async fn increment_post_booking(&self, contact_id: &str) -> CollaboratorResult<u32> {
        let current = self
            .fetch(contact_id)
            .await
            .map_err(CollaboratorError::from)?
            .map(|l| l.post_booking_count)
            .unwrap_or(0);
        let new_count = current + 1;

        let query = format!(
            "UPDATE {}.lead_states SET post_booking_count = ? WHERE contact_id = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(query, (new_count as i32, contact_id))
            .await
            .map_err(PersistenceError::from)
            .map_err(CollaboratorError::from)?;
        tracing::info!(contact_id = %contact_id, count = new_count, "Post-booking count");
        Ok(new_count)
    }

    async fn update_score(&self, contact_id: &str, score: u32) -> CollaboratorResult<()> {
        let query = format!(
            "UPDATE {}.lead_states SET score = ? WHERE contact_id = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(query, (score as i32, contact_id))
            .await
            .map_err(PersistenceError::from)
            .map_err(CollaboratorError::from)?;
        Ok(())
    }

    async fn booking_state(&self, contact_id: &str) -> CollaboratorResult<BookingState> {
        let lead = self.fetch(contact_id).await.map_err(CollaboratorError::from)?;
        Ok(match lead {
            Some(lead) => BookingState {
                sent: lead.booking_sent_at.is_some(),
                post_booking_count: lead.post_booking_count,
            },
            None => BookingState::default(),
        })
    }
}
