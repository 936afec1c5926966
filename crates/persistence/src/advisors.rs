//! Advisor rotation using ScyllaDB
//!
//! The advisors table is small (a handful of rows per campus), so the
//! location and CRM-user lookups scan with ALLOW FILTERING rather than
//! maintaining extra index tables.

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use admissions_agent_core::{Advisor, AdvisorDirectory, CollaboratorError, CollaboratorResult};

use crate::{PersistenceError, ScyllaClient, DEFAULT_BOOKING_LINK};

type AdvisorRow = (Uuid, String, String, String, Option<String>, Option<i32>, Option<bool>);

/// ScyllaDB implementation of the advisor directory.
#[derive(Clone)]
pub struct ScyllaAdvisorDirectory {
    client: ScyllaClient,
    default_link: String,
}

impl ScyllaAdvisorDirectory {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client, default_link: DEFAULT_BOOKING_LINK.to_string() }
    }

    pub fn with_default_link(mut self, link: impl Into<String>) -> Self {
        self.default_link = link.into();
        self
    }

    fn row_to_advisor(&self, row: scylla::frame::response::result::Row) -> Result<Advisor, PersistenceError> {
        let (id, location_id, name, booking_link, crm_user_id, assigned_count, is_active): AdvisorRow =
            row.into_typed()
                .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;
        Ok(Advisor {
            id,
            name,
            location_id,
            booking_link,
            assigned_count: assigned_count.unwrap_or(0).max(0) as u32,
            crm_user_id,
            is_active: is_active.unwrap_or(false),
        })
    }

    async fn query_advisors(
        &self,
        where_clause: &str,
        value: &str,
    ) -> Result<Vec<Advisor>, PersistenceError> {
        let query = format!(
            "SELECT id, location_id, name, booking_link, crm_user_id, assigned_count, is_active \
             FROM {}.advisors WHERE {} = ? ALLOW FILTERING",
            self.client.keyspace(),
            where_clause
        );
        let result = self.client.session().query_unpaged(query, (value,)).await?;

        let mut advisors = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                advisors.push(self.row_to_advisor(row)?);
            }
        }
        Ok(advisors)
    }
}

#[async_trait]
impl AdvisorDirectory for ScyllaAdvisorDirectory {
    async fn next_advisor(&self, location_id: &str) -> CollaboratorResult<Option<Advisor>> {
        let advisors = self
            .query_advisors("location_id", location_id)
            .await
            .map_err(CollaboratorError::from)?;

        let next = advisors
            .into_iter()
            .filter(|a| a.is_active)
            .min_by_key(|a| a.assigned_count);

        match &next {
            Some(advisor) => tracing::info!(
                advisor = %advisor.name,
                location_id = %location_id,
                assigned = advisor.assigned_count,
                "Advisor selected"
            ),
            None => tracing::warn!(location_id = %location_id, "No active advisors for location"),
        }
        Ok(next)
    }

    async fn advisor_by_crm_user(&self, crm_user_id: &str) -> CollaboratorResult<Option<Advisor>> {
        let advisors = self
            .query_advisors("crm_user_id", crm_user_id)
            .await
            .map_err(CollaboratorError::from)?;
        Ok(advisors.into_iter().find(|a| a.is_active))
    }

    async fn increment_assigned(&self, advisor_id: Uuid) -> CollaboratorResult<()> {
        let select = format!(
            "SELECT assigned_count FROM {}.advisors WHERE id = ?",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(select, (advisor_id,))
            .await
            .map_err(PersistenceError::from)
            .map_err(CollaboratorError::from)?;

        let current = result
            .rows
            .and_then(|rows| rows.into_iter().next())
            .and_then(|row| row.into_typed::<(Option<i32>,)>().ok())
            .and_then(|(count,)| count)
            .unwrap_or(0);

        let update = format!(
            "UPDATE {}.advisors SET assigned_count = ?, last_assigned_at = ? WHERE id = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(update, (current + 1, Utc::now().timestamp_millis(), advisor_id))
            .await
            .map_err(PersistenceError::from)
            .map_err(CollaboratorError::from)?;

        tracing::info!(advisor_id = %advisor_id, assigned = current + 1, "Advisor assignment counted");
        Ok(())
    }

    fn default_booking_link(&self) -> &str {
        &self.default_link
    }
}
