//! Persistence layer for the admissions agent
//!
//! Provides durable storage for:
//! - Conversations and turns (plus the human-takeover flag)
//! - Lead intake states
//! - Advisor rotation records
//!
//! Two backends behind the core store traits: ScyllaDB for production and an
//! in-memory variant used when persistence is disabled and by the tests.

pub mod advisors;
pub mod client;
pub mod conversations;
pub mod error;
pub mod lead_states;
pub mod memory;
pub mod schema;

use std::sync::Arc;

use admissions_agent_config::PersistenceSettings;
use admissions_agent_core::{AdvisorDirectory, ConversationStore, LeadStateStore};

pub use advisors::ScyllaAdvisorDirectory;
pub use client::{ScyllaClient, ScyllaConfig};
pub use conversations::ScyllaConversationStore;
pub use error::PersistenceError;
pub use lead_states::ScyllaLeadStateStore;
pub use memory::{InMemoryAdvisorDirectory, InMemoryConversationStore, InMemoryLeadStateStore};

/// Fallback booking link used when no advisor is available.
pub const DEFAULT_BOOKING_LINK: &str = "https://agenda.leadlink.mx/widget/booking/general";

/// Combined persistence layer with all stores.
pub struct PersistenceLayer {
    pub conversations: Arc<dyn ConversationStore>,
    pub lead_states: Arc<dyn LeadStateStore>,
    pub advisors: Arc<dyn AdvisorDirectory>,
}

/// Initialize the persistence layer from settings.
///
/// `enabled: false` selects the in-memory stores; otherwise connects to
/// ScyllaDB and ensures the keyspace and tables exist.
pub async fn init(settings: &PersistenceSettings) -> Result<PersistenceLayer, PersistenceError> {
    if !settings.enabled {
        tracing::info!("Persistence disabled, using in-memory stores");
        return Ok(PersistenceLayer {
            conversations: Arc::new(InMemoryConversationStore::new()),
            lead_states: Arc::new(InMemoryLeadStateStore::new()),
            advisors: Arc::new(InMemoryAdvisorDirectory::new(Vec::new())),
        });
    }

    let config = ScyllaConfig {
        hosts: settings.scylla_hosts.clone(),
        keyspace: settings.keyspace.clone(),
        replication_factor: settings.replication_factor,
    };
    let client = ScyllaClient::connect(config).await?;
    client.ensure_schema().await?;

    Ok(PersistenceLayer {
        conversations: Arc::new(ScyllaConversationStore::new(client.clone())),
        lead_states: Arc::new(ScyllaLeadStateStore::new(client.clone())),
        advisors: Arc::new(ScyllaAdvisorDirectory::new(client)),
    })
}
