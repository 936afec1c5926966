//! Shared application state

use std::sync::Arc;

use admissions_agent_agent::ConversationOrchestrator;
use admissions_agent_core::ConversationStore;

/// Handles shared by the HTTP handlers. Everything is constructed once at
/// startup and injected; no ambient lookups.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ConversationOrchestrator>,
    /// Direct store handle for the admin human-reset endpoint
    pub conversations: Arc<dyn ConversationStore>,
}
