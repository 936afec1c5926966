//! Admissions agent server binary
//!
//! Bootstrap order: logging, settings, domain data, persistence, model
//! backend, CRM client, dialogue machine, orchestrator, HTTP server.

mod http;
mod state;
mod webhook;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

use admissions_agent_agent::{ConversationOrchestrator, DialogueMachine};
use admissions_agent_config::{LocationRegistry, ObjectionCatalog, Settings};
use admissions_agent_core::{
    CollaboratorError, CollaboratorResult, GenerationResult, LanguageModel, Message,
    ToolDefinition,
};
use admissions_agent_crm::HttpCrmClient;
use admissions_agent_llm::{ClaudeBackend, ClaudeConfig};
use admissions_agent_tools::ToolRouter;

use crate::state::AppState;

/// Stand-in model when no API key is configured: every invocation fails and
/// the dialogue machine degrades to its fixed fallback reply.
struct UnconfiguredModel;

#[async_trait]
impl LanguageModel for UnconfiguredModel {
    async fn generate(
        &self,
        _system: &str,
        _messages: &[Message],
        _tools: &[ToolDefinition],
    ) -> CollaboratorResult<GenerationResult> {
        Err(CollaboratorError::Model("language model not configured".to_string()))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::var("APP_CONFIG").unwrap_or_else(|_| "config/settings.toml".into());
    let settings = Settings::load(Some(Path::new(&config_path)))?;
    tracing::info!(environment = ?settings.environment, "Settings loaded");

    let registry = Arc::new(LocationRegistry::load_or_default(Path::new(&settings.domain.locations)));
    let objections = Arc::new(ObjectionCatalog::load_or_default(Path::new(&settings.domain.objections)));

    let persistence = admissions_agent_persistence::init(&settings.persistence).await?;

    let model: Arc<dyn LanguageModel> = match ClaudeConfig::from_settings(&settings.llm)
        .and_then(ClaudeBackend::new)
    {
        Ok(backend) => {
            tracing::info!(model = %settings.llm.model, "Model backend initialized");
            Arc::new(backend)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Model backend unavailable, replies will degrade");
            Arc::new(UnconfiguredModel)
        }
    };

    let crm = Arc::new(HttpCrmClient::new(&settings.crm, registry.clone())?);
    let tools = Arc::new(ToolRouter::new(registry.clone(), objections.clone()));
    let machine = DialogueMachine::new(model, tools, objections);

    let orchestrator = Arc::new(ConversationOrchestrator::new(
        crm,
        persistence.conversations.clone(),
        persistence.lead_states.clone(),
        persistence.advisors.clone(),
        registry,
        machine,
    ));

    let app_state = AppState {
        orchestrator,
        conversations: persistence.conversations.clone(),
    };
    let app = http::create_router(app_state, &settings.server);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    tracing::info!(addr = %addr, "Admissions agent listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
