//! HTTP endpoints
//!
//! One webhook route drives the whole pipeline; the rest is operational
//! surface (health, readiness, manual human-takeover reset).

use axum::{
    extract::{Json, Path, State},
    http::{HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use admissions_agent_config::ServerSettings;

use crate::state::AppState;
use crate::webhook::{extract_webhook_data, WebhookExtraction};

/// Create the application router.
pub fn create_router(state: AppState, settings: &ServerSettings) -> Router {
    let cors_layer = build_cors_layer(&settings.cors_origins);

    Router::new()
        .route("/webhooks/conversations", post(handle_conversation_webhook))
        .route("/admin/contacts/:contact_id/reset-human", post(reset_human))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!(origin = %origin, "Invalid CORS origin skipped");
                None
            })
        })
        .collect();

    if parsed.is_empty() {
        // Webhook-only deployments have no browser origins
        return CorsLayer::new()
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any);
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

/// Full pipeline for one inbound CRM webhook.
async fn handle_conversation_webhook(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    match extract_webhook_data(&payload) {
        WebhookExtraction::Ignore(reason) => {
            Json(json!({ "status": "ignored", "reason": reason }))
        }
        WebhookExtraction::Process(inbound) => {
            let outcome = state.orchestrator.process(*inbound).await;
            Json(serde_json::to_value(outcome).unwrap_or_else(
                |e| json!({ "status": "error", "message": e.to_string() }),
            ))
        }
    }
}

/// Manual human-takeover reset: gives the conversation back to the bot.
async fn reset_human(
    State(state): State<AppState>,
    Path(contact_id): Path<String>,
) -> impl IntoResponse {
    match state.conversations.set_human_active(&contact_id, false).await {
        Ok(()) => {
            tracing::info!(contact_id = %contact_id, "Human takeover reset");
            (StatusCode::OK, Json(json!({ "status": "success", "contact_id": contact_id })))
        }
        Err(e) => {
            tracing::error!(error = %e, "Human takeover reset failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": e.to_string() })),
            )
        }
    }
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn readiness_check() -> impl IntoResponse {
    Json(json!({ "status": "ready" }))
}
