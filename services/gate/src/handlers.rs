use crate::config::{ApiConfig, RatesConfig};
use crate::event::{Command, Event};
use crate::forward::EventForwarder;
use crate::rate_gate::RateGate;
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<RateGate>,
    pub forwarder: Arc<dyn EventForwarder>,
    pub rates: RatesConfig,
}

/// Outcome of submitting an event to the gate
#[derive(Debug, Serialize)]
pub struct GateResponse {
    pub command: Command,
    pub forwarded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/events", post(submit_event))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "porter-gate"
    }))
}

/// Gate an incoming detection event.
///
/// Allowed events are forwarded downstream with exactly one POST; denied
/// events are dropped for their window and reported as not forwarded.
#[instrument(skip(state, event), fields(event_id = %Uuid::new_v4()))]
pub async fn submit_event(
    State(state): State<AppState>,
    Json(event): Json<Event>,
) -> Response {
    let username = match event.validate() {
        Ok(username) => username.to_string(),
        Err(e) => {
            info!(error = %e, "Rejecting invalid event");
            metrics::counter!("gate.events.invalid").increment(1);
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: e.to_string(),
                    code: "INVALID_EVENT".to_string(),
                }),
            )
                .into_response();
        }
    };

    // Unknown detections share one global slot; open events get one per user.
    let (name, selector, grace_secs) = match event.command {
        Command::Open => ("open", username.as_str(), state.rates.open_grace_secs),
        Command::Unknown => ("unknown", "last", state.rates.unknown_grace_secs),
        Command::Unrecognized => unreachable!("rejected by validate"),
    };

    let allowed = state
        .gate
        .claim(name, selector, Duration::from_secs(grace_secs))
        .await;

    if !allowed {
        info!(command = ?event.command, name, "Event dropped by rate gate");
        metrics::counter!("gate.events.limited").increment(1);
        return (
            StatusCode::OK,
            Json(GateResponse {
                command: event.command,
                forwarded: false,
                reason: Some("rate limited".to_string()),
            }),
        )
            .into_response();
    }

    match state.forwarder.forward(&event).await {
        Ok(()) => {
            info!(command = ?event.command, "Event forwarded");
            metrics::counter!("gate.events.forwarded").increment(1);
            (
                StatusCode::OK,
                Json(GateResponse {
                    command: event.command,
                    forwarded: true,
                    reason: None,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to forward event");
            metrics::counter!("gate.events.forward_failed").increment(1);
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: e.to_string(),
                    code: "FORWARD_FAILED".to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Start the gate API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting gate API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
