use crate::chat::{ChatMessage, ChatPoster};
use crate::config::{ApiConfig, ChatConfig};
use crate::webhook::WebhookPoster;
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use porter_gate::event::{Command, Event, EventError};
use porter_gate::rate_gate::RateGate;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<dyn ChatPoster>,
    pub webhook: Arc<dyn WebhookPoster>,
    pub gate: Arc<RateGate>,
    pub chat_config: ChatConfig,
    pub door_grace_secs: u64,
}

/// Outcome of a notify request
#[derive(Debug, Serialize)]
pub struct NotifyResponse {
    pub delivered: bool,
}

/// Outcome of a door trigger request
#[derive(Debug, Serialize)]
pub struct DoorResponse {
    pub triggered: bool,
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
        .route("/notify", post(notify))
        .route("/door", post(trigger_door))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "porter-relay"
    }))
}

fn client_error(error: EventError) -> Response {
    info!(error = %error, "Rejecting invalid event");
    metrics::counter!("relay.events.invalid").increment(1);
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.to_string(),
            code: "INVALID_EVENT".to_string(),
        }),
    )
        .into_response()
}

/// Post a chat notification for a detection event.
#[instrument(skip(state, event))]
pub async fn notify(State(state): State<AppState>, Json(event): Json<Event>) -> Response {
    let username = match event.validate() {
        Ok(username) => username.to_string(),
        Err(e) => return client_error(e),
    };

    let s3key = match event.require_s3key() {
        Ok(s3key) => s3key.to_string(),
        Err(e) => return client_error(e),
    };

    let image_url = state.chat_config.image_url(&s3key);
    let channel = state.chat_config.channel.as_str();

    let message = match event.command {
        Command::Open => ChatMessage::greeting(channel, &username, image_url),
        Command::Unknown => ChatMessage::unknown_visitor(channel, &s3key, image_url),
        Command::Unrecognized => unreachable!("rejected by validate"),
    };

    match state.chat.post_message(&message).await {
        Ok(()) => {
            info!(command = ?event.command, "Chat notification delivered");
            metrics::counter!("relay.notify.delivered").increment(1);
            (StatusCode::OK, Json(NotifyResponse { delivered: true })).into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to post chat notification");
            metrics::counter!("relay.notify.failed").increment(1);
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: e.to_string(),
                    code: "CHAT_FAILED".to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Fire the door webhook for an accepted "open" event.
///
/// The claim on `last-open` happens before the outbound call; a denied
/// claim drops the event for its window with no outbound call at all.
#[instrument(skip(state, event))]
pub async fn trigger_door(State(state): State<AppState>, Json(event): Json<Event>) -> Response {
    let username = match event.validate() {
        Ok(username) => username.to_string(),
        Err(e) => return client_error(e),
    };

    if event.command != Command::Open {
        info!(command = ?event.command, "Rejecting non-open door event");
        metrics::counter!("relay.events.invalid").increment(1);
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Command was missing or not open".to_string(),
                code: "INVALID_EVENT".to_string(),
            }),
        )
            .into_response();
    }

    let allowed = state
        .gate
        .claim(
            "last-open",
            &username,
            Duration::from_secs(state.door_grace_secs),
        )
        .await;

    if !allowed {
        info!(username = %username, "Door trigger dropped by rate gate");
        metrics::counter!("relay.door.limited").increment(1);
        return (
            StatusCode::OK,
            Json(DoorResponse {
                triggered: false,
                reason: Some("rate limited".to_string()),
            }),
        )
            .into_response();
    }

    match state.webhook.trigger().await {
        Ok(()) => {
            info!(username = %username, "Door webhook triggered");
            metrics::counter!("relay.door.triggered").increment(1);
            (
                StatusCode::OK,
                Json(DoorResponse {
                    triggered: true,
                    reason: None,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "Door webhook call failed");
            metrics::counter!("relay.door.failed").increment(1);
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: format!("Request to webhook error: {e}"),
                    code: "WEBHOOK_FAILED".to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Start the relay API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting relay API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::MockChatPoster;
    use crate::webhook::{MockWebhookPoster, WebhookError};
    use porter_gate::rate_gate::testing::MemoryClaimStore;

    fn test_chat_config() -> ChatConfig {
        ChatConfig {
            api_url: "https://slack.com/api/".to_string(),
            token: "xoxb-test".to_string(),
            channel: "C123".to_string(),
            image_base_url: "https://s3.amazonaws.com".to_string(),
            bucket: "porter-faces".to_string(),
            timeout_secs: 5,
            debug: false,
        }
    }

    fn state_with(chat: MockChatPoster, webhook: MockWebhookPoster) -> AppState {
        AppState {
            chat: Arc::new(chat),
            webhook: Arc::new(webhook),
            gate: Arc::new(RateGate::new(Arc::new(MemoryClaimStore::new()))),
            chat_config: test_chat_config(),
            door_grace_secs: 60,
        }
    }

    fn event(command: Command, username: Option<&str>, s3key: Option<&str>) -> Event {
        Event {
            command,
            username: username.map(String::from),
            s3key: s3key.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_notify_requires_username() {
        let mut chat = MockChatPoster::new();
        chat.expect_post_message().times(0);
        let state = state_with(chat, MockWebhookPoster::new());

        let response = notify(
            State(state),
            Json(event(Command::Open, None, Some("incoming/x.jpg"))),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_notify_requires_s3key() {
        let mut chat = MockChatPoster::new();
        chat.expect_post_message().times(0);
        let state = state_with(chat, MockWebhookPoster::new());

        let response = notify(State(state), Json(event(Command::Open, Some("alice"), None))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_notify_open_posts_greeting() {
        let mut chat = MockChatPoster::new();
        chat.expect_post_message()
            .times(1)
            .withf(|m| m.text == "Welcome @alice")
            .returning(|_| Ok(()));
        let state = state_with(chat, MockWebhookPoster::new());

        let response = notify(
            State(state),
            Json(event(Command::Open, Some("alice"), Some("incoming/x.jpg"))),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_notify_unknown_posts_prompt() {
        let mut chat = MockChatPoster::new();
        chat.expect_post_message()
            .times(1)
            .withf(|m| m.attachments[0].callback_id.as_deref() == Some("incoming/x.jpg"))
            .returning(|_| Ok(()));
        let state = state_with(chat, MockWebhookPoster::new());

        let response = notify(
            State(state),
            Json(event(Command::Unknown, Some("last"), Some("incoming/x.jpg"))),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_door_rejects_unknown_command() {
        let mut webhook = MockWebhookPoster::new();
        webhook.expect_trigger().times(0);
        let state = state_with(MockChatPoster::new(), webhook);

        let response = trigger_door(
            State(state),
            Json(event(Command::Unknown, Some("alice"), None)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_door_open_fires_webhook_once() {
        let mut webhook = MockWebhookPoster::new();
        webhook.expect_trigger().times(1).returning(|| Ok(()));
        let state = state_with(MockChatPoster::new(), webhook);

        let response = trigger_door(
            State(state),
            Json(event(Command::Open, Some("alice"), None)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_door_rate_limited_duplicate_fires_nothing() {
        let mut webhook = MockWebhookPoster::new();
        webhook.expect_trigger().times(1).returning(|| Ok(()));
        let state = state_with(MockChatPoster::new(), webhook);

        let first = trigger_door(
            State(state.clone()),
            Json(event(Command::Open, Some("alice"), None)),
        )
        .await;
        assert_eq!(first.status(), StatusCode::OK);

        // Inside the grace window: the claim fails and no webhook call happens.
        let second = trigger_door(
            State(state),
            Json(event(Command::Open, Some("alice"), None)),
        )
        .await;
        assert_eq!(second.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_door_webhook_failure_is_server_error() {
        let mut webhook = MockWebhookPoster::new();
        webhook.expect_trigger().times(1).returning(|| {
            Err(WebhookError::Status {
                status: 500,
                body: "boom".to_string(),
            })
        });
        let state = state_with(MockChatPoster::new(), webhook);

        let response = trigger_door(
            State(state),
            Json(event(Command::Open, Some("alice"), None)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
