use crate::config::ChatConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Errors surfaced when posting a chat message.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat request failed: {0}")]
    Request(String),

    #[error("chat API returned status {0}")]
    Status(u16),
}

/// A chat message in the chat API's post-message shape.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub channel: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_names: Option<bool>,
    pub attachments: Vec<Attachment>,
}

/// Image attachment, optionally carrying interactive actions.
#[derive(Debug, Clone, Serialize)]
pub struct Attachment {
    pub image_url: String,
    pub fallback: String,
    pub attachment_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<String>,
    /// Action payloads are vendor-shaped; kept as raw JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<serde_json::Value>,
}

impl ChatMessage {
    /// Greeting posted when a known user is at the door.
    pub fn greeting(channel: &str, username: &str, image_url: String) -> Self {
        Self {
            channel: channel.to_string(),
            text: format!("Welcome @{username}"),
            link_names: Some(true),
            attachments: vec![Attachment {
                image_url,
                fallback: "Nope?".to_string(),
                attachment_type: "default".to_string(),
                callback_id: None,
                actions: None,
            }],
        }
    }

    /// Prompt posted when the detected face matched nobody. Carries a
    /// user-select menu and a confirmed ignore button so someone can label
    /// or discard the crop.
    pub fn unknown_visitor(channel: &str, s3key: &str, image_url: String) -> Self {
        Self {
            channel: channel.to_string(),
            text: "I don't know who this is, can you tell me?".to_string(),
            link_names: None,
            attachments: vec![Attachment {
                image_url,
                fallback: "Nope?".to_string(),
                attachment_type: "default".to_string(),
                callback_id: Some(s3key.to_string()),
                actions: Some(serde_json::json!([
                    {
                        "name": "username",
                        "text": "Select a username...",
                        "type": "select",
                        "data_source": "users"
                    },
                    {
                        "name": "discard",
                        "text": "Ignore",
                        "style": "danger",
                        "type": "button",
                        "value": "ignore",
                        "confirm": {
                            "title": "Are you sure?",
                            "text": "Are you sure you want to ignore and delete this image?",
                            "ok_text": "Yes",
                            "dismiss_text": "No"
                        }
                    }
                ])),
            }],
        }
    }
}

/// Seam for the single outbound chat call a notify event triggers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatPoster: Send + Sync {
    async fn post_message(&self, message: &ChatMessage) -> Result<(), ChatError>;
}

/// Chat API client: one bearer-authenticated POST per message, no retries.
pub struct ChatClient {
    client: reqwest::Client,
    post_url: String,
    token: String,
    debug: bool,
}

impl ChatClient {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build chat HTTP client")?;

        let post_url = format!("{}chat.postMessage", config.api_url);

        info!(url = %post_url, channel = %config.channel, "Chat client initialized");

        Ok(Self {
            client,
            post_url,
            token: config.token.clone(),
            debug: config.debug,
        })
    }
}

#[async_trait]
impl ChatPoster for ChatClient {
    async fn post_message(&self, message: &ChatMessage) -> Result<(), ChatError> {
        if self.debug {
            debug!(payload = %serde_json::to_string(message).unwrap_or_default(), "Posting chat message");
        }

        let response = self
            .client
            .post(&self.post_url)
            .bearer_auth(&self.token)
            .json(message)
            .send()
            .await
            .map_err(|e| ChatError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::Status(status.as_u16()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_message_shape() {
        let message = ChatMessage::greeting(
            "C123",
            "alice",
            "https://s3.amazonaws.com/porter-faces/incoming/x.jpg".to_string(),
        );

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["channel"], "C123");
        assert_eq!(json["text"], "Welcome @alice");
        assert_eq!(json["link_names"], true);
        assert_eq!(
            json["attachments"][0]["image_url"],
            "https://s3.amazonaws.com/porter-faces/incoming/x.jpg"
        );
        assert!(json["attachments"][0].get("actions").is_none());
    }

    #[test]
    fn test_unknown_visitor_message_shape() {
        let message = ChatMessage::unknown_visitor(
            "C123",
            "incoming/x.jpg",
            "https://s3.amazonaws.com/porter-faces/incoming/x.jpg".to_string(),
        );

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["text"], "I don't know who this is, can you tell me?");
        assert_eq!(json["attachments"][0]["callback_id"], "incoming/x.jpg");

        let actions = json["attachments"][0]["actions"].as_array().unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0]["type"], "select");
        assert_eq!(actions[1]["name"], "discard");
        assert_eq!(actions[1]["confirm"]["ok_text"], "Yes");
    }
}
