use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation failures for incoming events.
///
/// The messages are surfaced verbatim in client-error responses.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("no username field in payload")]
    MissingUsername,

    #[error("no s3key field in payload")]
    MissingS3Key,

    #[error("unrecognized command in payload")]
    UnrecognizedCommand,
}

/// Detection command carried by an event.
///
/// Commands outside the known set deserialize to `Unrecognized` so handlers
/// can reject them with a readable message instead of a decode failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// A known face was matched; the door may open.
    Open,
    /// A face was detected but not matched.
    Unknown,
    #[serde(other)]
    Unrecognized,
}

/// A detection event flowing between services.
///
/// Transient; nothing here is persisted beyond the rate table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub command: Command,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3key: Option<String>,
}

impl Event {
    /// Validate the fields every handler requires.
    ///
    /// `username` must be present regardless of command. Presence is enough:
    /// the matcher reports unknown faces with an empty username.
    pub fn validate(&self) -> Result<&str, EventError> {
        if self.command == Command::Unrecognized {
            return Err(EventError::UnrecognizedCommand);
        }

        self.username.as_deref().ok_or(EventError::MissingUsername)
    }

    /// The stored crop key, required by handlers that attach the image.
    pub fn require_s3key(&self) -> Result<&str, EventError> {
        self.s3key.as_deref().ok_or(EventError::MissingS3Key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_open_event() {
        let json = r#"{
            "command": "open",
            "username": "alice",
            "s3key": "incoming/2024-01-15_10_30_45.jpg"
        }"#;

        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(event.command, Command::Open);
        assert_eq!(event.validate(), Ok("alice"));
    }

    #[test]
    fn test_unrecognized_command_is_captured() {
        let json = r#"{"command": "reboot", "username": "alice"}"#;

        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(event.command, Command::Unrecognized);
        assert_eq!(event.validate(), Err(EventError::UnrecognizedCommand));
    }

    #[test]
    fn test_missing_username_fails_validation() {
        let json = r#"{"command": "unknown", "s3key": "incoming/x.jpg"}"#;

        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(event.validate(), Err(EventError::MissingUsername));
    }

    #[test]
    fn test_empty_username_passes_presence_check() {
        // Unknown-face events carry an empty username
        let event = Event {
            command: Command::Unknown,
            username: Some(String::new()),
            s3key: Some("incoming/x.jpg".to_string()),
        };

        assert_eq!(event.validate(), Ok(""));
    }

    #[test]
    fn test_serialize_omits_absent_fields() {
        let event = Event {
            command: Command::Unknown,
            username: Some("last".to_string()),
            s3key: None,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["command"], "unknown");
        assert!(json.get("s3key").is_none());
    }
}
