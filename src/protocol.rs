//! Wire entities exchanged with chat clients

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Fixed connection id stamped on bot turns
pub const BOT_ID: &str = "bot";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

/// One broadcast chat turn. Created fresh per turn and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub from: Sender,
    pub text: String,
    pub time: String,
}

impl ChatMessage {
    /// User turn, attributed to the sending connection
    pub fn user(connection_id: &str, text: String) -> Self {
        Self {
            id: connection_id.to_string(),
            from: Sender::User,
            text,
            time: Utc::now().to_rfc3339(),
        }
    }

    /// Bot turn carrying the completion result
    pub fn bot(text: String) -> Self {
        Self {
            id: BOT_ID.to_string(),
            from: Sender::Bot,
            text,
            time: Utc::now().to_rfc3339(),
        }
    }
}

/// Conversation style selecting the tutor persona
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Practice,
    #[default]
    Free,
}

impl Mode {
    /// Map the wire value onto a mode. Absent, blank, and unrecognized
    /// values all fall back to free conversation.
    pub fn from_wire(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("practice") => Mode::Practice,
            _ => Mode::Free,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Practice => write!(f, "practice"),
            Mode::Free => write!(f, "free"),
        }
    }
}

/// Inbound chat payload. Older clients send the bare message text, newer
/// ones an object that also carries the conversation mode.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InboundPayload {
    Text(String),
    Chat { text: String, mode: Option<String> },
}

impl InboundPayload {
    /// Resolve the two wire forms into a canonical (text, mode) pair
    pub fn normalize(self) -> (String, Mode) {
        match self {
            InboundPayload::Text(text) => (text, Mode::Free),
            InboundPayload::Chat { text, mode } => {
                let mode = Mode::from_wire(mode.as_deref());
                (text, mode)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_string_payload_normalizes_to_free() {
        let payload: InboundPayload = serde_json::from_str(r#""Hello""#).unwrap();
        let (text, mode) = payload.normalize();
        assert_eq!(text, "Hello");
        assert_eq!(mode, Mode::Free);
    }

    #[test]
    fn test_object_payload_carries_mode() {
        let payload: InboundPayload =
            serde_json::from_str(r#"{"text":"I go to school yesterday","mode":"practice"}"#)
                .unwrap();
        let (text, mode) = payload.normalize();
        assert_eq!(text, "I go to school yesterday");
        assert_eq!(mode, Mode::Practice);
    }

    #[test]
    fn test_missing_or_unknown_mode_falls_back_to_free() {
        let payload: InboundPayload = serde_json::from_str(r#"{"text":"hi"}"#).unwrap();
        assert_eq!(payload.normalize().1, Mode::Free);

        assert_eq!(Mode::from_wire(Some("")), Mode::Free);
        assert_eq!(Mode::from_wire(Some("quiz")), Mode::Free);
        assert_eq!(Mode::from_wire(Some("practice")), Mode::Practice);
        assert_eq!(Mode::from_wire(None), Mode::Free);
    }

    #[test]
    fn test_payload_without_text_is_rejected() {
        assert!(serde_json::from_str::<InboundPayload>(r#"{"mode":"practice"}"#).is_err());
    }

    #[test]
    fn test_chat_message_wire_shape() {
        let msg = ChatMessage::user("conn-1", "Hello".to_string());
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["id"], "conn-1");
        assert_eq!(json["from"], "user");
        assert_eq!(json["text"], "Hello");
        assert!(chrono::DateTime::parse_from_rfc3339(json["time"].as_str().unwrap()).is_ok());

        let bot = ChatMessage::bot("Hi!".to_string());
        let json: serde_json::Value = serde_json::to_value(&bot).unwrap();
        assert_eq!(json["id"], "bot");
        assert_eq!(json["from"], "bot");
    }
}
