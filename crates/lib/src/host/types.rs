//! Host-side records and payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// String tags attached to conversations and users (e.g. `externalId`).
pub type Tags = BTreeMap<String, String>;

/// A host conversation on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub channel: String,
    #[serde(default)]
    pub tags: Tags,
}

/// A host user (end-user or agent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub tags: Tags,
}

/// Content kinds a host channel can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Markdown,
    Image,
    Audio,
    Video,
    File,
    Location,
    Carousel,
    Card,
    Choice,
    Dropdown,
    Bloc,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::File => "file",
            Self::Location => "location",
            Self::Carousel => "carousel",
            Self::Card => "card",
            Self::Choice => "choice",
            Self::Dropdown => "dropdown",
            Self::Bloc => "bloc",
        }
    }
}

/// Message content: a kind plus its kind-specific fields (`text`, `imageUrl`, ...).
///
/// Wire form: `{ "type": "image", "imageUrl": "..." }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl MessagePayload {
    pub fn text(text: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("text".to_string(), Value::String(text.into()));
        Self {
            kind: MessageKind::Text,
            fields,
        }
    }

    /// The `text` field, when present and a string.
    pub fn text_content(&self) -> Option<&str> {
        self.fields.get("text").and_then(Value::as_str)
    }
}

/// A message stored in a host conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub payload: MessagePayload,
    /// RFC 3339 creation time.
    pub created_at: String,
}

/// Events the bridge raises on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum HostEvent {
    /// A human agent took over the conversation.
    #[serde(rename = "hitlAssigned", rename_all = "camelCase")]
    HitlAssigned {
        conversation_id: String,
        user_id: String,
    },
    /// The ticket was closed; the conversation goes back to the bot.
    #[serde(rename = "hitlStopped", rename_all = "camelCase")]
    HitlStopped { conversation_id: String },
}

impl HostEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::HitlAssigned { .. } => "hitlAssigned",
            Self::HitlStopped { .. } => "hitlStopped",
        }
    }

    pub fn conversation_id(&self) -> &str {
        match self {
            Self::HitlAssigned {
                conversation_id, ..
            }
            | Self::HitlStopped { conversation_id } => conversation_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_payload_keeps_kind_specific_fields() {
        let payload: MessagePayload = serde_json::from_value(json!({
            "type": "image",
            "imageUrl": "https://cdn.example.com/a.png"
        }))
        .unwrap();
        assert_eq!(payload.kind, MessageKind::Image);
        assert_eq!(
            payload.fields.get("imageUrl"),
            Some(&json!("https://cdn.example.com/a.png"))
        );
        assert_eq!(payload.text_content(), None);
    }

    #[test]
    fn host_event_wire_shape() {
        let event = HostEvent::HitlAssigned {
            conversation_id: "conv-1".into(),
            user_id: "user-1".into(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "hitlAssigned", "payload": {"conversationId": "conv-1", "userId": "user-1"}})
        );
        assert_eq!(event.name(), "hitlAssigned");
    }
}
