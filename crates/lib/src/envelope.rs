//! Wire envelopes exchanged with the external service, and their codec.
//!
//! Outbound envelopes are POSTed as `{ "type": ..., "payload": {...} }`. Inbound
//! webhook bodies carry no discriminant of their own; the route they arrive on
//! selects the schema. Validation is structural only: missing or unknown
//! discriminants, missing fields, unknown fields, and type mismatches are all a
//! [`Error::SchemaViolation`].

use crate::error::{Error, Result};
use crate::host::MessagePayload;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Envelopes sent from the bridge to the external service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", deny_unknown_fields)]
pub enum OutboundEnvelope {
    Ping {},
    CreateRemoteConversation {
        payload: CreateRemoteConversation,
    },
    AddMessageToRemoteConversation {
        payload: AddMessageToRemoteConversation,
    },
    CloseRemoteTicket {
        payload: CloseRemoteTicket,
    },
    CreateRemoteUser {
        payload: CreateRemoteUser,
    },
    BotSendsMessage {
        payload: BotSendsMessage,
    },
}

impl OutboundEnvelope {
    /// Discriminant as it appears on the wire.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Ping {} => "ping",
            Self::CreateRemoteConversation { .. } => "createRemoteConversation",
            Self::AddMessageToRemoteConversation { .. } => "addMessageToRemoteConversation",
            Self::CloseRemoteTicket { .. } => "closeRemoteTicket",
            Self::CreateRemoteUser { .. } => "createRemoteUser",
            Self::BotSendsMessage { .. } => "botSendsMessage",
        }
    }
}

/// One prior message copied into a new ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TicketMessage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateRemoteConversation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<TicketMessage>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AddMessageToRemoteConversation {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub ticket_id: String,
}

impl AddMessageToRemoteConversation {
    pub fn new(message: TicketMessage, ticket_id: impl Into<String>) -> Self {
        Self {
            text: message.text,
            author: message.author,
            timestamp: message.timestamp,
            ticket_id: ticket_id.into(),
        }
    }
}

/// Close request. The wire field carries the host (local) conversation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloseRemoteTicket {
    #[serde(rename = "botpressConversationId")]
    pub conversation_id: String,
}

/// Role of a user created on the external service. Only end-users are created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    #[default]
    #[serde(rename = "end-user")]
    EndUser,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateRemoteUser {
    pub role: UserRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Bot message forwarded to the ticket. Every field of the host payload is
/// carried as-is next to the two remote ids, whatever the content kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotSendsMessage {
    pub remote_conversation_id: String,
    pub remote_user_id: String,
    #[serde(flatten)]
    pub content: Map<String, Value>,
}

impl BotSendsMessage {
    pub fn new(
        remote_conversation_id: impl Into<String>,
        remote_user_id: impl Into<String>,
        payload: &MessagePayload,
    ) -> Self {
        let mut content = payload.fields.clone();
        // The ids win over same-named payload fields.
        content.remove("remoteConversationId");
        content.remove("remoteUserId");
        Self {
            remote_conversation_id: remote_conversation_id.into(),
            remote_user_id: remote_user_id.into(),
            content,
        }
    }
}

/// Webhook routes the external service calls on the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundRoute {
    MessageFromAgent,
    AgentAssigned,
    CloseTicket,
}

impl InboundRoute {
    pub const ALL: [InboundRoute; 3] = [
        InboundRoute::MessageFromAgent,
        InboundRoute::AgentAssigned,
        InboundRoute::CloseTicket,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            Self::MessageFromAgent => "/message-from-agent",
            Self::AgentAssigned => "/agent-assigned",
            Self::CloseTicket => "/close-ticket",
        }
    }

    pub fn method(&self) -> &'static str {
        "POST"
    }

    /// Exact, case-sensitive match on (method, path). No wildcards.
    pub fn match_request(method: &str, path: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|r| r.method() == method && r.path() == path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AgentMessage {
    pub remote_conversation_id: String,
    pub remote_user_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AgentAssigned {
    pub remote_conversation_id: String,
    pub remote_user_id: String,
    pub agent_display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CloseTicket {
    pub remote_conversation_id: String,
}

/// A validated inbound webhook body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEnvelope {
    MessageFromAgent(AgentMessage),
    AgentAssigned(AgentAssigned),
    CloseTicket(CloseTicket),
}

impl InboundEnvelope {
    pub fn route(&self) -> InboundRoute {
        match self {
            Self::MessageFromAgent(_) => InboundRoute::MessageFromAgent,
            Self::AgentAssigned(_) => InboundRoute::AgentAssigned,
            Self::CloseTicket(_) => InboundRoute::CloseTicket,
        }
    }

    pub fn remote_conversation_id(&self) -> &str {
        match self {
            Self::MessageFromAgent(b) => &b.remote_conversation_id,
            Self::AgentAssigned(b) => &b.remote_conversation_id,
            Self::CloseTicket(b) => &b.remote_conversation_id,
        }
    }
}

/// Answer to `ping`: any JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PingResponse {}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateRemoteConversationResponse {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateRemoteUserResponse {
    pub id: String,
    pub role: String,
}

/// Answer to close-ticket, add-message, and bot-sends-message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

/// Serialize an outbound envelope and check the bytes against the outbound schema.
pub fn encode(envelope: &OutboundEnvelope) -> Result<Vec<u8>> {
    let operation = envelope.operation();
    let bytes = serde_json::to_vec(envelope).map_err(|e| Error::schema(operation, e))?;
    let decoded = decode_outbound(&bytes)?;
    if &decoded != envelope {
        return Err(Error::schema(
            operation,
            "encoded envelope does not decode to itself",
        ));
    }
    Ok(bytes)
}

/// Parse and validate an outbound envelope.
pub fn decode_outbound(bytes: &[u8]) -> Result<OutboundEnvelope> {
    serde_json::from_slice(bytes).map_err(|e| Error::schema("outbound envelope", e))
}

/// Parse and validate a webhook body against the schema of its route.
pub fn decode_inbound(route: InboundRoute, bytes: &[u8]) -> Result<InboundEnvelope> {
    let envelope = route.path().trim_start_matches('/');
    let parsed = match route {
        InboundRoute::MessageFromAgent => {
            serde_json::from_slice(bytes).map(InboundEnvelope::MessageFromAgent)
        }
        InboundRoute::AgentAssigned => {
            serde_json::from_slice(bytes).map(InboundEnvelope::AgentAssigned)
        }
        InboundRoute::CloseTicket => serde_json::from_slice(bytes).map(InboundEnvelope::CloseTicket),
    };
    parsed.map_err(|e| Error::schema(envelope, e))
}

/// Parse and validate the external service's answer to `operation`.
pub fn decode_response<R: DeserializeOwned>(operation: &str, bytes: &[u8]) -> Result<R> {
    serde_json::from_slice(bytes).map_err(|e| Error::schema(format!("{} response", operation), e))
}
