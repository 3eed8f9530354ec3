//! Gateway WebSocket protocol types (connect, HITL actions, events).

use crate::host::MessagePayload;
use serde::{Deserialize, Serialize};

/// Wire request: `{ "type": "req", "id", "method", "params" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsRequest {
    #[serde(rename = "type")]
    pub typ: String,
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Wire response: `{ "type": "res", "id", "ok", "payload" or "error" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsResponse {
    #[serde(rename = "type")]
    pub typ: String,
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Client connect params.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub min_protocol: Option<u32>,
    pub max_protocol: Option<u32>,
    #[serde(default)]
    pub client: ConnectClient,
    #[serde(default)]
    pub auth: ConnectAuth,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectClient {
    pub id: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectAuth {
    pub token: Option<String>,
}

/// Server hello-ok payload after successful connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloOk {
    #[serde(rename = "type")]
    pub typ: String,
    pub protocol: u32,
    /// Host channel HITL conversations live on.
    pub channel: String,
}

/// Params for "stopHitl".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopHitlParams {
    pub conversation_id: String,
}

/// Params for "sendMessage": forward a bot message to the bound ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageParams {
    pub conversation_id: String,
    pub user_id: String,
    pub message: MessagePayload,
}

/// Params for "addMessage": append a note to the ticket bound to a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMessageParams {
    pub conversation_id: String,
    pub text: String,
    pub author: Option<String>,
    pub timestamp: Option<String>,
}

/// Params for "conversation": read a host conversation and its messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationParams {
    pub conversation_id: String,
}

impl WsResponse {
    pub fn ok(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            typ: "res".to_string(),
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            typ: "res".to_string(),
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MessageKind;
    use serde_json::json;

    #[test]
    fn error_response_omits_payload() {
        let res = WsResponse::err("7", "conversation not found");
        assert_eq!(
            serde_json::to_value(&res).unwrap(),
            json!({"type": "res", "id": "7", "ok": false, "error": "conversation not found"})
        );
    }

    #[test]
    fn send_message_params_carry_typed_payload() {
        let params: SendMessageParams = serde_json::from_value(json!({
            "conversationId": "conv-1",
            "userId": "user-1",
            "message": {"type": "markdown", "markdown": "**hi**"}
        }))
        .unwrap();
        assert_eq!(params.message.kind, MessageKind::Markdown);
    }
}
