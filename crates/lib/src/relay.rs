//! Outbound relay: host actions become calls against the external service.
//!
//! Each operation is encode → POST → decode response → host side effect. There is
//! no rollback: if the remote ticket is created but the host conversation is not,
//! the ticket stays orphaned on the remote side.

use crate::envelope::{
    self, AddMessageToRemoteConversation, BotSendsMessage, CloseRemoteTicket,
    CreateRemoteConversation, CreateRemoteConversationResponse, CreateRemoteUser,
    CreateRemoteUserResponse, OutboundEnvelope, PingResponse, StatusResponse, TicketMessage,
};
use crate::error::{Error, Result};
use crate::host::{Conversation, HostStore, MessagePayload, User};
use crate::identity::{self, external_id_tags};
use crate::transport::Transport;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Host channel HITL conversations live on, unless configured otherwise.
pub const DEFAULT_CHANNEL: &str = "hitl";

/// Relay behaviour knobs.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub channel: String,
    /// When false, `stop_hitl` leaves the remote ticket open.
    pub close_ticket_on_stop: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            close_ticket_on_stop: true,
        }
    }
}

/// Input of `startHitl`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartHitlInput {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<TicketMessage>>,
}

/// Input of `createUser`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

pub struct OutboundRelay {
    endpoint_url: String,
    transport: Arc<dyn Transport>,
    store: Arc<dyn HostStore>,
    settings: RelaySettings,
}

impl OutboundRelay {
    pub fn new(
        endpoint_url: impl Into<String>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn HostStore>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            transport,
            store,
            settings,
        }
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Encode, POST, and decode the answer as `R`.
    async fn call<R: DeserializeOwned>(&self, envelope: OutboundEnvelope) -> Result<R> {
        let operation = envelope.operation();
        let body = envelope::encode(&envelope)?;
        log::debug!("relay: {} -> {}", operation, self.endpoint_url);
        let res = self
            .transport
            .post_json(&self.endpoint_url, body)
            .await
            .map_err(|source| Error::RemoteCallFailed { operation, source })?;
        envelope::decode_response(operation, &res)
    }

    /// Registration health check.
    pub async fn ping(&self) -> Result<PingResponse> {
        self.call(OutboundEnvelope::Ping {}).await
    }

    /// Open a remote ticket and bind a new host conversation to it.
    /// Returns the host conversation id.
    pub async fn start_hitl(&self, input: StartHitlInput) -> Result<String> {
        let ticket: CreateRemoteConversationResponse = self
            .call(OutboundEnvelope::CreateRemoteConversation {
                payload: CreateRemoteConversation {
                    title: input.title,
                    description: input.description,
                    messages: input.messages,
                },
            })
            .await
            .map_err(|e| Error::RemoteCreateFailed(Box::new(e)))?;

        let conversation = self
            .store
            .create_conversation(&self.settings.channel, external_id_tags(&ticket.id))
            .await
            .map_err(|source| {
                log::warn!(
                    "relay: remote ticket {} created but host conversation was not; ticket is orphaned",
                    ticket.id
                );
                Error::IdentityResolutionFailed {
                    remote_id: ticket.id.clone(),
                    source,
                }
            })?;
        log::info!(
            "relay: hitl started, conversation {} bound to ticket {}",
            conversation.id,
            ticket.id
        );
        Ok(conversation.id)
    }

    /// Ask the external service to close the ticket bound to `conversation`.
    /// The host conversation is left as is. Safe to call again.
    pub async fn stop_hitl(&self, conversation: &Conversation) -> Result<()> {
        let ticket_id =
            identity::remote_ticket_id(conversation).ok_or_else(|| Error::MissingRemoteTag {
                entity: "conversation",
                id: conversation.id.clone(),
            })?;
        if !self.settings.close_ticket_on_stop {
            log::info!(
                "relay: stopHitl for {} leaves ticket {} open (closeTicketOnStop is off)",
                conversation.id,
                ticket_id
            );
            return Ok(());
        }
        let _: StatusResponse = self
            .call(OutboundEnvelope::CloseRemoteTicket {
                payload: CloseRemoteTicket {
                    conversation_id: conversation.id.clone(),
                },
            })
            .await
            .map_err(|e| Error::RemoteCloseFailed(Box::new(e)))?;
        log::info!(
            "relay: close requested for ticket {} (conversation {})",
            ticket_id,
            conversation.id
        );
        Ok(())
    }

    /// Create an end-user on the external service and a host user bound to it.
    /// Returns the host user id.
    pub async fn create_user(&self, input: CreateUserInput) -> Result<String> {
        let remote: CreateRemoteUserResponse = self
            .call(OutboundEnvelope::CreateRemoteUser {
                payload: CreateRemoteUser {
                    name: input.name,
                    email: input.email,
                    ..Default::default()
                },
            })
            .await?;
        let user = self
            .store
            .create_user(external_id_tags(&remote.id))
            .await
            .map_err(|source| Error::IdentityResolutionFailed {
                remote_id: remote.id.clone(),
                source,
            })?;
        log::debug!("relay: user {} bound to remote user {}", user.id, remote.id);
        Ok(user.id)
    }

    /// Forward a bot message to the ticket. Both entities must already carry
    /// their remote ids; nothing is looked up or created here.
    pub async fn send_message(
        &self,
        conversation: &Conversation,
        user: &User,
        payload: &MessagePayload,
    ) -> Result<()> {
        let (ticket_id, remote_user) = bound_ids(conversation, user)?;
        let _: StatusResponse = self
            .call(OutboundEnvelope::BotSendsMessage {
                payload: BotSendsMessage::new(ticket_id, remote_user, payload),
            })
            .await?;
        log::debug!(
            "relay: {} message forwarded to ticket {}",
            payload.kind.as_str(),
            ticket_id
        );
        Ok(())
    }

    /// Append a message to the ticket bound to `conversation`.
    pub async fn add_message(
        &self,
        conversation: &Conversation,
        message: TicketMessage,
    ) -> Result<()> {
        let ticket_id =
            identity::remote_ticket_id(conversation).ok_or_else(|| Error::MissingRemoteTag {
                entity: "conversation",
                id: conversation.id.clone(),
            })?;
        let _: StatusResponse = self
            .call(OutboundEnvelope::AddMessageToRemoteConversation {
                payload: AddMessageToRemoteConversation::new(message, ticket_id),
            })
            .await?;
        Ok(())
    }
}

fn bound_ids<'a>(conversation: &'a Conversation, user: &'a User) -> Result<(&'a str, &'a str)> {
    let ticket_id =
        identity::remote_ticket_id(conversation).ok_or_else(|| Error::MissingRemoteTag {
            entity: "conversation",
            id: conversation.id.clone(),
        })?;
    let remote_user = identity::remote_user_id(user).ok_or_else(|| Error::MissingRemoteTag {
        entity: "user",
        id: user.id.clone(),
    })?;
    Ok((ticket_id, remote_user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{MemoryHostStore, MessageKind, Tags};
    use crate::identity::IdentityMapper;
    use crate::testing::{FailingStore, MockTransport};
    use crate::transport::TransportError;
    use serde_json::json;

    const ENDPOINT: &str = "https://support.example.com/hitl";

    fn relay_with(
        transport: Arc<MockTransport>,
        store: Arc<dyn HostStore>,
        settings: RelaySettings,
    ) -> OutboundRelay {
        OutboundRelay::new(ENDPOINT, transport, store, settings)
    }

    #[tokio::test]
    async fn ping_posts_ping_envelope() {
        let transport = Arc::new(MockTransport::new().with_response(json!({})));
        let relay = relay_with(
            transport.clone(),
            Arc::new(MemoryHostStore::new()),
            RelaySettings::default(),
        );
        relay.ping().await.unwrap();
        assert_eq!(
            transport.requests(),
            vec![(ENDPOINT.to_string(), json!({"type": "ping"}))]
        );
    }

    #[tokio::test]
    async fn ping_failure_is_remote_call_failure() {
        let transport = Arc::new(MockTransport::new().with_error(TransportError::Status {
            status: 503,
            body: "down".into(),
        }));
        let relay = relay_with(
            transport,
            Arc::new(MemoryHostStore::new()),
            RelaySettings::default(),
        );
        let err = relay.ping().await.unwrap_err();
        assert!(matches!(
            err,
            Error::RemoteCallFailed {
                operation: "ping",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn start_hitl_round_trips_through_identity_mapper() {
        let transport = Arc::new(
            MockTransport::new().with_response(json!({"id": "rt-1", "title": "Refund"})),
        );
        let store = Arc::new(MemoryHostStore::new());
        let relay = relay_with(transport.clone(), store.clone(), RelaySettings::default());

        let conversation_id = relay
            .start_hitl(StartHitlInput {
                title: Some("Refund".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let mapper = IdentityMapper::new(store.clone(), DEFAULT_CHANNEL);
        let resolved = mapper.resolve_conversation("rt-1").await.unwrap();
        assert_eq!(resolved.id, conversation_id);
        assert_eq!(store.conversations().await.len(), 1);
        assert_eq!(
            transport.requests()[0].1,
            json!({"type": "createRemoteConversation", "payload": {"title": "Refund"}})
        );
    }

    #[tokio::test]
    async fn start_hitl_with_bad_response_is_remote_create_failure() {
        let transport = Arc::new(MockTransport::new().with_response(json!({"ticket": 1})));
        let store = Arc::new(MemoryHostStore::new());
        let relay = relay_with(transport, store.clone(), RelaySettings::default());
        let err = relay.start_hitl(StartHitlInput::default()).await.unwrap_err();
        assert!(matches!(err, Error::RemoteCreateFailed(_)));
        assert!(err.is_schema_violation());
        assert!(store.conversations().await.is_empty());
    }

    #[tokio::test]
    async fn start_hitl_transport_error_is_remote_create_failure() {
        let transport = Arc::new(
            MockTransport::new().with_error(TransportError::Unreachable("refused".into())),
        );
        let relay = relay_with(
            transport,
            Arc::new(MemoryHostStore::new()),
            RelaySettings::default(),
        );
        let err = relay.start_hitl(StartHitlInput::default()).await.unwrap_err();
        match err {
            Error::RemoteCreateFailed(inner) => {
                assert!(matches!(*inner, Error::RemoteCallFailed { .. }))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn start_hitl_host_failure_leaves_remote_ticket_orphaned() {
        let transport = Arc::new(MockTransport::new().with_response(json!({"id": "rt-1"})));
        let relay = relay_with(
            transport.clone(),
            Arc::new(FailingStore),
            RelaySettings::default(),
        );
        let err = relay.start_hitl(StartHitlInput::default()).await.unwrap_err();
        assert!(matches!(err, Error::IdentityResolutionFailed { .. }));
        // The remote create went out; nothing compensates it.
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn stop_hitl_sends_local_conversation_id_and_keeps_conversation() {
        let transport = Arc::new(
            MockTransport::new()
                .with_response(json!({"status": "closed"}))
                .with_response(json!({"status": "already closed"})),
        );
        let store = Arc::new(MemoryHostStore::new());
        let conversation = store
            .create_conversation("hitl", external_id_tags("rt-1"))
            .await
            .unwrap();
        let relay = relay_with(transport.clone(), store.clone(), RelaySettings::default());

        relay.stop_hitl(&conversation).await.unwrap();
        // Retrying is not an error.
        relay.stop_hitl(&conversation).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[0].1,
            json!({"type": "closeRemoteTicket", "payload": {"botpressConversationId": conversation.id}})
        );
        assert!(store.conversation(&conversation.id).await.is_some());
    }

    #[tokio::test]
    async fn stop_hitl_failure_is_remote_close_failure() {
        let transport = Arc::new(MockTransport::new().with_error(TransportError::Status {
            status: 500,
            body: "boom".into(),
        }));
        let store = Arc::new(MemoryHostStore::new());
        let conversation = store
            .create_conversation("hitl", external_id_tags("rt-1"))
            .await
            .unwrap();
        let relay = relay_with(transport, store, RelaySettings::default());
        assert!(matches!(
            relay.stop_hitl(&conversation).await.unwrap_err(),
            Error::RemoteCloseFailed(_)
        ));
    }

    #[tokio::test]
    async fn stop_hitl_can_leave_ticket_open() {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryHostStore::new());
        let conversation = store
            .create_conversation("hitl", external_id_tags("rt-1"))
            .await
            .unwrap();
        let relay = relay_with(
            transport.clone(),
            store,
            RelaySettings {
                close_ticket_on_stop: false,
                ..Default::default()
            },
        );
        relay.stop_hitl(&conversation).await.unwrap();
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn create_user_defaults_role_and_binds_remote_id() {
        let transport = Arc::new(
            MockTransport::new().with_response(json!({"id": "ru-1", "role": "end-user"})),
        );
        let store = Arc::new(MemoryHostStore::new());
        let relay = relay_with(transport.clone(), store.clone(), RelaySettings::default());

        let user_id = relay
            .create_user(CreateUserInput {
                name: Some("Ada".into()),
                email: Some("ada@example.com".into()),
            })
            .await
            .unwrap();

        assert_eq!(
            transport.requests()[0].1,
            json!({
                "type": "createRemoteUser",
                "payload": {"role": "end-user", "name": "Ada", "email": "ada@example.com"}
            })
        );
        let user = store.user(&user_id).await.unwrap();
        assert_eq!(identity::remote_user_id(&user), Some("ru-1"));
    }

    #[tokio::test]
    async fn send_message_forwards_any_content_kind() {
        let transport = Arc::new(MockTransport::new().with_response(json!({"status": "ok"})));
        let store = Arc::new(MemoryHostStore::new());
        let conversation = store
            .create_conversation("hitl", external_id_tags("rt-1"))
            .await
            .unwrap();
        let user = store.create_user(external_id_tags("ru-1")).await.unwrap();
        let relay = relay_with(transport.clone(), store, RelaySettings::default());

        let mut card = MessagePayload {
            kind: MessageKind::Card,
            fields: Default::default(),
        };
        card.fields.insert("title".into(), json!("Order #42"));
        card.fields.insert("actions".into(), json!([{"label": "Track"}]));
        relay.send_message(&conversation, &user, &card).await.unwrap();

        assert_eq!(
            transport.requests()[0].1,
            json!({
                "type": "botSendsMessage",
                "payload": {
                    "remoteConversationId": "rt-1",
                    "remoteUserId": "ru-1",
                    "title": "Order #42",
                    "actions": [{"label": "Track"}]
                }
            })
        );
    }

    #[tokio::test]
    async fn send_message_without_remote_tag_makes_no_call() {
        let transport = Arc::new(MockTransport::new().with_response(json!({"status": "ok"})));
        let store = Arc::new(MemoryHostStore::new());
        let conversation = store.create_conversation("hitl", Tags::new()).await.unwrap();
        let user = store.create_user(external_id_tags("ru-1")).await.unwrap();
        let relay = relay_with(transport.clone(), store, RelaySettings::default());

        let err = relay
            .send_message(&conversation, &user, &MessagePayload::text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::MissingRemoteTag {
                entity: "conversation",
                ..
            }
        ));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn add_message_targets_bound_ticket() {
        let transport = Arc::new(MockTransport::new().with_response(json!({"status": "ok"})));
        let store = Arc::new(MemoryHostStore::new());
        let conversation = store
            .create_conversation("hitl", external_id_tags("rt-7"))
            .await
            .unwrap();
        let relay = relay_with(transport.clone(), store, RelaySettings::default());
        relay
            .add_message(
                &conversation,
                TicketMessage {
                    text: "context".into(),
                    author: Some("bot".into()),
                    timestamp: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(
            transport.requests()[0].1,
            json!({
                "type": "addMessageToRemoteConversation",
                "payload": {"text": "context", "author": "bot", "ticketId": "rt-7"}
            })
        );
    }
}
