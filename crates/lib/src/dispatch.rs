//! Inbound dispatcher: routes webhook calls from the external service to handlers
//! that mutate host conversations and raise host events.
//!
//! Deliveries are at-least-once and not deduplicated: a repeated `close-ticket`
//! raises `hitlStopped` again.

use crate::envelope::{self, AgentAssigned, AgentMessage, CloseTicket, InboundEnvelope, InboundRoute};
use crate::error::{Error, Result};
use crate::host::{HostEvent, HostStore, MessagePayload};
use crate::identity::IdentityMapper;
use std::sync::Arc;

/// A raw webhook call as received by the transport.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: String,
    pub path: String,
    pub body: Option<Vec<u8>>,
}

impl InboundRequest {
    pub fn post(path: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            method: "POST".to_string(),
            path: path.into(),
            body: Some(body.into()),
        }
    }

    fn has_body(&self) -> bool {
        self.body.as_deref().is_some_and(|b| !b.is_empty())
    }
}

/// What a dispatched call did on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// Empty body: nothing was done.
    Ignored,
    AgentMessage {
        conversation_id: String,
        user_id: String,
        message_id: String,
    },
    AgentAssigned {
        conversation_id: String,
        user_id: String,
    },
    TicketClosed {
        conversation_id: String,
    },
}

/// Announcement posted in the conversation when an agent is assigned.
pub fn agent_joined_text(agent_display_name: &str) -> String {
    format!(
        "`{} has joined the chat and will be with you momentarily.`",
        agent_display_name
    )
}

pub struct InboundDispatcher {
    identities: IdentityMapper,
    store: Arc<dyn HostStore>,
}

impl InboundDispatcher {
    pub fn new(store: Arc<dyn HostStore>, channel: impl Into<String>) -> Self {
        Self {
            identities: IdentityMapper::new(store.clone(), channel),
            store,
        }
    }

    /// Handle one webhook call. Empty bodies are logged and ignored; unknown
    /// routes and invalid bodies are errors.
    pub async fn dispatch(&self, req: &InboundRequest) -> Result<Dispatched> {
        if !req.has_body() {
            log::warn!("webhook {} {} received an empty body", req.method, req.path);
            return Ok(Dispatched::Ignored);
        }
        let route = InboundRoute::match_request(&req.method, &req.path)
            .ok_or_else(|| Error::route_not_found(&req.method, &req.path))?;
        let body = req.body.as_deref().unwrap_or_default();
        let envelope = envelope::decode_inbound(route, body)?;
        log::debug!(
            "webhook {} for remote conversation {}",
            envelope.route().path(),
            envelope.remote_conversation_id()
        );
        match envelope {
            InboundEnvelope::MessageFromAgent(body) => self.agent_message(body).await,
            InboundEnvelope::AgentAssigned(body) => self.agent_assigned(body).await,
            InboundEnvelope::CloseTicket(body) => self.close_ticket(body).await,
        }
    }

    async fn agent_message(&self, body: AgentMessage) -> Result<Dispatched> {
        let conversation = self
            .identities
            .resolve_conversation(&body.remote_conversation_id)
            .await?;
        let user = self.identities.resolve_user(&body.remote_user_id).await?;
        let message = self
            .store
            .create_message(&conversation.id, &user.id, MessagePayload::text(body.text))
            .await
            .map_err(|source| Error::HostStore {
                operation: "createMessage",
                source,
            })?;
        Ok(Dispatched::AgentMessage {
            conversation_id: conversation.id,
            user_id: user.id,
            message_id: message.id,
        })
    }

    async fn agent_assigned(&self, body: AgentAssigned) -> Result<Dispatched> {
        let conversation = self
            .identities
            .resolve_conversation(&body.remote_conversation_id)
            .await?;
        let user = self.identities.resolve_user(&body.remote_user_id).await?;
        self.store
            .create_message(
                &conversation.id,
                &user.id,
                MessagePayload::text(agent_joined_text(&body.agent_display_name)),
            )
            .await
            .map_err(|source| Error::HostStore {
                operation: "createMessage",
                source,
            })?;
        self.emit(HostEvent::HitlAssigned {
            conversation_id: conversation.id.clone(),
            user_id: user.id.clone(),
        })
        .await?;
        log::info!(
            "agent {} assigned to conversation {}",
            body.agent_display_name,
            conversation.id
        );
        Ok(Dispatched::AgentAssigned {
            conversation_id: conversation.id,
            user_id: user.id,
        })
    }

    async fn close_ticket(&self, body: CloseTicket) -> Result<Dispatched> {
        let conversation = self
            .identities
            .resolve_conversation(&body.remote_conversation_id)
            .await?;
        self.emit(HostEvent::HitlStopped {
            conversation_id: conversation.id.clone(),
        })
        .await?;
        log::info!(
            "ticket {} closed, conversation {} released",
            body.remote_conversation_id,
            conversation.id
        );
        Ok(Dispatched::TicketClosed {
            conversation_id: conversation.id,
        })
    }

    async fn emit(&self, event: HostEvent) -> Result<()> {
        self.store
            .create_event(event)
            .await
            .map_err(|source| Error::HostStore {
                operation: "createEvent",
                source,
            })
    }
}
