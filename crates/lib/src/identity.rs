//! Identity mapping between remote ids (tickets, agents) and host entities.
//!
//! The remote id is kept on the host entity under the [`EXTERNAL_ID_TAG`] tag.
//! Resolution is lookup-or-create because the host store offers no get-by-tag
//! primitive that fails when absent. If the external service reuses remote ids
//! inconsistently, or the store's get-or-create is not atomic under concurrent
//! deliveries, duplicate host entities can appear; this is not corrected here.

use crate::error::{Error, Result};
use crate::host::{Conversation, HostStore, Tags, User};
use std::sync::Arc;

/// Tag key holding the remote id on host conversations and users.
pub const EXTERNAL_ID_TAG: &str = "externalId";

/// Tags binding a host entity to `remote_id`.
pub fn external_id_tags(remote_id: &str) -> Tags {
    Tags::from([(EXTERNAL_ID_TAG.to_string(), remote_id.to_string())])
}

/// Remote ticket id bound to a host conversation, if any.
pub fn remote_ticket_id(conversation: &Conversation) -> Option<&str> {
    conversation
        .tags
        .get(EXTERNAL_ID_TAG)
        .map(String::as_str)
        .filter(|s| !s.is_empty())
}

/// Remote user id bound to a host user, if any.
pub fn remote_user_id(user: &User) -> Option<&str> {
    user.tags
        .get(EXTERNAL_ID_TAG)
        .map(String::as_str)
        .filter(|s| !s.is_empty())
}

/// Resolves remote ids to host entities on one channel.
#[derive(Clone)]
pub struct IdentityMapper {
    store: Arc<dyn HostStore>,
    channel: String,
}

impl IdentityMapper {
    pub fn new(store: Arc<dyn HostStore>, channel: impl Into<String>) -> Self {
        Self {
            store,
            channel: channel.into(),
        }
    }

    /// Host conversation bound to `remote_ticket_id`, created when unseen.
    pub async fn resolve_conversation(&self, remote_ticket_id: &str) -> Result<Conversation> {
        lookup_or_create_conversation(self.store.as_ref(), &self.channel, remote_ticket_id).await
    }

    /// Host user bound to `remote_user_id`, created when unseen.
    pub async fn resolve_user(&self, remote_user_id: &str) -> Result<User> {
        lookup_or_create_user(self.store.as_ref(), remote_user_id).await
    }
}

// Stand-ins for a get-only lookup. Replace these two when the host store gains one.

async fn lookup_or_create_conversation(
    store: &dyn HostStore,
    channel: &str,
    remote_ticket_id: &str,
) -> Result<Conversation> {
    store
        .get_or_create_conversation(channel, external_id_tags(remote_ticket_id))
        .await
        .map_err(|source| Error::IdentityResolutionFailed {
            remote_id: remote_ticket_id.to_string(),
            source,
        })
}

async fn lookup_or_create_user(store: &dyn HostStore, remote_user_id: &str) -> Result<User> {
    store
        .get_or_create_user(external_id_tags(remote_user_id))
        .await
        .map_err(|source| Error::IdentityResolutionFailed {
            remote_id: remote_user_id.to_string(),
            source,
        })
}
