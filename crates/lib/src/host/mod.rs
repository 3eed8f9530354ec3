//! Host store: the bot-side owner of conversations, users, messages, and events.
//!
//! The bridge never keeps a second source of truth; the relay and dispatcher read
//! and write only through [`HostStore`]. [`MemoryHostStore`] is the in-process
//! implementation used by the gateway and tests.

mod memory;
mod types;

pub use memory::{MemoryHostStore, StoreNotice};
pub use types::{Conversation, HostEvent, Message, MessageKind, MessagePayload, Tags, User};

use async_trait::async_trait;

/// Failure reported by a host store call.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("host store unavailable: {0}")]
    Unavailable(String),
}

/// Capability set the bridge consumes from the host.
///
/// `get_or_create_*` are the only lookup primitives; there is no get-by-tag that
/// fails when absent.
#[async_trait]
pub trait HostStore: Send + Sync {
    async fn create_conversation(&self, channel: &str, tags: Tags)
        -> Result<Conversation, StoreError>;

    async fn get_or_create_conversation(
        &self,
        channel: &str,
        tags: Tags,
    ) -> Result<Conversation, StoreError>;

    async fn create_user(&self, tags: Tags) -> Result<User, StoreError>;

    async fn get_or_create_user(&self, tags: Tags) -> Result<User, StoreError>;

    async fn create_message(
        &self,
        conversation_id: &str,
        user_id: &str,
        payload: MessagePayload,
    ) -> Result<Message, StoreError>;

    async fn create_event(&self, event: HostEvent) -> Result<(), StoreError>;
}
