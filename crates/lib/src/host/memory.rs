//! In-memory host store with atomic get-or-create and a notice feed.

use super::{Conversation, HostEvent, HostStore, Message, MessagePayload, StoreError, Tags, User};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Something the store created, published to subscribers (e.g. WebSocket clients).
#[derive(Debug, Clone)]
pub enum StoreNotice {
    Message(Message),
    Event(HostEvent),
}

#[derive(Default)]
struct Records {
    conversations: Vec<Conversation>,
    users: Vec<User>,
    messages: Vec<Message>,
    events: Vec<HostEvent>,
}

/// Host store kept in process memory. Records are kept in creation order so a
/// tag lookup with several matches always returns the oldest.
pub struct MemoryHostStore {
    inner: Arc<RwLock<Records>>,
    notices: broadcast::Sender<StoreNotice>,
}

impl Default for MemoryHostStore {
    fn default() -> Self {
        Self::new()
    }
}

fn tags_match(have: &Tags, want: &Tags) -> bool {
    want.iter().all(|(k, v)| have.get(k) == Some(v))
}

fn new_conversation(channel: &str, tags: Tags) -> Conversation {
    Conversation {
        id: format!("conv-{}", uuid::Uuid::new_v4()),
        channel: channel.to_string(),
        tags,
    }
}

fn new_user(tags: Tags) -> User {
    User {
        id: format!("user-{}", uuid::Uuid::new_v4()),
        tags,
    }
}

impl MemoryHostStore {
    pub fn new() -> Self {
        let (notices, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(RwLock::new(Records::default())),
            notices,
        }
    }

    /// Subscribe to messages and events created from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreNotice> {
        self.notices.subscribe()
    }

    pub async fn conversation(&self, id: &str) -> Option<Conversation> {
        let g = self.inner.read().await;
        g.conversations.iter().find(|c| c.id == id).cloned()
    }

    pub async fn user(&self, id: &str) -> Option<User> {
        let g = self.inner.read().await;
        g.users.iter().find(|u| u.id == id).cloned()
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.inner.read().await.conversations.clone()
    }

    pub async fn users(&self) -> Vec<User> {
        self.inner.read().await.users.clone()
    }

    /// Messages of one conversation, oldest first.
    pub async fn messages(&self, conversation_id: &str) -> Vec<Message> {
        let g = self.inner.read().await;
        g.messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    /// All events raised so far, oldest first.
    pub async fn events(&self) -> Vec<HostEvent> {
        self.inner.read().await.events.clone()
    }

    fn publish(&self, notice: StoreNotice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }
}

#[async_trait]
impl HostStore for MemoryHostStore {
    async fn create_conversation(
        &self,
        channel: &str,
        tags: Tags,
    ) -> Result<Conversation, StoreError> {
        let conversation = new_conversation(channel, tags);
        self.inner
            .write()
            .await
            .conversations
            .push(conversation.clone());
        log::debug!("host store: created conversation {}", conversation.id);
        Ok(conversation)
    }

    async fn get_or_create_conversation(
        &self,
        channel: &str,
        tags: Tags,
    ) -> Result<Conversation, StoreError> {
        let mut g = self.inner.write().await;
        if let Some(existing) = g
            .conversations
            .iter()
            .find(|c| c.channel == channel && tags_match(&c.tags, &tags))
        {
            return Ok(existing.clone());
        }
        let conversation = new_conversation(channel, tags);
        g.conversations.push(conversation.clone());
        log::debug!("host store: created conversation {} on lookup", conversation.id);
        Ok(conversation)
    }

    async fn create_user(&self, tags: Tags) -> Result<User, StoreError> {
        let user = new_user(tags);
        self.inner.write().await.users.push(user.clone());
        log::debug!("host store: created user {}", user.id);
        Ok(user)
    }

    async fn get_or_create_user(&self, tags: Tags) -> Result<User, StoreError> {
        let mut g = self.inner.write().await;
        if let Some(existing) = g.users.iter().find(|u| tags_match(&u.tags, &tags)) {
            return Ok(existing.clone());
        }
        let user = new_user(tags);
        g.users.push(user.clone());
        log::debug!("host store: created user {} on lookup", user.id);
        Ok(user)
    }

    async fn create_message(
        &self,
        conversation_id: &str,
        user_id: &str,
        payload: MessagePayload,
    ) -> Result<Message, StoreError> {
        let message = {
            let mut g = self.inner.write().await;
            if !g.conversations.iter().any(|c| c.id == conversation_id) {
                return Err(StoreError::NotFound {
                    entity: "conversation",
                    id: conversation_id.to_string(),
                });
            }
            if !g.users.iter().any(|u| u.id == user_id) {
                return Err(StoreError::NotFound {
                    entity: "user",
                    id: user_id.to_string(),
                });
            }
            let message = Message {
                id: format!("msg-{}", uuid::Uuid::new_v4()),
                conversation_id: conversation_id.to_string(),
                user_id: user_id.to_string(),
                payload,
                created_at: chrono::Utc::now().to_rfc3339(),
            };
            g.messages.push(message.clone());
            message
        };
        self.publish(StoreNotice::Message(message.clone()));
        Ok(message)
    }

    async fn create_event(&self, event: HostEvent) -> Result<(), StoreError> {
        self.inner.write().await.events.push(event.clone());
        log::debug!(
            "host store: event {} for conversation {}",
            event.name(),
            event.conversation_id()
        );
        self.publish(StoreNotice::Event(event));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(id: &str) -> Tags {
        Tags::from([("externalId".to_string(), id.to_string())])
    }

    #[tokio::test]
    async fn get_or_create_conversation_reuses_matching_tags() {
        let store = MemoryHostStore::new();
        let a = store
            .get_or_create_conversation("hitl", tags("rt-1"))
            .await
            .unwrap();
        let b = store
            .get_or_create_conversation("hitl", tags("rt-1"))
            .await
            .unwrap();
        let c = store
            .get_or_create_conversation("hitl", tags("rt-2"))
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(store.conversations().await.len(), 2);
    }

    #[tokio::test]
    async fn lookup_is_scoped_to_channel() {
        let store = MemoryHostStore::new();
        let a = store.create_conversation("hitl", tags("rt-1")).await.unwrap();
        let b = store
            .get_or_create_conversation("other", tags("rt-1"))
            .await
            .unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn lookup_returns_oldest_duplicate() {
        let store = MemoryHostStore::new();
        let first = store.create_conversation("hitl", tags("rt-1")).await.unwrap();
        let _second = store.create_conversation("hitl", tags("rt-1")).await.unwrap();
        let found = store
            .get_or_create_conversation("hitl", tags("rt-1"))
            .await
            .unwrap();
        assert_eq!(found.id, first.id);
    }

    #[tokio::test]
    async fn create_message_requires_known_conversation_and_user() {
        let store = MemoryHostStore::new();
        let conv = store.create_conversation("hitl", tags("rt-1")).await.unwrap();
        let err = store
            .create_message(&conv.id, "user-missing", MessagePayload::text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "user", .. }));

        let user = store.create_user(tags("ru-1")).await.unwrap();
        let msg = store
            .create_message(&conv.id, &user.id, MessagePayload::text("hi"))
            .await
            .unwrap();
        assert_eq!(store.messages(&conv.id).await, vec![msg]);
    }

    #[tokio::test]
    async fn notices_are_published_to_subscribers() {
        let store = MemoryHostStore::new();
        let mut rx = store.subscribe();
        store
            .create_event(HostEvent::HitlStopped {
                conversation_id: "conv-1".into(),
            })
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            StoreNotice::Event(HostEvent::HitlStopped { conversation_id }) => {
                assert_eq!(conversation_id, "conv-1")
            }
            other => panic!("unexpected notice: {:?}", other),
        }
    }
}
