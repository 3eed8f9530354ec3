//! Test doubles for the transport and host store.

use crate::host::{
    Conversation, HostEvent, HostStore, MemoryHostStore, Message, MessagePayload, StoreError, Tags,
    User,
};
use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Transport that answers from a script and records every request body.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<Result<Value, TransportError>>>,
    requests: Mutex<Vec<(String, Value)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, body: Value) -> Self {
        self.responses.lock().unwrap().push_back(Ok(body));
        self
    }

    pub fn with_error(self, err: TransportError) -> Self {
        self.responses.lock().unwrap().push_back(Err(err));
        self
    }

    /// (url, JSON body) of every request so far.
    pub fn requests(&self) -> Vec<(String, Value)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn post_json(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        let body: Value = serde_json::from_slice(&body).expect("relay sent invalid JSON");
        self.requests.lock().unwrap().push((url.to_string(), body));
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Unreachable("no scripted response".into())));
        next.map(|v| serde_json::to_vec(&v).unwrap())
    }
}

/// Host store where every call fails.
pub struct FailingStore;

fn down() -> StoreError {
    StoreError::Unavailable("store is down".into())
}

#[async_trait]
impl HostStore for FailingStore {
    async fn create_conversation(&self, _: &str, _: Tags) -> Result<Conversation, StoreError> {
        Err(down())
    }
    async fn get_or_create_conversation(
        &self,
        _: &str,
        _: Tags,
    ) -> Result<Conversation, StoreError> {
        Err(down())
    }
    async fn create_user(&self, _: Tags) -> Result<User, StoreError> {
        Err(down())
    }
    async fn get_or_create_user(&self, _: Tags) -> Result<User, StoreError> {
        Err(down())
    }
    async fn create_message(
        &self,
        _: &str,
        _: &str,
        _: MessagePayload,
    ) -> Result<Message, StoreError> {
        Err(down())
    }
    async fn create_event(&self, _: HostEvent) -> Result<(), StoreError> {
        Err(down())
    }
}

/// Memory store that counts how many trait calls it received.
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryHostStore,
    calls: AtomicUsize,
}

impl CountingStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl HostStore for CountingStore {
    async fn create_conversation(
        &self,
        channel: &str,
        tags: Tags,
    ) -> Result<Conversation, StoreError> {
        self.hit();
        self.inner.create_conversation(channel, tags).await
    }
    async fn get_or_create_conversation(
        &self,
        channel: &str,
        tags: Tags,
    ) -> Result<Conversation, StoreError> {
        self.hit();
        self.inner.get_or_create_conversation(channel, tags).await
    }
    async fn create_user(&self, tags: Tags) -> Result<User, StoreError> {
        self.hit();
        self.inner.create_user(tags).await
    }
    async fn get_or_create_user(&self, tags: Tags) -> Result<User, StoreError> {
        self.hit();
        self.inner.get_or_create_user(tags).await
    }
    async fn create_message(
        &self,
        conversation_id: &str,
        user_id: &str,
        payload: MessagePayload,
    ) -> Result<Message, StoreError> {
        self.hit();
        self.inner
            .create_message(conversation_id, user_id, payload)
            .await
    }
    async fn create_event(&self, event: HostEvent) -> Result<(), StoreError> {
        self.hit();
        self.inner.create_event(event).await
    }
}
