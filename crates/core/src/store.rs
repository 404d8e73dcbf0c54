//! Message store: where finalized transcripts may be appended.
//!
//! The engine never reads from the store during a run; it only appends
//! once a run has completed successfully.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::message::Message;

/// Persistence for finalized transcripts, keyed by conversation.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// A human-readable name for this backend.
    fn name(&self) -> &str;

    /// Append messages to a conversation, creating it if needed.
    async fn append(&self, conversation_id: &str, messages: &[Message]) -> Result<(), StoreError>;

    /// Load every message of a conversation in append order.
    async fn load(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError>;
}

/// A store that keeps transcripts in process memory.
/// Useful for testing and sessions where persistence isn't needed.
#[derive(Default)]
pub struct InMemoryMessageStore {
    conversations: Arc<RwLock<HashMap<String, Vec<Message>>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of conversations held.
    pub async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.conversations.read().await.is_empty()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn append(&self, conversation_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        self.conversations
            .write()
            .await
            .entry(conversation_id.to_string())
            .or_default()
            .extend_from_slice(messages);
        Ok(())
    }

    async fn load(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        self.conversations
            .read()
            .await
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))
    }
}
