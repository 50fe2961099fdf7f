//! Chat message persistence.
//!
//! The hosted data store is an external collaborator. [`MessageStore`] is
//! the narrow surface the router needs from it: insert one message and read
//! one direction of a conversation.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use vigil_protocol::{ChatMessage, NewChatMessage, ParticipantId};

/// Store failures.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store refused the record (policy, schema).
    #[error("rejected: {0}")]
    Rejected(String),

    /// The store could not be reached.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// External message store.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert a message; the stored record carries a store-assigned ID.
    async fn persist(&self, message: NewChatMessage) -> Result<ChatMessage, StoreError>;

    /// All messages sent by `sender` to `recipient`, in any order.
    async fn messages_from(
        &self,
        sender: &ParticipantId,
        recipient: &ParticipantId,
    ) -> Result<Vec<ChatMessage>, StoreError>;
}

/// Process-local store, used in development and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: RwLock<Vec<ChatMessage>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages.
    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    /// Whether nothing has been stored.
    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn persist(&self, message: NewChatMessage) -> Result<ChatMessage, StoreError> {
        let stored = message.into_stored(uuid::Uuid::new_v4().to_string());
        self.messages.write().await.push(stored.clone());
        Ok(stored)
    }

    async fn messages_from(
        &self,
        sender: &ParticipantId,
        recipient: &ParticipantId,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| &m.sender_id == sender && &m.recipient_id == recipient)
            .cloned()
            .collect())
    }
}
