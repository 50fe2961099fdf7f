//! Chat message router.
//!
//! Parses inbound chat frames, persists them through the [`MessageStore`],
//! and fans the stored record out to the recipient and back to the
//! sender's other tabs.

use std::sync::Arc;
use tracing::{debug, warn};
use vigil_protocol::{codec, ChatMessage, NewChatMessage, ParticipantId, Role, ServerFrame, Timestamp};

use crate::auth::Participant;
use crate::error::Error;
use crate::registry::ConnectionRegistry;
use crate::store::MessageStore;

/// Decides who may message whom, and in what role the recipient is
/// addressed.
pub trait Relationships: Send + Sync {
    /// The recipient's role for a message from `sender`, or `None` if the
    /// sender may not message this recipient.
    fn recipient_role(&self, sender: &Participant, recipient: &ParticipantId) -> Option<Role>;
}

/// The two-role model: supervisors talk to monitored participants and
/// vice versa.
#[derive(Debug, Default, Clone, Copy)]
pub struct OppositeRole;

impl Relationships for OppositeRole {
    fn recipient_role(&self, sender: &Participant, _recipient: &ParticipantId) -> Option<Role> {
        Some(sender.role.opposite())
    }
}

/// What happened to one inbound chat frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatOutcome {
    /// No recipient, or a recipient the sender may not address.
    Discarded,
    /// Persisted and fanned out.
    Delivered {
        message: ChatMessage,
        /// Recipient connections that accepted `new_message`.
        recipient_connections: usize,
        /// Sender connections that accepted `message_sent`.
        sender_connections: usize,
    },
}

/// Routes chat messages between participants.
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn MessageStore>,
    relationships: Arc<dyn Relationships>,
}

impl MessageRouter {
    /// Create a router using the two-role model.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, store: Arc<dyn MessageStore>) -> Self {
        Self {
            registry,
            store,
            relationships: Arc::new(OppositeRole),
        }
    }

    /// Replace the relationship policy.
    #[must_use]
    pub fn with_relationships(mut self, relationships: Arc<dyn Relationships>) -> Self {
        self.relationships = relationships;
        self
    }

    /// The registry chat connections are kept in.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Handle one inbound chat frame.
    ///
    /// A frame without a recipient is dropped silently. Nothing tells the
    /// sender about discarded or unpersisted messages.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedMessage`] if the frame cannot be parsed and
    /// [`Error::PersistenceFailure`] if the store rejects it; in both cases
    /// nothing is delivered.
    pub async fn handle_inbound(&self, sender: &Participant, raw: &str) -> Result<ChatOutcome, Error> {
        let request = codec::decode_chat(raw)?;

        let Some(recipient) = request.recipient().cloned() else {
            debug!(participant = %sender.id, "Chat frame without recipient, discarding");
            return Ok(ChatOutcome::Discarded);
        };

        let Some(recipient_role) = self.relationships.recipient_role(sender, &recipient) else {
            warn!(
                participant = %sender.id,
                recipient = %recipient,
                "Sender may not message recipient, discarding"
            );
            return Ok(ChatOutcome::Discarded);
        };

        let draft = NewChatMessage {
            sender_id: sender.id.clone(),
            recipient_id: recipient,
            content: request.content.unwrap_or_default(),
            sender_role: sender.role,
            recipient_role,
            created_at: Timestamp::now(),
        };

        let message = self.store.persist(draft).await.map_err(|e| {
            warn!(participant = %sender.id, error = %e, "Failed to persist chat message");
            Error::PersistenceFailure(e)
        })?;

        let to_recipient = encode(&ServerFrame::NewMessage {
            message: message.clone(),
        })?;
        let to_sender = encode(&ServerFrame::MessageSent {
            message: message.clone(),
        })?;

        let recipient_connections = self.registry.send_to(&message.recipient_id, &to_recipient);
        let sender_connections = self.registry.send_to(&message.sender_id, &to_sender);

        debug!(
            message = %message.id,
            participant = %message.sender_id,
            recipient = %message.recipient_id,
            recipient_connections,
            sender_connections,
            "Chat message routed"
        );

        Ok(ChatOutcome::Delivered {
            message,
            recipient_connections,
            sender_connections,
        })
    }

    /// The conversation between two participants, oldest first.
    ///
    /// Unbounded: every message in both directions is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PersistenceFailure`] if either direction cannot be
    /// read.
    pub async fn get_history(
        &self,
        self_id: &ParticipantId,
        other_id: &ParticipantId,
    ) -> Result<Vec<ChatMessage>, Error> {
        let (sent, received) = tokio::try_join!(
            self.store.messages_from(self_id, other_id),
            self.store.messages_from(other_id, self_id)
        )?;

        let mut history: Vec<ChatMessage> = sent
            .into_iter()
            .chain(received)
            .filter(|m| m.is_between(self_id, other_id))
            .collect();

        history.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        history.dedup_by(|a, b| a.id == b.id);

        Ok(history)
    }
}

/// Encode a server-produced frame. Failing to encode our own frame is a bug,
/// not a bad inbound frame.
pub(crate) fn encode(frame: &ServerFrame) -> Result<String, Error> {
    codec::encode(frame).map_err(|e| Error::Internal(e.to_string()))
}
