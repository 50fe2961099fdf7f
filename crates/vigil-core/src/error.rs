//! Error taxonomy for the realtime layer.
//!
//! The first three kinds are evaluated once, when a connection is
//! established, and close it with a policy-violation status. The next three
//! are isolated to one frame or one peer and the connection survives them.

use thiserror::Error;
use vigil_protocol::ProtocolError;
use vigil_transport::{CloseFrame, ConnectionId, TransportError};

use crate::registry::DeliveryError;
use crate::store::StoreError;

/// Realtime layer errors.
#[derive(Debug, Error)]
pub enum Error {
    /// No credential, or the credential could not be verified.
    #[error("{0}")]
    Unauthenticated(String),

    /// Valid identity, wrong role or ownership.
    #[error("{0}")]
    Unauthorized(String),

    /// The monitored session could not be resolved.
    #[error("{0}")]
    SessionNotFound(String),

    /// A frame could not be parsed.
    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] ProtocolError),

    /// The message store rejected a message.
    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[from] StoreError),

    /// One peer connection could not take a frame.
    #[error("Delivery to {connection} failed: {source}")]
    DeliveryFailure {
        connection: ConnectionId,
        source: DeliveryError,
    },

    /// The connection itself failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Unexpected failure while handling a frame.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the connection should keep serving after this error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::MalformedMessage(_) | Error::PersistenceFailure(_) | Error::DeliveryFailure { .. }
        )
    }

    /// The close frame for errors raised while establishing a connection.
    ///
    /// All of them share the policy-violation status and differ only in the
    /// reason string.
    #[must_use]
    pub fn close_frame(&self) -> Option<CloseFrame> {
        match self {
            Error::Unauthenticated(reason)
            | Error::Unauthorized(reason)
            | Error::SessionNotFound(reason) => Some(CloseFrame::policy_violation(reason.clone())),
            _ => None,
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Unauthenticated(_) => "unauthenticated",
            Error::Unauthorized(_) => "unauthorized",
            Error::SessionNotFound(_) => "session_not_found",
            Error::MalformedMessage(_) => "malformed_message",
            Error::PersistenceFailure(_) => "persistence_failure",
            Error::DeliveryFailure { .. } => "delivery_failure",
            Error::Transport(_) => "transport",
            Error::Internal(_) => "internal",
        }
    }
}
