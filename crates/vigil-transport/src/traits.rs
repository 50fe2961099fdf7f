//! Transport abstraction traits for Vigil.
//!
//! These traits define the interface that all transport implementations must provide,
//! allowing channel logic to be transport-agnostic.

use async_trait::async_trait;
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("conn_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Status code and reason sent when the server closes a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: Cow<'static, str>,
}

impl CloseFrame {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// The endpoint is going away (idle sweep, shutdown).
    pub const GOING_AWAY: u16 = 1001;
    /// The peer violated policy: authentication, authorization, resolution.
    pub const POLICY_VIOLATION: u16 = 1008;
    /// The server hit an unexpected condition.
    pub const INTERNAL_ERROR: u16 = 1011;

    /// Create a close frame.
    #[must_use]
    pub fn new(code: u16, reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Normal closure with a reason.
    #[must_use]
    pub fn normal(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Self::NORMAL, reason)
    }

    /// Policy-violation closure with a reason.
    #[must_use]
    pub fn policy_violation(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Self::POLICY_VIOLATION, reason)
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// An active connection over a transport.
///
/// Connections carry text frames in both directions between the server
/// and a single client.
#[async_trait]
pub trait Connection: Send {
    /// Get the connection's unique identifier.
    fn id(&self) -> &ConnectionId;

    /// Receive the next text frame from the connection.
    ///
    /// Returns `None` if the connection is closed cleanly. Must be
    /// cancel-safe: a dropped call loses no frame.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;

    /// Send a text frame to the connection.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the connection with a status code and reason.
    async fn close(&mut self, frame: CloseFrame) -> Result<(), TransportError>;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_connection_id_from_string() {
        let id: ConnectionId = "test-id".into();
        assert_eq!(id.as_str(), "test-id");
    }

    #[test]
    fn test_close_frame_helpers() {
        let frame = CloseFrame::policy_violation("Session not found");
        assert_eq!(frame.code, 1008);
        assert_eq!(frame.reason, "Session not found");
        assert_eq!(CloseFrame::normal(format!("bye {}", 1)).code, 1000);
    }
}
