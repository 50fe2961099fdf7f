//! Frame types for the Vigil protocol.
//!
//! Inbound frames are kept loosely typed: the router only needs the `type`
//! discriminator, and signaling payloads must be forwarded byte for byte.
//! Outbound frames produced by the server itself are strongly typed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::codec::ProtocolError;
use crate::types::{ChatMessage, ParticipantId};

/// Discriminator of an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Ping,
    Signal,
    RequestUpdate,
    SessionEnded,
    ExerciseData,
    /// Any discriminator this server does not handle.
    Other(String),
}

impl FrameKind {
    /// Map a wire discriminator to a frame kind.
    #[must_use]
    pub fn from_wire(name: &str) -> Self {
        match name {
            "ping" => FrameKind::Ping,
            "signal" => FrameKind::Signal,
            "request_update" => FrameKind::RequestUpdate,
            "session_ended" => FrameKind::SessionEnded,
            "exercise_data" => FrameKind::ExerciseData,
            other => FrameKind::Other(other.to_string()),
        }
    }

    /// Wire name of the frame kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            FrameKind::Ping => "ping",
            FrameKind::Signal => "signal",
            FrameKind::RequestUpdate => "request_update",
            FrameKind::SessionEnded => "session_ended",
            FrameKind::ExerciseData => "exercise_data",
            FrameKind::Other(name) => name,
        }
    }
}

/// An inbound frame on the monitor or telemetry channel.
///
/// The original text is retained so relayed frames reach the other side
/// exactly as they were sent.
#[derive(Debug, Clone)]
pub struct Envelope {
    kind: FrameKind,
    body: Map<String, Value>,
    raw: String,
}

impl Envelope {
    /// Parse a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object with a string
    /// `type` field.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(body) = value else {
            return Err(ProtocolError::NotAnObject);
        };
        let kind = match body.get("type") {
            Some(Value::String(name)) => FrameKind::from_wire(name),
            _ => return Err(ProtocolError::MissingType),
        };

        Ok(Self {
            kind,
            body,
            raw: text.to_string(),
        })
    }

    /// The frame discriminator.
    #[must_use]
    pub fn kind(&self) -> &FrameKind {
        &self.kind
    }

    /// The frame exactly as received.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Look up a field of the frame.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// Re-encode the frame with a different discriminator, keeping every
    /// other field.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn retyped(&self, kind: &str) -> Result<String, ProtocolError> {
        let mut body = self.body.clone();
        body.insert("type".to_string(), Value::String(kind.to_string()));
        Ok(serde_json::to_string(&body)?)
    }
}

/// An inbound chat frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatRequest {
    /// Intended recipient.
    #[serde(default, alias = "recipientId")]
    pub recipient_id: Option<ParticipantId>,
    /// Message text.
    #[serde(default)]
    pub content: Option<String>,
    /// Client-side message kind (`text`, `attachment`, ...).
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl ChatRequest {
    /// The recipient, if one was named.
    #[must_use]
    pub fn recipient(&self) -> Option<&ParticipantId> {
        self.recipient_id.as_ref().filter(|id| !id.as_str().is_empty())
    }
}

/// A frame produced by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A chat message addressed to this participant.
    NewMessage { message: ChatMessage },

    /// Echo of a chat message this participant sent, for every open tab.
    MessageSent { message: ChatMessage },

    /// Channel admitted.
    Connected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        monitored_id: ParticipantId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        monitored_name: Option<String>,
    },

    /// Answer to a `ping`.
    Pong,

    /// The other side of a monitoring pairing came online.
    PeerConnected { peer_name: String },

    /// Answer to a `request_update`.
    StatusUpdate {
        monitored_id: ParticipantId,
        status: String,
        monitored_online: bool,
    },

    /// The other side ended the session.
    SessionEnded { reason: String },

    /// Receipt for an `exercise_data` frame.
    Acknowledged { timestamp: Option<Value> },

    /// A frame could not be processed.
    Error { message: String },
}

impl ServerFrame {
    /// Create a new SessionEnded frame.
    #[must_use]
    pub fn session_ended(reason: impl Into<String>) -> Self {
        ServerFrame::SessionEnded {
            reason: reason.into(),
        }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }

    /// Wire discriminator of the frame.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::NewMessage { .. } => "new_message",
            ServerFrame::MessageSent { .. } => "message_sent",
            ServerFrame::Connected { .. } => "connected",
            ServerFrame::Pong => "pong",
            ServerFrame::PeerConnected { .. } => "peer_connected",
            ServerFrame::StatusUpdate { .. } => "status_update",
            ServerFrame::SessionEnded { .. } => "session_ended",
            ServerFrame::Acknowledged { .. } => "acknowledged",
            ServerFrame::Error { .. } => "error",
        }
    }
}
