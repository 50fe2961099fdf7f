//! Codec for encoding and decoding Vigil frames.
//!
//! All frames travel as UTF-8 JSON text, one object per transport message.

use thiserror::Error;

use crate::frames::{ChatRequest, Envelope, ServerFrame};

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The text is not valid JSON or does not match the expected shape.
    #[error("Invalid JSON format: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame is valid JSON but not an object.
    #[error("Frame is not a JSON object")]
    NotAnObject,

    /// The frame has no string `type` discriminator.
    #[error("Frame has no type")]
    MissingType,

    /// A timestamp is not valid RFC 3339.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Encode a server frame to text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(frame: &ServerFrame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode a server frame from text.
///
/// # Errors
///
/// Returns an error if the text is not a known server frame.
pub fn decode(text: &str) -> Result<ServerFrame, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Decode an inbound chat frame.
///
/// # Errors
///
/// Returns an error if the text is not a JSON object of the chat shape.
pub fn decode_chat(text: &str) -> Result<ChatRequest, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Decode an inbound monitor or telemetry frame.
///
/// # Errors
///
/// Returns an error if the text is not a typed JSON object.
pub fn decode_envelope(text: &str) -> Result<Envelope, ProtocolError> {
    Envelope::parse(text)
}
