//! # vigil-protocol
//!
//! Wire protocol definitions for the Vigil realtime layer.
//!
//! Every frame on every channel is a JSON object carrying a `type`
//! discriminator. This crate defines:
//!
//! - **Types** - participant identities, roles, chat records, timestamps
//! - **Frames** - inbound envelopes and outbound server frames
//! - **Codec** - text encoding and decoding with a single error type
//!
//! ## Example
//!
//! ```rust
//! use vigil_protocol::{codec, Envelope, FrameKind, ServerFrame};
//!
//! let envelope = Envelope::parse(r#"{"type":"signal","sdp":"offer-1"}"#).unwrap();
//! assert_eq!(envelope.kind(), &FrameKind::Signal);
//!
//! let pong = codec::encode(&ServerFrame::Pong).unwrap();
//! assert_eq!(pong, r#"{"type":"pong"}"#);
//! ```

pub mod codec;
pub mod frames;
pub mod types;

pub use codec::{decode_chat, encode, ProtocolError};
pub use frames::{ChatRequest, Envelope, FrameKind, ServerFrame};
pub use types::{ChatMessage, MessageId, NewChatMessage, ParticipantId, Role, Timestamp};
