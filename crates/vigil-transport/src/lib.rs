//! # vigil-transport
//!
//! Connection abstraction for the Vigil realtime layer.
//!
//! Channel logic only ever sees a [`Connection`]: a persistent,
//! bidirectional stream of text frames that can be closed with a status
//! code and a reason. Two implementations ship with this crate:
//!
//! - **WebSocket** - axum WebSocket upgrade (feature `websocket`, default)
//! - **Memory** - an in-process pair, for tests and embedding
//!
//! ```rust,ignore
//! use vigil_transport::Connection;
//!
//! async fn echo(mut conn: impl Connection) {
//!     while let Ok(Some(text)) = conn.recv().await {
//!         let _ = conn.send(text).await;
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryConnection, MemoryPeer, PeerEvent};
pub use traits::{CloseFrame, Connection, ConnectionId, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;
