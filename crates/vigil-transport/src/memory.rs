//! In-process transport.
//!
//! [`pair`] returns a server-side [`MemoryConnection`] and the client-side
//! [`MemoryPeer`] that drives it. Used by tests and by embedders that want
//! to run channel logic without a network.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::traits::{CloseFrame, Connection, ConnectionId, TransportError};

/// What the client side observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A text frame from the server.
    Text(String),
    /// The server closed the connection.
    Closed(CloseFrame),
}

/// Server side of an in-memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<PeerEvent>,
    is_open: bool,
}

/// Client side of an in-memory connection.
pub struct MemoryPeer {
    outbound: Option<mpsc::UnboundedSender<String>>,
    inbound: mpsc::UnboundedReceiver<PeerEvent>,
}

/// Create a connected pair.
#[must_use]
pub fn pair() -> (MemoryConnection, MemoryPeer) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();

    let conn = MemoryConnection {
        id: ConnectionId::generate(),
        inbound: server_rx,
        outbound: server_tx,
        is_open: true,
    };
    let peer = MemoryPeer {
        outbound: Some(client_tx),
        inbound: client_rx,
    };

    (conn, peer)
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        if !self.is_open {
            return Ok(None);
        }
        Ok(self.inbound.recv().await)
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound
            .send(PeerEvent::Text(text))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self, frame: CloseFrame) -> Result<(), TransportError> {
        if !std::mem::replace(&mut self.is_open, false) {
            return Ok(());
        }
        self.outbound
            .send(PeerEvent::Closed(frame))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }
}

impl MemoryPeer {
    /// Send a text frame to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side has gone away or the peer hung up.
    pub fn send(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.outbound
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?
            .send(text.into())
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Close the client side; the server's next `recv` returns `None`.
    pub fn hang_up(&mut self) {
        self.outbound = None;
    }

    /// Wait for the next event from the server.
    ///
    /// Returns `None` once the server side has been dropped.
    pub async fn next_event(&mut self) -> Option<PeerEvent> {
        self.inbound.recv().await
    }

    /// Take the next event if one is already queued.
    pub fn try_next_event(&mut self) -> Option<PeerEvent> {
        self.inbound.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_carries_text_both_ways() {
        let (mut conn, mut peer) = pair();

        peer.send("hello").unwrap();
        assert_eq!(conn.recv().await.unwrap(), Some("hello".to_string()));

        conn.send("world".to_string()).await.unwrap();
        assert_eq!(
            peer.next_event().await,
            Some(PeerEvent::Text("world".to_string()))
        );
    }

    #[tokio::test]
    async fn test_hang_up_ends_recv() {
        let (mut conn, mut peer) = pair();
        peer.hang_up();
        assert_eq!(conn.recv().await.unwrap(), None);
        assert!(peer.send("late").is_err());
    }

    #[tokio::test]
    async fn test_close_is_reported_once() {
        let (mut conn, mut peer) = pair();

        conn.close(CloseFrame::policy_violation("nope")).await.unwrap();
        conn.close(CloseFrame::normal("again")).await.unwrap();

        assert_eq!(
            peer.next_event().await,
            Some(PeerEvent::Closed(CloseFrame::policy_violation("nope")))
        );
        assert!(peer.try_next_event().is_none());
        assert!(conn.send("after".to_string()).await.is_err());
    }
}
