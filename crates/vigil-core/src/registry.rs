//! Connection registry.
//!
//! Maps a participant identity to the live connections routed under it.
//! The map is sharded, so registering or unregistering for one identity
//! never waits on traffic for unrelated identities.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use vigil_protocol::ParticipantId;
use vigil_transport::{CloseFrame, ConnectionId};

/// Default depth of a connection's outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Why a frame could not be handed to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The connection's receive loop has exited.
    #[error("connection closed")]
    Closed,

    /// The connection is not draining its outbound queue.
    #[error("outbound queue full")]
    Lagging,
}

/// Receiving half of a connection handle, owned by the connection's loop.
pub struct Mailbox {
    /// Text frames queued for the connection.
    pub outbox: mpsc::Receiver<String>,
    /// Set once when the connection has been asked to close.
    pub close: watch::Receiver<Option<CloseFrame>>,
}

/// A cheap, cloneable handle to one live connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    owner: ParticipantId,
    outbox: mpsc::Sender<String>,
    close: Arc<watch::Sender<Option<CloseFrame>>>,
    opened_at: Instant,
    /// Milliseconds after `opened_at` of the last inbound frame.
    last_seen: Arc<AtomicU64>,
}

impl ConnectionHandle {
    /// Create a handle and the mailbox its connection loop drains.
    #[must_use]
    pub fn new(id: ConnectionId, owner: ParticipantId, capacity: usize) -> (Self, Mailbox) {
        let (outbox_tx, outbox_rx) = mpsc::channel(capacity.max(1));
        let (close_tx, close_rx) = watch::channel(None);

        let handle = Self {
            id,
            owner,
            outbox: outbox_tx,
            close: Arc::new(close_tx),
            opened_at: Instant::now(),
            last_seen: Arc::new(AtomicU64::new(0)),
        };
        let mailbox = Mailbox {
            outbox: outbox_rx,
            close: close_rx,
        };

        (handle, mailbox)
    }

    /// The connection ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// The participant this connection belongs to.
    #[must_use]
    pub fn owner(&self) -> &ParticipantId {
        &self.owner
    }

    /// Queue a text frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is gone or its queue is full.
    pub fn send(&self, text: impl Into<String>) -> Result<(), DeliveryError> {
        self.outbox.try_send(text.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Lagging,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Ask the connection to close once it has flushed what is already
    /// queued. Only the first request counts.
    pub fn close(&self, frame: CloseFrame) {
        self.close.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(frame);
            true
        });
    }

    /// Whether a close has been requested.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.close.borrow().is_some()
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        let elapsed = self.opened_at.elapsed().as_millis() as u64;
        self.last_seen.store(elapsed, Ordering::Relaxed);
    }

    /// Time since the last inbound frame, or since the connection opened.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        let last_seen = Duration::from_millis(self.last_seen.load(Ordering::Relaxed));
        self.opened_at.elapsed().saturating_sub(last_seen)
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Registry of live connections keyed by participant identity.
pub struct ConnectionRegistry {
    /// Label used in logs (`chat`, `monitored`, `observers`).
    name: &'static str,
    /// Connections per key, in registration order.
    entries: DashMap<ParticipantId, Vec<ConnectionHandle>>,
    /// Failed per-connection deliveries since creation.
    delivery_failures: AtomicU64,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            delivery_failures: AtomicU64::new(0),
        }
    }

    /// Register a connection under `key`.
    pub fn register(&self, key: ParticipantId, handle: ConnectionHandle) {
        let connection = handle.id().clone();
        let mut entry = self.entries.entry(key.clone()).or_default();
        entry.push(handle);

        debug!(
            registry = self.name,
            participant = %key,
            connection = %connection,
            connections = entry.len(),
            "Registered connection"
        );
    }

    /// Remove exactly one connection from under `key`.
    ///
    /// The key itself is dropped once its last connection is gone. Returns
    /// `true` if the connection was registered.
    pub fn unregister(&self, key: &ParticipantId, connection: &ConnectionId) -> bool {
        let removed = match self.entries.get_mut(key) {
            Some(mut entry) => {
                let before = entry.len();
                entry.retain(|handle| handle.id() != connection);
                before != entry.len()
            }
            None => false,
        };

        // Re-checked under the shard lock, so a concurrent register wins.
        if self
            .entries
            .remove_if(key, |_, entry| entry.is_empty())
            .is_some()
        {
            debug!(registry = self.name, participant = %key, "Removed empty entry");
        }

        if removed {
            debug!(
                registry = self.name,
                participant = %key,
                connection = %connection,
                "Unregistered connection"
            );
        }
        removed
    }

    /// Send a text frame to every connection under `key`.
    ///
    /// Works from a snapshot of the current set. A failure on one connection
    /// is logged and never stops the others, and never changes membership.
    /// Returns the number of connections that accepted the frame.
    pub fn send_to(&self, key: &ParticipantId, text: &str) -> usize {
        let Some(snapshot) = self.snapshot(key) else {
            trace!(registry = self.name, participant = %key, "No live connections");
            return 0;
        };

        let mut delivered = 0;
        for handle in &snapshot {
            match handle.send(text) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    self.delivery_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        registry = self.name,
                        participant = %key,
                        connection = %handle.id(),
                        error = %e,
                        "Delivery failed"
                    );
                }
            }
        }

        trace!(
            registry = self.name,
            participant = %key,
            delivered,
            attempted = snapshot.len(),
            "Sent"
        );
        delivered
    }

    /// Ask every connection under `key` to close. Returns how many were asked.
    pub fn close_all(&self, key: &ParticipantId, frame: &CloseFrame) -> usize {
        let snapshot = self.snapshot(key).unwrap_or_default();
        for handle in &snapshot {
            handle.close(frame.clone());
        }
        snapshot.len()
    }

    /// A copy of the connections under `key`, in registration order.
    #[must_use]
    pub fn snapshot(&self, key: &ParticipantId) -> Option<Vec<ConnectionHandle>> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    /// Whether `key` has at least one live connection.
    #[must_use]
    pub fn is_connected(&self, key: &ParticipantId) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of live connections under `key`.
    #[must_use]
    pub fn connection_count(&self, key: &ParticipantId) -> usize {
        self.entries.get(key).map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the registry has no entries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Connections whose last inbound frame is older than `timeout`.
    #[must_use]
    pub fn idle_connections(&self, timeout: Duration) -> Vec<ConnectionHandle> {
        self.entries
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|handle| handle.idle_for() > timeout)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            participants: self.entries.len(),
            connections: self.entries.iter().map(|e| e.len()).sum(),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RegistryStats {
    /// Keys with at least one connection.
    pub participants: usize,
    /// Live connections across all keys.
    pub connections: usize,
    /// Failed per-connection deliveries.
    pub delivery_failures: u64,
}
