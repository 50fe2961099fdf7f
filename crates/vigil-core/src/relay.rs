//! Signal relay between supervisors and monitored participants.
//!
//! Both sides are keyed by the monitored participant's identity, whichever
//! side connected first, so every supervisor of one participant resolves
//! to the same pairing.

use std::sync::Arc;
use tracing::{debug, info};
use vigil_protocol::{codec, ParticipantId, ServerFrame};
use vigil_transport::CloseFrame;

use crate::registry::ConnectionRegistry;
use crate::session::SessionTable;

/// Reason relayed to supervisors when the monitored participant ends.
pub const ENDED_BY_MONITORED: &str = "monitored party ended session";
/// Reason relayed to the monitored participant when a supervisor ends.
pub const ENDED_BY_SUPERVISOR: &str = "supervisor ended session";

/// One side of a monitoring pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Supervisor,
    Monitored,
}

/// Forwards frames across a monitoring pairing.
pub struct SignalRelay {
    /// Telemetry connections, keyed by their own identity.
    monitored: Arc<ConnectionRegistry>,
    /// Monitor connections, keyed by the identity they observe.
    observers: Arc<ConnectionRegistry>,
    sessions: SessionTable,
}

impl SignalRelay {
    /// Create an empty relay.
    #[must_use]
    pub fn new() -> Self {
        Self {
            monitored: Arc::new(ConnectionRegistry::new("monitored")),
            observers: Arc::new(ConnectionRegistry::new("observers")),
            sessions: SessionTable::new(),
        }
    }

    /// Registry of monitored participants' telemetry connections.
    #[must_use]
    pub fn monitored(&self) -> &Arc<ConnectionRegistry> {
        &self.monitored
    }

    /// Registry of supervisors' monitor connections.
    #[must_use]
    pub fn observers(&self) -> &Arc<ConnectionRegistry> {
        &self.observers
    }

    /// Live monitor sessions.
    #[must_use]
    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Whether the monitored participant has a live telemetry connection.
    #[must_use]
    pub fn is_monitored_online(&self, monitored_id: &ParticipantId) -> bool {
        self.monitored.is_connected(monitored_id)
    }

    /// Whether any supervisor is observing the monitored participant.
    #[must_use]
    pub fn is_observed(&self, monitored_id: &ParticipantId) -> bool {
        self.observers.is_connected(monitored_id)
    }

    /// Forward a frame to the monitored participant.
    pub fn to_monitored(&self, monitored_id: &ParticipantId, text: &str) -> usize {
        self.monitored.send_to(monitored_id, text)
    }

    /// Forward a frame to every supervisor observing the monitored participant.
    pub fn to_observers(&self, monitored_id: &ParticipantId, text: &str) -> usize {
        self.observers.send_to(monitored_id, text)
    }

    /// End the pairing around `monitored_id`.
    ///
    /// The side that did not end the session is told why, then every
    /// connection of the pairing on both sides is closed and the sessions
    /// observing the participant end. Returns how many connections received
    /// the relayed `session_ended`.
    pub fn end_session(&self, monitored_id: &ParticipantId, ended_by: Side) -> usize {
        let (target, reason) = match ended_by {
            Side::Monitored => (&self.observers, ENDED_BY_MONITORED),
            Side::Supervisor => (&self.monitored, ENDED_BY_SUPERVISOR),
        };

        let delivered = match codec::encode(&ServerFrame::session_ended(reason)) {
            Ok(frame) => target.send_to(monitored_id, &frame),
            Err(e) => {
                debug!(error = %e, "Failed to encode session_ended");
                0
            }
        };

        let close = CloseFrame::normal("session ended");
        let closed = self.observers.close_all(monitored_id, &close)
            + self.monitored.close_all(monitored_id, &close);
        let sessions = self.sessions.end_for(monitored_id);

        info!(
            monitored = %monitored_id,
            ended_by = ?ended_by,
            delivered,
            closed,
            sessions = sessions.len(),
            "Pairing torn down"
        );
        delivered
    }
}

impl Default for SignalRelay {
    fn default() -> Self {
        Self::new()
    }
}
