//! Monitor session tracking.
//!
//! A session moves `Idle -> Monitoring -> Ended`. It enters `Monitoring`
//! when the first supervisor connection binds to it and ends either on an
//! explicit `session_ended` frame or when its last supervisor leaves.
//! Ended sessions are dropped from the table, so `Ended` is only ever
//! observed as the return value of [`SessionTable::release`]; afterwards
//! the id reads as `Idle` again, like any unknown id, and a new bind starts
//! a fresh session.

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};
use vigil_protocol::ParticipantId;
use vigil_transport::ConnectionId;

/// Lifecycle state of a monitor session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No supervisor bound.
    Idle,
    /// At least one supervisor bound.
    Monitoring,
    /// Terminal.
    Ended,
}

/// A supervising observation of one monitored participant's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorSession {
    pub session_id: String,
    pub monitored_id: ParticipantId,
    pub state: SessionState,
    /// Bound supervisor connections, in binding order.
    #[serde(skip)]
    pub supervisors: Vec<ConnectionId>,
}

/// All live monitor sessions.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: DashMap<String, MonitorSession>,
}

impl SessionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a supervisor connection to a session.
    pub fn bind(&self, session_id: &str, monitored_id: &ParticipantId, connection: &ConnectionId) {
        let mut session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| MonitorSession {
                session_id: session_id.to_string(),
                monitored_id: monitored_id.clone(),
                state: SessionState::Idle,
                supervisors: Vec::new(),
            });

        session.supervisors.push(connection.clone());
        if session.state == SessionState::Idle {
            session.state = SessionState::Monitoring;
            info!(session = %session_id, monitored = %monitored_id, "Monitoring started");
        }
        debug!(
            session = %session_id,
            connection = %connection,
            supervisors = session.supervisors.len(),
            "Supervisor bound"
        );
    }

    /// Release one supervisor connection.
    ///
    /// Returns the session's state afterwards; `Ended` when this was the
    /// last supervisor. Releasing a connection the session does not hold
    /// (for instance after the session was ended) changes nothing.
    pub fn release(&self, session_id: &str, connection: &ConnectionId) -> SessionState {
        let state = match self.sessions.get_mut(session_id) {
            Some(mut session) => {
                session.supervisors.retain(|c| c != connection);
                if session.supervisors.is_empty() {
                    session.state = SessionState::Ended;
                }
                session.state
            }
            None => return SessionState::Idle,
        };

        if self
            .sessions
            .remove_if(session_id, |_, s| s.state == SessionState::Ended)
            .is_some()
        {
            info!(session = %session_id, "Monitoring ended, last supervisor left");
        }
        state
    }

    /// End every session observing `monitored_id`. Returns their ids.
    pub fn end_for(&self, monitored_id: &ParticipantId) -> Vec<String> {
        let ended: Vec<String> = self
            .sessions
            .iter()
            .filter(|s| &s.monitored_id == monitored_id)
            .map(|s| s.key().clone())
            .collect();

        for session_id in &ended {
            if self.sessions.remove(session_id).is_some() {
                info!(session = %session_id, monitored = %monitored_id, "Session ended");
            }
        }
        ended
    }

    /// Current state of a session. Never `Ended`: ended sessions are gone.
    #[must_use]
    pub fn state(&self, session_id: &str) -> SessionState {
        self.sessions
            .get(session_id)
            .map(|s| s.state)
            .unwrap_or(SessionState::Idle)
    }

    /// A copy of a session.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<MonitorSession> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_until_last_supervisor_leaves() {
        let table = SessionTable::new();
        let p: ParticipantId = "p-1".into();
        assert_eq!(table.state("s-1"), SessionState::Idle);

        table.bind("s-1", &p, &"c-1".into());
        table.bind("s-1", &p, &"c-2".into());
        assert_eq!(table.state("s-1"), SessionState::Monitoring);
        assert_eq!(table.get("s-1").unwrap().supervisors.len(), 2);

        assert_eq!(table.release("s-1", &"c-1".into()), SessionState::Monitoring);
        assert_eq!(table.release("s-1", &"c-2".into()), SessionState::Ended);
        assert!(table.is_empty());
        assert_eq!(table.state("s-1"), SessionState::Idle);

        table.bind("s-1", &p, &"c-3".into());
        assert_eq!(table.state("s-1"), SessionState::Monitoring);
        assert_eq!(table.get("s-1").unwrap().supervisors.len(), 1);
    }

    #[test]
    fn test_end_for_monitored_participant() {
        let table = SessionTable::new();
        table.bind("s-1", &"p-1".into(), &"c-1".into());
        table.bind("s-2", &"p-1".into(), &"c-2".into());
        table.bind("s-3", &"p-2".into(), &"c-3".into());

        let mut ended = table.end_for(&"p-1".into());
        ended.sort();
        assert_eq!(ended, vec!["s-1", "s-2"]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.state("s-3"), SessionState::Monitoring);
    }

    #[test]
    fn test_stale_release_does_not_touch_rebound_session() {
        let table = SessionTable::new();
        let p: ParticipantId = "p-1".into();
        table.bind("s-1", &p, &"old".into());
        table.end_for(&p);

        table.bind("s-1", &p, &"new".into());
        assert_eq!(table.release("s-1", &"old".into()), SessionState::Monitoring);
        assert_eq!(table.get("s-1").unwrap().supervisors, vec![ConnectionId::new("new")]);
    }
}
