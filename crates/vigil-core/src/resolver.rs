//! Session resolution.
//!
//! A supervisor opens a monitor channel with an external session
//! identifier. The [`SessionDirectory`] collaborator knows which monitored
//! participant that session belongs to; [`SessionResolver`] is the single
//! place where its answers, and its failures, are interpreted.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error as ThisError;
use tracing::{debug, warn};
use vigil_protocol::ParticipantId;

use crate::error::Error;

/// A session mapped to its monitored participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSession {
    pub session_id: String,
    pub monitored_id: ParticipantId,
    pub monitored_name: Option<String>,
}

/// Lookup failures reported by a [`SessionDirectory`].
#[derive(Debug, Clone, ThisError)]
pub enum ResolveError {
    /// No such session.
    #[error("unknown session")]
    Unknown,

    /// The directory could not answer.
    #[error("session directory unavailable: {0}")]
    Unavailable(String),
}

/// External session lookup.
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    /// Find the monitored participant of a session.
    async fn lookup(&self, session_id: &str) -> Result<ResolvedSession, ResolveError>;
}

/// Directory backed by a fixed table.
#[derive(Debug, Default, Clone)]
pub struct StaticSessions {
    sessions: HashMap<String, (ParticipantId, Option<String>)>,
}

impl StaticSessions {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session.
    #[must_use]
    pub fn with_session(
        mut self,
        session_id: impl Into<String>,
        monitored_id: impl Into<ParticipantId>,
        monitored_name: Option<String>,
    ) -> Self {
        self.sessions
            .insert(session_id.into(), (monitored_id.into(), monitored_name));
        self
    }
}

#[async_trait]
impl SessionDirectory for StaticSessions {
    async fn lookup(&self, session_id: &str) -> Result<ResolvedSession, ResolveError> {
        self.sessions
            .get(session_id)
            .map(|(monitored_id, monitored_name)| ResolvedSession {
                session_id: session_id.to_string(),
                monitored_id: monitored_id.clone(),
                monitored_name: monitored_name.clone(),
            })
            .ok_or(ResolveError::Unknown)
    }
}

/// Resolves session identifiers with one failure path.
#[derive(Clone)]
pub struct SessionResolver {
    directory: Arc<dyn SessionDirectory>,
}

impl SessionResolver {
    /// Create a resolver over a directory.
    #[must_use]
    pub fn new(directory: Arc<dyn SessionDirectory>) -> Self {
        Self { directory }
    }

    /// Resolve a session to its monitored participant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] for empty or unknown identifiers
    /// and for directory outages alike.
    pub async fn resolve(&self, session_id: &str) -> Result<ResolvedSession, Error> {
        if session_id.is_empty() {
            return Err(not_found());
        }

        match self.directory.lookup(session_id).await {
            Ok(resolved) => {
                debug!(session = %session_id, monitored = %resolved.monitored_id, "Resolved session");
                Ok(resolved)
            }
            Err(ResolveError::Unknown) => {
                debug!(session = %session_id, "Unknown session");
                Err(not_found())
            }
            Err(ResolveError::Unavailable(reason)) => {
                warn!(session = %session_id, error = %reason, "Session directory unavailable");
                Err(not_found())
            }
        }
    }
}

fn not_found() -> Error {
    Error::SessionNotFound("Session not found".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DownDirectory;

    #[async_trait]
    impl SessionDirectory for DownDirectory {
        async fn lookup(&self, _session_id: &str) -> Result<ResolvedSession, ResolveError> {
            Err(ResolveError::Unavailable("timeout".into()))
        }
    }

    #[tokio::test]
    async fn test_resolve_known_session() {
        let resolver = SessionResolver::new(Arc::new(
            StaticSessions::new().with_session("s-1", "p-1", Some("Pat".into())),
        ));

        let resolved = resolver.resolve("s-1").await.unwrap();
        assert_eq!(resolved.monitored_id.as_str(), "p-1");
        assert_eq!(resolved.monitored_name.as_deref(), Some("Pat"));
    }

    #[tokio::test]
    async fn test_every_failure_is_session_not_found() {
        let resolver = SessionResolver::new(Arc::new(StaticSessions::new()));
        let down = SessionResolver::new(Arc::new(DownDirectory));

        for err in [
            resolver.resolve("missing").await.unwrap_err(),
            resolver.resolve("").await.unwrap_err(),
            down.resolve("s-1").await.unwrap_err(),
        ] {
            assert!(matches!(err, Error::SessionNotFound(_)));
            assert_eq!(err.to_string(), "Session not found");
        }
    }
}
