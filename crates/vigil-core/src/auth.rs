//! Authentication gate.
//!
//! Vigil does not issue or check credentials itself. It consumes a
//! [`Verifier`] (a hosted identity provider, a JWT validator, a fixed table
//! in development) and converts every outcome into either a [`Participant`]
//! or a connection-closing [`Error`]. The gate runs once per connection
//! attempt, before the connection touches any registry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error as ThisError;
use tracing::{debug, warn};
use vigil_protocol::{ParticipantId, Role};

use crate::error::Error;

/// An authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub role: Role,
    /// Name shown to the other side, when the identity provider has one.
    #[serde(default)]
    pub display_name: Option<String>,
}

impl Participant {
    /// Create a participant without a display name.
    #[must_use]
    pub fn new(id: impl Into<ParticipantId>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            display_name: None,
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Verification failures reported by a [`Verifier`].
#[derive(Debug, Clone, ThisError)]
pub enum VerifyError {
    /// The credential is unknown, expired, or malformed.
    #[error("invalid credential")]
    InvalidCredential,

    /// The verification service could not answer.
    #[error("verification service unavailable: {0}")]
    Unavailable(String),
}

/// External credential verification.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Map a bearer credential to the identity it was issued for.
    async fn verify(&self, credential: &str) -> Result<Participant, VerifyError>;
}

/// Verifier backed by a fixed credential table.
#[derive(Debug, Default, Clone)]
pub struct StaticVerifier {
    credentials: HashMap<String, Participant>,
}

impl StaticVerifier {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a credential.
    #[must_use]
    pub fn with_credential(mut self, credential: impl Into<String>, participant: Participant) -> Self {
        self.credentials.insert(credential.into(), participant);
        self
    }
}

#[async_trait]
impl Verifier for StaticVerifier {
    async fn verify(&self, credential: &str) -> Result<Participant, VerifyError> {
        self.credentials
            .get(credential)
            .cloned()
            .ok_or(VerifyError::InvalidCredential)
    }
}

/// Admits or rejects connection attempts.
#[derive(Clone)]
pub struct AuthGate {
    verifier: Arc<dyn Verifier>,
}

impl AuthGate {
    /// Create a gate over a verifier.
    #[must_use]
    pub fn new(verifier: Arc<dyn Verifier>) -> Self {
        Self { verifier }
    }

    /// Verify a credential.
    ///
    /// A verification outage is treated like an invalid credential; there
    /// is no retry here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthenticated`] if the credential is missing or
    /// cannot be verified.
    pub async fn authenticate(&self, credential: Option<&str>) -> Result<Participant, Error> {
        let credential = match credential {
            Some(c) if !c.is_empty() => c,
            _ => return Err(Error::Unauthenticated("Authentication required".into())),
        };

        match self.verifier.verify(credential).await {
            Ok(participant) => {
                debug!(participant = %participant.id, role = %participant.role, "Authenticated");
                Ok(participant)
            }
            Err(VerifyError::InvalidCredential) => {
                Err(Error::Unauthenticated("Invalid authentication token".into()))
            }
            Err(VerifyError::Unavailable(reason)) => {
                warn!(error = %reason, "Credential verification unavailable");
                Err(Error::Unauthenticated("Authentication failed".into()))
            }
        }
    }

    /// Verify a credential and require a role.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthenticated`] as [`AuthGate::authenticate`] does,
    /// or [`Error::Unauthorized`] if the participant holds another role.
    pub async fn authenticate_as(
        &self,
        credential: Option<&str>,
        role: Role,
    ) -> Result<Participant, Error> {
        let participant = self.authenticate(credential).await?;
        if participant.role != role {
            let reason = match role {
                Role::Supervisor => "Unauthorized: supervisor access only",
                Role::Monitored => "Unauthorized: monitored participant access only",
            };
            return Err(Error::Unauthorized(reason.into()));
        }
        Ok(participant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DownVerifier;

    #[async_trait]
    impl Verifier for DownVerifier {
        async fn verify(&self, _credential: &str) -> Result<Participant, VerifyError> {
            Err(VerifyError::Unavailable("connection refused".into()))
        }
    }

    fn gate() -> AuthGate {
        let verifier = StaticVerifier::new()
            .with_credential("doc-token", Participant::new("d-1", Role::Supervisor))
            .with_credential("pat-token", Participant::new("p-1", Role::Monitored));
        AuthGate::new(Arc::new(verifier))
    }

    #[tokio::test]
    async fn test_authenticate_valid() {
        let participant = gate().authenticate(Some("doc-token")).await.unwrap();
        assert_eq!(participant.id.as_str(), "d-1");
        assert_eq!(participant.role, Role::Supervisor);
    }

    #[tokio::test]
    async fn test_missing_and_invalid_credentials() {
        let gate = gate();

        let missing = gate.authenticate(None).await.unwrap_err();
        assert_eq!(missing.to_string(), "Authentication required");
        let empty = gate.authenticate(Some("")).await.unwrap_err();
        assert_eq!(empty.to_string(), "Authentication required");

        let invalid = gate.authenticate(Some("forged")).await.unwrap_err();
        assert!(matches!(invalid, Error::Unauthenticated(_)));
        assert_eq!(invalid.to_string(), "Invalid authentication token");
    }

    #[tokio::test]
    async fn test_outage_is_rejection() {
        let gate = AuthGate::new(Arc::new(DownVerifier));
        let err = gate.authenticate(Some("anything")).await.unwrap_err();
        assert!(matches!(err, Error::Unauthenticated(_)));
        assert_eq!(err.to_string(), "Authentication failed");
    }

    #[tokio::test]
    async fn test_role_requirement() {
        let gate = gate();

        assert!(gate
            .authenticate_as(Some("doc-token"), Role::Supervisor)
            .await
            .is_ok());

        let err = gate
            .authenticate_as(Some("pat-token"), Role::Supervisor)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        assert_eq!(err.to_string(), "Unauthorized: supervisor access only");
    }
}
