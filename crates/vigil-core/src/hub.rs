//! The hub ties the collaborators and registries together.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{AuthGate, StaticVerifier, Verifier};
use crate::registry::{ConnectionRegistry, RegistryStats, DEFAULT_OUTBOUND_CAPACITY};
use crate::relay::SignalRelay;
use crate::resolver::{SessionDirectory, SessionResolver, StaticSessions};
use crate::router::{MessageRouter, OppositeRole, Relationships};
use crate::store::{MemoryStore, MessageStore};

/// Hub configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Outbound queue depth per connection.
    pub outbound_capacity: usize,
    /// Connections silent for longer than this are closed. Zero disables
    /// the sweeper.
    pub idle_timeout: Duration,
    /// How often idle connections are looked for.
    pub sweep_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            idle_timeout: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Shared state behind every channel.
pub struct Hub {
    pub(crate) config: HubConfig,
    pub(crate) gate: AuthGate,
    pub(crate) resolver: SessionResolver,
    pub(crate) router: MessageRouter,
    pub(crate) relay: SignalRelay,
}

impl Hub {
    /// Start building a hub.
    #[must_use]
    pub fn builder() -> HubBuilder {
        HubBuilder::default()
    }

    /// The hub configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// The authentication gate.
    #[must_use]
    pub fn gate(&self) -> &AuthGate {
        &self.gate
    }

    /// The chat router.
    #[must_use]
    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// The signal relay.
    #[must_use]
    pub fn relay(&self) -> &SignalRelay {
        &self.relay
    }

    /// Chat connections.
    #[must_use]
    pub fn chat(&self) -> &Arc<ConnectionRegistry> {
        self.router.registry()
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            chat: self.chat().stats(),
            monitored: self.relay.monitored().stats(),
            observers: self.relay.observers().stats(),
            sessions: self.relay.sessions().len(),
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Chat connections by participant.
    pub chat: RegistryStats,
    /// Telemetry connections by monitored participant.
    pub monitored: RegistryStats,
    /// Monitor connections by the participant they observe.
    pub observers: RegistryStats,
    /// Live monitor sessions.
    pub sessions: usize,
}

/// Builder for [`Hub`].
///
/// Collaborators left unset fall back to empty in-memory implementations.
#[derive(Default)]
pub struct HubBuilder {
    config: HubConfig,
    verifier: Option<Arc<dyn Verifier>>,
    sessions: Option<Arc<dyn SessionDirectory>>,
    store: Option<Arc<dyn MessageStore>>,
    relationships: Option<Arc<dyn Relationships>>,
}

impl HubBuilder {
    /// Set the configuration.
    #[must_use]
    pub fn config(mut self, config: HubConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the credential verifier.
    #[must_use]
    pub fn verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Set the session directory.
    #[must_use]
    pub fn sessions(mut self, sessions: Arc<dyn SessionDirectory>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Set the message store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the relationship policy.
    #[must_use]
    pub fn relationships(mut self, relationships: Arc<dyn Relationships>) -> Self {
        self.relationships = Some(relationships);
        self
    }

    /// Build the hub.
    #[must_use]
    pub fn build(self) -> Hub {
        let verifier = self
            .verifier
            .unwrap_or_else(|| Arc::new(StaticVerifier::new()));
        let sessions = self
            .sessions
            .unwrap_or_else(|| Arc::new(StaticSessions::new()));
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let relationships = self
            .relationships
            .unwrap_or_else(|| Arc::new(OppositeRole));

        let registry = Arc::new(ConnectionRegistry::new("chat"));
        Hub {
            config: self.config,
            gate: AuthGate::new(verifier),
            resolver: SessionResolver::new(sessions),
            router: MessageRouter::new(registry, store).with_relationships(relationships),
            relay: SignalRelay::new(),
        }
    }
}
