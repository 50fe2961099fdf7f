//! # vigil-core
//!
//! Connection registry, authentication, and message routing for the Vigil
//! realtime layer.
//!
//! This crate provides the building blocks behind the three channels:
//!
//! - **Registry** - participant identity to live connections, sharded
//! - **Auth** - credential verification at connection establishment
//! - **Resolver** - monitor session to monitored participant
//! - **Router** - chat persistence, fan-out, and history
//! - **Relay** - signaling between supervisors and the monitored side
//! - **Hub** - the shared state every channel is served from
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│  AuthGate   │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                                       ▲
//!        ▼                                       │
//! ┌─────────────┐     ┌─────────────┐            │
//! │   Channel   │────▶│ Router/Relay│────────────┘
//! └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │ MessageStore│
//!                     └─────────────┘
//! ```

pub mod auth;
pub mod channel;
pub mod error;
pub mod hub;
pub mod liveness;
pub mod registry;
pub mod relay;
pub mod resolver;
pub mod router;
pub mod session;
pub mod store;

pub use auth::{AuthGate, Participant, StaticVerifier, Verifier, VerifyError};
pub use error::Error;
pub use hub::{Hub, HubBuilder, HubConfig, HubStats};
pub use registry::{ConnectionHandle, ConnectionRegistry, DeliveryError, Mailbox, RegistryStats};
pub use relay::{SignalRelay, Side};
pub use resolver::{ResolveError, ResolvedSession, SessionDirectory, SessionResolver, StaticSessions};
pub use router::{ChatOutcome, MessageRouter, OppositeRole, Relationships};
pub use session::{MonitorSession, SessionState, SessionTable};
pub use store::{MemoryStore, MessageStore, StoreError};
