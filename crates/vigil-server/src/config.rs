//! Server configuration.
//!
//! Configuration is layered:
//! - Built-in defaults (`VIGIL_HOST` and `VIGIL_PORT` are honored here)
//! - The first `vigil.toml` found in `.`, `/etc/vigil/`, `~/.config/vigil/`
//! - Environment variables (`VIGIL__PORT`, `VIGIL__HEARTBEAT__IDLE_TIMEOUT_MS`, ...)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vigil_core::{HubConfig, Participant, StaticSessions, StaticVerifier};
use vigil_protocol::Role;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Endpoint paths.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Idle connection sweeping.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Development identity and session data.
    #[serde(default)]
    pub directory: DirectoryConfig,
}

/// Endpoint paths. Channel and history paths are relative to `base_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_base_path")]
    pub base_path: String,

    #[serde(default = "default_chat_path")]
    pub chat_path: String,

    /// Must contain the `:session_id` segment.
    #[serde(default = "default_monitor_path")]
    pub monitor_path: String,

    #[serde(default = "default_telemetry_path")]
    pub telemetry_path: String,

    /// Must contain the `:other_id` segment.
    #[serde(default = "default_history_path")]
    pub history_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Frames queued per connection before deliveries to it fail.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// How often idle connections are looked for, in milliseconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// Silence after which a connection is closed, in milliseconds. Zero
    /// disables sweeping.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Fixed credentials and sessions, for running without the hosted
/// identity provider and data store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub credentials: Vec<CredentialEntry>,

    #[serde(default)]
    pub sessions: Vec<SessionEntry>,
}

/// A bearer credential and the identity it stands for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialEntry {
    pub token: String,
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// A monitor session and its monitored participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub id: String,
    pub monitored_id: String,
    #[serde(default)]
    pub monitored_name: Option<String>,
}

// Default value functions
fn default_host() -> String {
    std::env::var("VIGIL_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("VIGIL_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000)
}

fn default_true() -> bool {
    true
}

fn default_base_path() -> String {
    "/api/v1".to_string()
}

fn default_chat_path() -> String {
    "/ws/chat".to_string()
}

fn default_monitor_path() -> String {
    "/ws/monitor/:session_id".to_string()
}

fn default_telemetry_path() -> String {
    "/ws/telemetry".to_string()
}

fn default_history_path() -> String {
    "/chat/history/:other_id".to_string()
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_outbound_queue() -> usize {
    vigil_core::registry::DEFAULT_OUTBOUND_CAPACITY
}

fn default_sweep_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_idle_timeout() -> u64 {
    120_000 // 2 minutes
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
            directory: DirectoryConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            chat_path: default_chat_path(),
            monitor_path: default_monitor_path(),
            telemetry_path: default_telemetry_path(),
            history_path: default_history_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval(),
            idle_timeout_ms: default_idle_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl DirectoryConfig {
    /// A verifier over the configured credentials.
    #[must_use]
    pub fn verifier(&self) -> StaticVerifier {
        self.credentials
            .iter()
            .fold(StaticVerifier::new(), |verifier, entry| {
                let mut participant = Participant::new(entry.id.as_str(), entry.role);
                if let Some(name) = &entry.display_name {
                    participant = participant.with_display_name(name.clone());
                }
                verifier.with_credential(entry.token.clone(), participant)
            })
    }

    /// A session directory over the configured sessions.
    #[must_use]
    pub fn sessions(&self) -> StaticSessions {
        self.sessions
            .iter()
            .fold(StaticSessions::new(), |sessions, entry| {
                sessions.with_session(
                    entry.id.clone(),
                    entry.monitored_id.as_str(),
                    entry.monitored_name.clone(),
                )
            })
    }
}

impl Config {
    /// Load configuration from the first config file found, layered under
    /// `VIGIL__*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment variable has the wrong type.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "vigil.toml",
            "/etc/vigil/vigil.toml",
            "~/.config/vigil/vigil.toml",
        ];

        let found = config_paths
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists());

        Self::load_from(found.as_deref())
    }

    /// Load configuration from `path` (if any) and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or the environment cannot be parsed.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("VIGIL")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder.build().with_context(|| match path {
            Some(path) => format!("Failed to load config file: {}", path.display()),
            None => "Failed to load configuration".to_string(),
        })?;

        settings
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Load configuration from a specific file, without the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Hub settings derived from limits and heartbeat.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            outbound_capacity: self.limits.outbound_queue,
            idle_timeout: Duration::from_millis(self.heartbeat.idle_timeout_ms),
            sweep_interval: Duration::from_millis(self.heartbeat.sweep_interval_ms),
        }
    }
}
