//! # Vigil Server
//!
//! Realtime chat, monitoring, and telemetry relay between supervisors and
//! the participants they monitor.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! vigil
//!
//! # Run with a config file in the working directory
//! cp vigil.example.toml vigil.toml && vigil
//!
//! # Run with a specific config file (environment overrides are not applied)
//! vigil --config /path/to/vigil.toml
//!
//! # Run with environment variables
//! VIGIL_PORT=8000 VIGIL_HOST=0.0.0.0 VIGIL__HEARTBEAT__IDLE_TIMEOUT_MS=0 vigil
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Vigil realtime relay server
#[derive(Parser, Debug)]
#[command(name = "vigil", version)]
#[command(about = "Realtime chat, monitoring, and telemetry relay")]
struct Args {
    /// Config file to load instead of searching for vigil.toml
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &args.config {
        Some(path) => config::Config::from_file(path)?,
        None => config::Config::load()?,
    };

    tracing::info!("Starting Vigil server on {}:{}", config.host, config.port);
    if config.directory.credentials.is_empty() {
        tracing::warn!("No credentials configured; every connection will be rejected");
    }

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args() {
        Args::command().debug_assert();

        let args = Args::try_parse_from(["vigil", "--config=/etc/vigil/vigil.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/etc/vigil/vigil.toml")));

        let args = Args::try_parse_from(["vigil", "--config", "local.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("local.toml")));

        assert!(Args::try_parse_from(["vigil", "--config"]).is_err());
    }
}
