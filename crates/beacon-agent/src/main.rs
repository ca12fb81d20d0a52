//! Beacon Agent - standalone registration and discovery process
//!
//! Loads a registry configuration, publishes the local node and mirrors the
//! subscribed services into the local cache, logging what it sees until a
//! shutdown signal arrives.

mod logging;
mod shutdown;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use beacon_api::NodeState;
use beacon_client::{ClientError, MemoryStore, RegistryConfig, ServiceRegistry};
use clap::Parser;
use tracing::{debug, info, warn};

use crate::logging::{LoggingConfig, init_logging};
use crate::shutdown::wait_for_shutdown_signal;

#[derive(Debug, Parser)]
#[command(name = "beacon-agent", version, about)]
struct Cli {
    /// Registry configuration file
    #[arg(short, long, env = "BEACON_CONFIG", default_value = "conf/beacon.yml")]
    config: PathBuf,

    /// State published once registration has started
    #[arg(short, long, env = "BEACON_STATE")]
    state: Option<String>,

    /// Directory for the rolling log file
    #[arg(long, env = "BEACON_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Log level used when RUST_LOG is unset
    #[arg(long, env = "BEACON_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Seconds between subscription summaries
    #[arg(long, default_value_t = 10)]
    report_interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(&LoggingConfig::new(cli.log_dir.clone(), &cli.log_level))?;

    let config = RegistryConfig::load(&cli.config)?;
    info!(
        config = %cli.config.display(),
        endpoints = ?config.endpoints,
        "Configuration loaded"
    );

    // endpoints are informational in standalone mode
    let store = Arc::new(MemoryStore::new());
    let registry = ServiceRegistry::new(config.clone(), store);

    if config.register.is_some() {
        let options = registry.register_options().with_callback(|result| match result {
            Ok(()) => debug!("Registration healthy"),
            Err(ClientError::Timeout(what)) => warn!(what, "Registration step timed out"),
            Err(e) => warn!(error = %e, "Registration step failed"),
        });
        registry.start_registration(options)?;
        if let Some(state) = &cli.state {
            registry.change_state(NodeState::from(state.as_str()));
        }
    }

    if config.subscribe.is_some() {
        registry.start_subscription().await?;
        info!(services = ?registry.subscribed_names(), "Subscription started");
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(cli.report_interval.max(1)));
    let signal = wait_for_shutdown_signal();
    tokio::pin!(signal);

    loop {
        tokio::select! {
            _ = &mut signal => break,
            _ = ticker.tick() => report(&registry),
        }
    }

    registry.shutdown().await;
    info!("Beacon agent stopped");
    Ok(())
}

fn report(registry: &ServiceRegistry) {
    if let Some(phase) = registry.registration_phase() {
        info!(
            %phase,
            state = %registry.current_state(),
            key = %registry.registration_key().unwrap_or_default(),
            "Registration status"
        );
    }
    for name in registry.subscribed_names() {
        let online = registry.online_by_name(&name);
        let nodes: Vec<String> = online
            .iter()
            .map(|n| format!("{}@{}", n.node_id(), n.global.private_ip))
            .collect();
        info!(
            service = %name,
            online = online.len(),
            total = registry.cache().entries(&name).len(),
            ?nodes,
            "Subscribed service"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["beacon-agent"]);
        assert_eq!(cli.config, PathBuf::from("conf/beacon.yml"));
        assert_eq!(cli.log_level, "info");
        assert_eq!(cli.report_interval, 10);
        assert!(cli.state.is_none());
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "beacon-agent",
            "-c",
            "/etc/beacon.yml",
            "--state",
            "ONLINE",
            "--report-interval",
            "3",
        ]);
        assert_eq!(cli.config, PathBuf::from("/etc/beacon.yml"));
        assert_eq!(cli.state.as_deref(), Some("ONLINE"));
        assert_eq!(cli.report_interval, 3);
    }
}
