//! # swoosh-relay
//!
//! Progress relay server binary: loads settings, installs logging and
//! metrics, and serves the WebSocket relay until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use swoosh_server::{NoStatusSource, RelayServer, ServerConfig};
use swoosh_settings::RelaySettings;

/// Swoosh progress relay.
#[derive(Parser, Debug)]
#[command(name = "swoosh-relay", about = "Real-time workflow progress relay")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.swoosh/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level filter, e.g. `info` or `swoosh_server=debug` (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,

    /// Seconds to wait for tasks during shutdown.
    #[arg(long, default_value = "10")]
    shutdown_timeout: u64,
}

impl Cli {
    /// Load settings and apply command-line overrides on top.
    fn resolve_settings(&self) -> Result<RelaySettings> {
        let mut settings = match &self.settings {
            Some(path) => swoosh_settings::load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => swoosh_settings::load_settings().context("Failed to load settings")?,
        };
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.resolve_settings()?;

    swoosh_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let metrics_handle = swoosh_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let config = ServerConfig::from(&settings);
    let server = RelayServer::new(config, Arc::new(NoStatusSource), Some(metrics_handle));
    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind server")?;

    tracing::info!(
        %addr,
        max_connections = server.config().max_connections,
        max_per_workflow = server.config().max_connections_per_workflow,
        "swoosh relay listening on ws://{addr}/ws/{{workflow_id}}"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server
        .shutdown()
        .graceful_shutdown(
            server.hub(),
            vec![handle],
            Some(Duration::from_secs(cli.shutdown_timeout)),
        )
        .await;
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::parse_from(["swoosh-relay"]);
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(!cli.json_logs);
        assert_eq!(cli.shutdown_timeout, 10);
    }

    #[test]
    fn cli_overrides_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server":{"port":9100},"limits":{"maxConnectionsPerWorkflow":5}}"#)
            .unwrap();
        let cli = Cli::parse_from([
            "swoosh-relay",
            "--settings",
            path.to_str().unwrap(),
            "--port",
            "9200",
            "--log-level",
            "debug",
        ]);
        let settings = cli.resolve_settings().unwrap();
        assert_eq!(settings.server.port, 9200);
        assert_eq!(settings.limits.max_connections_per_workflow, 5);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn missing_settings_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let cli = Cli::parse_from(["swoosh-relay", "--settings", path.to_str().unwrap()]);
        let settings = cli.resolve_settings().unwrap();
        assert_eq!(settings.limits.max_connections, 10_000);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"heartbeat":{"intervalSecs":30,"timeoutSecs":5}}"#).unwrap();
        let cli = Cli::parse_from(["swoosh-relay", "--settings", path.to_str().unwrap()]);
        assert!(cli.resolve_settings().is_err());
    }
}
