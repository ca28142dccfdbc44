//! Settings types. Field names are camelCase on disk.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Network and transport settings.
    pub server: ServerSettings,
    /// Resource ceilings.
    pub limits: LimitSettings,
    /// Liveness probing.
    pub heartbeat: HeartbeatSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Reject combinations the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.limits.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "limits.maxConnections must be greater than 0".into(),
            ));
        }
        if self.limits.max_connections_per_workflow == 0 {
            return Err(SettingsError::InvalidValue(
                "limits.maxConnectionsPerWorkflow must be greater than 0".into(),
            ));
        }
        if self.server.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendQueueCapacity must be greater than 0".into(),
            ));
        }
        if self.heartbeat.interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "heartbeat.intervalSecs must be greater than 0".into(),
            ));
        }
        if self.heartbeat.timeout_secs < self.heartbeat.interval_secs {
            return Err(SettingsError::InvalidValue(format!(
                "heartbeat.timeoutSecs ({}) must be at least heartbeat.intervalSecs ({})",
                self.heartbeat.timeout_secs, self.heartbeat.interval_secs
            )));
        }
        Ok(())
    }
}

/// Network and transport settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` auto-assigns).
    pub port: u16,
    /// Largest inbound WebSocket message accepted, in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per connection before delivery fails.
    pub send_queue_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8787,
            max_message_size: 64 * 1024,
            send_queue_capacity: 256,
        }
    }
}

/// Resource ceilings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LimitSettings {
    /// Live connections across all workflows.
    pub max_connections: usize,
    /// Live connections watching one workflow.
    pub max_connections_per_workflow: usize,
    /// Cached latest-status snapshots.
    pub max_snapshots: usize,
    /// Consecutive malformed client messages tolerated before disconnecting.
    pub max_malformed_messages: u32,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            max_connections_per_workflow: 100,
            max_snapshots: 10_000,
            max_malformed_messages: 10,
        }
    }
}

/// Liveness probing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Seconds between probe sweeps.
    pub interval_secs: u64,
    /// Seconds an unanswered probe may stay outstanding.
    pub timeout_secs: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            timeout_secs: 60,
        }
    }
}

/// Log output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}
