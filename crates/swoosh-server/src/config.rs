//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use swoosh_settings::RelaySettings;

use crate::websocket::admission::AdmissionLimits;

/// Runtime configuration for the relay server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind; `0` picks a free port.
    pub port: u16,
    /// Live connections across all workflows.
    pub max_connections: usize,
    /// Live connections per workflow.
    pub max_connections_per_workflow: usize,
    /// Heartbeat probe interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Seconds an unanswered probe may stay outstanding before eviction.
    pub heartbeat_timeout_secs: u64,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound frames queued per connection before it counts as stalled.
    pub send_queue_capacity: usize,
    /// Workflows kept in the snapshot cache.
    pub max_snapshots: usize,
    /// Consecutive malformed messages tolerated before closing.
    pub max_malformed_messages: u32,
}

impl ServerConfig {
    /// Probe interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Probe timeout.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Connection ceilings.
    pub fn admission_limits(&self) -> AdmissionLimits {
        AdmissionLimits {
            max_connections: self.max_connections,
            max_connections_per_workflow: self.max_connections_per_workflow,
        }
    }

    /// `host:port`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&RelaySettings::default())
    }
}

impl From<&RelaySettings> for ServerConfig {
    fn from(s: &RelaySettings) -> Self {
        Self {
            host: s.server.host.clone(),
            port: s.server.port,
            max_connections: s.limits.max_connections,
            max_connections_per_workflow: s.limits.max_connections_per_workflow,
            heartbeat_interval_secs: s.heartbeat.interval_secs,
            heartbeat_timeout_secs: s.heartbeat.timeout_secs,
            max_message_size: s.server.max_message_size,
            send_queue_capacity: s.server.send_queue_capacity,
            max_snapshots: s.limits.max_snapshots,
            max_malformed_messages: s.limits.max_malformed_messages,
        }
    }
}
