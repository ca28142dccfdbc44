//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

use crate::hub::HubStats;

/// Health check response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `"ok"`, or `"shutting_down"` once draining has started.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Live WebSocket connections.
    pub connections: usize,
    /// Workflows with at least one subscriber.
    pub workflows: usize,
    /// Messages delivered to clients.
    pub messages_sent: u64,
    /// Messages received from clients.
    pub messages_received: u64,
    /// Transport and protocol errors.
    pub errors: u64,
    /// Refused admissions.
    pub rejected: u64,
    /// Whether graceful shutdown has started.
    pub shutting_down: bool,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, stats: &HubStats) -> HealthResponse {
    let registry = &stats.registry;
    HealthResponse {
        status: if stats.shutting_down { "shutting_down" } else { "ok" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: registry.connections,
        workflows: registry.workflows,
        messages_sent: registry.messages_sent,
        messages_received: registry.messages_received,
        errors: registry.errors,
        rejected: registry.rejected,
        shutting_down: stats.shutting_down,
    }
}
