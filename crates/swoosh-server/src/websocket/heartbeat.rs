//! Heartbeat liveness monitoring.
//!
//! One monitor sweeps the whole registry on each tick. A connection that is
//! alive gets a ping and moves to awaiting. A connection still awaiting on a
//! later tick is evicted with [`RemovalReason::HeartbeatTimeout`] once its
//! silence since the last liveness response (or admission) reaches the
//! timeout. With the default 30s interval and 60s timeout, a silent client
//! is probed on the first tick and evicted on the second.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::{ConnectionRegistry, RemovalReason};
use crate::metrics as names;

/// Outcome of one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Connections that received a new probe.
    pub probed: usize,
    /// Connections evicted for missing a probe.
    pub evicted: usize,
    /// Connections evicted because the probe could not be queued.
    pub failed: usize,
}

/// Periodic liveness sweeper.
pub struct HeartbeatMonitor {
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    timeout: Duration,
}

impl HeartbeatMonitor {
    /// Probe every `interval`; evict once a probed connection has been
    /// silent for `timeout`.
    pub fn new(registry: Arc<ConnectionRegistry>, interval: Duration, timeout: Duration) -> Self {
        Self {
            registry,
            interval,
            timeout,
        }
    }

    /// Check every connection once.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        for conn in self.registry.connections() {
            if conn.begin_probe() {
                if let Err(e) = conn.ping() {
                    debug!(conn_id = %conn.id, error = %e, "heartbeat probe failed");
                    if self.registry.remove(&conn.id, RemovalReason::TransportError) {
                        report.failed += 1;
                    }
                } else {
                    report.probed += 1;
                }
                continue;
            }
            let silent = conn.silent_for(now);
            if silent >= self.timeout {
                warn!(
                    conn_id = %conn.id,
                    workflow_id = conn.workflow_id(),
                    silent_secs = silent.as_secs(),
                    "heartbeat timed out"
                );
                if self.registry.remove(&conn.id, RemovalReason::HeartbeatTimeout) {
                    report.evicted += 1;
                    counter!(names::WS_HEARTBEAT_EVICTIONS_TOTAL).increment(1);
                }
            }
        }
        report
    }

    /// Sweep on every interval tick until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        let _ = ticker.tick().await;
        info!(
            interval_secs = self.interval.as_secs(),
            timeout_secs = self.timeout.as_secs(),
            "heartbeat monitor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.sweep(Instant::now());
                    if report.evicted > 0 || report.failed > 0 {
                        debug!(
                            probed = report.probed,
                            evicted = report.evicted,
                            failed = report.failed,
                            "heartbeat sweep"
                        );
                    }
                }
                () = cancel.cancelled() => {
                    info!("heartbeat monitor stopped");
                    return;
                }
            }
        }
    }
}
