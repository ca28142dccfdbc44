//! The progress hub: the single entry point collaborators talk to.
//!
//! Owns the connection registry, the heartbeat monitor, and the snapshot
//! cache. Constructed once at startup and shared as `Arc<ProgressHub>`.
//!
//! Lock order is snapshot cache, then registry. Emission and the snapshot
//! replay on admission both run under the snapshot lock, so a late joiner
//! sees either the replayed snapshot or the live event, never neither and
//! never out of order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::Utc;
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use swoosh_core::progress::can_transition;
use swoosh_core::{ProgressEvent, ProgressUpdate, WorkflowStep};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::errors::{AdmissionError, HubError};
use crate::metrics as names;
use crate::status::{SnapshotCache, StatusSource};
use crate::websocket::connection::{ClientConnection, ConnectionMeta};
use crate::websocket::heartbeat::HeartbeatMonitor;
use crate::websocket::messages::ServerMessage;
use crate::websocket::registry::{ConnectionRegistry, RegistryStats, RemovalReason};
use crate::websocket::transport::Transport;

/// Hub-wide figures.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    /// Registry counters.
    #[serde(flatten)]
    pub registry: RegistryStats,
    /// Cached workflow snapshots.
    pub snapshots: usize,
    /// Whether shutdown has started.
    pub shutting_down: bool,
}

/// Connection registry, heartbeat, and snapshot cache behind one handle.
pub struct ProgressHub {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    snapshots: Mutex<SnapshotCache>,
    status_source: Arc<dyn StatusSource>,
    next_event_id: AtomicU64,
    monitor_cancel: CancellationToken,
    shutting_down: AtomicBool,
}

impl ProgressHub {
    /// Build a hub. Call [`Self::start`] to begin heartbeat monitoring.
    pub fn new(config: ServerConfig, status_source: Arc<dyn StatusSource>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.admission_limits()));
        let snapshots = Mutex::new(SnapshotCache::new(config.max_snapshots));
        Self {
            config,
            registry,
            snapshots,
            status_source,
            next_event_id: AtomicU64::new(1),
            monitor_cancel: CancellationToken::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Spawn the heartbeat monitor. It stops on [`Self::shutdown`].
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = HeartbeatMonitor::new(
            Arc::clone(&self.registry),
            self.config.heartbeat_interval(),
            self.config.heartbeat_timeout(),
        );
        tokio::spawn(monitor.run(self.monitor_cancel.clone()))
    }

    /// Admit a connection, then replay the workflow's latest event to it.
    ///
    /// The external status source is consulted only when nothing is cached
    /// and the connection would currently fit under the ceilings.
    pub async fn admit(
        &self,
        workflow_id: &str,
        transport: Transport,
        subscriber_id: Option<String>,
        meta: ConnectionMeta,
    ) -> Result<Arc<ClientConnection>, AdmissionError> {
        let cached = self.snapshots.lock().get(workflow_id).is_some();
        if !cached && self.registry.check_admission(workflow_id).is_ok() {
            if let Some(mut event) = self.status_source.latest_status(workflow_id).await {
                workflow_id.clone_into(&mut event.workflow_id);
                let mut snapshots = self.snapshots.lock();
                if snapshots.get(workflow_id).is_none() {
                    debug!(workflow_id, step = %event.step, "seeded snapshot from status source");
                    snapshots.insert(event);
                }
            }
        }

        let snapshots = self.snapshots.lock();
        let conn = self
            .registry
            .admit(workflow_id, transport, subscriber_id, meta)?;
        if let Some(event) = snapshots.get(workflow_id) {
            let replay = ServerMessage::Update {
                data: event.clone(),
            };
            match conn.send_json(&replay) {
                Ok(()) => self.registry.record_sent(1),
                Err(e) => {
                    warn!(conn_id = %conn.id, error = %e, "snapshot replay failed");
                    let _ = self.registry.remove(&conn.id, RemovalReason::TransportError);
                }
            }
        }
        Ok(conn)
    }

    /// Record and fan out a progress update. Returns the number of
    /// subscribers it was delivered to.
    pub fn emit_progress(&self, workflow_id: &str, update: ProgressUpdate) -> Result<usize, HubError> {
        if self.is_shutting_down() {
            return Err(HubError::ShutdownInProgress);
        }

        let mut snapshots = self.snapshots.lock();
        if let Some(prev) = snapshots.get(workflow_id) {
            if !can_transition(prev.step, update.step) {
                let err = if prev.step.is_terminal() {
                    HubError::WorkflowTerminal {
                        workflow_id: workflow_id.to_owned(),
                        step: prev.step,
                    }
                } else {
                    HubError::StepRegression {
                        workflow_id: workflow_id.to_owned(),
                        from: prev.step,
                        to: update.step,
                    }
                };
                warn!(error = %err, "progress rejected");
                return Err(err);
            }
        }

        let event_id = self.next_event_id.fetch_add(1, Ordering::Relaxed);
        let event = ProgressEvent::new(event_id, workflow_id, update, Utc::now());
        snapshots.insert(event.clone());
        let delivered = self.registry.broadcast_to_workflow(workflow_id, &event);
        drop(snapshots);

        counter!(names::PROGRESS_EVENTS_TOTAL, "step" => event.step.as_str()).increment(1);
        info!(
            workflow_id,
            event_id,
            step = %event.step,
            progress = event.progress,
            delivered,
            "progress emitted"
        );
        Ok(delivered)
    }

    /// Shorthand for [`Self::emit_progress`] with table defaults.
    pub fn emit_step(&self, workflow_id: &str, step: WorkflowStep) -> Result<usize, HubError> {
        self.emit_progress(workflow_id, ProgressUpdate::new(step))
    }

    /// Latest known event for `workflow_id`: cache first, then the status source.
    pub async fn latest_status(&self, workflow_id: &str) -> Option<ProgressEvent> {
        let cached = self.snapshots.lock().get(workflow_id).cloned();
        match cached {
            Some(event) => Some(event),
            None => self.status_source.latest_status(workflow_id).await,
        }
    }

    /// Live subscribers of `workflow_id`.
    pub fn subscriber_count(&self, workflow_id: &str) -> usize {
        self.registry.subscriber_count_for(workflow_id)
    }

    /// Current figures.
    pub fn stats(&self) -> HubStats {
        HubStats {
            registry: self.registry.stats(),
            snapshots: self.snapshots.lock().len(),
            shutting_down: self.is_shutting_down(),
        }
    }

    /// The connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Whether [`Self::shutdown`] has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Refuse new work, stop the heartbeat, and close every connection with
    /// a shutdown notice. Returns how many connections were closed; later
    /// calls return 0.
    pub fn shutdown(&self) -> usize {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return 0;
        }
        self.monitor_cancel.cancel();

        let drained = self.registry.drain_for_shutdown();
        let notice = ServerMessage::error_with_code("Server is shutting down", "SHUTDOWN_IN_PROGRESS")
            .to_json()
            .ok();
        for conn in &drained {
            let mut closure = RemovalReason::Shutdown.closure();
            if let Some(text) = &notice {
                closure = closure.with_farewell(text.clone());
            }
            let _ = conn.close(closure);
        }
        info!(closed = drained.len(), "progress hub shut down");
        drained.len()
    }
}
