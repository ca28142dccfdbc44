//! Progress fan-out to the subscribers of one workflow.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use metrics::counter;
use swoosh_core::ProgressEvent;
use tracing::{debug, warn};

use super::messages::ServerMessage;
use super::registry::{ConnectionRegistry, RemovalReason};
use crate::metrics as names;

impl ConnectionRegistry {
    /// Deliver `event` to every live subscriber of `workflow_id`.
    ///
    /// The event is serialized once and queued on each transport without
    /// waiting. Subscribers whose transport refuses the frame are removed
    /// with [`RemovalReason::TransportError`] after the pass. Returns the
    /// number of successful deliveries.
    pub fn broadcast_to_workflow(&self, workflow_id: &str, event: &ProgressEvent) -> usize {
        let recipients = {
            let state = self.state.lock();
            let Some(ids) = state.subscriptions.get(workflow_id) else {
                return 0;
            };
            ids.iter()
                .filter_map(|id| state.connections.get(id).cloned())
                .collect::<Vec<_>>()
        };

        let message = ServerMessage::Update {
            data: event.clone(),
        };
        let json = match message.to_json() {
            Ok(j) => Arc::new(j),
            Err(e) => {
                warn!(workflow_id, error = %e, "failed to serialize progress event");
                return 0;
            }
        };

        let mut delivered = 0usize;
        let mut failed = Vec::new();
        for conn in &recipients {
            match conn.send(Arc::clone(&json)) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(conn_id = %conn.id, workflow_id, error = %e, "failed to deliver progress");
                    failed.push(conn.id.clone());
                }
            }
        }

        if !failed.is_empty() {
            let _ = self
                .counters
                .errors
                .fetch_add(failed.len() as u64, Ordering::Relaxed);
            counter!(names::WS_BROADCAST_FAILURES_TOTAL).increment(failed.len() as u64);
            for id in &failed {
                let _ = self.remove(id, RemovalReason::TransportError);
            }
        }
        if delivered > 0 {
            self.record_sent(delivered as u64);
        }

        debug!(
            workflow_id,
            event_id = event.event_id,
            step = %event.step,
            recipients = recipients.len(),
            delivered,
            evicted = failed.len(),
            "broadcast progress"
        );
        delivered
    }
}
