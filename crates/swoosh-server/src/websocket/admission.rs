//! Admission control for new connections.
//!
//! The ceilings are checked and the connection is inserted under the same
//! registry lock, so concurrent admissions cannot overshoot either limit.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::Utc;
use metrics::{counter, gauge};
use swoosh_core::ConnectionId;
use tracing::{info, warn};

use super::connection::{ClientConnection, ConnectionMeta};
use super::messages::ServerMessage;
use super::registry::{ConnectionRegistry, RegistryState};
use super::transport::{Closure, Transport};
use crate::errors::AdmissionError;
use crate::metrics as names;

/// Connection ceilings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdmissionLimits {
    /// Live connections across all workflows.
    pub max_connections: usize,
    /// Live connections per workflow.
    pub max_connections_per_workflow: usize,
}

impl Default for AdmissionLimits {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            max_connections_per_workflow: 100,
        }
    }
}

impl ConnectionRegistry {
    /// Admit a new connection for `workflow_id`.
    ///
    /// On success the `connected` ack is already queued on the transport.
    /// On rejection the transport is closed with an `error` farewell carrying
    /// the reason code.
    pub fn admit(
        &self,
        workflow_id: &str,
        transport: Transport,
        subscriber_id: Option<String>,
        meta: ConnectionMeta,
    ) -> Result<Arc<ClientConnection>, AdmissionError> {
        let mut state = self.state.lock();

        if let Err(err) = self.verdict(&state, workflow_id) {
            drop(state);
            self.reject(&transport, &err);
            return Err(err);
        }

        let conn = Arc::new(ClientConnection::new(
            ConnectionId::new(),
            workflow_id,
            subscriber_id,
            meta,
            transport,
        ));
        let ack = ServerMessage::Connected {
            connection_id: conn.id.clone(),
            workflow_id: workflow_id.to_owned(),
            server_time: Utc::now(),
        };
        if conn.send_json(&ack).is_ok() {
            self.record_sent(1);
        }
        state.insert(Arc::clone(&conn));
        let live = state.connections.len();
        drop(state);

        info!(
            conn_id = %conn.id,
            workflow_id,
            subscriber_id = conn.subscriber_id(),
            remote_addr = ?conn.meta().remote_addr,
            live,
            "connection admitted"
        );
        counter!(names::WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(names::WS_CONNECTIONS_ACTIVE).increment(1.0);
        Ok(conn)
    }

    /// Whether a connection for `workflow_id` would be admitted right now.
    ///
    /// Advisory only: [`Self::admit`] checks again under the same lock it
    /// inserts with.
    pub fn check_admission(&self, workflow_id: &str) -> Result<(), AdmissionError> {
        self.verdict(&self.state.lock(), workflow_id)
    }

    fn verdict(&self, state: &RegistryState, workflow_id: &str) -> Result<(), AdmissionError> {
        if state.shutting_down {
            return Err(AdmissionError::ShutdownInProgress);
        }
        if state.connections.len() >= self.limits.max_connections {
            return Err(AdmissionError::CapacityGlobal {
                limit: self.limits.max_connections,
            });
        }
        if state
            .subscriptions
            .get(workflow_id)
            .is_some_and(|ids| ids.len() >= self.limits.max_connections_per_workflow)
        {
            return Err(AdmissionError::CapacityWorkflow {
                workflow_id: workflow_id.to_owned(),
                limit: self.limits.max_connections_per_workflow,
            });
        }
        Ok(())
    }

    fn reject(&self, transport: &Transport, err: &AdmissionError) {
        let _ = self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(reason = err.reason(), error = %err, "connection rejected");
        counter!(names::WS_ADMISSION_REJECTIONS_TOTAL, "reason" => err.reason()).increment(1);

        let mut closure = Closure::new(err.close_code(), err.reason());
        match ServerMessage::error_with_code(err.to_string(), err.reason()).to_json() {
            Ok(json) => closure = closure.with_farewell(json),
            Err(e) => warn!(error = %e, "failed to serialize rejection"),
        }
        let _ = transport.close(closure);
    }
}
