//! Connection registry and workflow subscription index.
//!
//! Both maps live behind one mutex so that every mutation (admit, remove,
//! shutdown drain) updates them together. Invariants:
//!
//! - every ID in a workflow's subscriber set is in the connection map, and
//!   every connection appears in exactly its own workflow's set
//! - a workflow whose subscriber set becomes empty is dropped from the index
//!
//! Nothing performs I/O while holding the lock; transport sends are
//! non-blocking queue pushes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use serde::Serialize;
use swoosh_core::ConnectionId;
use tracing::{debug, info};

use super::admission::AdmissionLimits;
use super::connection::ClientConnection;
use super::transport::{CloseCode, Closure};
use crate::metrics as names;

/// Why a connection left the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RemovalReason {
    /// Client closed the socket.
    ClientClosed,
    /// Client sent `unsubscribe`.
    Unsubscribed,
    /// Delivery or socket I/O failed.
    TransportError,
    /// Heartbeat probe went unanswered.
    HeartbeatTimeout,
    /// Too many malformed messages in a row.
    ProtocolViolation,
    /// Server shutdown.
    Shutdown,
}

impl RemovalReason {
    /// Stable label used in close frames, logs, and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::Unsubscribed => "unsubscribed",
            Self::TransportError => "transport_error",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::ProtocolViolation => "protocol_violation",
            Self::Shutdown => "shutdown",
        }
    }

    /// Close code sent to the client.
    pub fn close_code(self) -> CloseCode {
        match self {
            Self::ClientClosed | Self::Unsubscribed => CloseCode::Normal,
            Self::TransportError => CloseCode::TransportFailure,
            Self::HeartbeatTimeout => CloseCode::HeartbeatTimeout,
            Self::ProtocolViolation => CloseCode::MalformedInput,
            Self::Shutdown => CloseCode::ServerShutdown,
        }
    }

    /// Closure for the transport.
    pub fn closure(self) -> Closure {
        Closure::new(self.close_code(), self.as_str())
    }
}

#[derive(Default)]
pub(crate) struct RegistryState {
    pub(crate) connections: HashMap<ConnectionId, Arc<ClientConnection>>,
    pub(crate) subscriptions: HashMap<String, HashSet<ConnectionId>>,
    pub(crate) shutting_down: bool,
}

impl RegistryState {
    pub(crate) fn insert(&mut self, conn: Arc<ClientConnection>) {
        let _ = self
            .subscriptions
            .entry(conn.workflow_id().to_owned())
            .or_default()
            .insert(conn.id.clone());
        let _ = self.connections.insert(conn.id.clone(), conn);
    }

    fn take(&mut self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        let conn = self.connections.remove(id)?;
        if let Some(set) = self.subscriptions.get_mut(conn.workflow_id()) {
            let _ = set.remove(id);
            if set.is_empty() {
                let _ = self.subscriptions.remove(conn.workflow_id());
            }
        }
        Some(conn)
    }
}

/// Lifetime counters.
#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) messages_sent: AtomicU64,
    pub(crate) messages_received: AtomicU64,
    pub(crate) errors: AtomicU64,
    pub(crate) rejected: AtomicU64,
}

/// Point-in-time registry figures.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    /// Live connections.
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
}

/// Owns every live connection and the workflow → subscribers index.
pub struct ConnectionRegistry {
    pub(crate) state: Mutex<RegistryState>,
    pub(crate) limits: AdmissionLimits,
    pub(crate) counters: Counters,
}

impl ConnectionRegistry {
    /// Create an empty registry enforcing `limits`.
    pub fn new(limits: AdmissionLimits) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            limits,
            counters: Counters::default(),
        }
    }

    /// Configured ceilings.
    pub fn limits(&self) -> AdmissionLimits {
        self.limits
    }

    /// Remove a connection from every index and close its transport.
    ///
    /// Idempotent: returns `false` if the ID is not registered.
    pub fn remove(&self, id: &ConnectionId, reason: RemovalReason) -> bool {
        let Some(conn) = self.state.lock().take(id) else {
            debug!(conn_id = %id, reason = reason.as_str(), "remove: already gone");
            return false;
        };
        let _ = conn.close(reason.closure());

        info!(
            conn_id = %id,
            workflow_id = conn.workflow_id(),
            reason = reason.as_str(),
            "connection removed"
        );
        counter!(names::WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
        gauge!(names::WS_CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(names::WS_CONNECTION_DURATION_SECONDS).record(conn.age().as_secs_f64());
        true
    }

    /// Look up a live connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.state.lock().connections.get(id).cloned()
    }

    /// Number of live connections watching `workflow_id`.
    pub fn subscriber_count_for(&self, workflow_id: &str) -> usize {
        self.state
            .lock()
            .subscriptions
            .get(workflow_id)
            .map_or(0, HashSet::len)
    }

    /// Whether anyone watches `workflow_id`.
    pub fn has_subscribers(&self, workflow_id: &str) -> bool {
        self.state.lock().subscriptions.contains_key(workflow_id)
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Number of workflows with subscribers.
    pub fn workflow_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// Snapshot of every live connection.
    pub fn connections(&self) -> Vec<Arc<ClientConnection>> {
        self.state.lock().connections.values().cloned().collect()
    }

    /// Snapshot of the connections watching `workflow_id`.
    pub fn subscribers(&self, workflow_id: &str) -> Vec<Arc<ClientConnection>> {
        let state = self.state.lock();
        state
            .subscriptions
            .get(workflow_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.connections.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Count an inbound client message.
    pub fn record_received(&self) {
        let _ = self.counters.messages_received.fetch_add(1, Ordering::Relaxed);
        counter!(names::WS_MESSAGES_RECEIVED_TOTAL).increment(1);
    }

    /// Count messages delivered outside a broadcast (acks, replies).
    pub fn record_sent(&self, n: u64) {
        let _ = self.counters.messages_sent.fetch_add(n, Ordering::Relaxed);
        counter!(names::WS_MESSAGES_SENT_TOTAL).increment(n);
    }

    /// Count a transport or protocol error.
    pub fn record_error(&self) {
        let _ = self.counters.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Lifetime and live figures.
    pub fn stats(&self) -> RegistryStats {
        let (connections, workflows) = {
            let state = self.state.lock();
            (state.connections.len(), state.subscriptions.len())
        };
        RegistryStats {
            connections,
            workflows,
            messages_sent: self.counters.messages_sent.load(Ordering::Relaxed),
            messages_received: self.counters.messages_received.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    /// Refuse further admissions and hand back every live connection,
    /// leaving both maps empty. The caller closes the returned connections.
    pub fn drain_for_shutdown(&self) -> Vec<Arc<ClientConnection>> {
        let drained: Vec<_> = {
            let mut state = self.state.lock();
            state.shutting_down = true;
            state.subscriptions.clear();
            state.connections.drain().map(|(_, conn)| conn).collect()
        };
        gauge!(names::WS_CONNECTIONS_ACTIVE).decrement(drained.len() as f64);
        counter!(names::WS_DISCONNECTIONS_TOTAL, "reason" => RemovalReason::Shutdown.as_str())
            .increment(drained.len() as u64);
        drained
    }

    /// Whether [`Self::drain_for_shutdown`] has run.
    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    /// Check the two-way index invariant. Used by tests.
    pub fn is_consistent(&self) -> bool {
        let state = self.state.lock();
        let indexed: usize = state.subscriptions.values().map(HashSet::len).sum();
        let forward = state.subscriptions.iter().all(|(wf, ids)| {
            !ids.is_empty()
                && ids.iter().all(|id| {
                    state
                        .connections
                        .get(id)
                        .is_some_and(|c| c.workflow_id() == wf)
                })
        });
        let backward = state.connections.values().all(|c| {
            state
                .subscriptions
                .get(c.workflow_id())
                .is_some_and(|ids| ids.contains(&c.id))
        });
        forward && backward && indexed == state.connections.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(AdmissionLimits::default())
    }
}
