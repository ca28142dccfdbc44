//! WebSocket client connection state.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use swoosh_core::ConnectionId;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::transport::{Closure, Outbound, Transport, TransportError};

/// Opaque peer details recorded at upgrade time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionMeta {
    /// Remote socket address.
    pub remote_addr: Option<SocketAddr>,
    /// `User-Agent` header.
    pub user_agent: Option<String>,
}

/// Heartbeat state of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Liveness {
    /// Responded since the last probe.
    Alive,
    /// Probe sent, no response yet.
    Awaiting,
}

/// Represents one live subscriber watching a single workflow.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    workflow_id: String,
    subscriber_id: Option<String>,
    meta: ConnectionMeta,
    transport: Transport,
    /// When this connection was admitted.
    pub connected_at: Instant,
    /// `true` while [`Liveness::Alive`].
    is_alive: AtomicBool,
    /// Last liveness response (or admission).
    last_seen: Mutex<Instant>,
    /// Malformed messages received in a row.
    malformed_streak: AtomicU32,
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("workflow_id", &self.workflow_id)
            .field("subscriber_id", &self.subscriber_id)
            .field("liveness", &self.liveness())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl ClientConnection {
    /// Create a new connection bound to `workflow_id`.
    pub fn new(
        id: ConnectionId,
        workflow_id: impl Into<String>,
        subscriber_id: Option<String>,
        meta: ConnectionMeta,
        transport: Transport,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            workflow_id: workflow_id.into(),
            subscriber_id,
            meta,
            transport,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
            malformed_streak: AtomicU32::new(0),
        }
    }

    /// Workflow this connection watches.
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Caller-supplied subscriber identity.
    pub fn subscriber_id(&self) -> Option<&str> {
        self.subscriber_id.as_deref()
    }

    /// Peer details.
    pub fn meta(&self) -> &ConnectionMeta {
        &self.meta
    }

    /// Queue a pre-serialized text frame.
    pub fn send(&self, message: Arc<String>) -> Result<(), TransportError> {
        self.transport.send_text(message)
    }

    /// Serialize `value` and queue it.
    pub fn send_json<T: Serialize>(&self, value: &T) -> Result<(), TransportError> {
        match serde_json::to_string(value) {
            Ok(json) => self.send(Arc::new(json)),
            Err(e) => {
                tracing::error!(conn_id = %self.id, error = %e, "failed to serialize outbound message");
                Err(TransportError::Closed)
            }
        }
    }

    /// Queue a liveness probe.
    pub fn ping(&self) -> Result<(), TransportError> {
        self.transport.try_send(Outbound::Ping)
    }

    /// Close the underlying transport. Returns `true` only the first time.
    pub fn close(&self, closure: Closure) -> bool {
        self.transport.close(closure)
    }

    /// Whether the transport is closed.
    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    /// Token cancelled when the transport closes.
    pub fn close_token(&self) -> CancellationToken {
        self.transport.close_token()
    }

    /// How the transport was closed, if it was.
    pub fn closure(&self) -> Option<Closure> {
        self.transport.closure()
    }

    /// Record a liveness response.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Current heartbeat state.
    pub fn liveness(&self) -> Liveness {
        if self.is_alive.load(Ordering::Relaxed) {
            Liveness::Alive
        } else {
            Liveness::Awaiting
        }
    }

    /// Flip `Alive` to `Awaiting`.
    ///
    /// Returns `false` if a probe was already outstanding.
    pub fn begin_probe(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last liveness response (or admission) as of `now`.
    pub fn silent_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_seen.lock())
    }

    /// Count a malformed message and return the current streak.
    pub fn record_malformed(&self) -> u32 {
        self.malformed_streak.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Reset the malformed-message streak after a valid message.
    pub fn reset_malformed(&self) {
        self.malformed_streak.store(0, Ordering::Relaxed);
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
