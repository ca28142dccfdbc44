//! Outbound half of a client socket.
//!
//! The registry never touches the WebSocket directly. Each connection owns a
//! [`Transport`]: a bounded queue of outbound frames drained by the session's
//! writer task, plus a close signal. The first [`Transport::close`] wins and
//! records the close code; every send after that fails immediately.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// A frame queued for the writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized JSON text frame.
    Text(Arc<String>),
    /// WebSocket ping control frame (liveness probe).
    Ping,
}

/// Delivery failure on a transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The socket was closed or the writer task is gone.
    #[error("transport closed")]
    Closed,
    /// The outbound queue is full (client is not keeping up).
    #[error("send queue full")]
    Full,
}

/// WebSocket close status codes, one per closure cause so clients can pick
/// a reconnect policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// Client asked to leave.
    Normal,
    /// Server is shutting down.
    ServerShutdown,
    /// Client kept sending unparsable messages.
    MalformedInput,
    /// Heartbeat went unanswered.
    HeartbeatTimeout,
    /// Delivery to the client failed.
    TransportFailure,
    /// Admission was refused by a connection ceiling.
    CapacityExceeded,
}

impl CloseCode {
    /// Numeric status code sent in the close frame.
    pub fn code(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::ServerShutdown => 1001,
            Self::MalformedInput => 1008,
            Self::HeartbeatTimeout => 4000,
            Self::TransportFailure => 4001,
            Self::CapacityExceeded => 4008,
        }
    }
}

/// How a transport was closed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Closure {
    /// Close status.
    pub code: CloseCode,
    /// Machine-readable reason carried in the close frame.
    pub reason: &'static str,
    /// Last text frame written before the close frame.
    pub farewell: Option<Arc<String>>,
}

impl Closure {
    /// Closure without a final message.
    pub fn new(code: CloseCode, reason: &'static str) -> Self {
        Self {
            code,
            reason,
            farewell: None,
        }
    }

    /// Attach a final text frame.
    #[must_use]
    pub fn with_farewell(mut self, text: String) -> Self {
        self.farewell = Some(Arc::new(text));
        self
    }
}

#[derive(Default)]
struct CloseState {
    token: CancellationToken,
    closure: Mutex<Option<Closure>>,
}

/// Sending half handed to the registry.
pub struct Transport {
    tx: mpsc::Sender<Outbound>,
    close: Arc<CloseState>,
}

/// Receiving half drained by the session writer.
pub struct TransportReceiver {
    rx: mpsc::Receiver<Outbound>,
    close: Arc<CloseState>,
}

/// What the writer should do next.
#[derive(Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Write this frame.
    Frame(Outbound),
    /// Write the farewell (if any) and a close frame, then stop.
    Close(Closure),
    /// Every sender is gone.
    Ended,
}

/// Create a transport pair with room for `capacity` queued frames.
pub fn channel(capacity: usize) -> (Transport, TransportReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let close = Arc::new(CloseState::default());
    (
        Transport {
            tx,
            close: Arc::clone(&close),
        },
        TransportReceiver { rx, close },
    )
}

impl Transport {
    /// Queue a frame without waiting.
    pub fn try_send(&self, frame: Outbound) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Full,
            TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    /// Queue a text frame.
    pub fn send_text(&self, text: Arc<String>) -> Result<(), TransportError> {
        self.try_send(Outbound::Text(text))
    }

    /// Close the transport. Returns `true` only for the call that actually closed it.
    pub fn close(&self, closure: Closure) -> bool {
        {
            let mut slot = self.close.closure.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(closure);
        }
        self.close.token.cancel();
        true
    }

    /// Whether the transport was closed or its writer went away.
    pub fn is_closed(&self) -> bool {
        self.close.token.is_cancelled() || self.tx.is_closed()
    }

    /// How the transport was closed, if it was.
    pub fn closure(&self) -> Option<Closure> {
        self.close.closure.lock().clone()
    }

    /// Token cancelled when the transport closes.
    pub fn close_token(&self) -> CancellationToken {
        self.close.token.clone()
    }
}

impl TransportReceiver {
    /// Wait for the next thing to write. A close takes priority over queued frames.
    pub async fn next(&mut self) -> Delivery {
        tokio::select! {
            biased;
            () = self.close.token.cancelled() => Delivery::Close(self.recorded_closure()),
            frame = self.rx.recv() => match frame {
                Some(frame) => Delivery::Frame(frame),
                None => Delivery::Ended,
            },
        }
    }

    /// Pop a queued frame without waiting.
    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.rx.try_recv().ok()
    }

    /// Pop a queued text frame and parse it as JSON.
    pub fn try_recv_json(&mut self) -> Option<serde_json::Value> {
        match self.try_recv()? {
            Outbound::Text(text) => serde_json::from_str(&text).ok(),
            Outbound::Ping => None,
        }
    }

    /// How the transport was closed, if it was.
    pub fn closure(&self) -> Option<Closure> {
        self.close.closure.lock().clone()
    }

    fn recorded_closure(&self) -> Closure {
        self.closure()
            .unwrap_or_else(|| Closure::new(CloseCode::Normal, "closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Arc<String> {
        Arc::new(s.to_owned())
    }

    #[tokio::test]
    async fn queued_frames_are_delivered_in_order() {
        let (tx, mut rx) = channel(8);
        tx.send_text(text("a")).unwrap();
        tx.try_send(Outbound::Ping).unwrap();
        tx.send_text(text("b")).unwrap();
        assert_eq!(rx.next().await, Delivery::Frame(Outbound::Text(text("a"))));
        assert_eq!(rx.next().await, Delivery::Frame(Outbound::Ping));
        assert_eq!(rx.next().await, Delivery::Frame(Outbound::Text(text("b"))));
    }

    #[test]
    fn full_queue_reports_full() {
        let (tx, _rx) = channel(1);
        tx.send_text(text("1")).unwrap();
        assert_eq!(tx.send_text(text("2")), Err(TransportError::Full));
    }

    #[test]
    fn dropped_receiver_reports_closed() {
        let (tx, rx) = channel(4);
        drop(rx);
        assert!(tx.is_closed());
        assert_eq!(tx.send_text(text("x")), Err(TransportError::Closed));
    }

    #[test]
    fn close_is_exactly_once() {
        let (tx, rx) = channel(4);
        assert!(tx.close(Closure::new(CloseCode::HeartbeatTimeout, "heartbeat_timeout")));
        assert!(!tx.close(Closure::new(CloseCode::Normal, "client_closed")));
        let closure = rx.closure().unwrap();
        assert_eq!(closure.code, CloseCode::HeartbeatTimeout);
        assert_eq!(closure.reason, "heartbeat_timeout");
    }

    #[test]
    fn sends_after_close_fail() {
        let (tx, mut rx) = channel(4);
        let _ = tx.close(Closure::new(CloseCode::Normal, "client_closed"));
        assert_eq!(tx.send_text(text("late")), Err(TransportError::Closed));
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn close_takes_priority_over_queued_frames() {
        let (tx, mut rx) = channel(4);
        tx.send_text(text("queued")).unwrap();
        let _ = tx.close(
            Closure::new(CloseCode::CapacityExceeded, "CAPACITY_GLOBAL")
                .with_farewell("{\"type\":\"error\"}".into()),
        );
        match rx.next().await {
            Delivery::Close(closure) => {
                assert_eq!(closure.code.code(), 4008);
                assert_eq!(closure.farewell.as_deref().map(String::as_str), Some("{\"type\":\"error\"}"));
            }
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ended_when_sender_dropped() {
        let (tx, mut rx) = channel(4);
        drop(tx);
        assert_eq!(rx.next().await, Delivery::Ended);
    }

    #[test]
    fn close_codes_are_distinct() {
        let codes = [
            CloseCode::Normal,
            CloseCode::ServerShutdown,
            CloseCode::MalformedInput,
            CloseCode::HeartbeatTimeout,
            CloseCode::TransportFailure,
            CloseCode::CapacityExceeded,
        ]
        .map(CloseCode::code);
        let unique: std::collections::HashSet<u16> = codes.iter().copied().collect();
        assert_eq!(unique.len(), codes.len());
    }
}
