//! Inbound client message dispatch.

use chrono::Utc;
use tracing::{debug, instrument, warn};

use super::connection::ClientConnection;
use super::messages::{ClientMessage, ServerMessage, parse_client_message};
use super::registry::{ConnectionRegistry, RemovalReason};

/// What the session should do after a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Keep reading.
    Continue,
    /// The connection has been removed; stop reading.
    Close(RemovalReason),
}

/// Handle one text frame from `conn`.
///
/// Any valid message counts as a liveness response. Invalid messages get an
/// `error` reply; after `max_malformed` in a row the connection is removed
/// with [`RemovalReason::ProtocolViolation`].
#[instrument(skip_all, fields(conn_id = %conn.id))]
pub fn handle_client_message(
    registry: &ConnectionRegistry,
    conn: &ClientConnection,
    text: &str,
    max_malformed: u32,
) -> Disposition {
    registry.record_received();

    let message = match parse_client_message(text) {
        Ok(m) => m,
        Err(e) => {
            registry.record_error();
            let streak = conn.record_malformed();
            warn!(streak, error = %e, "malformed client message");
            if streak >= max_malformed {
                let farewell = ServerMessage::error_with_code(
                    "Too many malformed messages",
                    "PROTOCOL_VIOLATION",
                );
                close_with(registry, conn, RemovalReason::ProtocolViolation, &farewell);
                return Disposition::Close(RemovalReason::ProtocolViolation);
            }
            reply(registry, conn, &ServerMessage::error_with_code(e.to_string(), "INVALID_MESSAGE"));
            return Disposition::Continue;
        }
    };

    conn.reset_malformed();
    conn.mark_alive();

    match message {
        ClientMessage::Ping => {
            reply(registry, conn, &ServerMessage::Pong { timestamp: Utc::now() });
            Disposition::Continue
        }
        ClientMessage::Subscribe { workflow_id } => {
            match workflow_id {
                Some(requested) if requested != conn.workflow_id() => {
                    debug!(requested, current = conn.workflow_id(), "subscribe to other workflow refused");
                    reply(
                        registry,
                        conn,
                        &ServerMessage::error_with_code(
                            format!("Connection is bound to workflow {}", conn.workflow_id()),
                            "WORKFLOW_MISMATCH",
                        ),
                    );
                }
                _ => reply(
                    registry,
                    conn,
                    &ServerMessage::Subscribed {
                        workflow_id: conn.workflow_id().to_owned(),
                    },
                ),
            }
            Disposition::Continue
        }
        ClientMessage::Unsubscribe => {
            let ack = ServerMessage::Unsubscribed {
                workflow_id: conn.workflow_id().to_owned(),
            };
            close_with(registry, conn, RemovalReason::Unsubscribed, &ack);
            Disposition::Close(RemovalReason::Unsubscribed)
        }
    }
}

fn reply(registry: &ConnectionRegistry, conn: &ClientConnection, message: &ServerMessage) {
    match conn.send_json(message) {
        Ok(()) => registry.record_sent(1),
        Err(e) => {
            debug!(conn_id = %conn.id, error = %e, "reply failed");
            let _ = registry.remove(&conn.id, RemovalReason::TransportError);
        }
    }
}

/// Close with `last` as the final frame, then drop the connection.
fn close_with(
    registry: &ConnectionRegistry,
    conn: &ClientConnection,
    reason: RemovalReason,
    last: &ServerMessage,
) {
    let mut closure = reason.closure();
    if let Ok(json) = last.to_json() {
        closure = closure.with_farewell(json);
        registry.record_sent(1);
    }
    let _ = conn.close(closure);
    let _ = registry.remove(&conn.id, reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::registry::tests::admit;
    use crate::websocket::transport::{CloseCode, TransportReceiver};
    use std::sync::Arc;

    fn setup() -> (ConnectionRegistry, Arc<ClientConnection>, TransportReceiver) {
        let reg = ConnectionRegistry::default();
        let (conn, mut rx) = admit(&reg, "abc");
        let _ = rx.try_recv();
        (reg, conn, rx)
    }

    #[test]
    fn ping_gets_pong_and_marks_alive() {
        let (reg, conn, mut rx) = setup();
        let _ = conn.begin_probe();
        let d = handle_client_message(&reg, &conn, r#"{"type":"ping"}"#, 10);
        assert_eq!(d, Disposition::Continue);
        let msg = rx.try_recv_json().unwrap();
        assert_eq!(msg["type"], "pong");
        assert!(msg["timestamp"].is_string());
        assert_eq!(conn.liveness(), crate::websocket::connection::Liveness::Alive);
        assert_eq!(reg.stats().messages_received, 1);
    }

    #[test]
    fn subscribe_same_workflow_is_acked() {
        let (reg, conn, mut rx) = setup();
        let d = handle_client_message(&reg, &conn, r#"{"type":"subscribe","workflowId":"abc"}"#, 10);
        assert_eq!(d, Disposition::Continue);
        let msg = rx.try_recv_json().unwrap();
        assert_eq!(msg["type"], "subscribed");
        assert_eq!(msg["workflowId"], "abc");

        let _ = handle_client_message(&reg, &conn, r#"{"type":"subscribe"}"#, 10);
        assert_eq!(rx.try_recv_json().unwrap()["type"], "subscribed");
    }

    #[test]
    fn subscribe_other_workflow_is_refused_but_connection_stays() {
        let (reg, conn, mut rx) = setup();
        let d = handle_client_message(&reg, &conn, r#"{"type":"subscribe","workflowId":"zzz"}"#, 10);
        assert_eq!(d, Disposition::Continue);
        let msg = rx.try_recv_json().unwrap();
        assert_eq!(msg["type"], "error");
        assert_eq!(msg["code"], "WORKFLOW_MISMATCH");
        assert_eq!(reg.subscriber_count_for("abc"), 1);
        assert!(!reg.has_subscribers("zzz"));
    }

    #[test]
    fn unsubscribe_acks_and_removes() {
        let (reg, conn, _rx) = setup();
        let d = handle_client_message(&reg, &conn, r#"{"type":"unsubscribe"}"#, 10);
        assert_eq!(d, Disposition::Close(RemovalReason::Unsubscribed));
        assert_eq!(reg.subscriber_count_for("abc"), 0);
        assert!(reg.get(&conn.id).is_none());

        let closure = conn.closure().unwrap();
        assert_eq!(closure.code, CloseCode::Normal);
        let ack: serde_json::Value =
            serde_json::from_str(closure.farewell.as_deref().unwrap()).unwrap();
        assert_eq!(ack["type"], "unsubscribed");
        assert_eq!(ack["workflowId"], "abc");
    }

    #[test]
    fn malformed_gets_error_reply() {
        let (reg, conn, mut rx) = setup();
        let d = handle_client_message(&reg, &conn, "{{{", 10);
        assert_eq!(d, Disposition::Continue);
        let msg = rx.try_recv_json().unwrap();
        assert_eq!(msg["type"], "error");
        assert_eq!(msg["code"], "INVALID_MESSAGE");
        assert_eq!(reg.stats().errors, 1);
        assert!(reg.get(&conn.id).is_some());
    }

    #[test]
    fn malformed_streak_closes_connection() {
        let (reg, conn, _rx) = setup();
        for _ in 0..2 {
            assert_eq!(handle_client_message(&reg, &conn, "nope", 3), Disposition::Continue);
        }
        let d = handle_client_message(&reg, &conn, "nope", 3);
        assert_eq!(d, Disposition::Close(RemovalReason::ProtocolViolation));
        assert!(reg.get(&conn.id).is_none());
        assert_eq!(conn.closure().unwrap().code, CloseCode::MalformedInput);
    }

    #[test]
    fn valid_message_resets_streak() {
        let (reg, conn, _rx) = setup();
        for _ in 0..2 {
            let _ = handle_client_message(&reg, &conn, "nope", 3);
        }
        let _ = handle_client_message(&reg, &conn, r#"{"type":"ping"}"#, 3);
        for _ in 0..2 {
            assert_eq!(handle_client_message(&reg, &conn, "nope", 3), Disposition::Continue);
        }
        assert!(reg.get(&conn.id).is_some());
    }
}
