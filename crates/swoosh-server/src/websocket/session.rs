//! WebSocket session lifecycle: one client from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::connection::ConnectionMeta;
use super::handler::{Disposition, handle_client_message};
use super::registry::RemovalReason;
use super::transport::{self, Delivery, Outbound, TransportReceiver};
use crate::hub::ProgressHub;

/// How long the writer gets to flush the close frame after the read loop ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a WebSocket session for a client watching `workflow_id`.
///
/// 1. Starts the writer task draining the connection's transport
/// 2. Requests admission (a rejection is flushed as `error` + close frame)
/// 3. Dispatches inbound text frames until the client leaves or is evicted
/// 4. Removes the connection from the registry
#[instrument(skip_all, fields(workflow_id = %workflow_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    hub: Arc<ProgressHub>,
    workflow_id: String,
    subscriber_id: Option<String>,
    meta: ConnectionMeta,
) {
    let (ws_tx, mut ws_rx) = ws.split();
    let (transport, outbound) = transport::channel(hub.config().send_queue_capacity);
    let write_failed = CancellationToken::new();
    let writer = tokio::spawn(write_loop(ws_tx, outbound, write_failed.clone()));

    let Ok(conn) = hub.admit(&workflow_id, transport, subscriber_id, meta).await else {
        let _ = tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await;
        return;
    };
    let registry = Arc::clone(hub.registry());
    let max_malformed = hub.config().max_malformed_messages;
    let evicted = conn.close_token();

    let reason = loop {
        let frame = tokio::select! {
            () = evicted.cancelled() => break None,
            () = write_failed.cancelled() => break Some(RemovalReason::TransportError),
            frame = ws_rx.next() => frame,
        };
        let text = match frame {
            Some(Ok(Message::Text(t))) => t.to_string(),
            // invalid UTF-8 fails JSON parsing and counts as malformed
            Some(Ok(Message::Binary(data))) => String::from_utf8_lossy(&data).into_owned(),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                conn.mark_alive();
                continue;
            }
            Some(Ok(Message::Close(_))) | None => break Some(RemovalReason::ClientClosed),
            Some(Err(e)) => {
                debug!(conn_id = %conn.id, error = %e, "websocket read failed");
                break Some(RemovalReason::TransportError);
            }
        };
        if let Disposition::Close(_) = handle_client_message(&registry, &conn, &text, max_malformed)
        {
            break None;
        }
    };

    if let Some(reason) = reason {
        let _ = registry.remove(&conn.id, reason);
    }
    let closure = conn.closure();
    info!(
        conn_id = %conn.id,
        reason = closure.as_ref().map_or("unknown", |c| c.reason),
        age_secs = conn.age().as_secs(),
        "session ended"
    );
    let _ = tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await;
}

/// Drain `outbound` into the socket until the transport closes.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: TransportReceiver,
    failed: CancellationToken,
) {
    loop {
        let message = match outbound.next().await {
            Delivery::Frame(Outbound::Text(text)) => Message::Text(text.as_str().into()),
            Delivery::Frame(Outbound::Ping) => Message::Ping(Vec::new().into()),
            Delivery::Close(closure) => {
                if let Some(farewell) = closure.farewell {
                    let _ = sink.send(Message::Text(farewell.as_str().into())).await;
                }
                let frame = CloseFrame {
                    code: closure.code.code(),
                    reason: Utf8Bytes::from_static(closure.reason),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                return;
            }
            Delivery::Ended => {
                let _ = sink.close().await;
                return;
            }
        };
        if let Err(e) = sink.send(message).await {
            debug!(error = %e, "websocket write failed");
            failed.cancel();
            return;
        }
    }
}
