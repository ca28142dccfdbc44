//! End-to-end tests against a real listener with WebSocket clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use swoosh_core::{ProgressUpdate, WorkflowStep};
use swoosh_server::{NoStatusSource, RelayServer, ServerConfig};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        ..ServerConfig::default()
    }
}

async fn boot(config: ServerConfig) -> (Arc<RelayServer>, SocketAddr) {
    let server = Arc::new(RelayServer::new(config, Arc::new(NoStatusSource), None));
    let (addr, _handle) = server.listen().await.unwrap();
    (server, addr)
}

async fn connect(addr: SocketAddr, path: &str) -> WsStream {
    let (ws, _) = connect_async(format!("ws://{addr}{path}")).await.unwrap();
    ws
}

/// Next JSON text frame, skipping control frames.
async fn next_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for message")
            .expect("stream ended")
            .unwrap();
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

/// Close code of the next close frame, skipping anything else.
async fn next_close_code(ws: &mut WsStream) -> u16 {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for close")
            .expect("stream ended")
            .unwrap();
        if let Message::Close(frame) = msg {
            return frame.map(|f| u16::from(f.code)).unwrap_or(1005);
        }
    }
}

#[tokio::test]
async fn connect_receives_ack_then_updates() {
    let (server, addr) = boot(test_config()).await;
    let mut ws = connect(addr, "/ws/intent-1?subscriberId=0xabc").await;

    let ack = next_json(&mut ws).await;
    assert_eq!(ack["type"], "connected");
    assert_eq!(ack["workflowId"], "intent-1");
    assert!(ack["connectionId"].as_str().unwrap().starts_with("conn_"));
    assert_eq!(server.hub().subscriber_count("intent-1"), 1);

    let delivered = server
        .hub()
        .emit_progress(
            "intent-1",
            ProgressUpdate::new(WorkflowStep::Bridging).with_tx_hash("0xfeed"),
        )
        .unwrap();
    assert_eq!(delivered, 1);

    let update = next_json(&mut ws).await;
    assert_eq!(update["type"], "update");
    assert_eq!(update["data"]["step"], "bridging");
    assert_eq!(update["data"]["progress"], 60);
    assert_eq!(update["data"]["txHash"], "0xfeed");
}

#[tokio::test]
async fn ping_is_answered_with_pong() {
    let (_server, addr) = boot(test_config()).await;
    let mut ws = connect(addr, "/ws/intent-2").await;
    let _ = next_json(&mut ws).await;

    ws.send(Message::text(r#"{"type":"ping"}"#)).await.unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "pong");

    ws.send(Message::text(r#"{"type":"subscribe","workflowId":"intent-2"}"#))
        .await
        .unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "subscribed");
}

#[tokio::test]
async fn binary_frames_are_accepted() {
    let (_server, addr) = boot(test_config()).await;
    let mut ws = connect(addr, "/ws/intent-bin").await;
    let _ = next_json(&mut ws).await;

    ws.send(Message::binary(br#"{"type":"ping"}"#.to_vec()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "pong");
}

#[tokio::test]
async fn per_workflow_ceiling_rejects_with_capacity_code() {
    let config = ServerConfig {
        max_connections_per_workflow: 1,
        ..test_config()
    };
    let (server, addr) = boot(config).await;
    let mut first = connect(addr, "/ws/hot").await;
    let _ = next_json(&mut first).await;

    let mut second = connect(addr, "/ws/hot").await;
    let err = next_json(&mut second).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["code"], "CAPACITY_WORKFLOW");
    assert_eq!(next_close_code(&mut second).await, 4008);

    assert_eq!(server.hub().subscriber_count("hot"), 1);
    assert_eq!(server.hub().stats().registry.rejected, 1);
}

#[tokio::test]
async fn unsubscribe_acks_and_closes_normally() {
    let (server, addr) = boot(test_config()).await;
    let mut ws = connect(addr, "/ws/intent-3").await;
    let _ = next_json(&mut ws).await;

    ws.send(Message::text(r#"{"type":"unsubscribe"}"#)).await.unwrap();
    let ack = next_json(&mut ws).await;
    assert_eq!(ack["type"], "unsubscribed");
    assert_eq!(ack["workflowId"], "intent-3");
    assert_eq!(next_close_code(&mut ws).await, 1000);
    assert_eq!(server.hub().subscriber_count("intent-3"), 0);
}

#[tokio::test]
async fn late_joiner_gets_latest_snapshot() {
    let (server, addr) = boot(test_config()).await;
    let _ = server.hub().emit_step("intent-4", WorkflowStep::Validated).unwrap();
    let _ = server.hub().emit_step("intent-4", WorkflowStep::Routing).unwrap();

    let mut ws = connect(addr, "/ws/intent-4").await;
    assert_eq!(next_json(&mut ws).await["type"], "connected");
    let replay = next_json(&mut ws).await;
    assert_eq!(replay["type"], "update");
    assert_eq!(replay["data"]["step"], "routing");
    assert_eq!(replay["data"]["progress"], 30);
}

#[tokio::test]
async fn repeated_malformed_messages_close_with_policy_code() {
    let config = ServerConfig {
        max_malformed_messages: 2,
        ..test_config()
    };
    let (server, addr) = boot(config).await;
    let mut ws = connect(addr, "/ws/intent-5").await;
    let _ = next_json(&mut ws).await;

    ws.send(Message::text("garbage")).await.unwrap();
    let err = next_json(&mut ws).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["code"], "INVALID_MESSAGE");

    ws.send(Message::text("more garbage")).await.unwrap();
    let err = next_json(&mut ws).await;
    assert_eq!(err["code"], "PROTOCOL_VIOLATION");
    assert_eq!(next_close_code(&mut ws).await, 1008);
    assert_eq!(server.hub().subscriber_count("intent-5"), 0);
}

#[tokio::test]
async fn client_close_removes_connection() {
    let (server, addr) = boot(test_config()).await;
    let mut ws = connect(addr, "/ws/intent-6").await;
    let _ = next_json(&mut ws).await;
    ws.close(None).await.unwrap();

    timeout(TIMEOUT, async {
        while server.hub().subscriber_count("intent-6") > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(server.hub().registry().is_consistent());
}

#[tokio::test]
async fn health_endpoint_over_http() {
    let (_server, addr) = boot(test_config()).await;
    let mut ws = connect(addr, "/ws/intent-7").await;
    let _ = next_json(&mut ws).await;

    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 1);
    assert_eq!(body["workflows"], 1);
}

#[tokio::test]
async fn shutdown_notifies_clients_and_closes_with_going_away() {
    let (server, addr) = boot(test_config()).await;
    let mut a = connect(addr, "/ws/intent-8").await;
    let mut b = connect(addr, "/ws/intent-9").await;
    let _ = next_json(&mut a).await;
    let _ = next_json(&mut b).await;

    assert_eq!(server.hub().shutdown(), 2);
    for ws in [&mut a, &mut b] {
        let notice = next_json(ws).await;
        assert_eq!(notice["type"], "error");
        assert_eq!(notice["message"], "Server is shutting down");
        assert_eq!(next_close_code(ws).await, 1001);
    }
    assert!(
        server
            .hub()
            .emit_step("intent-8", WorkflowStep::Routing)
            .is_err()
    );
}
