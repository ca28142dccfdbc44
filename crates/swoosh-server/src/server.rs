//! `RelayServer`: Axum HTTP + WebSocket front of the progress hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::hub::ProgressHub;
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;
use crate::status::StatusSource;
use crate::websocket::connection::ConnectionMeta;
use crate::websocket::session::run_ws_session;

/// Longest accepted workflow ID.
const MAX_WORKFLOW_ID_LEN: usize = 256;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The progress hub.
    pub hub: Arc<ProgressHub>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`.
    pub metrics: Option<PrometheusHandle>,
}

/// Query parameters of the WebSocket endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsParams {
    /// Caller-supplied subscriber identity.
    pub subscriber_id: Option<String>,
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    hub: Arc<ProgressHub>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl RelayServer {
    /// Create a server. `metrics` is the handle from
    /// [`crate::metrics::install_recorder`], if one was installed.
    pub fn new(
        config: ServerConfig,
        status_source: Arc<dyn StatusSource>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let hub = Arc::new(ProgressHub::new(config.clone(), status_source));
        Self {
            config,
            hub,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: Arc::clone(&self.hub),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws/{workflow_id}", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind, start the heartbeat monitor, and serve until the shutdown
    /// token fires. Returns the bound address and the server task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "relay server listening");

        let monitor = self.hub.start();
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let token = self.shutdown.token();
        let hub = Arc::clone(&self.hub);

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "http server failed");
            }
            let _ = hub.shutdown();
            let _ = monitor.await;
            info!("relay server stopped");
        });
        Ok((addr, handle))
    }

    /// The progress hub.
    pub fn hub(&self) -> &Arc<ProgressHub> {
        &self.hub
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /ws/{workflow_id}
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(workflow_id): Path<String>,
    Query(params): Query<WsParams>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    if workflow_id.trim().is_empty() || workflow_id.len() > MAX_WORKFLOW_ID_LEN {
        return (StatusCode::BAD_REQUEST, "invalid workflow id").into_response();
    }
    let meta = ConnectionMeta {
        remote_addr: Some(remote_addr),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
    };
    let max_message_size = state.hub.config().max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| {
            run_ws_session(socket, state.hub, workflow_id, params.subscriber_id, meta)
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let resp = health::health_check(state.start_time, &state.hub.stats());
    let status = if resp.shutting_down {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(resp))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            metrics::render(handle),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use swoosh_core::WorkflowStep;
    use tower::ServiceExt;

    use crate::status::NoStatusSource;

    fn make_server(metrics: Option<PrometheusHandle>) -> RelayServer {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..ServerConfig::default()
        };
        RelayServer::new(config, Arc::new(NoStatusSource), metrics)
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server(None);
        let _ = server.hub().emit_step("abc", WorkflowStep::Pending).unwrap();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["connections"], 0);
        assert!(json["uptimeSecs"].is_number());
    }

    #[tokio::test]
    async fn health_reports_shutdown() {
        let server = make_server(None);
        let _ = server.hub().shutdown();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(resp).await["status"], "shutting_down");
    }

    #[tokio::test]
    async fn metrics_endpoint_renders() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = make_server(Some(handle));
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_endpoint_without_recorder() {
        let server = make_server(None);
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let server = make_server(None);
        let req = Request::builder().uri("/nope").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_and_stop() {
        let server = make_server(None);
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        server.shutdown().shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(server.hub().is_shutting_down());
    }
}
