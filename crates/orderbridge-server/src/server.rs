use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use orderbridge_engine::{
    ApprovalPublisher, EventSource, OrderQueryService, StreamState, Translator,
};
use orderbridge_telemetry::MetricsRecorder;

use crate::client::{self, ClientRegistry, CLIENT_TIMEOUT, HEARTBEAT_INTERVAL};
use crate::orders::order_detail_handler;
use crate::session::SessionManager;
use crate::ws::handle_ws_connection;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
    pub cleanup_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            max_send_queue: 256,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            client_timeout: CLIENT_TIMEOUT,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Everything the server fronts, built by the caller.
pub struct BridgeServices {
    pub events: EventSource,
    pub stream_state: watch::Receiver<StreamState>,
    pub translator: Arc<Translator>,
    pub approvals: Arc<ApprovalPublisher>,
    pub orders: Arc<OrderQueryService>,
    pub metrics: Arc<MetricsRecorder>,
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub orders: Arc<OrderQueryService>,
    pub stream_state: watch::Receiver<StreamState>,
    pub metrics: Arc<MetricsRecorder>,
    pub heartbeat_interval: Duration,
}

impl AppState {
    pub fn new(config: &ServerConfig, services: BridgeServices) -> Self {
        let registry = Arc::new(
            ClientRegistry::new(config.max_send_queue)
                .with_client_timeout(config.client_timeout),
        );
        let sessions = Arc::new(SessionManager::new(
            registry,
            services.events,
            services.translator,
            services.approvals,
            Arc::clone(&services.metrics),
        ));
        Self {
            sessions,
            orders: services.orders,
            stream_state: services.stream_state,
            metrics: services.metrics,
            heartbeat_interval: config.heartbeat_interval,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/orders", get(order_detail_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve. The returned handle owns the background tasks.
pub async fn start(
    config: ServerConfig,
    services: BridgeServices,
) -> Result<ServerHandle, std::io::Error> {
    let state = AppState::new(&config, services);
    let sessions = Arc::clone(&state.sessions);

    let cleanup = client::start_cleanup_task(
        Arc::clone(sessions.registry()),
        config.cleanup_interval,
    );

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, "bridge server started");

    let shutdown = CancellationToken::new();
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        local_addr,
        sessions,
        shutdown,
        server,
        cleanup,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    pub local_addr: SocketAddr,
    sessions: Arc<SessionManager>,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
    cleanup: JoinHandle<()>,
}

impl ServerHandle {
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Stop accepting, close every session, wait for the listener to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.cleanup.abort();
        self.sessions.close_all().await;
        if let Err(e) = self.server.await {
            tracing::warn!(error = %e, "server task ended abnormally");
        }
        tracing::info!("bridge server stopped");
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    handle_ws_connection(socket, state.sessions, state.heartbeat_interval).await;
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stream = state.stream_state.borrow().clone();
    let (http_status, status) = match &stream {
        StreamState::Connected => (StatusCode::OK, "healthy"),
        StreamState::Reconnecting { .. } => (StatusCode::OK, "degraded"),
        StreamState::Failed { .. } => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
    };

    let body = serde_json::json!({
        "status": status,
        "stream": stream,
        "sessions": state.sessions.session_count(),
        "metrics": state.metrics.snapshot(),
    });
    (http_status, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderbridge_salesforce::mock::{MockCredentials, MockPublisher, MockQuery};

    fn services(state: StreamState) -> (BridgeServices, watch::Sender<StreamState>) {
        let (tx, rx) = watch::channel(state);
        let services = BridgeServices {
            events: EventSource::new("/data/Order__ChangeEvent", 16),
            stream_state: rx,
            translator: Arc::new(Translator::default()),
            approvals: Arc::new(ApprovalPublisher::new(
                Arc::new(MockPublisher::new()),
                "005xx",
            )),
            orders: Arc::new(OrderQueryService::new(
                Arc::new(MockCredentials::ok("tok", "https://na1.my.salesforce.com")),
                Arc::new(MockQuery::returning(Vec::new())),
            )),
            metrics: Arc::new(MetricsRecorder::new()),
        };
        (services, tx)
    }

    fn local_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.client_timeout, Duration::from_secs(90));
    }

    #[tokio::test]
    async fn router_builds() {
        let (services, _tx) = services(StreamState::Connected);
        let state = AppState::new(&ServerConfig::default(), services);
        let _router = build_router(state);
    }

    #[tokio::test]
    async fn health_reports_stream_state() {
        let (services, tx) = services(StreamState::Connected);
        let handle = start(local_config(), services).await.unwrap();
        let url = format!("http://127.0.0.1:{}/health", handle.port);

        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["stream"]["state"], "connected");
        assert_eq!(body["sessions"], 0);

        tx.send(StreamState::Failed {
            reason: "gave up".into(),
        })
        .unwrap();
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 503);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["stream"]["reason"], "gave up");

        handle.shutdown().await;
    }
}
