//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the shared state (pool, authenticator, metrics, tunnels, client)
//! - Create the Axum router with a single catch-all handler
//! - Wire up middleware (tracing, request ID)
//! - Spawn the health checker and traffic reporter next to the listener
//! - Dispatch each request to the WebSocket or HTTP forwarding path

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header::InvalidHeaderName, Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::{ProxyConfig, RetryConfig, WebSocketConfig};
use crate::health::active::{HealthMonitor, ProbeConfigError, ProbeSettings};
use crate::http::{forward, websocket};
use crate::lifecycle::Shutdown;
use crate::load_balancer::pool::{BackendPool, PoolError};
use crate::net::connection::TunnelRegistry;
use crate::observability::{Metrics, MetricsReporter};
use crate::security::Authenticator;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<BackendPool>,
    pub auth: Arc<Authenticator>,
    pub metrics: Arc<Metrics>,
    pub tunnels: Arc<TunnelRegistry>,
    pub client: Client<HttpConnector, Body>,
    pub retries: RetryConfig,
    pub websocket: WebSocketConfig,
}

/// Error type for server construction.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid backend pool: {0}")]
    Pool(#[from] PoolError),

    #[error("invalid auth header: {0}")]
    AuthHeader(#[from] InvalidHeaderName),

    #[error("invalid health check: {0}")]
    HealthCheck(#[from] ProbeConfigError),

    #[error("report interval must be greater than zero")]
    ReportInterval,
}

/// HTTP server for the load balancer.
pub struct HttpServer {
    router: Router,
    report_interval: Duration,
    state: AppState,
    probe: Option<ProbeSettings>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Result<Self, BuildError> {
        let pool = Arc::new(BackendPool::new(
            config.backend_servers.as_slice(),
            config.load_balancing_algorithm,
        )?);
        let auth = Arc::new(Authenticator::from_parts(&config.auth.header, &config.valid_tokens)?);
        let probe = config
            .health_check
            .as_ref()
            .map(ProbeSettings::try_from)
            .transpose()?;
        let report_interval = config.observability.report_interval();
        if report_interval.is_zero() {
            return Err(BuildError::ReportInterval);
        }

        let client = Client::builder(TokioExecutor::new())
            .build(HttpConnector::new());

        let state = AppState {
            pool,
            auth,
            metrics: Arc::new(Metrics::new()),
            tunnels: Arc::new(TunnelRegistry::new()),
            client,
            retries: config.retries.clone(),
            websocket: config.websocket.clone(),
        };

        tracing::info!(
            backends = state.pool.len(),
            algorithm = %state.pool.algorithm(),
            auth_header = %state.auth.header(),
            health_checks = probe.is_some(),
            "Load balancer configured"
        );

        let router = Self::build_router(state.clone());
        Ok(Self {
            router,
            report_interval,
            state,
            probe,
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    /// Router without a listener, for in-process requests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn pool(&self) -> Arc<BackendPool> {
        self.state.pool.clone()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.state.metrics.clone()
    }

    pub fn tunnels(&self) -> Arc<TunnelRegistry> {
        self.state.tunnels.clone()
    }

    /// Run the server until `shutdown` fires.
    ///
    /// Starts the health checker (if configured) and the traffic reporter,
    /// both tied to the same shutdown signal.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        if let Some(settings) = self.probe.clone() {
            let monitor = HealthMonitor::new(self.state.pool.clone(), settings);
            tokio::spawn(monitor.run(shutdown.subscribe()));
        }

        let reporter = MetricsReporter::new(
            self.state.metrics.clone(),
            self.state.pool.clone(),
            self.state.tunnels.clone(),
            self.report_interval,
        );
        tokio::spawn(reporter.run(shutdown.subscribe()));

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        let mut stop = shutdown.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
                tracing::info!("Listener closed, no longer accepting connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Catch-all handler: WebSocket upgrades go to a tunnel, everything else
/// is authorized and forwarded.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    if websocket::is_upgrade_request(request.headers()) {
        return websocket::handle_upgrade(state, client_addr, request).await;
    }

    if !state.auth.authorize(request.headers()) {
        tracing::warn!(
            client = %client_addr,
            method = %request.method(),
            path = %request.uri().path(),
            "Unauthorized request"
        );
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    forward::forward(&state, client_addr, request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::header;
    use tower::ServiceExt;

    fn config(backends: &[&str]) -> ProxyConfig {
        ProxyConfig {
            backend_servers: backends.iter().map(|b| b.to_string()).collect(),
            valid_tokens: vec!["secret".to_string()],
            ..Default::default()
        }
    }

    fn app(server: &HttpServer) -> Router {
        server
            .router()
            .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))))
    }

    #[test]
    fn rejects_bad_configuration() {
        assert!(matches!(HttpServer::new(config(&[])), Err(BuildError::Pool(PoolError::Empty))));

        let mut bad_header = config(&["http://127.0.0.1:1"]);
        bad_header.auth.header = "bad header".into();
        assert!(matches!(HttpServer::new(bad_header), Err(BuildError::AuthHeader(_))));

        let mut bad_probe = config(&["http://127.0.0.1:1"]);
        bad_probe.health_check = Some(crate::config::HealthCheckConfig {
            expected_status: 42,
            ..Default::default()
        });
        assert!(matches!(HttpServer::new(bad_probe), Err(BuildError::HealthCheck(_))));

        let mut zero_probe = config(&["http://127.0.0.1:1"]);
        zero_probe.health_check = Some(crate::config::HealthCheckConfig {
            interval_secs: 0,
            ..Default::default()
        });
        assert!(matches!(
            HttpServer::new(zero_probe),
            Err(BuildError::HealthCheck(ProbeConfigError::Zero("interval_secs")))
        ));

        let mut zero_report = config(&["http://127.0.0.1:1"]);
        zero_report.observability.report_interval_secs = 0;
        assert!(matches!(HttpServer::new(zero_report), Err(BuildError::ReportInterval)));
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let server = HttpServer::new(config(&["http://127.0.0.1:1"])).unwrap();

        let response = app(&server)
            .oneshot(Request::get("/anything").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(server.metrics().snapshot_and_reset().requests, 0);
    }

    #[tokio::test]
    async fn unreachable_backend_is_bad_gateway() {
        let server = HttpServer::new(config(&["http://127.0.0.1:1"])).unwrap();

        let response = app(&server)
            .oneshot(
                Request::get("/anything")
                    .header("x-auth-token", "secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(server.metrics().snapshot_and_reset().requests, 1);
    }

    #[tokio::test]
    async fn unauthorized_upgrade_is_rejected_before_handshake() {
        let server = HttpServer::new(config(&["http://127.0.0.1:1"])).unwrap();

        let response = app(&server)
            .oneshot(
                Request::get("/ws")
                    .header(header::CONNECTION, "upgrade")
                    .header(header::UPGRADE, "websocket")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(server.tunnels().is_empty());
    }

    #[tokio::test]
    async fn upgrade_without_connection_support_is_not_counted() {
        let server = HttpServer::new(config(&["http://127.0.0.1:1"])).unwrap();

        let response = app(&server)
            .oneshot(
                Request::get("/ws")
                    .header("x-auth-token", "secret")
                    .header(header::CONNECTION, "upgrade")
                    .header(header::UPGRADE, "websocket")
                    .header(header::SEC_WEBSOCKET_VERSION, "13")
                    .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.status().is_client_error());
        assert_eq!(server.metrics().snapshot_and_reset().requests, 0);
        assert!(server.tunnels().is_empty());
    }
}
