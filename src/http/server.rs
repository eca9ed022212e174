//! HTTP server setup and the default pass-through.
//!
//! # Responsibilities
//! - Create the Axum Router and wire up middleware (tracing, request ID, timeout, gate)
//! - Forward allowed requests to the configured backend
//! - Tunnel websocket upgrades, which skip inspection
//! - Run the verdict sweeper and jail pruner alongside the listener
//! - Stop on the shared shutdown signal

use axum::{
    body::Body,
    extract::State,
    http::{
        uri::{Authority, PathAndQuery, Scheme},
        Request, StatusCode, Uri,
    },
    middleware,
    response::{IntoResponse, Response},
    Router,
};
use hyper::upgrade::OnUpgrade;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::{TokioExecutor, TokioIo},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::cache::verdict::{spawn_sweeper, SWEEP_INTERVAL};
use crate::config::GatewayConfig;
use crate::gate::{inspection_middleware, Gate, GateError, GateResult, HttpInspector, Inspector};
use crate::http::request::{RequestIdExt, RequestIdLayer};
use crate::security::headers::{is_websocket_upgrade, strip_hop_by_hop};
use crate::security::jail::spawn_pruner;

/// Backend connection state injected into the pass-through handler.
#[derive(Clone)]
pub struct Backend {
    client: Client<HttpConnector, Body>,
    authority: Authority,
}

impl Backend {
    /// Client for `address` (`host:port`).
    pub fn new(address: &str) -> GateResult<Self> {
        let authority: Authority = address
            .parse()
            .map_err(|e| GateError::Configuration(format!("invalid backend address: {}", e)))?;
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Ok(Self { client, authority })
    }
}

/// The gateway: inspection middleware in front of a backend pass-through.
pub struct GatewayServer<I: Inspector = HttpInspector> {
    router: Router,
    gate: Arc<Gate<I>>,
    config: GatewayConfig,
}

impl GatewayServer<HttpInspector> {
    /// Create a server that inspects through the configured HTTP inspector.
    pub fn new(config: GatewayConfig) -> GateResult<Self> {
        let gate = Gate::from_config(&config)?;
        Self::with_gate(config, gate)
    }
}

impl<I: Inspector> GatewayServer<I> {
    pub fn with_gate(config: GatewayConfig, gate: Gate<I>) -> GateResult<Self> {
        let backend = Backend::new(&config.backend.address)?;
        let gate = Arc::new(gate);
        let router = Self::build_router(&config, gate.clone(), backend);
        Ok(Self { router, gate, config })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, gate: Arc<Gate<I>>, backend: Backend) -> Router {
        Router::new()
            .fallback(forward_handler)
            .with_state(backend)
            .layer(middleware::from_fn_with_state(gate, inspection_middleware::<I>))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(RequestIdLayer)
            .layer(TraceLayer::new_for_http())
    }

    pub fn gate(&self) -> &Arc<Gate<I>> {
        &self.gate
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Serve connections until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            backend = %self.config.backend.address,
            inspector = %self.config.inspector.url,
            "HTTP server starting"
        );

        let sweeper = spawn_sweeper(self.gate.cache().clone(), SWEEP_INTERVAL, shutdown.resubscribe());
        let pruner = self
            .gate
            .jail()
            .map(|jail| spawn_pruner(jail.clone(), SWEEP_INTERVAL, shutdown.resubscribe()));

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        let _ = sweeper.await;
        if let Some(pruner) = pruner {
            let _ = pruner.await;
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Forward a request the gate let through to the backend.
async fn forward_handler(State(backend): State<Backend>, mut request: Request<Body>) -> Response {
    let request_id = request.request_id().unwrap_or("unknown").to_string();
    let upgrade = is_websocket_upgrade(request.headers());
    let client_upgrade = upgrade.then(|| hyper::upgrade::on(&mut request));

    let (mut parts, body) = request.into_parts();
    if !upgrade {
        strip_hop_by_hop(&mut parts.headers);
    }

    // URI rewrite
    let mut uri_parts = parts.uri.clone().into_parts();
    uri_parts.scheme = Some(Scheme::HTTP);
    uri_parts.authority = Some(backend.authority.clone());
    if uri_parts.path_and_query.is_none() {
        uri_parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    parts.uri = match Uri::from_parts(uri_parts) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Failed to build backend URI");
            return (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response();
        }
    };

    tracing::debug!(
        request_id = %request_id,
        method = %parts.method,
        uri = %parts.uri,
        "Forwarding request"
    );

    match backend.client.request(Request::from_parts(parts, body)).await {
        Ok(mut response) => {
            match client_upgrade {
                Some(client_upgrade) if response.status() == StatusCode::SWITCHING_PROTOCOLS => {
                    let backend_upgrade = hyper::upgrade::on(&mut response);
                    tokio::spawn(tunnel(client_upgrade, backend_upgrade, request_id));
                }
                _ => strip_hop_by_hop(response.headers_mut()),
            }
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Upstream error");
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}

/// Copy bytes both ways between an upgraded client and backend connection.
async fn tunnel(client: OnUpgrade, backend: OnUpgrade, request_id: String) {
    let (client, backend) = match tokio::try_join!(client, backend) {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Websocket upgrade failed");
            return;
        }
    };

    let mut client = TokioIo::new(client);
    let mut backend = TokioIo::new(backend);
    match tokio::io::copy_bidirectional(&mut client, &mut backend).await {
        Ok((sent, received)) => {
            tracing::debug!(request_id = %request_id, sent, received, "Websocket tunnel closed");
        }
        Err(e) => {
            tracing::debug!(request_id = %request_id, error = %e, "Websocket tunnel aborted");
        }
    }
}
