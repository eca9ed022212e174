//! Per-request decision flow.
//!
//! ```text
//! websocket upgrade ─────────────────────────────────────────▶ pass-through
//! jailed client ─────────────────────────────────────────────▶ 429
//! body capture ── too large / read error ────────────────────▶ 413 / 502
//! cache applicable? ── hit ──▶ synthetic response ─┐
//!        │ miss / no                               ├─ status >= 400 ──▶ relay (403 records offense)
//!        └──▶ inspector ──▶ store verdict ─────────┘        │ < 400
//!                                                           └──────────▶ pass-through
//! ```

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::cache::{
    derive_cache_key, CacheKey, CacheKeyOptions, CachePolicy, PooledResponse, ResponsePool,
    Verdict, VerdictCache,
};
use crate::config::GatewayConfig;
use crate::gate::inspector::{HttpInspector, InspectionRequest, Inspector, InspectorResponse};
use crate::gate::types::{GateError, GateResult};
use crate::observability::metrics;
use crate::security::headers::is_websocket_upgrade;
use crate::security::jail::{JailPolicy, JailStatus, OffenderJail};
use crate::security::limits::BodyGuard;

/// Where a verdict came from.
enum Decision {
    Live(InspectorResponse),
    Cached(PooledResponse),
}

impl Decision {
    fn status(&self) -> StatusCode {
        match self {
            Decision::Live(response) => response.status,
            Decision::Cached(response) => response.status(),
        }
    }

    fn into_response(self) -> Response {
        match self {
            Decision::Live(response) => response.into_response(),
            // The pooled value returns to its pool when dropped here.
            Decision::Cached(response) => response.to_response(),
        }
    }
}

/// The forwarding coordinator: body guard, jail, verdict cache and inspector.
pub struct Gate<I = HttpInspector> {
    inspector: I,
    body_guard: BodyGuard,
    cache: Arc<VerdictCache>,
    cache_policy: CachePolicy,
    key_options: CacheKeyOptions,
    responses: ResponsePool,
    jail: Option<Arc<OffenderJail>>,
}

impl Gate<HttpInspector> {
    /// Build a gate that calls the configured inspector over HTTP.
    ///
    /// Fails with `GateError::Configuration` if the inspector URL is missing.
    pub fn from_config(config: &GatewayConfig) -> GateResult<Self> {
        let inspector = HttpInspector::new(&config.inspector.url, config.inspector.timeout())?;
        Ok(Self::with_inspector(config, inspector))
    }
}

impl<I: Inspector> Gate<I> {
    pub fn with_inspector(config: &GatewayConfig, inspector: I) -> Self {
        let jail = config
            .jail
            .enabled
            .then(|| Arc::new(OffenderJail::new(JailPolicy::from(&config.jail))));

        Self {
            inspector,
            body_guard: BodyGuard::new(config.inspector.max_body_size),
            cache: Arc::new(VerdictCache::new()),
            cache_policy: CachePolicy::from_config(&config.cache),
            key_options: CacheKeyOptions::from_config(&config.cache.key),
            responses: ResponsePool::new(config.cache.response_pool_size),
            jail,
        }
    }

    /// Replace the verdict store, e.g. to share one between gates.
    pub fn with_cache(mut self, cache: Arc<VerdictCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Replace the jail. Has no effect if the jail is disabled.
    pub fn with_jail(mut self, jail: Arc<OffenderJail>) -> Self {
        if self.jail.is_some() {
            self.jail = Some(jail);
        }
        self
    }

    pub fn cache(&self) -> &Arc<VerdictCache> {
        &self.cache
    }

    pub fn jail(&self) -> Option<&Arc<OffenderJail>> {
        self.jail.as_ref()
    }

    /// Decide on `request` from `client`, calling `pass_through` only when it is allowed.
    pub async fn handle<F, Fut>(
        &self,
        mut request: Request<Body>,
        client: &str,
        pass_through: F,
    ) -> Response
    where
        F: FnOnce(Request<Body>) -> Fut,
        Fut: Future<Output = Response>,
    {
        if is_websocket_upgrade(request.headers()) {
            metrics::record_request("websocket");
            return pass_through(request).await;
        }

        if let Some(jail) = &self.jail {
            if jail.is_jailed(client) {
                tracing::info!(client = %client, "Client is jailed");
                return reject(GateError::Jailed);
            }
        }

        let captured = match self.body_guard.capture(&mut request).await {
            Ok(captured) => captured,
            Err(e) => return reject(e),
        };

        // Everything the decision needs is copied out of the request here;
        // only owned values are held across the inspector call.
        let key = self
            .cache_policy
            .applies(request.method(), !captured.is_empty())
            .then(|| derive_cache_key(&request, client, &self.key_options));

        let cached = key.as_ref().and_then(|key| self.cached(key));
        let decision = match cached {
            Some(decision) => decision,
            None => {
                let inspection = InspectionRequest::from_request(&request, captured.bytes());
                match self.inspect(inspection, key).await {
                    Ok(response) => Decision::Live(response),
                    Err(e) => return reject(e),
                }
            }
        };

        let status = decision.status();
        if status.as_u16() >= 400 {
            if status == StatusCode::FORBIDDEN {
                if let Some(jail) = &self.jail {
                    if let JailStatus::Jailed { .. } = jail.record_offense(client) {
                        tracing::debug!(client = %client, "Subsequent requests will be rejected");
                    }
                }
            }
            tracing::debug!(client = %client, status = %status, "Request denied by inspector");
            metrics::record_request("denied");
            return decision.into_response();
        }

        metrics::record_request("allowed");
        pass_through(request).await
    }

    fn cached(&self, key: &CacheKey) -> Option<Decision> {
        let verdict = self.cache.lookup(key)?;
        tracing::debug!(key = %key, status = verdict.code(), "Verdict cache hit");
        Some(Decision::Cached(self.responses.acquire(verdict)))
    }

    /// Ask the inspector, storing its verdict under `key` if caching applies.
    async fn inspect(
        &self,
        inspection: InspectionRequest,
        key: Option<CacheKey>,
    ) -> GateResult<InspectorResponse> {
        let response = self.inspector.inspect(inspection).await?;
        if let Some(key) = key {
            tracing::debug!(key = %key, status = %response.status, "Verdict cache miss, storing");
            self.cache.store(key, Verdict::from(response.status));
        }
        Ok(response)
    }
}

fn reject(err: GateError) -> Response {
    metrics::record_request(err.outcome());
    err.into_response()
}

/// Client identity used for jail bookkeeping and cache keys: the peer IP.
pub fn client_identity<B>(request: &Request<B>) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Axum middleware running every request through the gate.
pub async fn inspection_middleware<I: Inspector>(
    State(gate): State<Arc<Gate<I>>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client = client_identity(&request);
    gate.handle(request, &client, |request| next.run(request)).await
}
