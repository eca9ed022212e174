//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Default pass-through target for allowed requests.
    pub backend: BackendConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Inspector endpoint and body capture settings.
    pub inspector: InspectorConfig,

    /// Verdict cache settings.
    pub cache: CacheConfig,

    /// Offender jail settings.
    pub jail: JailConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Protected backend that receives allowed requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend address (e.g., "127.0.0.1:3000").
    pub address: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:3000".to_string(),
        }
    }
}

/// Timeout configuration for the outer request.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Inspector configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InspectorConfig {
    /// Base URL requests are forwarded to for inspection. Mandatory.
    pub url: String,

    /// Inspector call timeout in milliseconds.
    pub timeout_millis: u64,

    /// Largest request body, in bytes, that will be captured and inspected.
    pub max_body_size: usize,
}

impl InspectorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_millis)
    }
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_millis: 2000,
            max_body_size: 10 * 1024 * 1024, // 10 MiB
        }
    }
}

/// Which requests are eligible for caching, based on whether they carry a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BodyCondition {
    /// Cache regardless of body presence.
    #[default]
    Any,
    /// Only cache requests without a body.
    Bodyless,
    /// Only cache requests with a body.
    WithBody,
}

impl BodyCondition {
    pub fn matches(self, has_body: bool) -> bool {
        match self {
            BodyCondition::Any => true,
            BodyCondition::Bodyless => !has_body,
            BodyCondition::WithBody => has_body,
        }
    }
}

/// Verdict cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch for verdict caching.
    pub enabled: bool,

    /// Methods eligible for caching. Empty means every method.
    pub methods: Vec<String>,

    /// Body presence condition for caching.
    pub body: BodyCondition,

    /// Cache key composition.
    pub key: CacheKeyConfig,

    /// Upper bound on idle synthetic responses kept for reuse.
    pub response_pool_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            methods: Vec::new(),
            body: BodyCondition::Any,
            key: CacheKeyConfig::default(),
            response_pool_size: 64,
        }
    }
}

/// Attributes that feed the cache key besides method and path.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CacheKeyConfig {
    /// Hash the whitelisted headers.
    pub include_headers: bool,

    /// Header whitelist, used when `include_headers` is set.
    pub headers: Vec<String>,

    /// Hash the request host.
    pub include_host: bool,

    /// Hash the client address.
    pub include_remote_address: bool,
}

/// Offender jail configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JailConfig {
    /// Master switch for the jail.
    pub enabled: bool,

    /// Number of forbidden verdicts within the window before jailing.
    pub threshold_count: usize,

    /// Sliding window length in seconds.
    pub threshold_period_secs: u64,

    /// How long a jailed client stays blocked, in seconds.
    pub duration_secs: u64,
}

impl Default for JailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_count: 25,
            threshold_period_secs: 600,
            duration_secs: 600,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
