//! Cache key derivation.
//!
//! A key is the SHA-256 of the request method and normalized target, plus
//! whichever of headers, host and remote address the configuration selects.
//! Every component is length-prefixed so adjacent fields cannot alias.

use axum::http::{header, HeaderName, Request};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::config::CacheKeyConfig;

/// Headers that never contribute to a cache key, whatever their value.
const BLACKLISTED_HEADERS: [HeaderName; 5] = [
    header::AUTHORIZATION,
    header::SET_COOKIE,
    header::CACHE_CONTROL,
    header::PRAGMA,
    header::EXPIRES,
];

/// Query parameters that only carry campaign tracking data.
const TRACKING_PARAMS: [&str; 9] = [
    "fbclid", "gclid", "dclid", "msclkid", "yclid", "mc_cid", "mc_eid", "_ga", "_gl",
];

/// Hex-encoded SHA-256 digest identifying a class of equivalent requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolved key composition, with the header whitelist parsed once.
#[derive(Debug, Clone, Default)]
pub struct CacheKeyOptions {
    headers: Option<Vec<HeaderName>>,
    include_host: bool,
    include_remote_address: bool,
}

impl CacheKeyOptions {
    pub fn from_config(config: &CacheKeyConfig) -> Self {
        let headers = config.include_headers.then(|| {
            config
                .headers
                .iter()
                .filter_map(|name| match HeaderName::from_bytes(name.trim().as_bytes()) {
                    Ok(name) => Some(name),
                    Err(_) => {
                        tracing::warn!(header = %name, "Ignoring invalid cache key header name");
                        None
                    }
                })
                .filter(|name| !BLACKLISTED_HEADERS.contains(name))
                .collect()
        });

        Self {
            headers,
            include_host: config.include_host,
            include_remote_address: config.include_remote_address,
        }
    }
}

/// Derive the cache key for a request.
pub fn derive_cache_key<B>(
    request: &Request<B>,
    remote: &str,
    options: &CacheKeyOptions,
) -> CacheKey {
    let mut hasher = Sha256::new();

    write_component(&mut hasher, request.method().as_str().as_bytes());
    write_component(&mut hasher, normalize_target(request).as_bytes());

    if let Some(whitelist) = &options.headers {
        for name in whitelist {
            let mut values = request.headers().get_all(name).iter().peekable();
            if values.peek().is_none() {
                continue;
            }
            write_component(&mut hasher, name.as_str().as_bytes());
            for value in values {
                write_component(&mut hasher, value.as_bytes());
            }
        }
    }

    if options.include_host {
        write_component(&mut hasher, request_host(request).as_bytes());
    }

    if options.include_remote_address {
        write_component(&mut hasher, remote.as_bytes());
    }

    CacheKey(hex::encode(hasher.finalize()))
}

fn write_component(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

/// Host header, falling back to the URI authority.
pub fn request_host<B>(request: &Request<B>) -> &str {
    request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().authority().map(|a| a.as_str()))
        .unwrap_or("")
}

/// Path and query with tracking parameters removed.
pub fn normalize_target<B>(request: &Request<B>) -> String {
    let path = request.uri().path();
    let Some(query) = request.uri().query() else {
        return path.to_string();
    };

    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            let name = pair.split('=').next().unwrap_or_default();
            !is_tracking_param(name)
        })
        .collect();

    if kept.is_empty() {
        path.to_string()
    } else {
        format!("{}?{}", path, kept.join("&"))
    }
}

fn is_tracking_param(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name.as_str())
}
