//! Time-expiring verdict store.

use axum::http::{Method, Request, StatusCode};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::cache::key::{derive_cache_key, CacheKey, CacheKeyOptions};
use crate::config::{BodyCondition, CacheConfig};
use crate::observability::metrics;

/// How long a verdict stays valid.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// How often the background sweeper removes expired entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// An inspector status code reduced to at most three decimal digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict(u16);

impl Verdict {
    pub fn from_code(code: u16) -> Self {
        Self(code % 1000)
    }

    pub fn code(self) -> u16 {
        self.0
    }

    /// The verdict as a status code, or 500 if the stored code is not a valid status.
    pub fn status(self) -> StatusCode {
        StatusCode::from_u16(self.0).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<StatusCode> for Verdict {
    fn from(status: StatusCode) -> Self {
        Self::from_code(status.as_u16())
    }
}

/// A cached verdict and its lifetime.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub verdict: Verdict,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Decides whether a request may use the verdict cache.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    enabled: bool,
    methods: Vec<Method>,
    body: BodyCondition,
}

impl CachePolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        let methods = config
            .methods
            .iter()
            .filter_map(|m| match Method::from_bytes(m.as_bytes()) {
                Ok(method) => Some(method),
                Err(_) => {
                    tracing::warn!(method = %m, "Ignoring invalid cache method");
                    None
                }
            })
            .collect();

        Self {
            enabled: config.enabled,
            methods,
            body: config.body,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether a request with this method and body presence is cacheable.
    pub fn applies(&self, method: &Method, has_body: bool) -> bool {
        if !self.enabled {
            return false;
        }
        if !self.methods.is_empty() && !self.methods.contains(method) {
            return false;
        }
        self.body.matches(has_body)
    }
}

/// Concurrent key → verdict store with a single TTL for all entries.
#[derive(Debug)]
pub struct VerdictCache {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
}

impl VerdictCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fetch a live verdict, dropping the entry if it has expired.
    pub fn lookup(&self, key: &CacheKey) -> Option<Verdict> {
        let now = Instant::now();
        let verdict = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.verdict),
            Some(_) => None,
            None => {
                metrics::record_cache_lookup(false);
                return None;
            }
        };

        if verdict.is_none() {
            // Only remove if nobody stored a fresh entry in the meantime.
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        metrics::record_cache_lookup(verdict.is_some());
        verdict
    }

    pub fn store(&self, key: CacheKey, verdict: Verdict) {
        let now = Instant::now();
        self.entries.insert(
            key,
            CacheEntry {
                verdict,
                created_at: now,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Derive the key for `request` and look it up.
    pub fn lookup_request<B>(
        &self,
        request: &Request<B>,
        remote: &str,
        options: &CacheKeyOptions,
    ) -> Option<Verdict> {
        self.lookup(&derive_cache_key(request, remote, options))
    }

    /// Derive the key for `request` and store the verdict under it.
    pub fn store_request<B>(
        &self,
        request: &Request<B>,
        remote: &str,
        options: &CacheKeyOptions,
        verdict: Verdict,
    ) {
        self.store(derive_cache_key(request, remote, options), verdict);
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, remaining = self.entries.len(), "Swept expired verdicts");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for VerdictCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `VerdictCache::sweep` every `interval` until shutdown.
pub fn spawn_sweeper(
    cache: Arc<VerdictCache>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    cache.sweep();
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Verdict sweeper stopped");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheKeyConfig;

    fn key(s: &str) -> CacheKey {
        let request = Request::get(s).body(()).unwrap();
        derive_cache_key(&request, "", &CacheKeyOptions::default())
    }

    #[test]
    fn test_verdict_is_three_digits() {
        assert_eq!(Verdict::from_code(403).code(), 403);
        assert_eq!(Verdict::from_code(1403).code(), 403);
        assert_eq!(Verdict::from(StatusCode::OK).status(), StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_and_lookup() {
        let cache = VerdictCache::new();
        let k = key("/a");

        assert!(cache.lookup(&k).is_none());
        cache.store(k.clone(), Verdict::from_code(403));
        assert_eq!(cache.lookup(&k), Some(Verdict::from_code(403)));
        assert!(cache.lookup(&key("/b")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = VerdictCache::with_ttl(Duration::from_secs(60));
        let k = key("/a");
        cache.store(k.clone(), Verdict::from_code(200));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.lookup(&k).is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.lookup(&k).is_none());
        assert!(cache.is_empty(), "expired entry is removed on lookup");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let cache = VerdictCache::with_ttl(Duration::from_secs(10));
        cache.store(key("/old"), Verdict::from_code(200));
        tokio::time::advance(Duration::from_secs(5)).await;
        cache.store(key("/new"), Verdict::from_code(200));
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup(&key("/new")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_stops_on_shutdown() {
        let cache = Arc::new(VerdictCache::with_ttl(Duration::from_secs(1)));
        cache.store(key("/a"), Verdict::from_code(200));
        let (tx, rx) = broadcast::channel(1);

        let handle = spawn_sweeper(cache.clone(), Duration::from_secs(5), rx);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(cache.is_empty());

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn test_request_level_helpers() {
        let cache = VerdictCache::new();
        let opts = CacheKeyOptions::from_config(&CacheKeyConfig {
            include_remote_address: true,
            ..Default::default()
        });
        let request = Request::get("/x").body(()).unwrap();

        cache.store_request(&request, "10.0.0.1", &opts, Verdict::from_code(403));
        assert_eq!(
            cache.lookup_request(&request, "10.0.0.1", &opts),
            Some(Verdict::from_code(403))
        );
        assert!(cache.lookup_request(&request, "10.0.0.2", &opts).is_none());
    }

    #[test]
    fn test_policy() {
        let mut config = CacheConfig {
            enabled: true,
            methods: vec!["GET".into(), "HEAD".into()],
            body: BodyCondition::Bodyless,
            ..Default::default()
        };
        let policy = CachePolicy::from_config(&config);
        assert!(policy.applies(&Method::GET, false));
        assert!(!policy.applies(&Method::GET, true));
        assert!(!policy.applies(&Method::POST, false));

        config.methods.clear();
        config.body = BodyCondition::Any;
        let policy = CachePolicy::from_config(&config);
        assert!(policy.applies(&Method::DELETE, true));

        config.enabled = false;
        assert!(!CachePolicy::from_config(&config).applies(&Method::GET, false));
    }
}
