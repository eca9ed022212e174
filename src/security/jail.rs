//! Offender jail: sliding-window tracking of forbidden verdicts per client.
//!
//! # States
//! ```text
//! clean → tracked: first offense recorded
//! tracked → jailed: threshold_count offenses within threshold_period
//! jailed → clean: release deadline elapsed (noticed on next check)
//! ```
//!
//! One reader/writer lock guards the whole table. `is_jailed` takes the read
//! lock and only upgrades to the write lock to purge an expired record; the
//! purge re-checks the deadline, so a concurrent re-offense is never lost.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::JailConfig;
use crate::observability::metrics;

/// Thresholds governing when a client is jailed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JailPolicy {
    pub threshold_count: usize,
    pub threshold_period: Duration,
    pub jail_duration: Duration,
}

impl From<&JailConfig> for JailPolicy {
    fn from(config: &JailConfig) -> Self {
        Self {
            threshold_count: config.threshold_count,
            threshold_period: Duration::from_secs(config.threshold_period_secs),
            jail_duration: Duration::from_secs(config.duration_secs),
        }
    }
}

/// Outcome of recording an offense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JailStatus {
    /// Offense recorded, still below the threshold.
    Tracked { offenses: usize },
    /// Threshold reached; blocked until `release_at`.
    Jailed { release_at: Instant },
}

#[derive(Debug, Default)]
struct JailTable {
    offenses: HashMap<String, Vec<Instant>>,
    release_at: HashMap<String, Instant>,
}

impl JailTable {
    fn purge(&mut self, client: &str) {
        self.offenses.remove(client);
        self.release_at.remove(client);
    }
}

/// Per-instance offender tracker.
#[derive(Debug)]
pub struct OffenderJail {
    table: RwLock<JailTable>,
    policy: JailPolicy,
}

impl OffenderJail {
    pub fn new(policy: JailPolicy) -> Self {
        Self {
            table: RwLock::new(JailTable::default()),
            policy,
        }
    }

    pub fn policy(&self) -> JailPolicy {
        self.policy
    }

    /// Whether `client` is currently blocked. Purges the record of a client
    /// whose release deadline has passed.
    pub fn is_jailed(&self, client: &str) -> bool {
        let now = Instant::now();
        {
            let table = self.table.read().expect("jail lock poisoned");
            match table.release_at.get(client) {
                None => return false,
                Some(release_at) if now < *release_at => return true,
                Some(_) => {}
            }
        }

        let mut table = self.table.write().expect("jail lock poisoned");
        match table.release_at.get(client) {
            Some(release_at) if now < *release_at => true,
            Some(_) => {
                table.purge(client);
                metrics::record_jail_event("released");
                tracing::info!(client = %client, "Client released from jail");
                false
            }
            None => false,
        }
    }

    /// Record a forbidden verdict for `client`, jailing it once the window
    /// holds `threshold_count` offenses.
    pub fn record_offense(&self, client: &str) -> JailStatus {
        let now = Instant::now();
        let period = self.policy.threshold_period;
        let mut table = self.table.write().expect("jail lock poisoned");

        let offenses = table.offenses.entry(client.to_string()).or_default();
        offenses.retain(|at| now.duration_since(*at) <= period);
        offenses.push(now);
        let count = offenses.len();
        metrics::record_jail_event("offense");

        if count < self.policy.threshold_count {
            tracing::debug!(client = %client, offenses = count, "Offense recorded");
            return JailStatus::Tracked { offenses: count };
        }

        let candidate = now + self.policy.jail_duration;
        let release_at = table
            .release_at
            .entry(client.to_string())
            .and_modify(|at| *at = (*at).max(candidate))
            .or_insert(candidate);
        let release_at = *release_at;

        metrics::record_jail_event("jailed");
        tracing::warn!(
            client = %client,
            offenses = count,
            jail_secs = self.policy.jail_duration.as_secs(),
            "Client reached threshold, putting in jail"
        );
        JailStatus::Jailed { release_at }
    }

    /// Release clients whose sentence has elapsed and drop clients with no
    /// offense left in the window. Returns how many clients were removed.
    ///
    /// A released client loses its whole record, exactly as in `is_jailed`.
    pub fn prune_idle(&self) -> usize {
        let now = Instant::now();
        let period = self.policy.threshold_period;
        let mut table = self.table.write().expect("jail lock poisoned");
        let before = table.offenses.len();

        let released: Vec<String> = table
            .release_at
            .iter()
            .filter(|(_, at)| now >= **at)
            .map(|(client, _)| client.clone())
            .collect();
        for client in &released {
            table.purge(client);
            metrics::record_jail_event("released");
            tracing::info!(client = %client, "Client released from jail");
        }

        let JailTable { offenses, release_at } = &mut *table;
        offenses.retain(|client, times| {
            release_at.contains_key(client)
                || times.iter().any(|at| now.duration_since(*at) <= period)
        });
        before - offenses.len()
    }

    /// Number of clients with any record.
    pub fn tracked_clients(&self) -> usize {
        let table = self.table.read().expect("jail lock poisoned");
        table.offenses.len()
    }
}

/// Run `OffenderJail::prune_idle` every `interval` until shutdown.
pub fn spawn_pruner(
    jail: Arc<OffenderJail>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = jail.prune_idle();
                    if removed > 0 {
                        tracing::debug!(removed, "Pruned idle jail records");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jail(count: usize, period_secs: u64, duration_secs: u64) -> OffenderJail {
        OffenderJail::new(JailPolicy {
            threshold_count: count,
            threshold_period: Duration::from_secs(period_secs),
            jail_duration: Duration::from_secs(duration_secs),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_jail_trip_and_release() {
        let jail = jail(3, 10, 10);
        let client = "10.0.0.1";

        assert_eq!(jail.record_offense(client), JailStatus::Tracked { offenses: 1 });
        assert_eq!(jail.record_offense(client), JailStatus::Tracked { offenses: 2 });
        assert!(!jail.is_jailed(client));

        assert!(matches!(jail.record_offense(client), JailStatus::Jailed { .. }));
        assert!(jail.is_jailed(client));
        assert!(!jail.is_jailed("10.0.0.2"));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(jail.is_jailed(client));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!jail.is_jailed(client));
        assert_eq!(jail.tracked_clients(), 0, "released client is purged");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_prunes_old_offenses() {
        let jail = jail(3, 10, 60);
        let client = "c";

        jail.record_offense(client);
        tokio::time::advance(Duration::from_secs(6)).await;
        jail.record_offense(client);
        tokio::time::advance(Duration::from_secs(6)).await;

        // First offense is now 12s old and falls out of the window.
        assert_eq!(jail.record_offense(client), JailStatus::Tracked { offenses: 2 });
        assert!(!jail.is_jailed(client));
    }

    #[tokio::test(start_paused = true)]
    async fn test_offense_exactly_at_window_edge_counts() {
        let jail = jail(2, 10, 60);
        jail.record_offense("c");
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(matches!(jail.record_offense("c"), JailStatus::Jailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reoffense_while_jailed_extends_sentence() {
        let jail = jail(1, 60, 30);
        let JailStatus::Jailed { release_at: first } = jail.record_offense("c") else {
            panic!("expected jailed");
        };

        tokio::time::advance(Duration::from_secs(5)).await;
        let JailStatus::Jailed { release_at: second } = jail.record_offense("c") else {
            panic!("expected jailed");
        };
        assert_eq!(second - first, Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(26)).await;
        assert!(jail.is_jailed("c"), "still inside the extended sentence");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reoffending_after_release_starts_clean() {
        let jail = jail(2, 10, 5);
        jail.record_offense("c");
        jail.record_offense("c");
        assert!(jail.is_jailed("c"));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!jail.is_jailed("c"));
        assert_eq!(jail.record_offense("c"), JailStatus::Tracked { offenses: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_idle() {
        let jail = jail(5, 10, 60);
        jail.record_offense("old");
        tokio::time::advance(Duration::from_secs(11)).await;
        jail.record_offense("fresh");

        assert_eq!(jail.prune_idle(), 1);
        assert_eq!(jail.tracked_clients(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pruned_release_starts_clean() {
        let jail = jail(3, 600, 60);
        for _ in 0..3 {
            jail.record_offense("c");
        }
        assert!(jail.is_jailed("c"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(jail.prune_idle(), 1);
        assert_eq!(jail.tracked_clients(), 0);

        // Offenses from before the sentence do not count again.
        assert_eq!(jail.record_offense("c"), JailStatus::Tracked { offenses: 1 });
        assert!(!jail.is_jailed("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_keeps_active_sentence() {
        let jail = jail(1, 600, 60);
        jail.record_offense("c");

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(jail.prune_idle(), 0);
        assert!(jail.is_jailed("c"));
    }

    #[test]
    fn test_concurrent_offenses() {
        let jail = Arc::new(jail(500, 600, 600));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let jail = jail.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        jail.record_offense("shared");
                        jail.is_jailed("shared");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(jail.is_jailed("shared"));
    }

    #[test]
    fn test_policy_from_config() {
        let policy = JailPolicy::from(&JailConfig {
            enabled: true,
            threshold_count: 3,
            threshold_period_secs: 10,
            duration_secs: 20,
        });
        assert_eq!(policy.threshold_period, Duration::from_secs(10));
        assert_eq!(policy.jail_duration, Duration::from_secs(20));
    }
}
