//! TTL-governed revocation verdict store.
//!
//! Each cache key (issuer + serial) owns a slot guarded by an async mutex.
//! A request takes the slot's lock before looking at the cached verdict and
//! holds it across the authority query, so concurrent checks of the same
//! certificate wait for the first query instead of issuing their own.
//! Different keys never contend.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{RevocationAuthority, RevocationRequest, RevocationStatus, RevocationVerdict};
use crate::config::RevocationConfig;

/// Tuning knobs for [`RevocationChecker`].
#[derive(Debug, Clone, Copy)]
pub struct RevocationCheckerOptions {
    /// Hard timeout for one authority query.
    pub timeout: Duration,
    /// Lifetime of Good / Revoked verdicts.
    pub verdict_ttl: Duration,
    /// Lifetime of Unknown verdicts.
    pub unknown_ttl: Duration,
    /// Maximum number of cached keys.
    pub max_entries: usize,
}

impl From<&RevocationConfig> for RevocationCheckerOptions {
    fn from(cfg: &RevocationConfig) -> Self {
        Self {
            timeout: cfg.timeout,
            verdict_ttl: cfg.verdict_ttl,
            unknown_ttl: cfg.unknown_ttl,
            max_entries: cfg.max_entries,
        }
    }
}

impl Default for RevocationCheckerOptions {
    fn default() -> Self {
        Self::from(&RevocationConfig::default())
    }
}

struct CachedVerdict {
    verdict: RevocationVerdict,
    cached_at: Instant,
    ttl: Duration,
}

impl CachedVerdict {
    fn is_expired(&self) -> bool {
        Instant::now().duration_since(self.cached_at) > self.ttl
    }
}

struct Slot {
    inserted_at: Instant,
    cached: Mutex<Option<CachedVerdict>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            inserted_at: Instant::now(),
            cached: Mutex::new(None),
        }
    }

    /// Expired or never filled, and not locked by an in-flight query.
    fn is_evictable(&self) -> bool {
        self.cached
            .try_lock()
            .is_ok_and(|c| c.as_ref().is_none_or(CachedVerdict::is_expired))
    }
}

#[derive(Debug, Default)]
struct RevocationStats {
    hits: AtomicU64,
    misses: AtomicU64,
    queries: AtomicU64,
    timeouts: AtomicU64,
    failures: AtomicU64,
    evictions: AtomicU64,
}

/// Snapshot of revocation cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RevocationStatsSnapshot {
    /// Verdicts served from cache
    pub hits: u64,
    /// Lookups that needed the authority
    pub misses: u64,
    /// Authority queries issued
    pub queries: u64,
    /// Queries abandoned at the timeout
    pub timeouts: u64,
    /// Queries that returned an error
    pub failures: u64,
    /// Slots removed to respect `max_entries`
    pub evictions: u64,
    /// Current number of slots
    pub size: usize,
}

/// Resolves revocation status with caching and a hard timeout.
pub struct RevocationChecker {
    authority: Arc<dyn RevocationAuthority>,
    options: RevocationCheckerOptions,
    entries: DashMap<String, Arc<Slot>>,
    stats: RevocationStats,
}

impl RevocationChecker {
    /// Create a checker in front of `authority`.
    pub fn new(authority: Arc<dyn RevocationAuthority>, options: RevocationCheckerOptions) -> Self {
        Self {
            authority,
            options,
            entries: DashMap::new(),
            stats: RevocationStats::default(),
        }
    }

    /// Resolve the revocation status of one certificate.
    ///
    /// Never fails and never waits on the authority longer than the
    /// configured timeout; every authority problem becomes
    /// [`RevocationStatus::Unknown`].
    pub async fn check(&self, request: &RevocationRequest) -> RevocationVerdict {
        let key = request.cache_key();
        let slot = self.slot(&key);
        let mut cached = slot.cached.lock().await;

        if let Some(entry) = cached.as_ref().filter(|c| !c.is_expired()) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            debug!(
                serial = %request.serial_hex(),
                status = ?entry.verdict.status,
                "Revocation verdict served from cache"
            );
            return entry.verdict;
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let verdict = RevocationVerdict::now(self.query_authority(request).await);
        let ttl = match verdict.status {
            RevocationStatus::Unknown => self.options.unknown_ttl,
            RevocationStatus::Good | RevocationStatus::Revoked => self.options.verdict_ttl,
        };

        *cached = Some(CachedVerdict {
            verdict,
            cached_at: Instant::now(),
            ttl,
        });

        verdict
    }

    /// Current statistics.
    pub fn stats(&self) -> RevocationStatsSnapshot {
        RevocationStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            queries: self.stats.queries.load(Ordering::Relaxed),
            timeouts: self.stats.timeouts.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            size: self.entries.len(),
        }
    }

    /// Drop every cached verdict.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Remove expired slots that no query currently holds.
    pub fn evict_expired(&self) {
        let keys_to_remove: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_evictable())
            .map(|entry| entry.key().clone())
            .collect();

        let count = keys_to_remove.len();
        for key in keys_to_remove {
            self.entries.remove(&key);
        }

        if count > 0 {
            self.stats
                .evictions
                .fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    async fn query_authority(&self, request: &RevocationRequest) -> RevocationStatus {
        self.stats.queries.fetch_add(1, Ordering::Relaxed);

        match tokio::time::timeout(self.options.timeout, self.authority.query(request)).await {
            Ok(Ok(status)) => {
                debug!(
                    serial = %request.serial_hex(),
                    issuer = %request.issuer_display,
                    status = ?status,
                    "Revocation authority answered"
                );
                status
            }
            Ok(Err(e)) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    serial = %request.serial_hex(),
                    issuer = %request.issuer_display,
                    error = %e,
                    "Revocation authority failed; status unknown"
                );
                RevocationStatus::Unknown
            }
            Err(_) => {
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    serial = %request.serial_hex(),
                    issuer = %request.issuer_display,
                    timeout_ms = self.options.timeout.as_millis(),
                    "Revocation authority timed out; status unknown"
                );
                RevocationStatus::Unknown
            }
        }
    }

    fn slot(&self, key: &str) -> Arc<Slot> {
        if let Some(slot) = self.entries.get(key) {
            return Arc::clone(slot.value());
        }

        if self.entries.len() >= self.options.max_entries {
            self.make_room();
        }

        Arc::clone(
            self.entries
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Slot::new()))
                .value(),
        )
    }

    /// Evict expired slots, then the oldest idle slot if still full.
    fn make_room(&self) {
        self.evict_expired();
        if self.entries.len() < self.options.max_entries {
            return;
        }

        let oldest = self
            .entries
            .iter()
            .filter(|entry| entry.value().cached.try_lock().is_ok())
            .min_by_key(|entry| entry.value().inserted_at)
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}
