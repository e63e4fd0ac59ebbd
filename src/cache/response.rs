//! TTL response cache for expensive external compute calls.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, trace};

use crate::config::CacheConfig;
use crate::identity::Identity;

use super::key::fingerprint;

/// A cached response with its own expiry.
#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Value,
    created_at: DateTime<Utc>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Cache occupancy counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries currently held, live or not
    pub total_entries: usize,
    /// Entries that would still be served
    pub active_entries: usize,
    /// Entries past expiry awaiting eviction
    pub expired_entries: usize,
}

/// Memoizes results of the expensive external compute call, keyed by the
/// deterministic fingerprint of (action, identity, relevant fields).
///
/// Each entry carries its own TTL: callers choose a shorter TTL for degraded
/// results and a longer one for high-confidence ones. `get` evicts expired
/// entries lazily, so correctness never depends on the periodic sweep, which
/// only reclaims memory.
///
/// Concurrent misses on the same fingerprint are NOT coalesced: both callers
/// will reach the external provider. This stampede window is an accepted
/// limitation of the design, not a bug.
///
/// State is process-lifetime only; a restart clears the cache.
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    default_ttl: Duration,
}

impl ResponseCache {
    /// Create a cache from configuration.
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl: Duration::from_secs(config.default_ttl_secs),
        }
    }

    /// Look up a previously computed result.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&self, action: &str, identity: &Identity, data: &Value) -> Option<Value> {
        let key = fingerprint(action, identity, data);
        let now = Instant::now();

        let entry = self.entries.get(&key)?;
        if entry.is_expired(now) {
            drop(entry);
            self.entries.remove(&key);
            trace!(key = %key, "Cache entry expired on lookup");
            return None;
        }

        trace!(
            key = %key,
            age_secs = (Utc::now() - entry.created_at).num_seconds(),
            "Cache hit"
        );
        Some(entry.payload.clone())
    }

    /// Store a computed result. `ttl` of `None` uses the configured default.
    pub fn set(
        &self,
        action: &str,
        identity: &Identity,
        data: &Value,
        payload: Value,
        ttl: Option<Duration>,
    ) {
        let key = fingerprint(action, identity, data);
        let ttl = ttl.unwrap_or(self.default_ttl);

        self.entries.insert(
            key.clone(),
            CacheEntry {
                payload,
                created_at: Utc::now(),
                expires_at: Instant::now() + ttl,
            },
        );
        trace!(key = %key, ttl_secs = ttl.as_secs(), "Cached response");
    }

    /// Remove every entry whose key contains `fragment`.
    ///
    /// Used to force-evict all entries for one identity.
    pub fn invalidate(&self, fragment: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.contains(fragment));
        let removed = before.saturating_sub(self.entries.len());

        if removed > 0 {
            debug!(fragment = %fragment, removed = removed, "Invalidated cache entries");
        }
        removed
    }

    /// Remove entries past expiry. Runs on the service's sweep schedule,
    /// independent of request traffic; iterates shard by shard rather than
    /// locking the whole table.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());

        if removed > 0 {
            debug!(removed = removed, "Swept expired cache entries");
        }
        removed
    }

    /// Current occupancy counters.
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let mut active = 0;
        let mut expired = 0;

        for entry in self.entries.iter() {
            if entry.is_expired(now) {
                expired += 1;
            } else {
                active += 1;
            }
        }

        CacheStats {
            total_entries: self.entries.len(),
            active_entries: active,
            expired_entries: expired,
        }
    }
}
