//! In-process fallback counter table.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::{CounterRecord, CounterStore, StoreError, WindowCount};

/// A single fixed-window counter row.
#[derive(Debug, Clone, Copy)]
struct LocalCounter {
    count: u64,
    expires_at: Instant,
}

/// In-process counter table used when the remote store is unavailable.
///
/// Window expiry is checked inside [`increment`](CounterStore::increment)
/// itself, so correctness never depends on sweep timing; the periodic sweep
/// only reclaims memory. State is process-lifetime only.
#[derive(Debug, Default)]
pub struct LocalStore {
    rows: DashMap<String, LocalCounter>,
}

impl LocalStore {
    /// Create an empty local counter table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove expired rows. Iterates shard by shard rather than holding a
    /// single lock for the whole sweep.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.rows.len();
        self.rows.retain(|_, row| row.expires_at > now);
        let removed = before.saturating_sub(self.rows.len());

        if removed > 0 {
            debug!(removed = removed, "Swept expired local counters");
        }
        removed
    }

    /// Number of rows currently held, expired or not.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table holds no rows at all.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl CounterStore for LocalStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let now = Instant::now();

        // The entry guard gives exclusive access to this key, making the
        // read-modify-write atomic with respect to concurrent increments.
        let mut row = self
            .rows
            .entry(key.to_string())
            .or_insert(LocalCounter {
                count: 0,
                expires_at: now + window,
            });

        if row.expires_at <= now {
            // Stale window: reset in place, anchored at this hit.
            row.count = 0;
            row.expires_at = now + window;
        }
        row.count += 1;

        Ok(WindowCount {
            count: row.count,
            reset_in: row.expires_at.saturating_duration_since(now),
        })
    }

    async fn uncount(&self, key: &str) -> Result<(), StoreError> {
        if let Some(mut row) = self.rows.get_mut(key) {
            row.count = row.count.saturating_sub(1);
        }
        Ok(())
    }

    async fn get_count(&self, key: &str) -> Result<u64, StoreError> {
        let now = Instant::now();
        Ok(self
            .rows
            .get(key)
            .filter(|row| row.expires_at > now)
            .map(|row| row.count)
            .unwrap_or(0))
    }

    async fn scan_matching(&self, fragment: &str) -> Result<Vec<CounterRecord>, StoreError> {
        let now = Instant::now();
        Ok(self
            .rows
            .iter()
            .filter(|entry| entry.key().contains(fragment) && entry.expires_at > now)
            .map(|entry| CounterRecord {
                key: entry.key().clone(),
                count: entry.count,
                reset_in: entry.expires_at.saturating_duration_since(now),
            })
            .collect())
    }

    async fn delete_matching(&self, fragment: &str) -> Result<u64, StoreError> {
        let before = self.rows.len();
        self.rows.retain(|key, _| !key.contains(fragment));
        Ok(before.saturating_sub(self.rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_increment_counts_within_window() {
        let store = LocalStore::new();
        let window = Duration::from_secs(60);

        for expected in 1..=3 {
            let result = store.increment("general:user:1", window).await.unwrap();
            assert_eq!(result.count, expected);
            assert!(result.reset_in <= window);
            assert!(result.reset_in > Duration::ZERO);
        }
    }

    #[tokio::test]
    async fn test_increment_resets_stale_window() {
        let store = LocalStore::new();
        let window = Duration::from_millis(30);

        store.increment("k", window).await.unwrap();
        store.increment("k", window).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        // Expiry is honored by increment directly, no sweep has run.
        let result = store.increment("k", window).await.unwrap();
        assert_eq!(result.count, 1);
    }

    #[tokio::test]
    async fn test_uncount_refunds_and_floors_at_zero() {
        let store = LocalStore::new();
        let window = Duration::from_secs(60);

        store.increment("k", window).await.unwrap();
        store.uncount("k").await.unwrap();
        assert_eq!(store.get_count("k").await.unwrap(), 0);

        // Refunding an empty counter must not underflow.
        store.uncount("k").await.unwrap();
        assert_eq!(store.get_count("k").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_get_count_ignores_expired_rows() {
        let store = LocalStore::new();
        store.increment("k", Duration::from_millis(20)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get_count("k").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_scan_and_delete_matching() {
        let store = LocalStore::new();
        let window = Duration::from_secs(60);

        store.increment("auth:user:1", window).await.unwrap();
        store.increment("search:user:1", window).await.unwrap();
        store.increment("search:user:2", window).await.unwrap();

        let records = store.scan_matching("user:1").await.unwrap();
        assert_eq!(records.len(), 2);

        let deleted = store.delete_matching("user:1").await.unwrap();
        assert_eq!(deleted, 2);
        assert!(store.scan_matching("user:1").await.unwrap().is_empty());
        assert_eq!(store.get_count("search:user:2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired_rows() {
        let store = LocalStore::new();
        store.increment("short", Duration::from_millis(20)).await.unwrap();
        store.increment("long", Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.sweep_expired(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_count("long").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_lose_no_updates() {
        use std::sync::Arc;

        let store = Arc::new(LocalStore::new());
        let window = Duration::from_secs(60);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    store.increment("contended", window).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get_count("contended").await.unwrap(), 400);
    }
}
