//! Remote (redis) counter store.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::trace;

use super::{CounterRecord, CounterStore, StoreError, WindowCount};

/// Redis-backed counter store shared across nodes.
///
/// Counters use the INCR + EXPIRE-on-first-hit idiom: the key's TTL is the
/// window boundary, so counters vanish on expiry without any sweeping on our
/// side. Every operation is bounded by the configured timeout; callers above
/// fall back to the local table when a bound is exceeded.
#[derive(Debug)]
pub struct RemoteStore {
    client: redis::Client,
    namespace: String,
    timeout: Duration,
}

impl RemoteStore {
    /// Connect a remote store. This only validates the URL; the first
    /// command establishes the connection.
    pub fn connect(
        url: &str,
        namespace: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            namespace: namespace.into(),
            timeout,
        })
    }

    /// Check remote liveness with a PING.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.bounded(async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    fn strip_namespace<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(&self.namespace).unwrap_or(key)
    }

    /// Run `op` under the configured operation bound.
    async fn bounded<T>(
        &self,
        op: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.timeout, op)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }

    /// Collect all namespaced keys containing `fragment` via a SCAN cursor.
    async fn matching_keys(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        fragment: &str,
    ) -> Result<Vec<String>, StoreError> {
        let pattern = format!("{}*{}*", self.namespace, fragment);
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }
}

#[async_trait]
impl CounterStore for RemoteStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let redis_key = self.namespaced(key);
        let window_secs = window.as_secs().max(1) as i64;

        self.bounded(async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;

            let count: i64 = conn.incr(&redis_key, 1).await?;
            if count == 1 {
                // First hit anchors the window.
                let _: () = conn.expire(&redis_key, window_secs).await?;
            }

            let ttl: i64 = conn.ttl(&redis_key).await?;
            let reset_in = if ttl > 0 {
                Duration::from_secs(ttl as u64)
            } else {
                // TTL can be missing if the EXPIRE above was lost (e.g. the
                // key was evicted between commands). Re-anchor it.
                let _: () = conn.expire(&redis_key, window_secs).await?;
                window
            };

            trace!(key = %redis_key, count = count, "Incremented remote counter");
            Ok(WindowCount {
                count: count.max(1) as u64,
                reset_in,
            })
        })
        .await
    }

    async fn uncount(&self, key: &str) -> Result<(), StoreError> {
        let redis_key = self.namespaced(key);

        // A refund must never go negative, and a refund arriving after the
        // window key expired must not recreate it: DECR on a missing key
        // would materialize a TTL-less counter that lingers forever. The
        // script makes existence check, decrement and cleanup atomic.
        let script = redis::Script::new(
            r#"
            if redis.call('EXISTS', KEYS[1]) == 0 then
                return 0
            end
            local count = redis.call('DECR', KEYS[1])
            if count <= 0 then
                redis.call('DEL', KEYS[1])
                return 0
            end
            return count
            "#,
        );

        self.bounded(async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let _: i64 = script.key(&redis_key).invoke_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    async fn get_count(&self, key: &str) -> Result<u64, StoreError> {
        let redis_key = self.namespaced(key);

        self.bounded(async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let value: Option<i64> = conn.get(&redis_key).await?;
            Ok(value.unwrap_or(0).max(0) as u64)
        })
        .await
    }

    async fn scan_matching(&self, fragment: &str) -> Result<Vec<CounterRecord>, StoreError> {
        self.bounded(async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let keys = self.matching_keys(&mut conn, fragment).await?;

            let mut records = Vec::with_capacity(keys.len());
            for key in keys {
                let count: Option<i64> = conn.get(&key).await?;
                let ttl: i64 = conn.ttl(&key).await?;
                records.push(CounterRecord {
                    key: self.strip_namespace(&key).to_string(),
                    count: count.unwrap_or(0).max(0) as u64,
                    reset_in: Duration::from_secs(ttl.max(0) as u64),
                });
            }
            Ok(records)
        })
        .await
    }

    async fn delete_matching(&self, fragment: &str) -> Result<u64, StoreError> {
        self.bounded(async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let keys = self.matching_keys(&mut conn, fragment).await?;
            if keys.is_empty() {
                return Ok(0);
            }
            let deleted: u64 = conn.del(&keys).await?;
            Ok(deleted)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_err;

    fn test_store() -> RemoteStore {
        RemoteStore::connect("redis://127.0.0.1:6379", "gk:rl:", Duration::from_millis(100))
            .unwrap()
    }

    #[test]
    fn test_key_namespacing() {
        let store = test_store();
        assert_eq!(store.namespaced("auth:ip:10.0.0.1"), "gk:rl:auth:ip:10.0.0.1");
        assert_eq!(store.strip_namespace("gk:rl:auth:ip:10.0.0.1"), "auth:ip:10.0.0.1");
        // Keys outside the namespace pass through unchanged.
        assert_eq!(store.strip_namespace("other:key"), "other:key");
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert_err!(RemoteStore::connect(
            "not-a-url",
            "gk:rl:",
            Duration::from_millis(100)
        ));
    }

    #[tokio::test]
    #[ignore = "requires a redis instance at 127.0.0.1:6379"]
    async fn test_late_refund_leaves_no_key_behind() {
        let store = test_store();

        store
            .increment("refund:ip:10.9.9.9", Duration::from_secs(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        // The window key has expired; the refund must not recreate it.
        store.uncount("refund:ip:10.9.9.9").await.unwrap();

        assert_eq!(store.get_count("refund:ip:10.9.9.9").await.unwrap(), 0);
        assert!(store
            .scan_matching("refund:ip:10.9.9.9")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    #[ignore = "requires a redis instance at 127.0.0.1:6379"]
    async fn test_full_refund_deletes_the_counter() {
        let store = test_store();

        store
            .increment("refund:ip:10.9.9.8", Duration::from_secs(60))
            .await
            .unwrap();
        store.uncount("refund:ip:10.9.9.8").await.unwrap();

        // Refunding the only hit removes the key entirely rather than
        // leaving a zero counter for admin scans to report.
        assert!(store
            .scan_matching("refund:ip:10.9.9.8")
            .await
            .unwrap()
            .is_empty());
    }
}
