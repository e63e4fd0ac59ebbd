//! Health-driven selection between the remote and local counter stores.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::Result;

use super::{CounterRecord, CounterStore, LocalStore, RemoteStore, StoreError, WindowCount};

/// Which store is currently serving counter operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreHealth {
    /// The remote store is serving operations
    Healthy,
    /// Operations are served from the in-process fallback table
    Degraded,
}

impl StoreHealth {
    /// Whether operations are currently served from the fallback table.
    pub fn is_degraded(&self) -> bool {
        matches!(self, StoreHealth::Degraded)
    }
}

/// Uniform counter operations backed by the remote store when healthy and the
/// in-process table otherwise.
///
/// The health state is explicit and checked at a single decision point per
/// call. Any remote error or timeout flips the adapter to degraded for that
/// call and all subsequent ones; a probe (driven by the service's background
/// task) flips it back once the remote answers again. In-flight operations
/// complete against whichever store they started on. Transitions are logged
/// once, not per request.
///
/// Counter operations never surface remote failures to callers; the worst
/// case is a count served from the fallback table.
pub struct StoreAdapter {
    remote: Option<RemoteStore>,
    local: LocalStore,
    degraded: AtomicBool,
}

impl StoreAdapter {
    /// Build an adapter from configuration. Without a remote URL the adapter
    /// runs permanently on the local table.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let timeout = Duration::from_millis(config.operation_timeout_ms);
        let remote = match &config.redis_url {
            Some(url) => {
                let store = RemoteStore::connect(url, config.key_namespace.clone(), timeout)
                    .map_err(crate::error::GatekeeperError::Store)?;
                info!(url = %url, "Remote counter store configured");
                Some(store)
            }
            None => {
                info!("No remote store configured, using in-process counters");
                None
            }
        };

        Ok(Self {
            degraded: AtomicBool::new(remote.is_none()),
            remote,
            local: LocalStore::new(),
        })
    }

    /// Current health state.
    pub fn health(&self) -> StoreHealth {
        if self.degraded.load(Ordering::Relaxed) {
            StoreHealth::Degraded
        } else {
            StoreHealth::Healthy
        }
    }

    /// Whether the remote store is currently serving operations.
    pub fn healthy(&self) -> bool {
        !self.health().is_degraded()
    }

    /// The single decision point selecting the backing store for a call.
    fn remote_if_healthy(&self) -> Option<&RemoteStore> {
        match (&self.remote, self.degraded.load(Ordering::Relaxed)) {
            (Some(remote), false) => Some(remote),
            _ => None,
        }
    }

    fn mark_degraded(&self, error: &StoreError) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(error = %error, "Remote store unavailable, falling back to in-process counters");
        }
    }

    fn mark_healthy(&self) {
        if self.degraded.swap(false, Ordering::Relaxed) {
            info!("Remote store recovered, resuming shared counters");
        }
    }

    /// Ping the remote store and flip back to healthy on success.
    ///
    /// Returns the post-probe health. No-op while already healthy or when no
    /// remote is configured.
    pub async fn probe(&self) -> StoreHealth {
        let Some(remote) = &self.remote else {
            return StoreHealth::Degraded;
        };
        if !self.degraded.load(Ordering::Relaxed) {
            return StoreHealth::Healthy;
        }

        match remote.ping().await {
            Ok(()) => {
                self.mark_healthy();
                StoreHealth::Healthy
            }
            Err(error) => {
                debug!(error = %error, "Remote store probe failed");
                StoreHealth::Degraded
            }
        }
    }

    /// Sweep expired rows out of the local fallback table.
    pub fn sweep_local(&self) -> usize {
        self.local.sweep_expired()
    }

    /// Atomically increment the counter for `key`. Remote failures are
    /// absorbed: the call completes against the local table and reports the
    /// health it was served under.
    pub async fn increment(&self, key: &str, window: Duration) -> (WindowCount, StoreHealth) {
        if let Some(remote) = self.remote_if_healthy() {
            match remote.increment(key, window).await {
                Ok(count) => return (count, StoreHealth::Healthy),
                Err(error) => self.mark_degraded(&error),
            }
        }

        // The local store is infallible; the unwrap_or is never taken.
        let count = self
            .local
            .increment(key, window)
            .await
            .unwrap_or(WindowCount {
                count: 1,
                reset_in: window,
            });
        (count, StoreHealth::Degraded)
    }

    /// Refund one previously counted hit.
    pub async fn uncount(&self, key: &str) {
        if let Some(remote) = self.remote_if_healthy() {
            match remote.uncount(key).await {
                Ok(()) => return,
                Err(error) => self.mark_degraded(&error),
            }
        }
        let _ = self.local.uncount(key).await;
    }

    /// Current count for `key`, or 0 when no window is active.
    pub async fn get_count(&self, key: &str) -> u64 {
        if let Some(remote) = self.remote_if_healthy() {
            match remote.get_count(key).await {
                Ok(count) => return count,
                Err(error) => self.mark_degraded(&error),
            }
        }
        self.local.get_count(key).await.unwrap_or(0)
    }

    /// All live counters whose key contains `fragment`, with the health the
    /// scan was served under. Degraded scans answer from the local table.
    pub async fn scan_matching(
        &self,
        fragment: &str,
    ) -> std::result::Result<(Vec<CounterRecord>, StoreHealth), StoreError> {
        if let Some(remote) = self.remote_if_healthy() {
            match remote.scan_matching(fragment).await {
                Ok(records) => return Ok((records, StoreHealth::Healthy)),
                Err(error) => self.mark_degraded(&error),
            }
        }
        let records = self.local.scan_matching(fragment).await?;
        Ok((records, StoreHealth::Degraded))
    }

    /// Delete all counters whose key contains `fragment`.
    pub async fn delete_matching(
        &self,
        fragment: &str,
    ) -> std::result::Result<(u64, StoreHealth), StoreError> {
        if let Some(remote) = self.remote_if_healthy() {
            match remote.delete_matching(fragment).await {
                Ok(deleted) => return Ok((deleted, StoreHealth::Healthy)),
                Err(error) => self.mark_degraded(&error),
            }
        }
        let deleted = self.local.delete_matching(fragment).await?;
        Ok((deleted, StoreHealth::Degraded))
    }
}
