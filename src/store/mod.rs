//! Counter store abstraction and backends.
//!
//! Rate limit counters live in a shared remote store (redis) when it is
//! healthy and in an in-process table otherwise. Both backends implement
//! [`CounterStore`]; [`StoreAdapter`] selects between them per call based on
//! an explicit health state.

mod adapter;
mod local;
mod remote;

pub use adapter::{StoreAdapter, StoreHealth};
pub use local::LocalStore;
pub use remote::RemoteStore;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from counter store operations.
///
/// These are absorbed by [`StoreAdapter`] for counter operations (the call
/// completes against the fallback table) and only surface through the admin
/// scan/delete path.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Remote store connection or command failure
    #[error("Remote store error: {0}")]
    Remote(#[from] redis::RedisError),

    /// Remote operation exceeded the configured bound
    #[error("Remote store operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Result of incrementing a window counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Count after this increment, within the current window
    pub count: u64,
    /// Time remaining until the window resets
    pub reset_in: Duration,
}

/// A counter row as reported by a key scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterRecord {
    /// Composite counter key (namespace stripped)
    pub key: String,
    /// Current count within the window
    pub count: u64,
    /// Time remaining until the window resets
    pub reset_in: Duration,
}

/// Uniform increment/TTL/scan operations over a keyed counter table.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment the counter for `key`, starting a new window of
    /// length `window` on the first hit. Returns the post-increment count and
    /// the time until the window resets.
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError>;

    /// Refund one previously counted hit. Never drops the count below zero,
    /// never extends the window, and never recreates an expired window.
    async fn uncount(&self, key: &str) -> Result<(), StoreError>;

    /// Current count for `key`, or 0 when no window is active.
    async fn get_count(&self, key: &str) -> Result<u64, StoreError>;

    /// All live counter rows whose key contains `fragment`.
    async fn scan_matching(&self, fragment: &str) -> Result<Vec<CounterRecord>, StoreError>;

    /// Delete all counters whose key contains `fragment`. Returns the number
    /// of keys removed.
    async fn delete_matching(&self, fragment: &str) -> Result<u64, StoreError>;
}
