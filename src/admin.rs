//! Operator introspection over rate limiter state.
//!
//! Two operations only: per-identity counter stats and forced reset. Both
//! require administrative privilege and report structured failures rather
//! than faults; when the store adapter is degraded they still answer
//! correctly from the local table, just at scan cost.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::identity::{Identity, Principal};
use crate::store::{StoreAdapter, StoreError};

/// Structured failure of an admin operation. Never a panic.
#[derive(Error, Debug)]
pub enum AdminError {
    /// The calling principal lacks administrative privilege
    #[error("Administrative privilege required")]
    Forbidden,

    /// The scan or delete failed against both stores
    #[error("Store operation failed: {0}")]
    Store(#[from] StoreError),
}

/// One route class's counter state for an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterStats {
    /// Requests counted in the current window
    pub requests: u64,
    /// Time until the window resets
    pub reset_in: Duration,
}

/// All live counters for an identity, keyed by route-class discriminator.
#[derive(Debug, Clone)]
pub struct IdentityStats {
    /// Route-class discriminator → counter state
    pub counters: HashMap<String, CounterStats>,
    /// Whether the answer came from the local fallback table
    pub degraded: bool,
}

/// Outcome of a forced counter reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetOutcome {
    /// Number of counter keys removed
    pub keys_deleted: u64,
    /// Whether the delete ran against the local fallback table
    pub degraded: bool,
}

/// Read/administrative surface over rate limiter state.
pub struct AdminIntrospection {
    store: Arc<StoreAdapter>,
}

impl AdminIntrospection {
    /// Create the admin surface over the given store adapter.
    pub fn new(store: Arc<StoreAdapter>) -> Self {
        Self { store }
    }

    /// Live counters for an identity, grouped by route-class discriminator.
    pub async fn stats_for(
        &self,
        caller: &Principal,
        identity: &Identity,
    ) -> Result<IdentityStats, AdminError> {
        self.require_admin(caller)?;

        let (records, health) = self.store.scan_matching(identity.as_str()).await?;

        let mut counters: HashMap<String, CounterStats> = HashMap::new();
        for record in records {
            // Composite keys are "<policy>:<subject>"; the policy segment is
            // the route-class discriminator.
            let discriminator = record
                .key
                .split(':')
                .next()
                .unwrap_or(record.key.as_str())
                .to_string();

            counters
                .entry(discriminator)
                .and_modify(|stats| {
                    stats.requests += record.count;
                    stats.reset_in = stats.reset_in.max(record.reset_in);
                })
                .or_insert(CounterStats {
                    requests: record.count,
                    reset_in: record.reset_in,
                });
        }

        Ok(IdentityStats {
            counters,
            degraded: health.is_degraded(),
        })
    }

    /// Delete all counters for an identity, starting it on a fresh window.
    pub async fn reset(
        &self,
        caller: &Principal,
        identity: &Identity,
    ) -> Result<ResetOutcome, AdminError> {
        self.require_admin(caller)?;

        let (keys_deleted, health) = self.store.delete_matching(identity.as_str()).await?;

        info!(
            identity = %identity,
            keys_deleted = keys_deleted,
            "Reset rate limit counters"
        );

        Ok(ResetOutcome {
            keys_deleted,
            degraded: health.is_degraded(),
        })
    }

    fn require_admin(&self, caller: &Principal) -> Result<(), AdminError> {
        if caller.is_admin() {
            Ok(())
        } else {
            Err(AdminError::Forbidden)
        }
    }
}
