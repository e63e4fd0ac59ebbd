//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::store::StoreAdapter;

use super::policy::{FailMode, Policy};

/// The outcome of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request is within the limit
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u64,
    /// Time until the window resets; zero when allowed
    pub retry_after: Duration,
    /// Name of the policy that produced this decision
    pub policy: String,
}

/// Enforces a [`Policy`] for a counter subject using the store adapter.
///
/// Counting is fixed-window: the window is anchored at the first hit and the
/// count resets wholesale at the boundary. Within one (policy, subject)
/// window increments are atomic read-modify-writes in whichever store serves
/// them, so concurrent checks cannot both slip under the limit.
pub struct RateLimiter {
    store: Arc<StoreAdapter>,
}

impl RateLimiter {
    /// Create a limiter over the given store adapter.
    pub fn new(store: Arc<StoreAdapter>) -> Self {
        Self { store }
    }

    /// The composite counter key for a policy and subject.
    ///
    /// The policy name doubles as the route-class discriminator, giving keys
    /// like `auth:ip:10.0.0.1` or `generation:user:42`.
    fn composite_key(policy: &Policy, subject: &str) -> String {
        format!("{}:{}", policy.name, subject)
    }

    /// Count one hit for `subject` under `policy` and decide admission.
    pub async fn check(&self, policy: &Policy, subject: &str) -> RateDecision {
        let key = Self::composite_key(policy, subject);
        let (count, health) = self.store.increment(&key, policy.window()).await;

        trace!(
            key = %key,
            count = count.count,
            limit = policy.max_requests,
            "Checked rate limit"
        );

        if health.is_degraded() && policy.fail_mode == FailMode::Closed {
            debug!(key = %key, policy = %policy.name, "Failing closed while store is degraded");
            return RateDecision {
                allowed: false,
                remaining: 0,
                retry_after: count.reset_in,
                policy: policy.name.clone(),
            };
        }

        let allowed = count.count <= policy.max_requests;
        if !allowed {
            debug!(
                key = %key,
                count = count.count,
                limit = policy.max_requests,
                "Rate limit exceeded"
            );
        }

        RateDecision {
            allowed,
            remaining: policy.max_requests.saturating_sub(count.count),
            retry_after: if allowed { Duration::ZERO } else { count.reset_in },
            policy: policy.name.clone(),
        }
    }

    /// Refund a previously counted hit for `subject` under `policy`.
    ///
    /// Companion to [`check`](Self::check) for `count_only_failures`
    /// policies: callers invoke it after a successful response so only
    /// failures accumulate toward the limit.
    pub async fn uncount(&self, policy: &Policy, subject: &str) {
        let key = Self::composite_key(policy, subject);
        self.store.uncount(&key).await;
        trace!(key = %key, "Refunded rate limit hit");
    }

    /// Current count for `subject` under `policy`.
    pub async fn current_count(&self, policy: &Policy, subject: &str) -> u64 {
        let key = Self::composite_key(policy, subject);
        self.store.get_count(&key).await
    }
}
