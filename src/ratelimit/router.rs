//! Route-class policy selection and admission.

use std::time::Duration;

use tracing::{debug, trace};

use crate::identity::Principal;

use super::limiter::RateLimiter;
use super::policy::{Policy, PolicySet};

/// The parts of an inbound request the router inspects.
///
/// Route handlers own the request's business semantics; the router only sees
/// the path, the method, the resolved principal and the optional operator
/// bypass token. Raw credentials never reach this type.
#[derive(Debug, Clone)]
pub struct RouteRequest<'a> {
    /// Request path
    pub path: &'a str,
    /// HTTP method (matched case-insensitively)
    pub method: &'a str,
    /// The caller, as resolved by the identity provider
    pub principal: &'a Principal,
    /// Operator bypass token, if the request carried one
    pub bypass_token: Option<&'a str>,
}

/// The admission decision for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Within limits; the hit was counted
    Granted {
        /// Requests left in the current window
        remaining: u64,
        /// Name of the policy that counted the hit
        policy: String,
    },
    /// Admitted without counting (operator bypass, admin, or policy exemption)
    Bypassed,
    /// Over the limit; a structured rejection, not a fault
    Denied {
        /// Time the caller should wait before retrying
        retry_after: Duration,
        /// Name of the policy that denied the request
        policy: String,
    },
}

impl Admission {
    /// Whether the request may proceed.
    pub fn allowed(&self) -> bool {
        !matches!(self, Admission::Denied { .. })
    }

    /// Retry-after hint for denied requests.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Admission::Denied { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Selects the policy for a route class and composes the admission decision.
pub struct PolicyRouter {
    policies: PolicySet,
    limiter: RateLimiter,
    bypass_secret: Option<String>,
}

impl PolicyRouter {
    /// Create a router over the given policy set and limiter.
    pub fn new(policies: PolicySet, limiter: RateLimiter, bypass_secret: Option<String>) -> Self {
        Self {
            policies,
            limiter,
            bypass_secret,
        }
    }

    /// Resolve which policy applies to a path and method.
    ///
    /// First match wins; a route matching no explicit rule falls through to
    /// the general policy (never an error).
    pub fn resolve(&self, path: &str, method: &str) -> &Policy {
        let is_post = method.eq_ignore_ascii_case("POST");

        if is_post && path.contains("/auth/") {
            return &self.policies.auth;
        }
        if path.contains("/generate") || path.contains("/analyze") || path.contains("/llm") {
            return &self.policies.generation;
        }
        if path.contains("/upload") || (is_post && path.contains("/photos")) {
            return &self.policies.upload;
        }
        if path.contains("/search") || path.contains("/recommendations") {
            return &self.policies.search;
        }
        &self.policies.general
    }

    /// Decide whether a request is admitted.
    ///
    /// Operator bypass and administrative privilege are checked before policy
    /// resolution; bypassed requests are never counted.
    pub async fn admit(&self, request: &RouteRequest<'_>) -> Admission {
        if self.is_exempt(request) {
            return Admission::Bypassed;
        }

        let policy = self.resolve(request.path, request.method);
        if policy.bypass.exempts(request.principal) {
            trace!(
                policy = %policy.name,
                identity = %request.principal.identity(),
                "Request exempt from policy"
            );
            return Admission::Bypassed;
        }

        let subject = policy.subject(request.principal);
        let decision = self.limiter.check(policy, &subject).await;

        if decision.allowed {
            Admission::Granted {
                remaining: decision.remaining,
                policy: decision.policy,
            }
        } else {
            debug!(
                policy = %decision.policy,
                identity = %request.principal.identity(),
                path = %request.path,
                retry_after_secs = decision.retry_after.as_secs(),
                "Request denied by rate limit"
            );
            Admission::Denied {
                retry_after: decision.retry_after,
                policy: decision.policy,
            }
        }
    }

    /// Report a successful response for a request admitted earlier.
    ///
    /// Refunds the counted hit when the governing policy counts only
    /// failures; a no-op for every other policy and for exempt requests.
    pub async fn record_success(&self, request: &RouteRequest<'_>) {
        if self.is_exempt(request) {
            return;
        }

        let policy = self.resolve(request.path, request.method);
        if !policy.count_only_failures || policy.bypass.exempts(request.principal) {
            return;
        }

        let subject = policy.subject(request.principal);
        self.limiter.uncount(policy, &subject).await;
    }

    /// Operator bypass token or administrative privilege.
    fn is_exempt(&self, request: &RouteRequest<'_>) -> bool {
        if let (Some(secret), Some(token)) = (&self.bypass_secret, request.bypass_token) {
            if secret == token {
                debug!(path = %request.path, "Operator bypass token accepted");
                return true;
            }
        }
        request.principal.is_admin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::identity::Privilege;
    use crate::store::StoreAdapter;
    use std::sync::Arc;

    fn router_with_store() -> (PolicyRouter, Arc<StoreAdapter>) {
        let store = Arc::new(StoreAdapter::new(&StoreConfig::default()).unwrap());
        let limiter = RateLimiter::new(Arc::clone(&store));
        let router = PolicyRouter::new(
            PolicySet::default(),
            limiter,
            Some("let-me-in".to_string()),
        );
        (router, store)
    }

    fn request<'a>(path: &'a str, method: &'a str, principal: &'a Principal) -> RouteRequest<'a> {
        RouteRequest {
            path,
            method,
            principal,
            bypass_token: None,
        }
    }

    #[test]
    fn test_resolution_order() {
        let (router, _) = router_with_store();

        assert_eq!(router.resolve("/api/auth/login", "POST").name, "auth");
        // Auth paths only trigger the strict policy on POST.
        assert_eq!(router.resolve("/api/auth/session", "GET").name, "general");

        assert_eq!(router.resolve("/api/workouts/generate", "POST").name, "generation");
        assert_eq!(router.resolve("/api/progress/analyze", "GET").name, "generation");
        assert_eq!(router.resolve("/api/llm/chat", "POST").name, "generation");

        assert_eq!(router.resolve("/api/upload/avatar", "POST").name, "upload");
        assert_eq!(router.resolve("/api/photos", "POST").name, "upload");
        assert_eq!(router.resolve("/api/photos", "GET").name, "general");

        assert_eq!(router.resolve("/api/search", "GET").name, "search");
        assert_eq!(router.resolve("/api/recommendations", "GET").name, "search");

        assert_eq!(router.resolve("/api/profile", "GET").name, "general");
    }

    #[tokio::test]
    async fn test_admit_counts_and_denies_at_limit() {
        let (router, _) = router_with_store();
        let principal = Principal::user("1", "10.0.0.1");

        // Search policy: 30 per minute.
        for _ in 0..30 {
            let admission = router.admit(&request("/api/search", "GET", &principal)).await;
            assert!(admission.allowed());
        }

        let admission = router.admit(&request("/api/search", "GET", &principal)).await;
        assert!(!admission.allowed());
        match admission {
            Admission::Denied { retry_after, policy } => {
                assert_eq!(policy, "search");
                assert!(retry_after > Duration::ZERO);
            }
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bypass_token_admits_without_counting() {
        let (router, store) = router_with_store();
        let principal = Principal::user("1", "10.0.0.1");

        let mut req = request("/api/search", "GET", &principal);
        req.bypass_token = Some("let-me-in");

        for _ in 0..100 {
            assert_eq!(router.admit(&req).await, Admission::Bypassed);
        }
        assert_eq!(store.get_count("search:user:1").await, 0);
    }

    #[tokio::test]
    async fn test_wrong_bypass_token_is_counted() {
        let (router, store) = router_with_store();
        let principal = Principal::user("1", "10.0.0.1");

        let mut req = request("/api/search", "GET", &principal);
        req.bypass_token = Some("wrong");

        assert!(matches!(
            router.admit(&req).await,
            Admission::Granted { .. }
        ));
        assert_eq!(store.get_count("search:user:1").await, 1);
    }

    #[tokio::test]
    async fn test_admin_principal_bypasses() {
        let (router, store) = router_with_store();
        let mut principal = Principal::user("1", "10.0.0.1");
        principal.privilege = Some(Privilege::Admin);

        let admission = router.admit(&request("/api/search", "GET", &principal)).await;
        assert_eq!(admission, Admission::Bypassed);
        assert_eq!(store.get_count("search:user:1").await, 0);
    }

    #[tokio::test]
    async fn test_premium_tier_bypasses_generation_only() {
        let (router, store) = router_with_store();
        let mut principal = Principal::user("1", "10.0.0.1");
        principal.subscription_tier = Some("premium".to_string());

        let admission = router
            .admit(&request("/api/workouts/generate", "POST", &principal))
            .await;
        assert_eq!(admission, Admission::Bypassed);
        assert_eq!(store.get_count("generation:user:1").await, 0);

        // Premium does not exempt other route classes.
        let admission = router.admit(&request("/api/search", "GET", &principal)).await;
        assert!(matches!(admission, Admission::Granted { .. }));
        assert_eq!(store.get_count("search:user:1").await, 1);
    }

    #[tokio::test]
    async fn test_record_success_refunds_auth_hits_only() {
        let (router, store) = router_with_store();
        let principal = Principal::anonymous("10.0.0.1");

        let auth_req = request("/api/auth/login", "POST", &principal);
        router.admit(&auth_req).await;
        assert_eq!(store.get_count("auth:ip:10.0.0.1").await, 1);

        router.record_success(&auth_req).await;
        assert_eq!(store.get_count("auth:ip:10.0.0.1").await, 0);

        // Policies that count every request are not refunded.
        let search_req = request("/api/search", "GET", &principal);
        router.admit(&search_req).await;
        router.record_success(&search_req).await;
        assert_eq!(store.get_count("search:ip:10.0.0.1").await, 1);
    }
}
