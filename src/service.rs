//! The Gatekeeper service object.
//!
//! One explicitly constructed instance per process, handed to route handlers
//! by whoever owns the application lifecycle. There is no global state:
//! `open` builds every component and spawns the background machinery, and
//! `close` tears it down.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tracing::info;

use crate::admin::AdminIntrospection;
use crate::cache::ResponseCache;
use crate::config::GatekeeperConfig;
use crate::error::Result;
use crate::ratelimit::{Admission, PolicyRouter, RateLimiter, RouteRequest};
use crate::store::StoreAdapter;

/// The request-governance layer: policy router, rate limiter, response cache
/// and admin surface behind one lifecycle.
pub struct Gatekeeper {
    store: Arc<StoreAdapter>,
    router: PolicyRouter,
    cache: Arc<ResponseCache>,
    admin: AdminIntrospection,
    tasks: Vec<JoinHandle<()>>,
}

impl Gatekeeper {
    /// Build the governance layer from validated configuration and start its
    /// background tasks (local counter sweep, cache sweep, remote probe).
    ///
    /// Must be called within a tokio runtime.
    pub fn open(config: GatekeeperConfig) -> Result<Self> {
        config.policies.validate()?;

        let store = Arc::new(StoreAdapter::new(&config.store)?);
        let limiter = RateLimiter::new(Arc::clone(&store));
        let router = PolicyRouter::new(
            config.policies.clone(),
            limiter,
            config.bypass_secret.clone(),
        );
        let cache = Arc::new(ResponseCache::new(&config.cache));
        let admin = AdminIntrospection::new(Arc::clone(&store));

        let tasks = vec![
            Self::spawn_store_sweep(
                Arc::clone(&store),
                Duration::from_secs(config.store.sweep_interval_secs),
            ),
            Self::spawn_cache_sweep(
                Arc::clone(&cache),
                Duration::from_secs(config.cache.sweep_interval_secs),
            ),
            Self::spawn_probe(
                Arc::clone(&store),
                Duration::from_secs(config.store.probe_interval_secs),
            ),
        ];

        info!("Gatekeeper opened");

        Ok(Self {
            store,
            router,
            cache,
            admin,
            tasks,
        })
    }

    /// Decide whether a request is admitted. Convenience delegate to the
    /// policy router.
    pub async fn admit(&self, request: &RouteRequest<'_>) -> Admission {
        self.router.admit(request).await
    }

    /// Report a successful response for an earlier admission, refunding the
    /// hit under count-only-failures policies.
    pub async fn record_success(&self, request: &RouteRequest<'_>) {
        self.router.record_success(request).await
    }

    /// The policy router.
    pub fn router(&self) -> &PolicyRouter {
        &self.router
    }

    /// The response cache, for handlers memoizing external compute calls.
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// The operator admin surface.
    pub fn admin(&self) -> &AdminIntrospection {
        &self.admin
    }

    /// Whether counter operations are currently served by the remote store.
    pub fn store_healthy(&self) -> bool {
        self.store.healthy()
    }

    /// Stop the background tasks. Counter and cache state is process-lifetime
    /// only and is simply dropped.
    pub fn close(self) {
        for task in &self.tasks {
            task.abort();
        }
        info!("Gatekeeper closed");
    }

    fn spawn_store_sweep(store: Arc<StoreAdapter>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // First tick fires immediately; skip it.
            loop {
                ticker.tick().await;
                store.sweep_local();
            }
        })
    }

    fn spawn_cache_sweep(cache: Arc<ResponseCache>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.sweep_expired();
            }
        })
    }

    /// Periodically ping the remote store so a recovered remote flips the
    /// adapter back to healthy. Jittered so a fleet of nodes does not probe
    /// in lockstep.
    fn spawn_probe(store: Arc<StoreAdapter>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let jitter_ms =
                    rand::thread_rng().gen_range(0..=interval.as_millis().max(4) as u64 / 4);
                tokio::time::sleep(interval + Duration::from_millis(jitter_ms)).await;
                store.probe().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::AdminError;
    use crate::identity::{Identity, Principal, Privilege};
    use serde_json::json;

    fn open_default() -> Gatekeeper {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        Gatekeeper::open(GatekeeperConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_open_admit_close() {
        let gatekeeper = open_default();
        let principal = Principal::user("1", "10.0.0.1");

        let request = RouteRequest {
            path: "/api/profile",
            method: "GET",
            principal: &principal,
            bypass_token: None,
        };

        let admission = gatekeeper.admit(&request).await;
        assert!(matches!(admission, Admission::Granted { .. }));

        gatekeeper.close();
    }

    #[tokio::test]
    async fn test_denial_surfaces_retry_after_and_policy() {
        let mut config = GatekeeperConfig::default();
        config.policies.search.max_requests = 2;
        let gatekeeper = Gatekeeper::open(config).unwrap();

        let principal = Principal::user("1", "10.0.0.1");
        let request = RouteRequest {
            path: "/api/search",
            method: "GET",
            principal: &principal,
            bypass_token: None,
        };

        assert!(gatekeeper.admit(&request).await.allowed());
        assert!(gatekeeper.admit(&request).await.allowed());

        let admission = gatekeeper.admit(&request).await;
        assert!(!admission.allowed());
        assert!(admission.retry_after().unwrap() > Duration::ZERO);
        assert!(matches!(
            admission,
            Admission::Denied { ref policy, .. } if policy == "search"
        ));

        gatekeeper.close();
    }

    #[tokio::test]
    async fn test_cache_round_trip_through_service() {
        let gatekeeper = open_default();
        let identity = Identity::from_key("user:1");
        let data = json!({"goal": "strength", "experience": "beginner"});

        assert_eq!(gatekeeper.cache().get("generation", &identity, &data), None);

        gatekeeper
            .cache()
            .set("generation", &identity, &data, json!({"plan": []}), None);
        assert_eq!(
            gatekeeper.cache().get("generation", &identity, &data),
            Some(json!({"plan": []}))
        );

        gatekeeper.close();
    }

    #[tokio::test]
    async fn test_admin_surface_through_service() {
        let gatekeeper = open_default();

        let user = Principal::user("1", "10.0.0.1");
        let request = RouteRequest {
            path: "/api/search",
            method: "GET",
            principal: &user,
            bypass_token: None,
        };
        gatekeeper.admit(&request).await;

        let mut operator = Principal::user("ops", "10.0.0.99");
        operator.privilege = Some(Privilege::Admin);

        let stats = gatekeeper
            .admin()
            .stats_for(&operator, &user.identity())
            .await
            .unwrap();
        assert_eq!(stats.counters["search"].requests, 1);

        // Regular users cannot reach the admin surface.
        assert!(matches!(
            gatekeeper.admin().stats_for(&user, &user.identity()).await,
            Err(AdminError::Forbidden)
        ));

        gatekeeper.close();
    }

    #[tokio::test]
    async fn test_bypass_leaves_no_counter_state() {
        let mut config = GatekeeperConfig::default();
        config.bypass_secret = Some("let-me-in".to_string());
        let gatekeeper = Gatekeeper::open(config).unwrap();

        let principal = Principal::user("1", "10.0.0.1");
        let request = RouteRequest {
            path: "/api/search",
            method: "GET",
            principal: &principal,
            bypass_token: Some("let-me-in"),
        };

        assert_eq!(gatekeeper.admit(&request).await, Admission::Bypassed);

        let mut operator = Principal::user("ops", "10.0.0.99");
        operator.privilege = Some(Privilege::Admin);
        let stats = gatekeeper
            .admin()
            .stats_for(&operator, &principal.identity())
            .await
            .unwrap();
        assert!(stats.counters.is_empty());

        gatekeeper.close();
    }

    #[tokio::test]
    async fn test_invalid_policy_config_rejected_at_open() {
        let mut config = GatekeeperConfig::default();
        config.policies.general.max_requests = 0;
        assert!(Gatekeeper::open(config).is_err());
    }
}
