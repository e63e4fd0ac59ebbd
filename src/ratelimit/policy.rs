//! Rate limit policies.
//!
//! A [`Policy`] is an immutable, named limit configuration: a fixed window, a
//! maximum request count, how the counter is keyed, and which callers bypass
//! it. The built-in [`PolicySet`] mirrors the route classes the governance
//! layer protects; every field can be overridden from configuration and is
//! validated once at construction.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identity::Principal;

/// How a policy keys its counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// The derived identity: `user:<id>` when authenticated, else `ip:<addr>`
    #[default]
    Identity,
    /// Always the network address, even for authenticated callers
    Ip,
    /// Identity and network address combined, separating shared accounts
    /// used from different addresses
    Composite,
}

/// A rule exempting certain callers from a policy entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BypassRule {
    /// No exemption
    #[default]
    None,
    /// Callers whose subscription tier matches are never counted
    SubscriptionTier(String),
}

impl BypassRule {
    /// Whether this rule exempts the given principal.
    pub fn exempts(&self, principal: &Principal) -> bool {
        match self {
            BypassRule::None => false,
            BypassRule::SubscriptionTier(tier) => {
                principal.subscription_tier.as_deref() == Some(tier.as_str())
            }
        }
    }
}

/// What a limit check decides when it was served from the fallback store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    /// Serve the decision from the fallback store (default)
    #[default]
    Open,
    /// Deny while the remote store is unavailable
    Closed,
}

/// An immutable named rate limit configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Policy name; doubles as the route-class discriminator in counter keys
    pub name: String,
    /// Fixed window length in seconds
    pub window_secs: u64,
    /// Maximum counted requests per window
    pub max_requests: u64,
    /// How counters are keyed
    #[serde(default)]
    pub key_strategy: KeyStrategy,
    /// Callers exempt from this policy
    // serde_yaml only accepts tagged enums by default; singleton_map lets the
    // natural `bypass: {subscription_tier: premium}` form parse.
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub bypass: BypassRule,
    /// Count only failed attempts: the caller refunds the hit after a
    /// successful response (login-attempt style policies)
    #[serde(default)]
    pub count_only_failures: bool,
    /// Behavior when the check is served degraded
    #[serde(default)]
    pub fail_mode: FailMode,
}

impl Policy {
    /// The fixed window length.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// The counter subject for a principal under this policy's key strategy.
    pub fn subject(&self, principal: &Principal) -> String {
        match self.key_strategy {
            KeyStrategy::Identity => principal.identity().as_str().to_string(),
            KeyStrategy::Ip => format!("ip:{}", principal.remote_addr),
            KeyStrategy::Composite => {
                format!("{}|ip:{}", principal.identity(), principal.remote_addr)
            }
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("policy name must not be empty".to_string());
        }
        if self.window_secs == 0 {
            return Err(format!("policy '{}': window must be positive", self.name));
        }
        if self.max_requests == 0 {
            return Err(format!("policy '{}': max_requests must be positive", self.name));
        }
        Ok(())
    }
}

/// The complete set of policies the router selects from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySet {
    /// Login/registration attempts, keyed by address, failures only
    #[serde(default = "default_auth_policy")]
    pub auth: Policy,
    /// AI generation/analysis calls; premium subscribers bypass
    #[serde(default = "default_generation_policy")]
    pub generation: Policy,
    /// File uploads
    #[serde(default = "default_upload_policy")]
    pub upload: Policy,
    /// Search and recommendation traffic
    #[serde(default = "default_search_policy")]
    pub search: Policy,
    /// Everything without a more specific rule
    #[serde(default = "default_general_policy")]
    pub general: Policy,
}

impl Default for PolicySet {
    fn default() -> Self {
        Self {
            auth: default_auth_policy(),
            generation: default_generation_policy(),
            upload: default_upload_policy(),
            search: default_search_policy(),
            general: default_general_policy(),
        }
    }
}

impl PolicySet {
    /// Validate every policy once, at construction time.
    pub fn validate(&self) -> crate::error::Result<()> {
        for policy in [
            &self.auth,
            &self.generation,
            &self.upload,
            &self.search,
            &self.general,
        ] {
            policy
                .validate()
                .map_err(crate::error::GatekeeperError::Config)?;
        }
        Ok(())
    }
}

fn default_auth_policy() -> Policy {
    Policy {
        name: "auth".to_string(),
        window_secs: 15 * 60,
        max_requests: 5,
        key_strategy: KeyStrategy::Ip,
        bypass: BypassRule::None,
        count_only_failures: true,
        fail_mode: FailMode::Open,
    }
}

fn default_generation_policy() -> Policy {
    Policy {
        name: "generation".to_string(),
        window_secs: 60 * 60,
        max_requests: 20,
        key_strategy: KeyStrategy::Identity,
        bypass: BypassRule::SubscriptionTier("premium".to_string()),
        count_only_failures: false,
        fail_mode: FailMode::Open,
    }
}

fn default_upload_policy() -> Policy {
    Policy {
        name: "upload".to_string(),
        window_secs: 60 * 60,
        max_requests: 10,
        key_strategy: KeyStrategy::Identity,
        bypass: BypassRule::None,
        count_only_failures: false,
        fail_mode: FailMode::Open,
    }
}

fn default_search_policy() -> Policy {
    Policy {
        name: "search".to_string(),
        window_secs: 60,
        max_requests: 30,
        key_strategy: KeyStrategy::Identity,
        bypass: BypassRule::None,
        count_only_failures: false,
        fail_mode: FailMode::Open,
    }
}

fn default_general_policy() -> Policy {
    Policy {
        name: "general".to_string(),
        window_secs: 15 * 60,
        max_requests: 100,
        key_strategy: KeyStrategy::Identity,
        bypass: BypassRule::None,
        count_only_failures: false,
        fail_mode: FailMode::Open,
    }
}
