//! Request identity types.
//!
//! The identity provider (a collaborator, not part of this crate) authenticates
//! each request and hands the governance layer a [`Principal`]. Everything in
//! this crate keys off the derived [`Identity`] string; raw credentials never
//! cross this boundary.

use serde::{Deserialize, Serialize};

/// Privilege level reported by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privilege {
    /// Operator with administrative access
    Admin,
    /// Regular authenticated user
    User,
}

/// The authenticated (or anonymous) caller of a request.
///
/// Supplied per request by the identity provider. `id` is `None` for
/// unauthenticated traffic, in which case limits key off `remote_addr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Authenticated user id, if any
    pub id: Option<String>,
    /// Privilege level, if known
    pub privilege: Option<Privilege>,
    /// Subscription tier marker (e.g. "premium"), if any
    pub subscription_tier: Option<String>,
    /// Network address the request arrived from
    pub remote_addr: String,
}

impl Principal {
    /// Create an anonymous principal known only by its network address.
    pub fn anonymous(remote_addr: impl Into<String>) -> Self {
        Self {
            id: None,
            privilege: None,
            subscription_tier: None,
            remote_addr: remote_addr.into(),
        }
    }

    /// Create an authenticated principal with the given user id.
    pub fn user(id: impl Into<String>, remote_addr: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            privilege: Some(Privilege::User),
            subscription_tier: None,
            remote_addr: remote_addr.into(),
        }
    }

    /// Whether this principal carries administrative privilege.
    pub fn is_admin(&self) -> bool {
        self.privilege == Some(Privilege::Admin)
    }

    /// Derive the identity string limits and cache entries are scoped to.
    pub fn identity(&self) -> Identity {
        match &self.id {
            Some(id) => Identity(format!("user:{}", id)),
            None => Identity(format!("ip:{}", self.remote_addr)),
        }
    }
}

/// The string key against which limits and cache entries are scoped.
///
/// `"user:<id>"` for authenticated requests, `"ip:<addr>"` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    /// Build an identity from a raw key string.
    ///
    /// Prefer [`Principal::identity`]; this exists for admin tooling that
    /// receives the identity out-of-band.
    pub fn from_key(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The underlying key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
