//! Gatekeeper - Request Governance Layer
//!
//! This crate sits in front of a costly, externally delegated computation
//! (an AI-generation call) and governs access to it two ways: policy-driven
//! rate limiting per identity and route class, backed by a shared remote
//! counter store with a transparent in-process fallback, and a TTL response
//! cache keyed by a deterministic fingerprint of the semantically relevant
//! parts of each request.
//!
//! Route handlers, identity resolution and the expensive call itself are
//! collaborators outside this crate: handlers pass in a resolved
//! [`identity::Principal`] plus the route, consult
//! [`ratelimit::PolicyRouter::admit`] before doing work, and use
//! [`cache::ResponseCache`] around the external call. Everything is owned by
//! a single [`Gatekeeper`] instance with an explicit open/close lifecycle.

pub mod admin;
pub mod cache;
pub mod config;
pub mod error;
pub mod identity;
pub mod ratelimit;
pub mod service;
pub mod store;

pub use config::GatekeeperConfig;
pub use error::{GatekeeperError, Result};
pub use service::Gatekeeper;
