//! Rate limiting policies, enforcement and routing.

mod limiter;
mod policy;
mod router;

pub use limiter::{RateDecision, RateLimiter};
pub use policy::{BypassRule, FailMode, KeyStrategy, Policy, PolicySet};
pub use router::{Admission, PolicyRouter, RouteRequest};
