//! Response memoization for the expensive external compute call.

mod key;
mod response;

pub use key::{fingerprint, KeySpec};
pub use response::{CacheStats, ResponseCache};
