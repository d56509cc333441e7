//! In-process caching: the tiered LRU/TTL store and the memoizer built on it.

pub mod memo;
pub mod tiered;

pub use memo::{CallArgs, Memoizer};
pub use tiered::{CacheSettings, CacheStats, TieredCache};
