//! Read-through cache with TTL expiry and single-flight computation.
//!
//! - [`Cache`]: one typed key/value table with per-key in-flight tracking
//! - [`CacheManager`]: registry of named caches with per-name TTLs
//! - [`ExpirySweeper`]: optional background eviction of expired entries
//! - [`CachedFn`]: a producer function bound to a cache
//!
//! Expiry is checked on every read, so the sweeper only reclaims memory;
//! it never changes what a read returns.

pub mod cached_fn;
pub mod error;
pub mod manager;
pub mod store;
pub mod sweeper;

pub use cached_fn::*;
pub use error::*;
pub use manager::*;
pub use store::*;
pub use sweeper::*;
