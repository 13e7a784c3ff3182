//! Cache-aside layer.
//!
//! - **Store**: a key/value backend with expiry (Redis or in-process LRU)
//! - **Service**: advisory get/set/delete that never fails the caller
//! - **Keys**: deterministic, namespaced keys and invalidation patterns
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! backend = "redis"
//! key_prefix = "wayfarer"
//!
//! [cache.ttl]
//! point_secs = 1800
//! list_secs = 300
//! stats_secs = 3600
//! ```

mod config;
mod keys;
mod lock;
mod service;
mod store;

pub use config::{CacheConfig, DEFAULT_KEY_PREFIX, TtlOverride, TtlPolicy};
pub use keys::{CacheKeys, namespace_pattern};
pub use service::{CacheService, ResourceCache};
pub use store::{CacheError, CacheStore, MemoryCacheStore, glob_match};
