//! Cache configuration.
//!
//! Controls the cache-aside layer: namespace, memory bound, backend timeout
//! and time-to-live per resource and read shape.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::types::ResourceKind;

pub const DEFAULT_KEY_PREFIX: &str = "wayfarer";
const DEFAULT_POINT_TTL_SECS: u64 = 1800;
const DEFAULT_LIST_TTL_SECS: u64 = 300;
const DEFAULT_STATS_TTL_SECS: u64 = 3600;
const DEFAULT_MEMORY_CAPACITY: usize = 10_000;
const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 250;

/// Time-to-live for each read shape of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TtlPolicy {
    pub point_secs: u64,
    pub list_secs: u64,
    pub stats_secs: u64,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            point_secs: DEFAULT_POINT_TTL_SECS,
            list_secs: DEFAULT_LIST_TTL_SECS,
            stats_secs: DEFAULT_STATS_TTL_SECS,
        }
    }
}

impl TtlPolicy {
    pub fn point(&self) -> Duration {
        Duration::from_secs(self.point_secs)
    }

    pub fn list(&self) -> Duration {
        Duration::from_secs(self.list_secs)
    }

    pub fn stats(&self) -> Duration {
        Duration::from_secs(self.stats_secs)
    }
}

/// Partial TTL override for a single resource kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct TtlOverride {
    pub point_secs: Option<u64>,
    pub list_secs: Option<u64>,
    pub stats_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// When false every lookup misses and no writes reach the backend.
    pub enabled: bool,
    pub key_prefix: String,
    /// Entry bound for the in-process backend.
    pub memory_capacity: usize,
    pub operation_timeout_ms: u64,
    pub default_ttl: TtlPolicy,
    pub overrides: BTreeMap<ResourceKind, TtlOverride>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            operation_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
            default_ttl: TtlPolicy::default(),
            overrides: BTreeMap::new(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            key_prefix: settings.key_prefix.clone(),
            memory_capacity: settings.memory_capacity.get(),
            operation_timeout_ms: settings.operation_timeout_ms.get(),
            default_ttl: settings.default_ttl,
            overrides: settings.ttl_overrides.clone(),
        }
    }
}

impl CacheConfig {
    /// Effective policy for a kind: the defaults with any override applied.
    pub fn ttl_for(&self, kind: ResourceKind) -> TtlPolicy {
        let base = self.default_ttl;
        match self.overrides.get(&kind) {
            Some(o) => TtlPolicy {
                point_secs: o.point_secs.unwrap_or(base.point_secs),
                list_secs: o.list_secs.unwrap_or(base.list_secs),
                stats_secs: o.stats_secs.unwrap_or(base.stats_secs),
            },
            None => base,
        }
    }

    /// Returns the memory capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms.max(1))
    }
}
