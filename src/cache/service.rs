//! Cache-aside service. Every cache failure is logged and counted, then
//! swallowed: callers only ever see a miss or a `false` acknowledgement.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::types::ResourceKind;

use super::config::{CacheConfig, TtlPolicy};
use super::keys::CacheKeys;
use super::store::{CacheError, CacheStore};

const METRIC_CACHE_HIT: &str = "wayfarer_cache_hit_total";
const METRIC_CACHE_MISS: &str = "wayfarer_cache_miss_total";
const METRIC_CACHE_ERROR: &str = "wayfarer_cache_error_total";
const METRIC_CACHE_INVALIDATION: &str = "wayfarer_cache_invalidation_total";

const SHARED_SCOPE: &str = "shared";

#[derive(Clone)]
pub struct CacheService {
    store: Arc<dyn CacheStore>,
    enabled: bool,
    scope: &'static str,
    /// Invalidation count per scope, shared by every scoped clone.
    generations: Arc<DashMap<&'static str, u64>>,
}

impl CacheService {
    pub fn new(store: Arc<dyn CacheStore>, enabled: bool) -> Self {
        Self {
            store,
            enabled,
            scope: SHARED_SCOPE,
            generations: Arc::new(DashMap::new()),
        }
    }

    /// Same backend, metrics labelled with a resource kind.
    pub fn scoped(&self, kind: ResourceKind) -> Self {
        Self {
            scope: kind.as_str(),
            ..self.clone()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// How many invalidations this scope has started.
    pub fn generation(&self) -> u64 {
        self.generations.get(self.scope).map_or(0, |entry| *entry)
    }

    fn advance_generation(&self) {
        *self.generations.entry(self.scope).or_insert(0) += 1;
    }

    fn failed(&self, op: &'static str, key: &str, err: &CacheError) {
        counter!(METRIC_CACHE_ERROR, "resource" => self.scope, "op" => op).increment(1);
        warn!(
            op,
            key,
            backend = self.store.backend(),
            error = %err,
            "cache operation failed; continuing without cache"
        );
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.enabled {
            return None;
        }
        match self.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    counter!(METRIC_CACHE_HIT, "resource" => self.scope).increment(1);
                    debug!(key, "cache hit");
                    Some(value)
                }
                Err(err) => {
                    self.failed("decode", key, &CacheError::Codec(err.to_string()));
                    // An undecodable entry would keep missing until its TTL ends.
                    if let Err(err) = self.store.delete(key).await {
                        self.failed("delete", key, &err);
                    }
                    None
                }
            },
            Ok(None) => {
                counter!(METRIC_CACHE_MISS, "resource" => self.scope).increment(1);
                debug!(key, "cache miss");
                None
            }
            Err(err) => {
                self.failed("get", key, &err);
                None
            }
        }
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        if !self.enabled {
            return false;
        }
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(err) => {
                self.failed("encode", key, &CacheError::Codec(err.to_string()));
                return false;
            }
        };
        match self.store.set(key, raw, ttl).await {
            Ok(()) => true,
            Err(err) => {
                self.failed("set", key, &err);
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        if !self.enabled {
            return false;
        }
        match self.store.delete(key).await {
            Ok(()) => true,
            Err(err) => {
                self.failed("delete", key, &err);
                false
            }
        }
    }

    pub async fn delete_by_pattern(&self, pattern: &str) -> bool {
        if !self.enabled {
            return false;
        }
        match self.store.delete_by_pattern(pattern).await {
            Ok(removed) => {
                debug!(pattern, removed, "cache pattern invalidated");
                true
            }
            Err(err) => {
                self.failed("delete_by_pattern", pattern, &err);
                false
            }
        }
    }
}

/// Cache view for one resource kind: its keys, TTLs and invalidation set.
#[derive(Clone)]
pub struct ResourceCache {
    cache: CacheService,
    keys: CacheKeys,
    ttl: TtlPolicy,
}

impl ResourceCache {
    pub fn new(cache: &CacheService, config: &CacheConfig, kind: ResourceKind) -> Self {
        Self {
            cache: cache.scoped(kind),
            keys: CacheKeys::new(config.key_prefix.clone(), kind),
            ttl: config.ttl_for(kind),
        }
    }

    pub fn keys(&self) -> &CacheKeys {
        &self.keys
    }

    pub fn ttl(&self) -> &TtlPolicy {
        &self.ttl
    }

    pub fn service(&self) -> &CacheService {
        &self.cache
    }

    /// Serve from cache or load and populate. Loader errors are returned
    /// untouched and nothing is cached for them.
    pub async fn read_through<V, E, F, Fut>(&self, key: &str, ttl: Duration, load: F) -> Result<V, E>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.cache.get::<V>(key).await {
            return Ok(hit);
        }
        let generation = self.cache.generation();
        let value = load().await?;
        self.populate(key, &value, ttl, generation).await;
        Ok(value)
    }

    /// Like [`read_through`](Self::read_through) for point reads: absent
    /// records are not cached.
    pub async fn read_through_optional<V, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        load: F,
    ) -> Result<Option<V>, E>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
    {
        if let Some(hit) = self.cache.get::<V>(key).await {
            return Ok(Some(hit));
        }
        let generation = self.cache.generation();
        let value = load().await?;
        if let Some(found) = &value {
            self.populate(key, found, ttl, generation).await;
        }
        Ok(value)
    }

    /// Store a freshly loaded value unless an invalidation of this resource
    /// started after the load began; such a value may predate the write.
    async fn populate<V: Serialize>(&self, key: &str, value: &V, ttl: Duration, generation: u64) {
        if self.cache.generation() != generation {
            debug!(key, "invalidated during load; not caching");
            return;
        }
        self.cache.set(key, value, ttl).await;
        // An invalidation that began after the check may have run its deletes
        // before the set landed.
        if self.cache.generation() != generation {
            self.cache.delete(key).await;
        }
    }

    /// Drop the point keys of `id` (plain and populated), every list and
    /// every statistic of this resource. Call only after the write succeeded.
    pub async fn invalidate(&self, id: Option<Uuid>) {
        if !self.cache.is_enabled() {
            return;
        }
        self.cache.advance_generation();
        if let Some(id) = id {
            self.cache.delete_by_pattern(&self.keys.point_pattern(id)).await;
        }
        self.cache.delete_by_pattern(&self.keys.list_pattern()).await;
        self.cache.delete_by_pattern(&self.keys.stats_pattern()).await;
        counter!(METRIC_CACHE_INVALIDATION, "resource" => self.keys.kind().as_str()).increment(1);
    }
}
