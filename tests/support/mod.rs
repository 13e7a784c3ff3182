#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;
use wayfarer::application::context::AppContext;
use wayfarer::application::query::{Predicate, QueryPipeline, StoreQuery};
use wayfarer::application::repos::{
    DocumentStore, GeoHit, GeoQuery, GroupQuery, GroupSummary, RepoError,
};
use wayfarer::cache::{CacheConfig, CacheError, CacheStore, MemoryCacheStore};
use wayfarer::config::Environment;
use wayfarer::domain::entities::{Review, ReviewDraft, Tour, TourDraft};
use wayfarer::domain::types::Difficulty;
use wayfarer::infra::memory::MemoryDocumentStore;

pub fn context_with(
    store: Arc<dyn DocumentStore>,
    cache_store: Arc<dyn CacheStore>,
    cache_config: CacheConfig,
) -> AppContext {
    AppContext::new(
        store,
        cache_store,
        cache_config,
        QueryPipeline::default(),
        Environment::Development,
    )
}

/// Memory document store plus memory cache; returns the cache handle so
/// tests can look inside it.
pub fn memory_context() -> (AppContext, Arc<MemoryCacheStore>) {
    let cache_store = Arc::new(MemoryCacheStore::default());
    let context = context_with(
        Arc::new(MemoryDocumentStore::new()),
        cache_store.clone(),
        CacheConfig::default(),
    );
    (context, cache_store)
}

pub fn tour_draft(name: &str, price: f64) -> TourDraft {
    TourDraft {
        name: name.to_string(),
        duration: 5,
        max_group_size: 25,
        difficulty: Difficulty::Easy,
        price,
        price_discount: None,
        summary: "Breathtaking hike through the Canadian Banff National Park".to_string(),
        description: None,
        image_cover: "tour-1-cover.jpg".to_string(),
        images: Vec::new(),
        start_dates: Vec::new(),
        secret_tour: false,
        start_location: None,
        locations: Vec::new(),
        guides: Vec::new(),
    }
}

pub async fn create_tour(context: &AppContext, name: &str) -> Tour {
    context
        .tours
        .create(tour_draft(name, 397.0))
        .await
        .expect("create tour")
}

pub async fn create_review(context: &AppContext, tour: Uuid, rating: f64) -> Review {
    context
        .reviews
        .create(ReviewDraft {
            review: format!("{rating} stars"),
            rating,
            tour,
            user: Uuid::new_v4(),
        })
        .await
        .expect("create review")
}

/// Cache backend that fails every operation.
pub struct FailingCacheStore;

#[async_trait]
impl CacheStore for FailingCacheStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError::unavailable("connection refused"))
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::unavailable("connection refused"))
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::Timeout {
            op: "delete",
            elapsed: Duration::from_millis(250),
        })
    }

    async fn delete_by_pattern(&self, _pattern: &str) -> Result<u64, CacheError> {
        Err(CacheError::unavailable("connection refused"))
    }

    fn backend(&self) -> &'static str {
        "failing"
    }
}

/// Serves an undecodable entry for every key and cannot delete it.
pub struct CorruptCacheStore;

#[async_trait]
impl CacheStore for CorruptCacheStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Ok(Some("{truncated".to_string()))
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::unavailable("read-only replica"))
    }

    async fn delete_by_pattern(&self, _pattern: &str) -> Result<u64, CacheError> {
        Ok(0)
    }

    fn backend(&self) -> &'static str {
        "corrupt"
    }
}

/// A write another request commits between a read of `id` and whatever the
/// reader does next.
struct PendingWrite {
    collection: &'static str,
    id: Uuid,
    changes: Map<String, Value>,
}

/// Memory store with scripted interference: a concurrent write injected after
/// the next read of a document, and an outage of `summarize`.
#[derive(Default)]
pub struct ScriptedStore {
    inner: MemoryDocumentStore,
    after_read: Mutex<Option<PendingWrite>>,
    summarize_down: AtomicBool,
}

impl ScriptedStore {
    /// Commit `changes` to `collection/id` right after that document is next read.
    pub fn write_after_next_read(
        &self,
        collection: &'static str,
        id: Uuid,
        changes: Map<String, Value>,
    ) {
        *self.after_read.lock().expect("script lock") = Some(PendingWrite {
            collection,
            id,
            changes,
        });
    }

    pub fn set_summarize_down(&self, down: bool) {
        self.summarize_down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for ScriptedStore {
    async fn find_by_id(&self, collection: &str, id: Uuid) -> Result<Option<Value>, RepoError> {
        let found = self.inner.find_by_id(collection, id).await?;
        let pending = {
            let mut slot = self.after_read.lock().expect("script lock");
            match slot.as_ref() {
                Some(write) if write.collection == collection && write.id == id => slot.take(),
                _ => None,
            }
        };
        if let Some(write) = pending {
            self.inner
                .update_by_id(write.collection, write.id, write.changes)
                .await?;
        }
        Ok(found)
    }

    async fn find_many(&self, collection: &str, query: &StoreQuery) -> Result<Vec<Value>, RepoError> {
        self.inner.find_many(collection, query).await
    }

    async fn count(&self, collection: &str, filter: &[Predicate]) -> Result<u64, RepoError> {
        self.inner.count(collection, filter).await
    }

    async fn insert(&self, collection: &str, id: Uuid, doc: Value) -> Result<Value, RepoError> {
        self.inner.insert(collection, id, doc).await
    }

    async fn update_by_id(
        &self,
        collection: &str,
        id: Uuid,
        changes: Map<String, Value>,
    ) -> Result<Option<Value>, RepoError> {
        self.inner.update_by_id(collection, id, changes).await
    }

    async fn delete_by_id(&self, collection: &str, id: Uuid) -> Result<Option<Value>, RepoError> {
        self.inner.delete_by_id(collection, id).await
    }

    async fn summarize(
        &self,
        collection: &str,
        query: &GroupQuery,
    ) -> Result<Vec<GroupSummary>, RepoError> {
        if self.summarize_down.load(Ordering::SeqCst) {
            return Err(RepoError::Timeout);
        }
        self.inner.summarize(collection, query).await
    }

    async fn geo_near(&self, collection: &str, query: &GeoQuery) -> Result<Vec<GeoHit>, RepoError> {
        self.inner.geo_near(collection, query).await
    }

    async fn purge(&self, collection: &str) -> Result<u64, RepoError> {
        self.inner.purge(collection).await
    }
}

/// Context over a scripted store and a memory cache.
pub fn scripted_context() -> (AppContext, Arc<ScriptedStore>) {
    let store = Arc::new(ScriptedStore::default());
    let context = context_with(
        store.clone(),
        Arc::new(MemoryCacheStore::default()),
        CacheConfig::default(),
    );
    (context, store)
}
