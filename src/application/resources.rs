//! Generic cache-aside resource service.

use serde::Serialize;
use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::query::{Predicate, Projection, RawQuery};
use crate::application::repos::RepoError;
use crate::application::repository::{Populate, Repository};
use crate::cache::ResourceCache;
use crate::domain::resource::Resource;

/// One page of a list read plus the projection the caller asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub projection: Projection,
}

impl<T: Serialize> Listing<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Render items with the requested projection applied.
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.items
                .iter()
                .filter_map(|item| serde_json::to_value(item).ok())
                .map(|doc| self.projection.apply(doc))
                .collect(),
        )
    }
}

/// Reads consult the cache before the repository; writes go to the
/// repository and invalidate afterwards.
pub struct ResourceService<T> {
    repo: Repository<T>,
    cache: ResourceCache,
}

impl<T> Clone for ResourceService<T> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<T: Resource> ResourceService<T> {
    pub fn new(repo: Repository<T>, cache: ResourceCache) -> Self {
        Self { repo, cache }
    }

    pub fn repository(&self) -> &Repository<T> {
        &self.repo
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    #[instrument(skip(self), fields(resource = %T::KIND))]
    pub async fn get_one(&self, id: Uuid) -> Result<T, AppError> {
        let key = self.cache.keys().point(id);
        self.cache
            .read_through_optional(&key, self.cache.ttl().point(), || self.repo.find_by_id(id))
            .await
            .map_err(|err| AppError::from_repo("find_by_id", err))?
            .ok_or_else(|| AppError::not_found(T::KIND))
    }

    /// Point read with relations expanded. Cached as the rendered view.
    #[instrument(skip(self, populate), fields(resource = %T::KIND))]
    pub async fn get_one_populated(&self, id: Uuid, populate: &[Populate]) -> Result<Value, AppError> {
        let paths: Vec<&str> = populate.iter().map(|spec| spec.path).collect();
        let key = self.cache.keys().point_populated(id, &paths);
        self.cache
            .read_through_optional(&key, self.cache.ttl().point(), || async {
                let populated = self.repo.find_by_id_populated(id, populate).await?;
                Ok::<_, RepoError>(populated.map(|populated| populated.to_view()))
            })
            .await
            .map_err(|err| AppError::from_repo("find_by_id_populated", err))?
            .ok_or_else(|| AppError::not_found(T::KIND))
    }

    /// List read shaped by raw query parameters, optionally narrowed by a
    /// base filter. An empty result is not an error.
    #[instrument(skip(self, raw, base), fields(resource = %T::KIND))]
    pub async fn get_all(&self, raw: &RawQuery, base: Vec<Predicate>) -> Result<Listing<T>, AppError> {
        let descriptor = self.repo.pipeline().build(raw)?;
        let key = self
            .cache
            .keys()
            .list(&descriptor.cache_fragment_within(&base));
        let items = self
            .cache
            .read_through(&key, self.cache.ttl().list(), || {
                self.repo.find_all(base, Some(&descriptor))
            })
            .await
            .map_err(|err| AppError::from_repo("find_all", err))?;
        Ok(Listing {
            items,
            projection: descriptor.projection,
        })
    }

    #[instrument(skip(self, draft), fields(resource = %T::KIND))]
    pub async fn create(&self, draft: T::Draft) -> Result<T, AppError> {
        let record = self
            .repo
            .create(draft)
            .await
            .map_err(|err| AppError::from_repo("create", err))?;
        self.invalidate(Some(record.id())).await;
        Ok(record)
    }

    #[instrument(skip(self, patch), fields(resource = %T::KIND))]
    pub async fn update(&self, id: Uuid, patch: &T::Patch) -> Result<T, AppError> {
        let record = self
            .repo
            .update(id, patch)
            .await
            .map_err(|err| AppError::from_repo("update", err))?
            .ok_or_else(|| AppError::not_found(T::KIND))?;
        self.invalidate(Some(id)).await;
        Ok(record)
    }

    /// Delete and return the removed record.
    #[instrument(skip(self), fields(resource = %T::KIND))]
    pub async fn delete(&self, id: Uuid) -> Result<T, AppError> {
        let removed = self
            .repo
            .delete(id)
            .await
            .map_err(|err| AppError::from_repo("delete", err))?
            .ok_or_else(|| AppError::not_found(T::KIND))?;
        self.invalidate(Some(id)).await;
        Ok(removed)
    }

    pub async fn invalidate(&self, id: Option<Uuid>) {
        self.cache.invalidate(id).await;
    }
}
