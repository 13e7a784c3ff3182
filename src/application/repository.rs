//! Generic, typed repository over the document store.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::instrument;
use uuid::Uuid;

use crate::application::query::{
    CompareOp, FieldPath, Predicate, Projection, QueryDescriptor, QueryPipeline, StoreQuery,
};
use crate::application::repos::{DocumentStore, GeoQuery, GroupQuery, GroupSummary, RepoError};
use crate::domain::resource::Resource;
use crate::domain::types::ResourceKind;

/// Visibility rules every read of a resource kind honours.
pub fn default_scope(kind: ResourceKind) -> Vec<Predicate> {
    match kind {
        ResourceKind::Tour => vec![Predicate::ne("secretTour", true)],
        ResourceKind::User => vec![Predicate::ne("active", false)],
        ResourceKind::Review | ResourceKind::Booking => Vec::new(),
    }
}

/// How a related resource is reached from a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Link {
    /// The record holds the related id (or ids) in this field.
    Local(&'static str),
    /// Related records point back at the record's id through this field.
    Foreign(&'static str),
}

/// Relation expansion applied to a point read.
#[derive(Debug, Clone, PartialEq)]
pub struct Populate {
    pub path: &'static str,
    pub kind: ResourceKind,
    pub link: Link,
    pub select: Projection,
}

impl Populate {
    pub fn local(path: &'static str, kind: ResourceKind, select: &[&'static str]) -> Self {
        Self {
            path,
            kind,
            link: Link::Local(path),
            select: select_fields(select),
        }
    }

    pub fn foreign(
        path: &'static str,
        kind: ResourceKind,
        foreign_field: &'static str,
        select: &[&'static str],
    ) -> Self {
        Self {
            path,
            kind,
            link: Link::Foreign(foreign_field),
            select: select_fields(select),
        }
    }
}

fn select_fields(fields: &[&'static str]) -> Projection {
    if fields.is_empty() {
        Projection::All
    } else {
        Projection::Include(fields.iter().map(|f| FieldPath::from_static(f)).collect())
    }
}

/// A record together with its expanded relations.
#[derive(Debug, Clone, PartialEq)]
pub struct Populated<T> {
    pub record: T,
    pub relations: BTreeMap<String, Value>,
}

impl<T: Resource> Populated<T> {
    /// Render the record with relation fields replaced by their expansions.
    pub fn to_view(&self) -> Value {
        let mut view = serde_json::to_value(&self.record).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut view {
            for (path, related) in &self.relations {
                map.insert(path.clone(), related.clone());
            }
        }
        view
    }
}

/// Typed CRUD over one collection. Reads apply the kind's visibility scope.
pub struct Repository<T> {
    store: Arc<dyn DocumentStore>,
    scope: Vec<Predicate>,
    pipeline: QueryPipeline,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            scope: self.scope.clone(),
            pipeline: self.pipeline,
            _marker: PhantomData,
        }
    }
}

impl<T: Resource> Repository<T> {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            scope: default_scope(T::KIND),
            pipeline: QueryPipeline::default(),
            _marker: PhantomData,
        }
    }

    /// Drop the visibility scope; for maintenance paths that must see every
    /// record (rating repair, imports).
    pub fn without_scope(mut self) -> Self {
        self.scope.clear();
        self
    }

    pub fn with_pipeline(mut self, pipeline: QueryPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn pipeline(&self) -> &QueryPipeline {
        &self.pipeline
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    fn collection(&self) -> &'static str {
        T::KIND.collection()
    }

    fn visible(&self, doc: &Value) -> bool {
        self.scope.iter().all(|predicate| predicate.matches(doc))
    }

    fn scoped(&self, filter: Vec<Predicate>) -> Vec<Predicate> {
        let mut scoped = self.scope.clone();
        scoped.extend(filter);
        scoped
    }

    #[instrument(skip(self), fields(resource = %T::KIND))]
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<T>, RepoError> {
        match self.store.find_by_id(self.collection(), id).await? {
            Some(doc) if self.visible(&doc) => decode(doc).map(Some),
            _ => Ok(None),
        }
    }

    #[instrument(skip(self, populate), fields(resource = %T::KIND))]
    pub async fn find_by_id_populated(
        &self,
        id: Uuid,
        populate: &[Populate],
    ) -> Result<Option<Populated<T>>, RepoError> {
        let Some(doc) = self.store.find_by_id(self.collection(), id).await? else {
            return Ok(None);
        };
        if !self.visible(&doc) {
            return Ok(None);
        }

        let mut relations = BTreeMap::new();
        for spec in populate {
            let related = self.resolve(&doc, id, spec).await?;
            relations.insert(spec.path.to_string(), related);
        }

        Ok(Some(Populated {
            record: decode(doc)?,
            relations,
        }))
    }

    async fn resolve(&self, doc: &Value, id: Uuid, spec: &Populate) -> Result<Value, RepoError> {
        let scope = default_scope(spec.kind);
        let collection = spec.kind.collection();
        match &spec.link {
            Link::Foreign(field) => {
                let mut filter = scope;
                filter.push(Predicate::new(
                    FieldPath::from_static(field),
                    CompareOp::Eq,
                    id.to_string(),
                ));
                let docs = self
                    .store
                    .find_many(collection, &StoreQuery::filtered(filter))
                    .await?;
                Ok(Value::Array(
                    docs.into_iter().map(|d| spec.select.apply(d)).collect(),
                ))
            }
            Link::Local(field) => {
                let lookup = |raw: &Value| raw.as_str().and_then(|s| Uuid::parse_str(s).ok());
                match doc.get(*field) {
                    Some(Value::Array(ids)) => {
                        let mut out = Vec::with_capacity(ids.len());
                        for related_id in ids.iter().filter_map(lookup) {
                            if let Some(found) =
                                self.fetch_related(collection, related_id, &scope).await?
                            {
                                out.push(spec.select.apply(found));
                            }
                        }
                        Ok(Value::Array(out))
                    }
                    Some(raw) => match lookup(raw) {
                        Some(related_id) => Ok(self
                            .fetch_related(collection, related_id, &scope)
                            .await?
                            .map(|found| spec.select.apply(found))
                            .unwrap_or(Value::Null)),
                        None => Ok(Value::Null),
                    },
                    None => Ok(Value::Null),
                }
            }
        }
    }

    async fn fetch_related(
        &self,
        collection: &str,
        id: Uuid,
        scope: &[Predicate],
    ) -> Result<Option<Value>, RepoError> {
        Ok(self
            .store
            .find_by_id(collection, id)
            .await?
            .filter(|doc| scope.iter().all(|p| p.matches(doc))))
    }

    /// Every visible record matching `filter`, shaped by the descriptor when
    /// one is supplied.
    #[instrument(skip(self, filter, descriptor), fields(resource = %T::KIND))]
    pub async fn find_all(
        &self,
        filter: Vec<Predicate>,
        descriptor: Option<&QueryDescriptor>,
    ) -> Result<Vec<T>, RepoError> {
        let base = StoreQuery::filtered(self.scoped(filter));
        let query = match descriptor {
            Some(descriptor) => self.pipeline.apply(base, descriptor),
            None => base,
        };
        self.find_query(&query).await
    }

    pub async fn find_query(&self, query: &StoreQuery) -> Result<Vec<T>, RepoError> {
        let mut query = query.clone();
        query.filter = self.scoped(query.filter);
        self.store
            .find_many(self.collection(), &query)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    pub async fn count(&self, filter: Vec<Predicate>) -> Result<u64, RepoError> {
        self.store
            .count(self.collection(), &self.scoped(filter))
            .await
    }

    #[instrument(skip(self, draft), fields(resource = %T::KIND))]
    pub async fn create(&self, draft: T::Draft) -> Result<T, RepoError> {
        let record = T::from_draft(Uuid::new_v4(), draft)?;
        self.insert_record(record).await
    }

    /// Persist an already-built record, keeping its id.
    pub async fn insert_record(&self, record: T) -> Result<T, RepoError> {
        record.validate()?;
        let doc = encode(&record)?;
        let stored = self.store.insert(self.collection(), record.id(), doc).await?;
        decode(stored)
    }

    /// Merge a patch over the visible record, re-validate, then persist only
    /// the fields that changed. Fields the patch did not touch (the rating
    /// aggregate in particular) are never written back from the read.
    #[instrument(skip(self, patch), fields(resource = %T::KIND))]
    pub async fn update(&self, id: Uuid, patch: &T::Patch) -> Result<Option<T>, RepoError> {
        let Some(current) = self.find_by_id(id).await? else {
            return Ok(None);
        };

        let before = encode(&current)?;
        let mut merged = before.clone();
        let changes = match serde_json::to_value(patch) {
            Ok(Value::Object(changes)) => changes,
            Ok(_) => {
                return Err(RepoError::InvalidInput {
                    message: "update payload must be an object".to_string(),
                });
            }
            Err(err) => {
                return Err(RepoError::InvalidInput {
                    message: err.to_string(),
                });
            }
        };
        if let Value::Object(map) = &mut merged {
            map.extend(changes);
        }

        let mut record: T =
            serde_json::from_value(merged).map_err(|err| RepoError::InvalidInput {
                message: err.to_string(),
            })?;
        record.normalize();
        record.validate()?;

        let Value::Object(full) = encode(&record)? else {
            return Err(RepoError::integrity("record did not serialize to an object"));
        };
        let changed = changed_fields(&before, full);
        self.store
            .update_by_id(self.collection(), id, changed)
            .await?
            .map(decode)
            .transpose()
    }

    /// Unscoped field write for derived values the controller surface cannot
    /// reach (rating aggregate, deactivation).
    pub(crate) async fn set_fields(
        &self,
        id: Uuid,
        changes: Map<String, Value>,
    ) -> Result<Option<T>, RepoError> {
        self.store
            .update_by_id(self.collection(), id, changes)
            .await?
            .map(decode)
            .transpose()
    }

    /// Remove a visible record; returns the pre-image.
    #[instrument(skip(self), fields(resource = %T::KIND))]
    pub async fn delete(&self, id: Uuid) -> Result<Option<T>, RepoError> {
        if !self.scope.is_empty() && self.find_by_id(id).await?.is_none() {
            return Ok(None);
        }
        self.store
            .delete_by_id(self.collection(), id)
            .await?
            .map(decode)
            .transpose()
    }

    pub async fn summarize(&self, mut query: GroupQuery) -> Result<Vec<GroupSummary>, RepoError> {
        query.filter = self.scoped(query.filter);
        self.store.summarize(self.collection(), &query).await
    }

    /// Visible records near a point with their central angle, nearest first.
    pub async fn geo_near(&self, mut query: GeoQuery) -> Result<Vec<(T, f64)>, RepoError> {
        query.filter = self.scoped(query.filter);
        self.store
            .geo_near(self.collection(), &query)
            .await?
            .into_iter()
            .map(|hit| decode(hit.doc).map(|record| (record, hit.angle)))
            .collect()
    }

    pub async fn purge(&self) -> Result<u64, RepoError> {
        self.store.purge(self.collection()).await
    }
}

/// Entries of `after` that differ from `before`, including derived fields
/// such as a regenerated slug.
fn changed_fields(before: &Value, after: Map<String, Value>) -> Map<String, Value> {
    after
        .into_iter()
        .filter(|(key, value)| before.get(key) != Some(value))
        .collect()
}

fn encode<T: Resource>(record: &T) -> Result<Value, RepoError> {
    serde_json::to_value(record).map_err(|err| RepoError::integrity(err.to_string()))
}

fn decode<T: Resource>(doc: Value) -> Result<T, RepoError> {
    serde_json::from_value(doc).map_err(|err| {
        RepoError::integrity(format!("stored {} does not decode: {err}", T::KIND))
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::query::RawQuery;
    use crate::domain::entities::{Review, ReviewDraft, ReviewPatch, User, UserDraft};
    use crate::domain::types::Role;
    use crate::infra::memory::MemoryDocumentStore;

    fn store() -> Arc<dyn DocumentStore> {
        Arc::new(MemoryDocumentStore::new())
    }

    fn user_draft(name: &str, email: &str) -> UserDraft {
        UserDraft {
            name: name.to_string(),
            email: email.to_string(),
            role: Role::User,
            photo: Some("user.jpg".to_string()),
        }
    }

    #[tokio::test]
    async fn create_find_update_delete() {
        let repo = Repository::<Review>::new(store());
        let created = repo
            .create(ReviewDraft {
                review: "Lovely walk".to_string(),
                rating: 4.0,
                tour: Uuid::new_v4(),
                user: Uuid::new_v4(),
            })
            .await
            .expect("create");

        let found = repo.find_by_id(created.id).await.expect("find");
        assert_eq!(found.as_ref(), Some(&created));

        let updated = repo
            .update(
                created.id,
                &ReviewPatch {
                    rating: Some(2.0),
                    ..Default::default()
                },
            )
            .await
            .expect("update")
            .expect("present");
        assert_eq!(updated.rating, 2.0);
        assert_eq!(updated.review, "Lovely walk");

        let removed = repo.delete(created.id).await.expect("delete");
        assert_eq!(removed.map(|r| r.rating), Some(2.0));
        assert!(repo.find_by_id(created.id).await.expect("find").is_none());
        assert!(repo.delete(created.id).await.expect("delete").is_none());
    }

    #[tokio::test]
    async fn update_rejects_invalid_merge() {
        let repo = Repository::<Review>::new(store());
        let created = repo
            .create(ReviewDraft {
                review: "Lovely walk".to_string(),
                rating: 4.0,
                tour: Uuid::new_v4(),
                user: Uuid::new_v4(),
            })
            .await
            .expect("create");
        let err = repo
            .update(
                created.id,
                &ReviewPatch {
                    rating: Some(9.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::InvalidInput { .. }));
        let unchanged = repo.find_by_id(created.id).await.expect("find").expect("present");
        assert_eq!(unchanged.rating, 4.0);
    }

    #[tokio::test]
    async fn inactive_users_are_hidden_from_reads() {
        let repo = Repository::<User>::new(store());
        let user = repo
            .create(user_draft("Hidden", "hidden@example.com"))
            .await
            .expect("create");
        let mut changes = Map::new();
        changes.insert("active".to_string(), json!(false));
        repo.set_fields(user.id, changes).await.expect("deactivate");

        assert!(repo.find_by_id(user.id).await.expect("find").is_none());
        assert!(repo.find_all(Vec::new(), None).await.expect("all").is_empty());
        assert!(repo.update(user.id, &Default::default()).await.expect("update").is_none());
    }

    #[tokio::test]
    async fn find_all_applies_descriptor() {
        let repo = Repository::<User>::new(store());
        for (name, email) in [("Ann", "ann@example.com"), ("Bob", "bob@example.com")] {
            repo.create(user_draft(name, email)).await.expect("create");
        }
        let raw: RawQuery = [("sort", "name"), ("limit", "1"), ("page", "2")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let descriptor = repo.pipeline().build(&raw).expect("descriptor");
        let page = repo.find_all(Vec::new(), Some(&descriptor)).await.expect("page");
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "Bob");
    }

    #[tokio::test]
    async fn populate_resolves_local_and_foreign_links() {
        let store = store();
        let users = Repository::<User>::new(store.clone());
        let reviews = Repository::<Review>::new(store.clone());
        let author = users
            .create(user_draft("Author", "author@example.com"))
            .await
            .expect("user");
        let review = reviews
            .create(ReviewDraft {
                review: "Would go again".to_string(),
                rating: 5.0,
                tour: Uuid::new_v4(),
                user: author.id,
            })
            .await
            .expect("review");

        let populated = reviews
            .find_by_id_populated(
                review.id,
                &[Populate::local("user", ResourceKind::User, &["name", "photo"])],
            )
            .await
            .expect("populate")
            .expect("present");
        let view = populated.to_view();
        assert_eq!(view["user"]["name"], json!("Author"));
        assert!(view["user"].get("email").is_none());

        let by_tour = Repository::<Review>::new(store.clone())
            .find_all(vec![Predicate::eq("tour", review.tour.to_string())], None)
            .await
            .expect("by tour");
        assert_eq!(by_tour.len(), 1);
    }
}
