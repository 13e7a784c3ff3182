//! In-process document store used by tests and the `memory` backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::application::query::{Predicate, StoreQuery, compare_documents};
use crate::application::repos::{
    DocumentStore, GeoHit, GeoQuery, GroupQuery, GroupSummary, RepoError, UNIQUE_CONSTRAINTS,
};
use crate::domain::geo::angular_distance;

type Collection = BTreeMap<Uuid, Value>;

/// Collections keyed by name. Each collection sits behind one shard lock, so
/// unique checks and the write they guard happen atomically.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: DashMap<String, Collection>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self, collection: &str, filter: &[Predicate]) -> Vec<Value> {
        self.collections
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| filter.iter().all(|p| p.matches(doc)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn unique_key(doc: &Value, fields: &[&str], case_insensitive: bool) -> Option<Vec<String>> {
    fields
        .iter()
        .map(|field| match doc.get(*field) {
            Some(Value::String(s)) if case_insensitive => Some(s.to_lowercase()),
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        })
        .collect()
}

fn check_unique(
    collection: &str,
    docs: &Collection,
    id: Uuid,
    candidate: &Value,
) -> Result<(), RepoError> {
    for constraint in UNIQUE_CONSTRAINTS
        .iter()
        .filter(|c| c.collection == collection)
    {
        let Some(key) = unique_key(candidate, constraint.fields, constraint.case_insensitive)
        else {
            continue;
        };
        let clash = docs.iter().any(|(other_id, other)| {
            *other_id != id
                && unique_key(other, constraint.fields, constraint.case_insensitive).as_ref()
                    == Some(&key)
        });
        if clash {
            return Err(RepoError::Duplicate {
                constraint: constraint.name.to_string(),
            });
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn find_by_id(&self, collection: &str, id: Uuid) -> Result<Option<Value>, RepoError> {
        Ok(self
            .collections
            .get(collection)
            .and_then(|docs| docs.get(&id).cloned()))
    }

    async fn find_many(
        &self,
        collection: &str,
        query: &StoreQuery,
    ) -> Result<Vec<Value>, RepoError> {
        let mut docs = self.snapshot(collection, &query.filter);
        if !query.sort.is_empty() {
            docs.sort_by(|a, b| compare_documents(a, b, &query.sort));
        }
        let skip = usize::try_from(query.skip).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .map(|limit| usize::try_from(limit).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        Ok(docs.into_iter().skip(skip).take(limit).collect())
    }

    async fn count(&self, collection: &str, filter: &[Predicate]) -> Result<u64, RepoError> {
        Ok(self.snapshot(collection, filter).len() as u64)
    }

    async fn insert(&self, collection: &str, id: Uuid, doc: Value) -> Result<Value, RepoError> {
        let Value::Object(mut map) = doc else {
            return Err(RepoError::InvalidInput {
                message: "documents must be JSON objects".to_string(),
            });
        };
        map.insert("id".to_string(), Value::String(id.to_string()));
        let doc = Value::Object(map);

        let mut docs = self.collections.entry(collection.to_string()).or_default();
        if docs.contains_key(&id) {
            return Err(RepoError::Duplicate {
                constraint: "documents_pkey".to_string(),
            });
        }
        check_unique(collection, &docs, id, &doc)?;
        docs.insert(id, doc.clone());
        Ok(doc)
    }

    async fn update_by_id(
        &self,
        collection: &str,
        id: Uuid,
        changes: Map<String, Value>,
    ) -> Result<Option<Value>, RepoError> {
        let Some(mut docs) = self.collections.get_mut(collection) else {
            return Ok(None);
        };
        let Some(current) = docs.get(&id) else {
            return Ok(None);
        };

        let mut merged = current.clone();
        if let Value::Object(map) = &mut merged {
            map.extend(changes);
            map.insert("id".to_string(), Value::String(id.to_string()));
        }
        check_unique(collection, &docs, id, &merged)?;
        docs.insert(id, merged.clone());
        Ok(Some(merged))
    }

    async fn delete_by_id(&self, collection: &str, id: Uuid) -> Result<Option<Value>, RepoError> {
        Ok(self
            .collections
            .get_mut(collection)
            .and_then(|mut docs| docs.remove(&id)))
    }

    async fn summarize(
        &self,
        collection: &str,
        query: &GroupQuery,
    ) -> Result<Vec<GroupSummary>, RepoError> {
        let docs = self.snapshot(collection, &query.filter);
        let mut groups: BTreeMap<String, GroupSummary> = BTreeMap::new();
        for doc in &docs {
            let key = query
                .group_by
                .as_ref()
                .map(|field| field.lookup(doc).cloned().unwrap_or(Value::Null));
            let slot = key.as_ref().map(Value::to_string).unwrap_or_default();
            let group = groups.entry(slot).or_insert_with(|| GroupSummary {
                key: key.clone(),
                ..Default::default()
            });
            group.count += 1;
            for field in &query.fields {
                let summary = group.fields.entry(field.to_string()).or_default();
                if let Some(value) = field.lookup(doc).and_then(Value::as_f64) {
                    summary.push(value);
                }
            }
        }
        Ok(groups.into_values().collect())
    }

    async fn geo_near(&self, collection: &str, query: &GeoQuery) -> Result<Vec<GeoHit>, RepoError> {
        let mut hits: Vec<GeoHit> = self
            .snapshot(collection, &query.filter)
            .into_iter()
            .filter_map(|doc| {
                let coordinates = query.field.lookup(&doc)?.get("coordinates")?;
                let lng = coordinates.get(0)?.as_f64()?;
                let lat = coordinates.get(1)?.as_f64()?;
                let angle = angular_distance(query.center, [lng, lat]);
                Some(GeoHit { doc, angle })
            })
            .filter(|hit| query.max_angle.is_none_or(|max| hit.angle <= max))
            .collect();
        hits.sort_by(|a, b| a.angle.total_cmp(&b.angle));
        Ok(hits)
    }

    async fn purge(&self, collection: &str) -> Result<u64, RepoError> {
        Ok(self
            .collections
            .remove(collection)
            .map(|(_, docs)| docs.len() as u64)
            .unwrap_or(0))
    }
}
