//! Document store port describing persistence adapters.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::application::query::{FieldPath, Predicate, StoreQuery};
use crate::domain::error::DomainError;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }
}

impl From<DomainError> for RepoError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound { .. } => RepoError::NotFound,
            other => RepoError::InvalidInput {
                message: other.to_string(),
            },
        }
    }
}

/// Unique indexes every adapter must enforce.
#[derive(Debug, Clone, Copy)]
pub struct UniqueConstraint {
    pub name: &'static str,
    pub collection: &'static str,
    pub fields: &'static [&'static str],
    pub case_insensitive: bool,
}

pub const UNIQUE_CONSTRAINTS: &[UniqueConstraint] = &[
    UniqueConstraint {
        name: "documents_tours_name_key",
        collection: "tours",
        fields: &["name"],
        case_insensitive: false,
    },
    UniqueConstraint {
        name: "documents_users_email_key",
        collection: "users",
        fields: &["email"],
        case_insensitive: true,
    },
    UniqueConstraint {
        name: "documents_reviews_tour_user_key",
        collection: "reviews",
        fields: &["tour", "user"],
        case_insensitive: false,
    },
];

/// Grouped numeric summary request (`$group` style).
#[derive(Debug, Clone, Default)]
pub struct GroupQuery {
    pub filter: Vec<Predicate>,
    pub group_by: Option<FieldPath>,
    pub fields: Vec<FieldPath>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct FieldSummary {
    /// Number of numeric values that contributed.
    pub count: u64,
    pub sum: f64,
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl FieldSummary {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = Some(self.min.map_or(value, |min| min.min(value)));
        self.max = Some(self.max.map_or(value, |max| max.max(value)));
        self.avg = Some(self.sum / self.count as f64);
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct GroupSummary {
    /// Group key; `None` when the query was not grouped.
    pub key: Option<Value>,
    pub count: u64,
    pub fields: BTreeMap<String, FieldSummary>,
}

impl GroupSummary {
    pub fn field(&self, name: &str) -> FieldSummary {
        self.fields.get(name).copied().unwrap_or_default()
    }
}

/// Proximity search on a point field, expressed as a central angle.
#[derive(Debug, Clone)]
pub struct GeoQuery {
    pub field: FieldPath,
    pub center: [f64; 2],
    /// Upper bound in radians; `None` returns every document sorted by distance.
    pub max_angle: Option<f64>,
    pub filter: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeoHit {
    pub doc: Value,
    /// Central angle from the query centre in radians.
    pub angle: f64,
}

/// Schemaless document persistence. Documents are JSON objects carrying the
/// record's own `id`; adapters own no business rules beyond unique indexes.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_by_id(&self, collection: &str, id: Uuid) -> Result<Option<Value>, RepoError>;

    async fn find_many(&self, collection: &str, query: &StoreQuery)
    -> Result<Vec<Value>, RepoError>;

    async fn count(&self, collection: &str, filter: &[Predicate]) -> Result<u64, RepoError>;

    async fn insert(&self, collection: &str, id: Uuid, doc: Value) -> Result<Value, RepoError>;

    /// Shallow-merge `changes` into the stored document; returns the post-image.
    async fn update_by_id(
        &self,
        collection: &str,
        id: Uuid,
        changes: Map<String, Value>,
    ) -> Result<Option<Value>, RepoError>;

    /// Remove a document; returns the pre-image.
    async fn delete_by_id(&self, collection: &str, id: Uuid) -> Result<Option<Value>, RepoError>;

    async fn summarize(
        &self,
        collection: &str,
        query: &GroupQuery,
    ) -> Result<Vec<GroupSummary>, RepoError>;

    async fn geo_near(&self, collection: &str, query: &GeoQuery) -> Result<Vec<GeoHit>, RepoError>;

    /// Remove every document in a collection; returns how many were dropped.
    async fn purge(&self, collection: &str) -> Result<u64, RepoError>;
}
