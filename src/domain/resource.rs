//! The contract every persisted resource type implements.

use std::fmt::Debug;

use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

use super::error::DomainError;
use super::types::ResourceKind;

/// A persisted entity exposed through the generic CRUD surface.
///
/// Records serialize to the exact document shape held by the store, so the
/// same serde representation is used for persistence and for cache entries.
pub trait Resource: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    const KIND: ResourceKind;

    /// Payload accepted on create.
    type Draft: Send + Sync;

    /// Partial update payload. Absent fields must be skipped when serialized.
    type Patch: Serialize + Send + Sync;

    fn id(&self) -> Uuid;

    /// Build a new record from a draft, applying defaults and derived fields.
    fn from_draft(id: Uuid, draft: Self::Draft) -> Result<Self, DomainError>;

    /// Check every field-level and cross-field invariant.
    fn validate(&self) -> Result<(), DomainError>;

    /// Recompute derived fields after a patch has been merged.
    fn normalize(&mut self) {}
}
