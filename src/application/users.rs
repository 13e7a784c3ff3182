use serde_json::{Map, Value};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::query::RawQuery;
use crate::application::resources::{Listing, ResourceService};
use crate::domain::entities::{ProfileUpdate, User, UserDraft, UserPatch};
use crate::domain::types::ResourceKind;

#[derive(Clone)]
pub struct UserService {
    resources: ResourceService<User>,
}

impl UserService {
    pub fn new(resources: ResourceService<User>) -> Self {
        Self { resources }
    }

    pub fn resources(&self) -> &ResourceService<User> {
        &self.resources
    }

    pub async fn get(&self, id: Uuid) -> Result<User, AppError> {
        self.resources.get_one(id).await
    }

    pub async fn list(&self, raw: &RawQuery) -> Result<Listing<User>, AppError> {
        self.resources.get_all(raw, Vec::new()).await
    }

    pub async fn create(&self, draft: UserDraft) -> Result<User, AppError> {
        self.resources.create(draft).await
    }

    pub async fn update(&self, id: Uuid, patch: &UserPatch) -> Result<User, AppError> {
        self.resources.update(id, patch).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<User, AppError> {
        self.resources.delete(id).await
    }

    /// Self-service update; the payload type only admits profile fields.
    pub async fn update_me(&self, id: Uuid, update: ProfileUpdate) -> Result<User, AppError> {
        self.resources.update(id, &UserPatch::from(update)).await
    }

    /// Soft delete. The account disappears from every read.
    #[instrument(skip(self))]
    pub async fn deactivate(&self, id: Uuid) -> Result<(), AppError> {
        let repo = self.resources.repository();
        let visible = repo
            .find_by_id(id)
            .await
            .map_err(|err| AppError::from_repo("find_by_id", err))?
            .is_some();
        if !visible {
            return Err(AppError::not_found(ResourceKind::User));
        }

        let mut changes = Map::new();
        changes.insert("active".to_string(), Value::Bool(false));
        repo.set_fields(id, changes)
            .await
            .map_err(|err| AppError::from_repo("deactivate", err))?;
        self.resources.invalidate(Some(id)).await;
        info!(user_id = %id, "user deactivated");
        Ok(())
    }
}
