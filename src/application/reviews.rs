//! Review writes with explicit rating re-aggregation.

use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::query::{Predicate, RawQuery};
use crate::application::ratings::RatingAggregator;
use crate::application::repository::{Populate, Repository};
use crate::application::resources::{Listing, ResourceService};
use crate::domain::entities::{Review, ReviewDraft, ReviewPatch, Tour};
use crate::domain::types::ResourceKind;

/// Every successful write runs the aggregator for the owning tour, then
/// drops the review caches. Order matters: store write, aggregate, cache.
#[derive(Clone)]
pub struct ReviewService {
    resources: ResourceService<Review>,
    tours: Repository<Tour>,
    ratings: RatingAggregator,
}

impl ReviewService {
    pub fn new(
        resources: ResourceService<Review>,
        tours: Repository<Tour>,
        ratings: RatingAggregator,
    ) -> Self {
        Self {
            resources,
            // Existence check only; secret tours still accept reviews.
            tours: tours.without_scope(),
            ratings,
        }
    }

    pub fn resources(&self) -> &ResourceService<Review> {
        &self.resources
    }

    pub async fn get(&self, id: Uuid) -> Result<Review, AppError> {
        self.resources.get_one(id).await
    }

    pub async fn list(&self, raw: &RawQuery) -> Result<Listing<Review>, AppError> {
        self.resources.get_all(raw, Vec::new()).await
    }

    pub async fn reviews_for_tour(
        &self,
        tour_id: Uuid,
        raw: &RawQuery,
    ) -> Result<Listing<Review>, AppError> {
        self.resources
            .get_all(raw, vec![Predicate::eq("tour", tour_id.to_string())])
            .await
    }

    /// A review with its author's public profile expanded.
    pub async fn review_detail(&self, id: Uuid) -> Result<Value, AppError> {
        let populate = [Populate::local("user", ResourceKind::User, &["name", "photo"])];
        self.resources.get_one_populated(id, &populate).await
    }

    #[instrument(skip(self, draft), fields(tour_id = %draft.tour))]
    pub async fn create(&self, draft: ReviewDraft) -> Result<Review, AppError> {
        let tour_id = draft.tour;
        let tour_exists = self
            .tours
            .find_by_id(tour_id)
            .await
            .map_err(|err| AppError::from_repo("find_tour", err))?
            .is_some();
        if !tour_exists {
            return Err(AppError::not_found(ResourceKind::Tour));
        }

        let review = self
            .resources
            .repository()
            .create(draft)
            .await
            .map_err(|err| AppError::from_repo("create", err))?;
        self.ratings.refresh(review.tour).await;
        self.resources.invalidate(Some(review.id)).await;
        Ok(review)
    }

    #[instrument(skip(self, patch))]
    pub async fn update(&self, id: Uuid, patch: &ReviewPatch) -> Result<Review, AppError> {
        let review = self
            .resources
            .repository()
            .update(id, patch)
            .await
            .map_err(|err| AppError::from_repo("update", err))?
            .ok_or_else(|| AppError::not_found(ResourceKind::Review))?;
        self.ratings.refresh(review.tour).await;
        self.resources.invalidate(Some(id)).await;
        Ok(review)
    }

    /// The pre-image names the tour to re-aggregate, since the record is gone
    /// once the delete commits.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<Review, AppError> {
        let removed = self
            .resources
            .repository()
            .delete(id)
            .await
            .map_err(|err| AppError::from_repo("delete", err))?
            .ok_or_else(|| AppError::not_found(ResourceKind::Review))?;
        self.ratings.refresh(removed.tour).await;
        self.resources.invalidate(Some(id)).await;
        Ok(removed)
    }
}
