//! Rating aggregate maintenance.
//!
//! A tour's `ratingsQuantity`/`ratingsAverage` are derived from its reviews.
//! Every review write is followed by a full re-aggregation for the owning
//! tour, which is idempotent and converges under concurrent writers.

use metrics::counter;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::application::query::{FieldPath, Predicate};
use crate::application::repos::{GroupQuery, RepoError};
use crate::application::repository::Repository;
use crate::cache::ResourceCache;
use crate::domain::entities::{RatingAggregate, Review, Tour};

const METRIC_RECOMPUTE: &str = "wayfarer_rating_recompute_total";
const METRIC_RECOMPUTE_FAILURE: &str = "wayfarer_rating_recompute_failure_total";

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("failed to summarize reviews of tour {tour_id}")]
    Summarize {
        tour_id: Uuid,
        #[source]
        source: RepoError,
    },
    #[error("failed to persist rating aggregate on tour {tour_id}")]
    Persist {
        tour_id: Uuid,
        #[source]
        source: RepoError,
    },
    #[error("failed to enumerate tours for rating repair")]
    Enumerate(#[source] RepoError),
}

#[derive(Clone)]
pub struct RatingAggregator {
    reviews: Repository<Review>,
    tours: Repository<Tour>,
    tour_cache: ResourceCache,
}

impl RatingAggregator {
    pub fn new(reviews: Repository<Review>, tours: Repository<Tour>, tour_cache: ResourceCache) -> Self {
        Self {
            reviews,
            // Secret tours own reviews too.
            tours: tours.without_scope(),
            tour_cache,
        }
    }

    /// Re-aggregate every review of `tour_id`, persist the result on the tour
    /// and drop the tour's cached reads.
    #[instrument(skip(self))]
    pub async fn recompute(&self, tour_id: Uuid) -> Result<RatingAggregate, AggregateError> {
        let groups = self
            .reviews
            .summarize(GroupQuery {
                filter: vec![Predicate::eq("tour", tour_id.to_string())],
                group_by: None,
                fields: vec![FieldPath::from_static("rating")],
            })
            .await
            .map_err(|source| AggregateError::Summarize { tour_id, source })?;

        let aggregate = match groups.first() {
            Some(group) => {
                RatingAggregate::from_stats(tour_id, group.count, group.field("rating").avg)
            }
            None => RatingAggregate::empty(tour_id),
        };

        let mut changes = Map::new();
        changes.insert(
            "ratingsQuantity".to_string(),
            json!(aggregate.ratings_quantity),
        );
        changes.insert(
            "ratingsAverage".to_string(),
            Value::from(aggregate.ratings_average),
        );
        let persisted = self
            .tours
            .set_fields(tour_id, changes)
            .await
            .map_err(|source| AggregateError::Persist { tour_id, source })?;
        if persisted.is_none() {
            debug!(%tour_id, "tour no longer exists; aggregate not stored");
        }

        self.tour_cache.invalidate(Some(tour_id)).await;
        counter!(METRIC_RECOMPUTE).increment(1);
        debug!(
            %tour_id,
            ratings_quantity = aggregate.ratings_quantity,
            ratings_average = aggregate.ratings_average,
            "rating aggregate recomputed"
        );
        Ok(aggregate)
    }

    /// Recompute after a committed review write. A failure leaves the
    /// aggregate stale until the next successful run and is only logged.
    pub async fn refresh(&self, tour_id: Uuid) -> Option<RatingAggregate> {
        match self.recompute(tour_id).await {
            Ok(aggregate) => Some(aggregate),
            Err(err) => {
                counter!(METRIC_RECOMPUTE_FAILURE).increment(1);
                warn!(
                    consistency_warning = true,
                    %tour_id,
                    error = %err,
                    source = ?std::error::Error::source(&err).map(ToString::to_string),
                    "rating aggregate is stale after review write"
                );
                None
            }
        }
    }

    /// Recompute every tour, including secret ones. Returns how many tours
    /// were processed.
    pub async fn recompute_all(&self) -> Result<usize, AggregateError> {
        let tours = self
            .tours
            .find_all(Vec::new(), None)
            .await
            .map_err(AggregateError::Enumerate)?;
        for tour in &tours {
            self.recompute(tour.id).await?;
        }
        info!(tours = tours.len(), "rating aggregates repaired");
        Ok(tours.len())
    }
}
