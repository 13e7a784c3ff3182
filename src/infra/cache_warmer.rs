use std::time::Duration;

use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::application::{error::AppError, query::RawQuery, tours::TourService};

/// Number of best-rated tours whose list and point reads are pre-populated.
pub const WARM_TOUR_COUNT: usize = 10;

#[derive(Debug, Error)]
pub enum CacheWarmError {
    #[error("failed to warm tour statistics")]
    Stats(#[source] AppError),
    #[error("failed to warm best-rated tours")]
    TopTours(#[source] AppError),
}

/// Summary of one warm pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmReport {
    pub stats_groups: usize,
    pub tours: usize,
}

pub struct CacheWarmer {
    tours: TourService,
}

impl CacheWarmer {
    pub fn new(tours: TourService) -> Self {
        Self { tours }
    }

    /// Pre-populate the tour statistics, the best-rated listing and the
    /// point reads of the tours on it. A tour that vanished meanwhile is
    /// skipped.
    pub async fn warm_once(&self) -> Result<WarmReport, CacheWarmError> {
        info!(target = "wayfarer::cache_warmer", "warming tour cache");

        let stats = self.tours.tour_stats().await.map_err(CacheWarmError::Stats)?;
        let listing = self
            .tours
            .list(&best_rated_query())
            .await
            .map_err(CacheWarmError::TopTours)?;

        let mut warmed = 0;
        for tour in &listing.items {
            match self.tours.get(tour.id).await {
                Ok(_) => warmed += 1,
                Err(err) => warn!(
                    target = "wayfarer::cache_warmer",
                    tour_id = %tour.id,
                    error = %err,
                    "skipping tour cache warm"
                ),
            }
        }

        let report = WarmReport {
            stats_groups: stats.len(),
            tours: warmed,
        };
        info!(
            target = "wayfarer::cache_warmer",
            stats_groups = report.stats_groups,
            tours = report.tours,
            "cache warmed"
        );
        Ok(report)
    }

    /// Warm shortly after start, then every `period`. Failures are logged
    /// and the loop keeps going.
    pub async fn run(self, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(err) = self.warm_once().await {
                warn!(
                    target = "wayfarer::cache_warmer",
                    error = %err,
                    source = ?std::error::Error::source(&err).map(ToString::to_string),
                    "cache warm pass failed"
                );
            }
        }
    }
}

fn best_rated_query() -> RawQuery {
    RawQuery::from([
        ("sort".to_string(), "-ratingsAverage".to_string()),
        ("limit".to_string(), WARM_TOUR_COUNT.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::application::context::AppContext;
    use crate::application::query::QueryPipeline;
    use crate::cache::{CacheConfig, MemoryCacheStore};
    use crate::config::Environment;
    use crate::domain::entities::TourDraft;
    use crate::domain::types::Difficulty;
    use crate::infra::memory::MemoryDocumentStore;

    #[tokio::test]
    async fn warm_once_populates_stats_and_point_reads() {
        let cache_store = Arc::new(MemoryCacheStore::default());
        let context = AppContext::new(
            Arc::new(MemoryDocumentStore::new()),
            cache_store.clone(),
            CacheConfig::default(),
            QueryPipeline::default(),
            Environment::Development,
        );
        for name in ["The Forest Hiker", "The Sea Explorer"] {
            context
                .tours
                .create(TourDraft {
                    name: name.to_string(),
                    duration: 5,
                    max_group_size: 25,
                    difficulty: Difficulty::Easy,
                    price: 397.0,
                    price_discount: None,
                    summary: "Warm me up".to_string(),
                    description: None,
                    image_cover: "cover.jpg".to_string(),
                    images: Vec::new(),
                    start_dates: Vec::new(),
                    secret_tour: false,
                    start_location: None,
                    locations: Vec::new(),
                    guides: Vec::new(),
                })
                .await
                .expect("create");
        }
        assert!(cache_store.is_empty());

        let report = CacheWarmer::new(context.tours.clone())
            .warm_once()
            .await
            .expect("warm");
        assert_eq!(report, WarmReport { stats_groups: 1, tours: 2 });
        // stats, listing, two point reads
        assert_eq!(cache_store.len(), 4);
    }
}
