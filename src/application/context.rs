//! Wiring of the resource services over one document store and one cache.

use std::sync::Arc;

use crate::application::error::ErrorResponder;
use crate::application::query::QueryPipeline;
use crate::application::ratings::RatingAggregator;
use crate::application::repos::DocumentStore;
use crate::application::repository::Repository;
use crate::application::resources::ResourceService;
use crate::application::{
    bookings::BookingService, reviews::ReviewService, tours::TourService, users::UserService,
};
use crate::cache::{CacheConfig, CacheService, CacheStore, ResourceCache};
use crate::config::Environment;
use crate::domain::entities::{Review, Tour};
use crate::domain::resource::Resource;
use crate::domain::types::ResourceKind;

/// Everything a controller needs. Cheap to clone; all services share the
/// injected store and cache.
#[derive(Clone)]
pub struct AppContext {
    pub tours: TourService,
    pub reviews: ReviewService,
    pub users: UserService,
    pub bookings: BookingService,
    pub ratings: RatingAggregator,
    pub cache: CacheService,
    pub cache_config: CacheConfig,
    pub responder: ErrorResponder,
    store: Arc<dyn DocumentStore>,
    pipeline: QueryPipeline,
}

impl AppContext {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache_store: Arc<dyn CacheStore>,
        cache_config: CacheConfig,
        pipeline: QueryPipeline,
        environment: Environment,
    ) -> Self {
        let cache = CacheService::new(cache_store, cache_config.enabled);
        let resource_cache = |kind| ResourceCache::new(&cache, &cache_config, kind);

        let tour_repo: Repository<Tour> = repository(&store, pipeline);
        let review_repo: Repository<Review> = repository(&store, pipeline);

        let ratings = RatingAggregator::new(
            review_repo.clone(),
            tour_repo.clone(),
            resource_cache(ResourceKind::Tour),
        );

        let tours = TourService::new(ResourceService::new(
            tour_repo.clone(),
            resource_cache(ResourceKind::Tour),
        ));
        let reviews = ReviewService::new(
            ResourceService::new(review_repo, resource_cache(ResourceKind::Review)),
            tour_repo.clone(),
            ratings.clone(),
        );
        let users = UserService::new(ResourceService::new(
            repository(&store, pipeline),
            resource_cache(ResourceKind::User),
        ));
        let bookings = BookingService::new(
            ResourceService::new(
                repository(&store, pipeline),
                resource_cache(ResourceKind::Booking),
            ),
            tour_repo,
        );

        Self {
            tours,
            reviews,
            users,
            bookings,
            ratings,
            cache,
            cache_config,
            responder: ErrorResponder::new(environment),
            store,
            pipeline,
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// A fresh repository for `T` sharing this context's store and limits.
    pub fn repository<T: Resource>(&self) -> Repository<T> {
        repository(&self.store, self.pipeline)
    }

    /// The cache view of one resource kind.
    pub fn resource_cache(&self, kind: ResourceKind) -> ResourceCache {
        ResourceCache::new(&self.cache, &self.cache_config, kind)
    }
}

fn repository<T: Resource>(store: &Arc<dyn DocumentStore>, pipeline: QueryPipeline) -> Repository<T> {
    Repository::new(store.clone()).with_pipeline(pipeline)
}
