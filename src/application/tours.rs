//! Tour reads and writes, plus the tour statistics and proximity reads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::UtcOffset;
use tracing::instrument;
use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::query::{self, FieldPath, Predicate, RawQuery};
use crate::application::repos::{GeoQuery, GroupQuery, RepoError};
use crate::application::repository::Populate;
use crate::application::resources::{Listing, ResourceService};
use crate::domain::entities::{DEFAULT_RATINGS_AVERAGE, Tour, TourDraft, TourPatch};
use crate::domain::geo::{DistanceUnit, EARTH_RADIUS_M, LatLng};
use crate::domain::types::ResourceKind;

const MONTHS_IN_PLAN: usize = 12;
const GUIDE_FIELDS: &[&str] = &["name", "email", "role", "photo"];

/// Per-difficulty statistics over well-rated tours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TourStats {
    pub difficulty: String,
    pub num_tours: u64,
    pub num_ratings: f64,
    pub avg_rating: f64,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
}

/// Tour starts within one calendar month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyPlan {
    pub month: u8,
    pub num_tour_starts: u64,
    pub tours: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TourDistance {
    pub id: Uuid,
    pub name: String,
    pub distance: f64,
}

#[derive(Clone)]
pub struct TourService {
    resources: ResourceService<Tour>,
}

impl TourService {
    pub fn new(resources: ResourceService<Tour>) -> Self {
        Self { resources }
    }

    pub fn resources(&self) -> &ResourceService<Tour> {
        &self.resources
    }

    pub async fn get(&self, id: Uuid) -> Result<Tour, AppError> {
        self.resources.get_one(id).await
    }

    pub async fn list(&self, raw: &RawQuery) -> Result<Listing<Tour>, AppError> {
        self.resources.get_all(raw, Vec::new()).await
    }

    pub async fn create(&self, draft: TourDraft) -> Result<Tour, AppError> {
        self.resources.create(draft).await
    }

    pub async fn update(&self, id: Uuid, patch: &TourPatch) -> Result<Tour, AppError> {
        self.resources.update(id, patch).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<Tour, AppError> {
        self.resources.delete(id).await
    }

    /// A tour with its reviews and guide profiles expanded.
    pub async fn tour_detail(&self, id: Uuid) -> Result<Value, AppError> {
        let populate = [
            Populate::foreign("reviews", ResourceKind::Review, "tour", &[]),
            Populate::local("guides", ResourceKind::User, GUIDE_FIELDS),
        ];
        self.resources.get_one_populated(id, &populate).await
    }

    /// The five best-rated tours, cheapest first among equals.
    pub async fn top_five_cheap(&self) -> Result<Listing<Tour>, AppError> {
        self.resources
            .get_all(&query::top_five_cheap(), Vec::new())
            .await
    }

    #[instrument(skip(self))]
    pub async fn tour_stats(&self) -> Result<Vec<TourStats>, AppError> {
        let cache = self.resources.cache();
        let key = cache.keys().stats("summary");
        let repo = self.resources.repository();
        cache
            .read_through(&key, cache.ttl().stats(), || async {
                let groups = repo
                    .summarize(GroupQuery {
                        filter: vec![Predicate::gte("ratingsAverage", DEFAULT_RATINGS_AVERAGE)],
                        group_by: Some(FieldPath::from_static("difficulty")),
                        fields: vec![
                            FieldPath::from_static("ratingsQuantity"),
                            FieldPath::from_static("ratingsAverage"),
                            FieldPath::from_static("price"),
                        ],
                    })
                    .await?;

                let mut stats: Vec<TourStats> = groups
                    .into_iter()
                    .map(|group| {
                        let ratings = group.field("ratingsAverage");
                        let price = group.field("price");
                        TourStats {
                            difficulty: group
                                .key
                                .as_ref()
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_uppercase(),
                            num_tours: group.count,
                            num_ratings: group.field("ratingsQuantity").sum,
                            avg_rating: ratings.avg.unwrap_or_default(),
                            avg_price: price.avg.unwrap_or_default(),
                            min_price: price.min.unwrap_or_default(),
                            max_price: price.max.unwrap_or_default(),
                        }
                    })
                    .collect();
                stats.sort_by(|a, b| a.avg_price.total_cmp(&b.avg_price));
                Ok::<_, RepoError>(stats)
            })
            .await
            .map_err(|err| AppError::from_repo("tour_stats", err))
    }

    /// Tour starts per month of `year`, busiest month first.
    #[instrument(skip(self))]
    pub async fn monthly_plan(&self, year: i32) -> Result<Vec<MonthlyPlan>, AppError> {
        let cache = self.resources.cache();
        let key = cache.keys().stats(&format!("plan:{year}"));
        let repo = self.resources.repository();
        cache
            .read_through(&key, cache.ttl().stats(), || async {
                let tours = repo.find_all(Vec::new(), None).await?;
                Ok::<_, RepoError>(plan_for_year(&tours, year))
            })
            .await
            .map_err(|err| AppError::from_repo("monthly_plan", err))
    }

    /// Tours whose start location lies within `distance` of `center`.
    #[instrument(skip(self))]
    pub async fn tours_within(
        &self,
        distance: f64,
        center: LatLng,
        unit: DistanceUnit,
    ) -> Result<Vec<Tour>, AppError> {
        if !distance.is_finite() || distance < 0.0 {
            return Err(AppError::validation("distance must be a non-negative number"));
        }
        let hits = self
            .resources
            .repository()
            .geo_near(GeoQuery {
                field: FieldPath::from_static("startLocation"),
                center: center.to_lng_lat(),
                max_angle: Some(unit.to_radians(distance)),
                filter: Vec::new(),
            })
            .await
            .map_err(|err| AppError::from_repo("tours_within", err))?;
        Ok(hits.into_iter().map(|(tour, _)| tour).collect())
    }

    /// Distance from `center` to every tour's start location, nearest first.
    #[instrument(skip(self))]
    pub async fn distances(
        &self,
        center: LatLng,
        unit: DistanceUnit,
    ) -> Result<Vec<TourDistance>, AppError> {
        let hits = self
            .resources
            .repository()
            .geo_near(GeoQuery {
                field: FieldPath::from_static("startLocation"),
                center: center.to_lng_lat(),
                max_angle: None,
                filter: Vec::new(),
            })
            .await
            .map_err(|err| AppError::from_repo("distances", err))?;
        Ok(hits
            .into_iter()
            .map(|(tour, angle)| TourDistance {
                id: tour.id,
                name: tour.name,
                distance: angle * EARTH_RADIUS_M * unit.metre_multiplier(),
            })
            .collect())
    }
}

fn plan_for_year(tours: &[Tour], year: i32) -> Vec<MonthlyPlan> {
    let mut months: BTreeMap<u8, MonthlyPlan> = BTreeMap::new();
    for tour in tours {
        for start in &tour.start_dates {
            let start = start.get().to_offset(UtcOffset::UTC);
            if start.year() != year {
                continue;
            }
            let month = u8::from(start.month());
            let entry = months.entry(month).or_insert_with(|| MonthlyPlan {
                month,
                num_tour_starts: 0,
                tours: Vec::new(),
            });
            entry.num_tour_starts += 1;
            entry.tours.push(tour.name.clone());
        }
    }

    let mut plan: Vec<MonthlyPlan> = months.into_values().collect();
    plan.sort_by(|a, b| {
        b.num_tour_starts
            .cmp(&a.num_tour_starts)
            .then(a.month.cmp(&b.month))
    });
    plan.truncate(MONTHS_IN_PLAN);
    plan
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::macros::datetime;

    use super::*;
    use crate::application::repos::DocumentStore;
    use crate::application::repository::Repository;
    use crate::cache::{CacheConfig, CacheService, MemoryCacheStore, ResourceCache};
    use crate::domain::resource::Resource;
    use crate::domain::types::{Difficulty, GeoPoint, Timestamp};
    use crate::infra::memory::MemoryDocumentStore;

    fn draft(name: &str, difficulty: Difficulty, price: f64, start: [f64; 2]) -> TourDraft {
        TourDraft {
            name: name.to_string(),
            duration: 5,
            max_group_size: 10,
            difficulty,
            price,
            price_discount: None,
            summary: "A tour used by the service tests".to_string(),
            description: None,
            image_cover: "cover.jpg".to_string(),
            images: Vec::new(),
            start_dates: Vec::new(),
            secret_tour: false,
            start_location: Some(GeoPoint::new(start[0], start[1])),
            locations: Vec::new(),
            guides: Vec::new(),
        }
    }

    fn service() -> TourService {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::default());
        let cache = CacheService::new(Arc::new(MemoryCacheStore::default()), true);
        let resource_cache = ResourceCache::new(&cache, &CacheConfig::default(), ResourceKind::Tour);
        TourService::new(ResourceService::new(Repository::new(store), resource_cache))
    }

    #[tokio::test]
    async fn stats_group_by_difficulty_sorted_by_price() {
        let tours = service();
        tours
            .create(draft("The Forest Hiker", Difficulty::Easy, 397.0, [-116.2, 51.4]))
            .await
            .expect("create");
        tours
            .create(draft("The Sea Explorer", Difficulty::Medium, 497.0, [-80.1, 25.7]))
            .await
            .expect("create");
        tours
            .create(draft("The Snow Adventurer", Difficulty::Easy, 997.0, [-106.8, 39.2]))
            .await
            .expect("create");

        let stats = tours.tour_stats().await.expect("stats");
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].difficulty, "MEDIUM");
        assert_eq!(stats[1].difficulty, "EASY");
        assert_eq!(stats[1].num_tours, 2);
        assert_eq!(stats[1].avg_price, 697.0);
        assert_eq!(stats[1].min_price, 397.0);
        assert_eq!(stats[1].max_price, 997.0);
    }

    #[tokio::test]
    async fn stats_are_served_from_cache_until_a_write() {
        let tours = service();
        tours
            .create(draft("The Forest Hiker", Difficulty::Easy, 397.0, [-116.2, 51.4]))
            .await
            .expect("create");
        assert_eq!(tours.tour_stats().await.expect("stats")[0].num_tours, 1);

        tours
            .create(draft("The Park Camper", Difficulty::Easy, 1497.0, [-123.0, 49.3]))
            .await
            .expect("create");
        assert_eq!(tours.tour_stats().await.expect("stats")[0].num_tours, 2);
    }

    #[tokio::test]
    async fn proximity_reads_use_unit_conversion() {
        let tours = service();
        let near = tours
            .create(draft("The City Wanderer", Difficulty::Easy, 1197.0, [-73.985, 40.758]))
            .await
            .expect("create");
        tours
            .create(draft("The Star Gazer Tour", Difficulty::Medium, 997.0, [-118.1, 34.1]))
            .await
            .expect("create");

        let center: LatLng = "40.7,-74.0".parse().expect("center");
        let within = tours
            .tours_within(50.0, center, DistanceUnit::Miles)
            .await
            .expect("within");
        assert_eq!(within.len(), 1);
        assert_eq!(within[0].id(), near.id);

        let distances = tours
            .distances(center, DistanceUnit::Kilometres)
            .await
            .expect("distances");
        assert_eq!(distances.len(), 2);
        assert_eq!(distances[0].name, "The City Wanderer");
        assert!(distances[0].distance < 10.0);
        assert!(distances[1].distance > 3000.0);

        let err = tours
            .tours_within(-1.0, center, DistanceUnit::Miles)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn plan_counts_starts_per_month() {
        let mut forest = Tour::from_draft(
            Uuid::new_v4(),
            draft("The Forest Hiker", Difficulty::Easy, 397.0, [0.0, 0.0]),
        )
        .expect("tour");
        forest.start_dates = vec![
            Timestamp(datetime!(2021-04-25 09:00 UTC)),
            Timestamp(datetime!(2021-07-20 09:00 UTC)),
            Timestamp(datetime!(2022-04-25 09:00 UTC)),
        ];
        let mut sea = forest.clone();
        sea.name = "The Sea Explorer".to_string();
        sea.start_dates = vec![Timestamp(datetime!(2021-07-05 09:00 UTC))];

        let plan = plan_for_year(&[forest, sea], 2021);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].month, 7);
        assert_eq!(plan[0].num_tour_starts, 2);
        assert_eq!(plan[0].tours, vec!["The Forest Hiker", "The Sea Explorer"]);
        assert_eq!(plan[1].month, 4);
    }
}
