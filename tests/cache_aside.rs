mod support;

use std::sync::Arc;
use std::time::Duration;

use support::{FailingCacheStore, context_with, create_review, create_tour, memory_context, tour_draft};
use wayfarer::application::error::AppError;
use wayfarer::application::query::RawQuery;
use wayfarer::cache::{CacheConfig, CacheStore, MemoryCacheStore};
use wayfarer::domain::entities::{Tour, TourPatch};
use wayfarer::domain::types::ResourceKind;
use wayfarer::infra::memory::MemoryDocumentStore;

fn query(pairs: &[(&str, &str)]) -> RawQuery {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn names(items: &[Tour]) -> Vec<&str> {
    items.iter().map(|tour| tour.name.as_str()).collect()
}

#[tokio::test]
async fn list_reads_are_never_stale_after_writes() {
    let (context, cache_store) = memory_context();
    let by_price = query(&[("sort", "price")]);

    let forest = create_tour(&context, "The Forest Hiker").await;
    let listing = context.tours.list(&by_price).await.expect("list");
    assert_eq!(names(&listing.items), ["The Forest Hiker"]);
    assert!(!cache_store.is_empty());

    let sea = context
        .tours
        .create(tour_draft("The Sea Explorer", 497.0))
        .await
        .expect("create");
    let listing = context.tours.list(&by_price).await.expect("list");
    assert_eq!(names(&listing.items), ["The Forest Hiker", "The Sea Explorer"]);

    context
        .tours
        .update(
            sea.id,
            &TourPatch {
                price: Some(100.0),
                ..TourPatch::default()
            },
        )
        .await
        .expect("update");
    let listing = context.tours.list(&by_price).await.expect("list");
    assert_eq!(names(&listing.items), ["The Sea Explorer", "The Forest Hiker"]);

    context.tours.delete(forest.id).await.expect("delete");
    let listing = context.tours.list(&by_price).await.expect("list");
    assert_eq!(names(&listing.items), ["The Sea Explorer"]);
    assert!(matches!(
        context.tours.get(forest.id).await,
        Err(AppError::NotFound { resource: "tour" })
    ));
}

#[tokio::test]
async fn point_read_is_served_from_cache_until_invalidated() {
    let (context, _) = memory_context();
    let tour = create_tour(&context, "The Forest Hiker").await;
    context.tours.get(tour.id).await.expect("prime");

    // A write that skips the service leaves the cached copy in place.
    context
        .repository::<Tour>()
        .update(
            tour.id,
            &TourPatch {
                price: Some(999.0),
                ..TourPatch::default()
            },
        )
        .await
        .expect("raw update");
    assert_eq!(context.tours.get(tour.id).await.expect("cached").price, 397.0);

    context.tours.resources().invalidate(Some(tour.id)).await;
    assert_eq!(context.tours.get(tour.id).await.expect("fresh").price, 999.0);
}

#[tokio::test(start_paused = true)]
async fn cached_entries_expire_after_their_ttl() {
    let (context, _) = memory_context();
    let point_ttl = context.cache_config.ttl_for(ResourceKind::Tour).point();
    let tour = create_tour(&context, "The Forest Hiker").await;
    context.tours.get(tour.id).await.expect("prime");

    context
        .repository::<Tour>()
        .update(
            tour.id,
            &TourPatch {
                price: Some(1.0),
                ..TourPatch::default()
            },
        )
        .await
        .expect("raw update");

    tokio::time::advance(point_ttl - Duration::from_secs(1)).await;
    assert_eq!(context.tours.get(tour.id).await.expect("cached").price, 397.0);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(context.tours.get(tour.id).await.expect("expired").price, 1.0);
}

#[tokio::test]
async fn failing_cache_backend_degrades_to_the_store() {
    let context = context_with(
        Arc::new(MemoryDocumentStore::new()),
        Arc::new(FailingCacheStore),
        CacheConfig::default(),
    );
    let tour = create_tour(&context, "The Forest Hiker").await;
    create_review(&context, tour.id, 5.0).await;

    let fetched = context.tours.get(tour.id).await.expect("get");
    assert_eq!(fetched.ratings_quantity, 1);
    assert_eq!(context.tours.list(&RawQuery::new()).await.expect("list").len(), 1);
    assert_eq!(context.tours.tour_stats().await.expect("stats").len(), 1);

    context.tours.delete(tour.id).await.expect("delete");
    assert!(context.tours.list(&RawQuery::new()).await.expect("list").is_empty());
}

#[tokio::test]
async fn disabled_cache_never_touches_the_backend() {
    let cache_store = Arc::new(MemoryCacheStore::default());
    let context = context_with(
        Arc::new(MemoryDocumentStore::new()),
        cache_store.clone(),
        CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        },
    );
    let tour = create_tour(&context, "The Forest Hiker").await;
    context.tours.get(tour.id).await.expect("get");
    context.tours.list(&RawQuery::new()).await.expect("list");
    assert!(cache_store.is_empty());
}

#[tokio::test]
async fn absent_documents_are_not_cached() {
    let (context, cache_store) = memory_context();
    let missing = uuid::Uuid::new_v4();
    assert!(matches!(
        context.tours.get(missing).await,
        Err(AppError::NotFound { .. })
    ));
    assert!(cache_store.is_empty());
}

#[tokio::test]
async fn undecodable_entries_are_treated_as_misses() {
    let (context, cache_store) = memory_context();
    let tour = create_tour(&context, "The Forest Hiker").await;
    let key = context.tours.resources().cache().keys().point(tour.id);
    cache_store
        .set(&key, "{ not a tour".to_string(), Duration::from_secs(60))
        .await
        .expect("poison");

    let fetched = context.tours.get(tour.id).await.expect("get");
    assert_eq!(fetched.id, tour.id);
    let repaired = cache_store.get(&key).await.expect("get").expect("re-cached");
    assert!(repaired.contains(&tour.id.to_string()));
}

#[tokio::test]
async fn filtered_pages_get_distinct_cache_entries() {
    let (context, _) = memory_context();
    for (name, price) in [
        ("The Forest Hiker", 397.0),
        ("The Sea Explorer", 497.0),
        ("The Snow Adventurer", 997.0),
    ] {
        context.tours.create(tour_draft(name, price)).await.expect("create");
    }

    let cheap = context
        .tours
        .list(&query(&[("price[lt]", "500"), ("sort", "price")]))
        .await
        .expect("cheap");
    assert_eq!(names(&cheap.items), ["The Forest Hiker", "The Sea Explorer"]);

    let second_page = context
        .tours
        .list(&query(&[("sort", "price"), ("limit", "1"), ("page", "2")]))
        .await
        .expect("page 2");
    assert_eq!(names(&second_page.items), ["The Sea Explorer"]);

    let top = context.tours.top_five_cheap().await.expect("top five");
    assert_eq!(top.len(), 3);
}
