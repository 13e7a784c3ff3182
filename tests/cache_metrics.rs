mod support;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serial_test::serial;
use support::{
    CorruptCacheStore, FailingCacheStore, context_with, create_review, create_tour, memory_context,
    scripted_context,
};
use wayfarer::cache::{CacheConfig, CacheService};
use wayfarer::infra::memory::MemoryDocumentStore;

fn snapshotter() -> &'static Snapshotter {
    static SNAPSHOTTER: OnceLock<Snapshotter> = OnceLock::new();
    SNAPSHOTTER.get_or_init(|| {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        recorder
            .install()
            .expect("debug metrics recorder should install in this test process");
        snapshotter
    })
}

/// Counter totals by metric name, summed across labels.
fn counters() -> HashMap<String, u64> {
    let mut totals = HashMap::new();
    for (key, _, _, value) in snapshotter().snapshot().into_vec() {
        if let DebugValue::Counter(count) = value {
            *totals.entry(key.key().name().to_string()).or_insert(0) += count;
        }
    }
    totals
}

fn delta(before: &HashMap<String, u64>, after: &HashMap<String, u64>, name: &str) -> u64 {
    after
        .get(name)
        .copied()
        .unwrap_or(0)
        .saturating_sub(before.get(name).copied().unwrap_or(0))
}

#[tokio::test]
#[serial]
async fn cache_aside_emits_hit_miss_and_invalidation_counters() {
    let before = counters();
    let (context, _) = memory_context();
    let tour = create_tour(&context, "The Forest Hiker").await;

    context.tours.get(tour.id).await.expect("miss");
    context.tours.get(tour.id).await.expect("hit");
    create_review(&context, tour.id, 4.0).await;

    let after = counters();
    assert!(delta(&before, &after, "wayfarer_cache_miss_total") >= 1);
    assert!(delta(&before, &after, "wayfarer_cache_hit_total") >= 1);
    assert!(delta(&before, &after, "wayfarer_cache_invalidation_total") >= 2);
    assert_eq!(delta(&before, &after, "wayfarer_rating_recompute_total"), 1);
    assert_eq!(delta(&before, &after, "wayfarer_cache_error_total"), 0);
}

#[tokio::test]
#[serial]
async fn swallowed_cache_failures_are_counted() {
    let before = counters();
    let context = context_with(
        Arc::new(MemoryDocumentStore::new()),
        Arc::new(FailingCacheStore),
        CacheConfig::default(),
    );
    let tour = create_tour(&context, "The Sea Explorer").await;
    context.tours.get(tour.id).await.expect("get");

    let after = counters();
    // create: three invalidation patterns; get: one lookup and one store
    assert!(delta(&before, &after, "wayfarer_cache_error_total") >= 5);
    assert_eq!(delta(&before, &after, "wayfarer_cache_hit_total"), 0);
}

#[tokio::test]
#[serial]
async fn failed_recomputes_are_counted() {
    let (context, store) = scripted_context();
    let tour = create_tour(&context, "The Snow Adventurer").await;
    store.set_summarize_down(true);

    let before = counters();
    let review = create_review(&context, tour.id, 3.0).await;
    context.reviews.delete(review.id).await.expect("delete");
    let after = counters();

    assert_eq!(delta(&before, &after, "wayfarer_rating_recompute_failure_total"), 2);
    assert_eq!(delta(&before, &after, "wayfarer_rating_recompute_total"), 0);
}

#[tokio::test]
#[serial]
async fn failed_cleanup_of_undecodable_entry_is_counted() {
    let cache = CacheService::new(Arc::new(CorruptCacheStore), true);

    let before = counters();
    let value = cache.get::<serde_json::Value>("wayfarer:tour:list:page=1").await;
    let after = counters();

    assert_eq!(value, None);
    // one decode failure and one failed delete of the bad entry
    assert_eq!(delta(&before, &after, "wayfarer_cache_error_total"), 2);
    assert_eq!(delta(&before, &after, "wayfarer_cache_hit_total"), 0);
}
