//! Deadline and cancellation semantics
//!
//! Both stop signals share the same contract: no new sub-batches are
//! admitted, in-flight requests complete and count, and everything still
//! queued comes back in the failure list instead of vanishing.

use bulkstream::{
    BulkMode, BulkOperationEngine, CancelToken, EngineConfig, FailureKind, Item, MockStore,
    RangeMap,
};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn documents(count: usize) -> Vec<Item> {
    (0..count)
        .map(|i| Item::document("tenant-1", format!("doc-{}", i), json!({"seq": i})))
        .collect()
}

#[tokio::test]
async fn test_deadline_returns_partial_response() {
    init_logging();
    // Single range, two sub-batches; the store is slower than the deadline
    let store = Arc::new(
        MockStore::new(RangeMap::uniform(1, 1, 10_000.0))
            .with_latency(Duration::from_millis(500)),
    );
    let mut config = EngineConfig::fast_test();
    config.batch.max_items = 5;
    config.operation_deadline = Some(Duration::from_millis(150));

    let engine = BulkOperationEngine::new(config, store.clone())
        .await
        .unwrap();

    let started = Instant::now();
    let response = engine.execute(documents(10), BulkMode::import()).await;
    let elapsed = started.elapsed();

    // The in-flight sub-batch was allowed to finish; the queued one was not
    assert_eq!(response.succeeded, 5);
    assert_eq!(response.failed(), 5);
    assert_eq!(response.total_items(), 10);
    for failure in &response.failures {
        assert_eq!(failure.kind, FailureKind::DeadlineExceeded);
    }
    // Deadline plus in-flight completion grace, nowhere near a second send
    assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
    assert_eq!(store.total_sends(), 1);
}

#[tokio::test]
async fn test_unbounded_deadline_runs_to_completion() {
    init_logging();
    let store = Arc::new(MockStore::new(RangeMap::uniform(1, 2, 10_000.0)));
    let mut config = EngineConfig::fast_test();
    config.operation_deadline = None;

    let engine = BulkOperationEngine::new(config, store.clone())
        .await
        .unwrap();
    let response = engine.execute(documents(25), BulkMode::import()).await;
    assert_eq!(response.succeeded, 25);
}

#[tokio::test]
async fn test_cancellation_stops_new_admissions() {
    init_logging();
    let store = Arc::new(
        MockStore::new(RangeMap::uniform(1, 4, 10_000.0))
            .with_latency(Duration::from_millis(100)),
    );
    let mut config = EngineConfig::fast_test();
    config.max_in_flight = 2;

    let engine = BulkOperationEngine::new(config, store.clone())
        .await
        .unwrap();

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    // Spread across partitions so plenty of sub-batches queue up
    let items: Vec<Item> = (0..100)
        .map(|i| {
            Item::document(
                format!("tenant-{}", i % 20),
                format!("doc-{}", i),
                json!({"seq": i}),
            )
        })
        .collect();

    let started = Instant::now();
    let response = engine
        .execute_with_cancellation(items, BulkMode::import(), cancel)
        .await;
    let elapsed = started.elapsed();

    assert_eq!(response.total_items(), 100);
    assert!(response.failed() > 0, "cancellation left nothing queued");
    assert!(response.succeeded > 0, "in-flight work should complete");
    for failure in &response.failures {
        assert_eq!(failure.kind, FailureKind::Cancelled);
    }
    assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_cancel_before_start_fails_everything() {
    init_logging();
    let store = Arc::new(MockStore::new(RangeMap::uniform(1, 2, 10_000.0)));
    let engine = BulkOperationEngine::new(EngineConfig::fast_test(), store.clone())
        .await
        .unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();

    let response = engine
        .execute_with_cancellation(documents(8), BulkMode::import(), cancel)
        .await;

    assert_eq!(response.succeeded, 0);
    assert_eq!(response.failed(), 8);
    assert!(response
        .failures
        .iter()
        .all(|f| f.kind == FailureKind::Cancelled));
    assert_eq!(store.total_sends(), 0);
}
