//! End-to-end bulk engine tests against the in-memory store

use bulkstream::{
    BulkMode, BulkOperationEngine, EngineConfig, FailureKind, ImportOptions, Item, MockStore,
    RangeMap,
};
use serde_json::json;
use std::sync::Arc;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn documents(count: usize) -> Vec<Item> {
    (0..count)
        .map(|i| {
            Item::document(
                format!("tenant-{}", i % 7),
                format!("doc-{}", i),
                json!({"seq": i, "body": "payload"}),
            )
        })
        .collect()
}

#[tokio::test]
async fn test_import_happy_path() {
    init_logging();
    let store = Arc::new(MockStore::new(RangeMap::uniform(1, 4, 10_000.0)).with_unit_cost(5.0));
    let engine = BulkOperationEngine::new(EngineConfig::fast_test(), store.clone())
        .await
        .unwrap();

    let response = engine.execute(documents(50), BulkMode::import()).await;

    assert_eq!(response.succeeded, 50);
    assert_eq!(response.failed(), 0);
    assert!(response.is_complete_success());
    assert!((response.units_consumed - 250.0).abs() < 0.001);
    assert!((response.average_units_per_item() - 5.0).abs() < 0.001);
    for i in 0..50 {
        assert_eq!(store.success_count(&format!("doc-{}", i)), 1);
    }
}

#[tokio::test]
async fn test_delete_happy_path() {
    init_logging();
    let store = Arc::new(MockStore::new(RangeMap::uniform(1, 2, 10_000.0)));
    let engine = BulkOperationEngine::new(EngineConfig::fast_test(), store.clone())
        .await
        .unwrap();

    let tombstones: Vec<Item> = (0..20)
        .map(|i| Item::tombstone(format!("tenant-{}", i % 3), format!("doc-{}", i)))
        .collect();
    let response = engine.execute(tombstones, BulkMode::Delete).await;

    assert_eq!(response.succeeded, 20);
    assert_eq!(response.failed(), 0);
}

#[tokio::test]
async fn test_counting_invariant_under_throttling() {
    init_logging();
    let store = Arc::new(
        MockStore::new(RangeMap::uniform(1, 4, 10_000.0)).with_initial_throttles(5, None),
    );
    let engine = BulkOperationEngine::new(EngineConfig::fast_test(), store.clone())
        .await
        .unwrap();

    let submitted = 60;
    let response = engine.execute(documents(submitted), BulkMode::import()).await;

    assert_eq!(response.total_items(), submitted as u64);
    assert_eq!(response.succeeded, submitted as u64);
}

#[tokio::test]
async fn test_idempotence_across_invocations() {
    init_logging();
    // doc-5 conflicts on the first invocation only
    let store = Arc::new(
        MockStore::new(RangeMap::uniform(1, 2, 10_000.0)).fail_item(
            "doc-5",
            FailureKind::Conflict,
            1,
        ),
    );
    let engine = BulkOperationEngine::new(EngineConfig::fast_test(), store.clone())
        .await
        .unwrap();

    let first = engine.execute(documents(10), BulkMode::import()).await;
    assert_eq!(first.succeeded, 9);
    assert_eq!(first.failed(), 1);
    assert_eq!(first.failures[0].item_id, "doc-5");

    // The caller excludes already-succeeded items and re-submits the rest
    let remaining = vec![Item::document("tenant-5", "doc-5", json!({"seq": 5}))];
    let second = engine.execute(remaining, BulkMode::import()).await;
    assert_eq!(second.succeeded, 1);

    // Succeeded items were never re-sent
    for i in 0..10 {
        assert_eq!(store.success_count(&format!("doc-{}", i)), 1);
    }
}

#[tokio::test]
async fn test_duplicate_ids_rejected() {
    init_logging();
    let store = Arc::new(MockStore::new(RangeMap::uniform(1, 1, 10_000.0)));
    let engine = BulkOperationEngine::new(EngineConfig::fast_test(), store.clone())
        .await
        .unwrap();

    let items = vec![
        Item::document("pk", "doc-1", json!({"v": 1})),
        Item::document("pk", "doc-1", json!({"v": 2})),
        Item::document("pk", "doc-2", json!({"v": 3})),
    ];
    let response = engine.execute(items, BulkMode::import()).await;

    assert_eq!(response.total_items(), 3);
    assert_eq!(response.succeeded, 2);
    assert_eq!(response.failed(), 1);
    assert!(matches!(
        response.failures[0].kind,
        FailureKind::Malformed { .. }
    ));
    // The first occurrence won; the store saw doc-1 exactly once
    assert_eq!(store.success_count("doc-1"), 1);
}

#[tokio::test]
async fn test_missing_id_requires_generation_option() {
    init_logging();
    let store = Arc::new(MockStore::new(RangeMap::uniform(1, 1, 10_000.0)));
    let engine = BulkOperationEngine::new(EngineConfig::fast_test(), store.clone())
        .await
        .unwrap();

    let items = vec![Item::document("pk", "", json!({"v": 1}))];
    let response = engine.execute(items, BulkMode::import()).await;
    assert_eq!(response.failed(), 1);
    assert!(matches!(
        response.failures[0].kind,
        FailureKind::Malformed { .. }
    ));
}

#[tokio::test]
async fn test_auto_generated_ids() {
    init_logging();
    let store = Arc::new(MockStore::new(RangeMap::uniform(1, 1, 10_000.0)));
    let engine = BulkOperationEngine::new(EngineConfig::fast_test(), store.clone())
        .await
        .unwrap();

    let items: Vec<Item> = (0..5).map(|i| Item::document("pk", "", json!({"n": i}))).collect();
    let mode = BulkMode::Import(ImportOptions {
        upsert: false,
        auto_generate_ids: true,
    });
    let response = engine.execute(items, mode).await;

    assert_eq!(response.succeeded, 5);
    assert_eq!(response.failed(), 0);
    // Five distinct generated ids reached the store
    let delivered = store.delivered_ids();
    let unique: std::collections::HashSet<_> = delivered.iter().collect();
    assert_eq!(unique.len(), 5);
}

#[tokio::test]
async fn test_empty_submission() {
    init_logging();
    let store = Arc::new(MockStore::new(RangeMap::uniform(1, 1, 10_000.0)));
    let engine = BulkOperationEngine::new(EngineConfig::fast_test(), store.clone())
        .await
        .unwrap();

    let response = engine.execute(Vec::new(), BulkMode::import()).await;
    assert_eq!(response.total_items(), 0);
    assert!(response.is_complete_success());
    assert_eq!(store.total_sends(), 0);
}

#[tokio::test]
async fn test_rejects_invalid_config() {
    init_logging();
    let store = Arc::new(MockStore::new(RangeMap::uniform(1, 1, 10_000.0)));
    let mut config = EngineConfig::fast_test();
    config.max_in_flight = 0;
    assert!(BulkOperationEngine::new(config, store).await.is_err());
}
