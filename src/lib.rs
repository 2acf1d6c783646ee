//! # bulkstream
//!
//! A partition-aware bulk import/delete engine for rate-limited document
//! stores. The engine batches work per partition range, admits it against
//! per-range token-bucket budgets, retries throttled and transient failures
//! with jittered exponential backoff, and aggregates per-item outcomes into
//! a single response.
//!
//! ## Features
//!
//! - **Partition-aware batching**: items are grouped into sub-batches that
//!   never span a partition range, sized to the store's request ceilings
//! - **Throughput governance**: per-range token buckets keep the engine
//!   under provisioned capacity; store throttle signals override the local
//!   estimate
//! - **Bounded retries**: throttled work retries until the operation
//!   deadline, transient failures retry a configured number of times,
//!   permanent failures surface immediately
//! - **Cooperative cancellation**: a shared token stops new admissions
//!   within one poll interval while in-flight requests complete
//! - **Complete accounting**: `succeeded + failed == submitted`, always;
//!   partial failure is reported in the response, never thrown
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bulkstream::{
//!     BulkMode, BulkOperationEngine, EngineConfig, Item, MockStore, RangeMap,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Any StoreTransport implementation works here; MockStore is the
//!     // in-memory one shipped for tests and examples.
//!     let store = Arc::new(MockStore::new(RangeMap::uniform(1, 4, 10_000.0)));
//!     let engine = BulkOperationEngine::new(EngineConfig::default(), store).await?;
//!
//!     let items: Vec<Item> = (0..1000)
//!         .map(|i| {
//!             Item::document(format!("tenant-{}", i % 10), format!("doc-{}", i), json!({"n": i}))
//!         })
//!         .collect();
//!
//!     let response = engine.execute(items, BulkMode::import()).await;
//!     println!("{}", response);
//!     Ok(())
//! }
//! ```

pub mod bulkstream;

// Re-export the main API at the crate root for easy access
pub use bulkstream::batch::{Batcher, SubBatch};
pub use bulkstream::cancel::CancelToken;
pub use bulkstream::config::{BatchLimits, EngineConfig, RetryConfig};
pub use bulkstream::engine::BulkOperationEngine;
pub use bulkstream::error::{BulkError, FailureClass, FailureKind};
pub use bulkstream::governor::{Admission, ThroughputGovernor};
pub use bulkstream::item::{BulkMode, ImportOptions, Item};
pub use bulkstream::partition::{PartitionRange, PartitionRouter, RangeMap};
pub use bulkstream::progress::{LogProgressSink, NullProgressSink, ProgressSink, ProgressSnapshot};
pub use bulkstream::response::{BulkResponse, ItemFailure};
pub use bulkstream::retry::{RetryCoordinator, RetryDecision};
pub use bulkstream::testing::MockStore;
pub use bulkstream::transport::{ItemOutcome, StoreTransport, TransportError};
