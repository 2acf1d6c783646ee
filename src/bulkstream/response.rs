//! Aggregated bulk operation results
//!
//! Workers report outcomes into a [`ResponseAccumulator`] while the progress
//! reporter reads snapshots from it concurrently; the finished, immutable
//! [`BulkResponse`] is built once at the end of an invocation.

use crate::bulkstream::error::FailureKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Terminal failure of one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub item_id: String,
    pub partition_key: String,
    pub kind: FailureKind,
    /// Failed send attempts observed before giving up
    pub attempts: u32,
}

/// Aggregate result of one engine invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkResponse {
    /// Items confirmed by the store
    pub succeeded: u64,
    /// Items that reached a terminal failure, with reasons
    pub failures: Vec<ItemFailure>,
    /// Total capacity units the store charged
    pub units_consumed: f64,
    /// Wall-clock time of the invocation
    pub elapsed: Duration,
}

impl BulkResponse {
    pub fn failed(&self) -> u64 {
        self.failures.len() as u64
    }

    pub fn total_items(&self) -> u64 {
        self.succeeded + self.failed()
    }

    pub fn is_complete_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn items_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.succeeded as f64 / secs
        } else {
            0.0
        }
    }

    pub fn units_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.units_consumed / secs
        } else {
            0.0
        }
    }

    pub fn average_units_per_item(&self) -> f64 {
        if self.succeeded > 0 {
            self.units_consumed / self.succeeded as f64
        } else {
            0.0
        }
    }
}

impl fmt::Display for BulkResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed @ {:.0} items/s, {:.0} units/s in {:.2}s",
            self.succeeded,
            self.failed(),
            self.items_per_second(),
            self.units_per_second(),
            self.elapsed.as_secs_f64()
        )
    }
}

/// Concurrency-safe, append-only accumulator behind a [`BulkResponse`]
///
/// Counters are atomic so the progress reporter can snapshot without
/// contending with workers; the failure list takes a short lock per append.
pub struct ResponseAccumulator {
    succeeded: AtomicU64,
    /// Units in thousandths, so the hot path stays on an integer atomic
    units_milli: AtomicU64,
    failures: Mutex<Vec<ItemFailure>>,
    started: Instant,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self {
            succeeded: AtomicU64::new(0),
            units_milli: AtomicU64::new(0),
            failures: Mutex::new(Vec::new()),
            started: Instant::now(),
        }
    }

    pub fn record_success(&self, units: f64) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.units_milli
            .fetch_add((units.max(0.0) * 1000.0) as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self, failure: ItemFailure) {
        let mut failures = self.failures.lock().expect("failure list lock poisoned");
        failures.push(failure);
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failures.lock().expect("failure list lock poisoned").len() as u64
    }

    pub fn units_consumed(&self) -> f64 {
        self.units_milli.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Build the final response, consuming nothing; call once at the end
    pub fn finish(&self) -> BulkResponse {
        let failures = self
            .failures
            .lock()
            .expect("failure list lock poisoned")
            .clone();
        BulkResponse {
            succeeded: self.succeeded(),
            failures,
            units_consumed: self.units_consumed(),
            elapsed: self.elapsed(),
        }
    }
}

impl Default for ResponseAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
