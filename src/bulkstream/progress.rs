//! Periodic progress reporting
//!
//! The engine pushes [`ProgressSnapshot`]s to a [`ProgressSink`] on a fixed
//! interval while an invocation runs, plus one final snapshot when it ends.
//! Sinks are fire-and-forget; a slow sink delays reporting, never the work.

use crate::bulkstream::response::ResponseAccumulator;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Point-in-time view of a running bulk invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Items confirmed so far
    pub succeeded: u64,
    /// Items terminally failed so far
    pub failed: u64,
    /// Capacity units charged so far
    pub units_consumed: f64,
    /// Time since the invocation started
    pub elapsed: Duration,
    /// Confirmed items per second since start
    pub items_per_second: f64,
    /// Units charged per second since start
    pub units_per_second: f64,
    /// Wall-clock time the snapshot was taken
    pub taken_at: DateTime<Utc>,
}

impl ProgressSnapshot {
    pub(crate) fn capture(accumulator: &ResponseAccumulator) -> Self {
        let succeeded = accumulator.succeeded();
        let units = accumulator.units_consumed();
        let elapsed = accumulator.elapsed();
        let secs = elapsed.as_secs_f64();
        Self {
            succeeded,
            failed: accumulator.failed(),
            units_consumed: units,
            elapsed,
            items_per_second: if secs > 0.0 { succeeded as f64 / secs } else { 0.0 },
            units_per_second: if secs > 0.0 { units / secs } else { 0.0 },
            taken_at: Utc::now(),
        }
    }
}

/// Receives progress snapshots from a running invocation
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, snapshot: ProgressSnapshot);
}

/// Discards every snapshot; the default sink
pub struct NullProgressSink;

#[async_trait]
impl ProgressSink for NullProgressSink {
    async fn report(&self, _snapshot: ProgressSnapshot) {}
}

/// Logs each snapshot at info level
pub struct LogProgressSink;

#[async_trait]
impl ProgressSink for LogProgressSink {
    async fn report(&self, snapshot: ProgressSnapshot) {
        log::info!(
            "Progress: {} succeeded, {} failed @ {:.0} items/s, {:.0} units/s ({:.1}s elapsed)",
            snapshot.succeeded,
            snapshot.failed,
            snapshot.items_per_second,
            snapshot.units_per_second,
            snapshot.elapsed.as_secs_f64()
        );
    }
}
