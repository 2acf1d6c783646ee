//! Per-range throughput admission
//!
//! Each partition range gets a token bucket refilled continuously at the
//! range's provisioned rate. Admission is check-and-deduct under one lock
//! acquisition, so concurrent workers can never jointly over-admit a range.
//! The governor itself never sleeps; callers act on the suggested wait.

use crate::bulkstream::partition::PartitionRange;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Result of an admission request
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    /// Tokens were available and have been deducted
    Granted,
    /// Insufficient budget; retry admission after roughly this long
    Wait(Duration),
}

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
    /// Server-imposed freeze; refill and admission resume only after this
    frozen_until: Option<Instant>,
}

impl TokenBucket {
    fn new(range: &PartitionRange, now: Instant) -> Self {
        Self {
            capacity: range.units_per_second,
            tokens: range.units_per_second,
            refill_per_sec: range.units_per_second,
            last_refill: now,
            frozen_until: None,
        }
    }

    fn refill(&mut self, now: Instant) {
        if let Some(until) = self.frozen_until {
            if now < until {
                return;
            }
            self.frozen_until = None;
            self.last_refill = until;
        }
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    fn try_deduct(&mut self, cost: f64, now: Instant) -> Admission {
        self.refill(now);

        if let Some(until) = self.frozen_until {
            return Admission::Wait(until.saturating_duration_since(now));
        }

        // A cost above a full bucket would otherwise never be admittable;
        // grant it at full capacity and carry the deficit forward
        let required = cost.min(self.capacity);
        if self.tokens >= required {
            self.tokens -= cost;
            return Admission::Granted;
        }

        let missing = required - self.tokens;
        let wait = Duration::from_secs_f64(missing / self.refill_per_sec);
        Admission::Wait(wait.max(Duration::from_millis(1)))
    }
}

/// Tracks consumed-capacity budgets per partition range
pub struct ThroughputGovernor {
    buckets: Mutex<HashMap<u64, TokenBucket>>,
}

impl ThroughputGovernor {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Request admission for work costing `cost` units against a range
    pub fn admit(&self, range: &PartitionRange, cost: f64) -> Admission {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("governor lock poisoned");
        let bucket = buckets
            .entry(range.id)
            .or_insert_with(|| TokenBucket::new(range, now));
        bucket.try_deduct(cost, now)
    }

    /// Apply a store-side throttle signal: drain the range's bucket and, when
    /// the server suggested a wait, pin the next refill behind it. The server
    /// signal takes precedence over the local estimate.
    pub fn throttle(&self, range_id: u64, retry_after: Option<Duration>) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("governor lock poisoned");
        if let Some(bucket) = buckets.get_mut(&range_id) {
            bucket.tokens = 0.0;
            bucket.last_refill = now;
            if let Some(after) = retry_after {
                bucket.frozen_until = Some(now + after);
            }
            debug!(
                "Range {} throttled by store, bucket drained (retry_after: {:?})",
                range_id, retry_after
            );
        } else {
            warn!("Throttle signal for unknown range {}", range_id);
        }
    }

    /// Reconcile an admission's estimated cost with the units the store
    /// actually charged
    pub fn settle(&self, range_id: u64, estimated: f64, actual: f64) {
        let mut buckets = self.buckets.lock().expect("governor lock poisoned");
        if let Some(bucket) = buckets.get_mut(&range_id) {
            let correction = estimated - actual;
            // Overspend carries at most one full bucket of debt
            bucket.tokens = (bucket.tokens + correction).clamp(-bucket.capacity, bucket.capacity);
        }
    }

    /// Currently available tokens for a range, if it has a bucket
    pub fn available(&self, range_id: u64) -> Option<f64> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("governor lock poisoned");
        buckets.get_mut(&range_id).map(|bucket| {
            bucket.refill(now);
            bucket.tokens
        })
    }
}

impl Default for ThroughputGovernor {
    fn default() -> Self {
        Self::new()
    }
}
