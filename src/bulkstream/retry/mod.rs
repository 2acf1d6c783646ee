//! Per-item retry decisions
//!
//! The coordinator keeps one [`AttemptRecord`] per failing item and turns
//! each failure into either a delayed retry or a terminal give-up. Throttled
//! failures retry without an attempt cap (the operation deadline bounds
//! them); transient failures retry up to the configured maximum; permanent
//! failures give up immediately.

use crate::bulkstream::config::RetryConfig;
use crate::bulkstream::error::{FailureClass, FailureKind};
use log::debug;
use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Outcome of routing one failure through the coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Schedule another attempt after this delay
    Retry { after: Duration },
    /// Stop retrying; record the item as failed with this reason
    GiveUp { reason: FailureKind },
}

/// Retry state for one item
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// Failed attempts observed so far
    pub attempts: u32,
    /// The most recent failure
    pub last_kind: FailureKind,
}

/// Decides retry vs give-up for failed items
pub struct RetryCoordinator {
    config: RetryConfig,
    deadline: Option<Instant>,
    records: HashMap<String, AttemptRecord>,
}

impl RetryCoordinator {
    pub fn new(config: RetryConfig, deadline: Option<Instant>) -> Self {
        Self {
            config,
            deadline,
            records: HashMap::new(),
        }
    }

    /// Route one failure for `item_id`
    ///
    /// For transient failures the `max_attempts`-th call returns `GiveUp`,
    /// never an earlier or later one. Throttled failures honor the
    /// server-suggested wait when present.
    pub fn on_failure(&mut self, item_id: &str, kind: FailureKind) -> RetryDecision {
        let record = self
            .records
            .entry(item_id.to_string())
            .or_insert_with(|| AttemptRecord {
                attempts: 0,
                last_kind: kind.clone(),
            });
        record.attempts += 1;
        record.last_kind = kind.clone();
        let attempts = record.attempts;

        match kind.class() {
            FailureClass::Permanent => RetryDecision::GiveUp { reason: kind },
            FailureClass::Transient => {
                if attempts >= self.config.max_attempts {
                    debug!(
                        "Item '{}' exhausted {} attempts, giving up: {}",
                        item_id, attempts, kind
                    );
                    return RetryDecision::GiveUp { reason: kind };
                }
                self.delayed(item_id, self.backoff(attempts))
            }
            FailureClass::Throttled => {
                let after = match &kind {
                    FailureKind::Throttled {
                        retry_after: Some(after),
                    } => *after,
                    _ => self.backoff(attempts),
                };
                self.delayed(item_id, after)
            }
        }
    }

    /// Drop the record for an item that reached a terminal state
    ///
    /// Records survive a `GiveUp` decision so callers can read the final
    /// attempt count into the failure they report; call this once that is
    /// recorded (and on success).
    pub fn clear(&mut self, item_id: &str) {
        self.records.remove(item_id);
    }

    /// Failed attempts recorded for an item (zero if it never failed)
    pub fn attempts(&self, item_id: &str) -> u32 {
        self.records.get(item_id).map(|r| r.attempts).unwrap_or(0)
    }

    fn delayed(&self, item_id: &str, after: Duration) -> RetryDecision {
        // A retry that cannot run before the deadline is a give-up now, not a
        // doomed sleep
        if let Some(deadline) = self.deadline {
            if Instant::now() + after >= deadline {
                debug!(
                    "Item '{}' retry in {:?} would pass the deadline, giving up",
                    item_id, after
                );
                return RetryDecision::GiveUp {
                    reason: FailureKind::DeadlineExceeded,
                };
            }
        }
        RetryDecision::Retry { after }
    }

    /// Exponential backoff: base doubled per attempt, capped, plus uniform
    /// jitter in `[0, base)` so retries across partitions stay unsynchronized
    fn backoff(&self, attempts: u32) -> Duration {
        let base = self.config.base_delay;
        let exp = attempts.saturating_sub(1).min(20);
        let mut delay = base
            .saturating_mul(1u32 << exp)
            .min(self.config.max_delay);
        if self.config.jitter && !base.is_zero() {
            let jitter_ms = rand::thread_rng().gen_range(0..base.as_millis().max(1) as u64);
            delay += Duration::from_millis(jitter_ms);
        }
        delay
    }
}
