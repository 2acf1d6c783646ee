//! Engine configuration
//!
//! All knobs are consumed once at engine construction; invalid combinations
//! fail fast with [`BulkError::Configuration`] before any work starts.

use crate::bulkstream::error::BulkError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ceilings for a single sub-batch sent to the store in one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLimits {
    /// Maximum number of items per sub-batch
    pub max_items: usize,
    /// Maximum serialized payload bytes per sub-batch
    pub max_bytes: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_items: 100,
            max_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Retry behavior for throttled and transient failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts for transient failures; throttled work is only
    /// bounded by the operation deadline
    pub max_attempts: u32,
    /// Base backoff delay, doubled each attempt
    pub base_delay: Duration,
    /// Ceiling for the computed backoff delay
    pub max_delay: Duration,
    /// Add uniform random jitter in `[0, base_delay)` to each backoff
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

/// Configuration for a [`crate::BulkOperationEngine`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Sub-batch size ceilings
    pub batch: BatchLimits,

    /// Maximum concurrent in-flight sub-batches across all partition ranges
    pub max_in_flight: usize,

    /// Wall-clock budget for one `execute` invocation; unresolved items are
    /// failed with `DeadlineExceeded` when it elapses. `None` means unbounded.
    pub operation_deadline: Option<Duration>,

    /// Retry and backoff behavior
    pub retry: RetryConfig,

    /// How often workers re-check cancellation and deadline while waiting;
    /// cancellation propagates within roughly one such interval
    pub poll_interval: Duration,

    /// Admission cost estimate, in capacity units per item, reconciled with
    /// the actual consumption the store reports
    pub estimated_units_per_item: f64,

    /// Interval between progress snapshots delivered to the progress sink
    pub progress_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch: BatchLimits::default(),
            max_in_flight: 8,
            operation_deadline: Some(Duration::from_secs(300)),
            retry: RetryConfig::default(),
            poll_interval: Duration::from_millis(100),
            estimated_units_per_item: 5.0,
            progress_interval: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    /// Small batches, tight timings; keeps tests fast
    pub fn fast_test() -> Self {
        Self {
            batch: BatchLimits {
                max_items: 10,
                max_bytes: 64 * 1024,
            },
            max_in_flight: 4,
            operation_deadline: Some(Duration::from_secs(10)),
            retry: RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(50),
                jitter: false,
            },
            poll_interval: Duration::from_millis(10),
            estimated_units_per_item: 1.0,
            progress_interval: Duration::from_millis(100),
        }
    }

    /// Validate the configuration, failing fast on unusable values
    pub fn validate(&self) -> Result<(), BulkError> {
        if self.batch.max_items == 0 {
            return Err(BulkError::configuration("batch.max_items must be at least 1"));
        }
        if self.batch.max_bytes == 0 {
            return Err(BulkError::configuration("batch.max_bytes must be at least 1"));
        }
        if self.max_in_flight == 0 {
            return Err(BulkError::configuration("max_in_flight must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(BulkError::configuration("retry.max_attempts must be at least 1"));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(BulkError::configuration(
                "retry.base_delay must not exceed retry.max_delay",
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(BulkError::configuration("poll_interval must be non-zero"));
        }
        if !(self.estimated_units_per_item > 0.0) {
            return Err(BulkError::configuration(
                "estimated_units_per_item must be positive",
            ));
        }
        if self.progress_interval.is_zero() {
            return Err(BulkError::configuration("progress_interval must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(EngineConfig::fast_test().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_batch() {
        let mut config = EngineConfig::default();
        config.batch.max_items = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let mut config = EngineConfig::default();
        config.max_in_flight = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let mut config = EngineConfig::default();
        config.retry.base_delay = Duration::from_secs(60);
        config.retry.max_delay = Duration::from_secs(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_unit_estimate() {
        let mut config = EngineConfig::default();
        config.estimated_units_per_item = 0.0;
        assert!(config.validate().is_err());
        config.estimated_units_per_item = f64::NAN;
        assert!(config.validate().is_err());
    }
}
