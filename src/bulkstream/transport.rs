//! Store transport abstraction
//!
//! The engine never talks to a concrete document store; it sends sub-batches
//! through this trait and interprets the outcome. Implementations own the
//! wire protocol, connection handling, and authentication.

use crate::bulkstream::batch::SubBatch;
use crate::bulkstream::error::FailureKind;
use crate::bulkstream::item::BulkMode;
use crate::bulkstream::partition::RangeMap;
use async_trait::async_trait;
use std::time::Duration;

/// Request-level transport failures
///
/// These apply to a whole sub-batch. Item-level failures travel inside the
/// [`ItemOutcome`] list of a successful request instead.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The store rejected the request for capacity reasons
    #[error("request throttled by store (retry after {retry_after:?})")]
    Throttled { retry_after: Option<Duration> },

    /// The routing information the request was built against is out of date
    #[error("partition routing is stale")]
    StaleRouting,

    /// Network-level failure: timeout, reset, unreachable endpoint
    #[error("transient transport failure: {message}")]
    Transient { message: String },
}

impl TransportError {
    pub fn transient(message: impl Into<String>) -> Self {
        TransportError::Transient {
            message: message.into(),
        }
    }
}

/// Result for one item of a delivered sub-batch
#[derive(Debug, Clone, PartialEq)]
pub struct ItemOutcome {
    item_id: String,
    units_consumed: f64,
    error: Option<FailureKind>,
}

impl ItemOutcome {
    pub fn success(item_id: impl Into<String>, units_consumed: f64) -> Self {
        Self {
            item_id: item_id.into(),
            units_consumed,
            error: None,
        }
    }

    pub fn failure(item_id: impl Into<String>, kind: FailureKind) -> Self {
        Self {
            item_id: item_id.into(),
            units_consumed: 0.0,
            error: Some(kind),
        }
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn units_consumed(&self) -> f64 {
        self.units_consumed
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn error(&self) -> Option<&FailureKind> {
        self.error.as_ref()
    }

    pub fn into_error(self) -> Option<FailureKind> {
        self.error
    }
}

/// One call per sub-batch, one outcome row per item
#[async_trait]
pub trait StoreTransport: Send + Sync {
    /// Deliver a sub-batch to the store
    ///
    /// A returned `Ok` carries one [`ItemOutcome`] per item (order is not
    /// significant; outcomes are matched by item id). A returned `Err`
    /// applies to the whole sub-batch.
    async fn send(
        &self,
        batch: &SubBatch,
        mode: &BulkMode,
    ) -> Result<Vec<ItemOutcome>, TransportError>;

    /// Fetch the current partition range map
    async fn fetch_range_map(&self) -> Result<RangeMap, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_accessors() {
        let ok = ItemOutcome::success("doc-1", 5.5);
        assert!(ok.is_success());
        assert_eq!(ok.units_consumed(), 5.5);
        assert!(ok.error().is_none());

        let failed = ItemOutcome::failure("doc-2", FailureKind::Conflict);
        assert!(!failed.is_success());
        assert_eq!(failed.units_consumed(), 0.0);
        assert_eq!(failed.into_error(), Some(FailureKind::Conflict));
    }

    #[test]
    fn test_error_display() {
        let throttled = TransportError::Throttled {
            retry_after: Some(Duration::from_millis(100)),
        };
        assert!(throttled.to_string().contains("throttled"));
        assert!(TransportError::StaleRouting.to_string().contains("stale"));
    }
}
