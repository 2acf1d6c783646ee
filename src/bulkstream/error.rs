//! Error taxonomy for bulk operations
//!
//! Every failure the engine can observe maps onto a [`FailureKind`], and every
//! kind belongs to one [`FailureClass`] that drives the retry decision:
//! throttled work is always retryable, transient work is retryable up to a
//! bounded number of attempts, permanent failures are surfaced immediately.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Broad classification of a failure, used by the retry coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The store rejected the work for capacity reasons; always retryable
    Throttled,
    /// Network-level or timeout failure; retryable up to a bounded attempt count
    Transient,
    /// The item itself is unprocessable; never retried
    Permanent,
}

/// The reason an individual item (or a whole sub-batch) failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Store-side rate limit, optionally with a server-suggested wait
    Throttled { retry_after: Option<Duration> },
    /// Network error, timeout, connection reset
    Transient { message: String },
    /// A document with the same id already exists (non-upsert import)
    Conflict,
    /// The item payload or key is invalid
    Malformed { reason: String },
    /// The caller is not authorized for this operation
    Unauthorized,
    /// The per-invocation deadline elapsed before the item reached the store
    DeadlineExceeded,
    /// The invocation was cancelled before the item reached the store
    Cancelled,
}

impl FailureKind {
    /// Classify this failure for retry purposes
    pub fn class(&self) -> FailureClass {
        match self {
            FailureKind::Throttled { .. } => FailureClass::Throttled,
            FailureKind::Transient { .. } => FailureClass::Transient,
            FailureKind::Conflict
            | FailureKind::Malformed { .. }
            | FailureKind::Unauthorized
            | FailureKind::DeadlineExceeded
            | FailureKind::Cancelled => FailureClass::Permanent,
        }
    }

    /// Whether the retry coordinator may schedule another attempt
    pub fn is_retryable(&self) -> bool {
        self.class() != FailureClass::Permanent
    }

    /// Create a transient failure from any displayable cause
    pub fn transient(message: impl Into<String>) -> Self {
        FailureKind::Transient {
            message: message.into(),
        }
    }

    /// Create a malformed-item failure
    pub fn malformed(reason: impl Into<String>) -> Self {
        FailureKind::Malformed {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Throttled {
                retry_after: Some(after),
            } => write!(f, "throttled (retry after {:?})", after),
            FailureKind::Throttled { retry_after: None } => write!(f, "throttled"),
            FailureKind::Transient { message } => write!(f, "transient failure: {}", message),
            FailureKind::Conflict => write!(f, "conflict: document already exists"),
            FailureKind::Malformed { reason } => write!(f, "malformed item: {}", reason),
            FailureKind::Unauthorized => write!(f, "unauthorized"),
            FailureKind::DeadlineExceeded => write!(f, "deadline exceeded"),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Errors surfaced to the caller before or instead of a [`crate::BulkResponse`]
///
/// Partial failure is never reported through this type: once the engine starts
/// executing, per-item failures land in the response's failure list. `BulkError`
/// covers the fail-fast paths only.
#[derive(Debug, thiserror::Error)]
pub enum BulkError {
    /// Engine configuration rejected at construction time
    #[error("invalid engine configuration: {message}")]
    Configuration { message: String },

    /// The partition range map could not be obtained or is unusable
    #[error("partition routing unavailable: {message}")]
    Routing { message: String },
}

impl BulkError {
    pub fn configuration(message: impl Into<String>) -> Self {
        BulkError::Configuration {
            message: message.into(),
        }
    }

    pub fn routing(message: impl Into<String>) -> Self {
        BulkError::Routing {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classification() {
        assert_eq!(
            FailureKind::Throttled { retry_after: None }.class(),
            FailureClass::Throttled
        );
        assert_eq!(
            FailureKind::transient("connection reset").class(),
            FailureClass::Transient
        );
        assert_eq!(FailureKind::Conflict.class(), FailureClass::Permanent);
        assert_eq!(
            FailureKind::malformed("missing partition key").class(),
            FailureClass::Permanent
        );
        assert_eq!(FailureKind::DeadlineExceeded.class(), FailureClass::Permanent);
        assert_eq!(FailureKind::Cancelled.class(), FailureClass::Permanent);
    }

    #[test]
    fn test_retryable() {
        assert!(FailureKind::Throttled { retry_after: None }.is_retryable());
        assert!(FailureKind::transient("timeout").is_retryable());
        assert!(!FailureKind::Unauthorized.is_retryable());
    }

    #[test]
    fn test_display() {
        let throttled = FailureKind::Throttled {
            retry_after: Some(Duration::from_millis(250)),
        };
        assert!(format!("{}", throttled).contains("250"));
        assert!(format!("{}", FailureKind::Conflict).contains("conflict"));
    }
}
