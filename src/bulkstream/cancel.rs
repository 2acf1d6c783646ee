//! Cooperative cancellation
//!
//! A [`CancelToken`] is checked at every suspension point: admission waits,
//! retry backoffs, and the dispatch loop. Cancelling stops new sub-batches
//! from being admitted; in-flight sub-batches complete and everything still
//! queued is reported as failed with reason `Cancelled`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Clonable cancellation handle shared between callers and workers
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    sender: broadcast::Sender<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            sender,
        }
    }

    /// Request cancellation; idempotent
    pub fn cancel(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            // No receivers is fine: the flag alone is authoritative
            let _ = self.sender.send(());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Receiver that fires once when cancellation is requested
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_flag_transitions() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_subscribers_are_notified() {
        let token = CancelToken::new();
        let mut rx = token.subscribe();

        let remote = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            remote.cancel();
        });

        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for cancellation")
            .expect("channel closed");
        assert!(token.is_cancelled());
    }
}
