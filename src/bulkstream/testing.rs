//! In-memory store transport for tests and examples
//!
//! [`MockStore`] simulates a partitioned document store without any network:
//! scripted throttling, stale-routing signals, per-item failures, and
//! configurable latency. It records everything it was asked to do so tests
//! can assert on delivery counts and concurrency.

use crate::bulkstream::batch::SubBatch;
use crate::bulkstream::error::FailureKind;
use crate::bulkstream::item::BulkMode;
use crate::bulkstream::partition::{route_hash, RangeMap};
use crate::bulkstream::transport::{ItemOutcome, StoreTransport, TransportError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

struct MockState {
    /// Range maps returned by successive fetches; the last one repeats
    maps: Vec<RangeMap>,
    fetch_calls: usize,
    /// Send calls still to reject with a throttle
    throttles_remaining: u32,
    throttle_retry_after: Option<Duration>,
    /// Send calls still to reject with a stale-routing signal
    stale_remaining: u32,
    /// Per-item scripted failures: id -> (kind, remaining occurrences)
    item_failures: HashMap<String, (FailureKind, u32)>,
    /// id -> number of times the store confirmed it
    applied: HashMap<String, u32>,
    /// Every delivered sub-batch, as (range id, item ids)
    sent_log: Vec<(u64, Vec<String>)>,
}

/// Scripted in-memory transport
pub struct MockStore {
    state: Mutex<MockState>,
    latency: Duration,
    unit_cost: f64,
    send_calls: AtomicUsize,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
}

impl MockStore {
    pub fn new(map: RangeMap) -> Self {
        Self {
            state: Mutex::new(MockState {
                maps: vec![map],
                fetch_calls: 0,
                throttles_remaining: 0,
                throttle_retry_after: None,
                stale_remaining: 0,
                item_failures: HashMap::new(),
                applied: HashMap::new(),
                sent_log: Vec::new(),
            }),
            latency: Duration::ZERO,
            unit_cost: 1.0,
            send_calls: AtomicUsize::new(0),
            concurrent: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
        }
    }

    /// Simulated per-request latency
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Units charged per confirmed item
    pub fn with_unit_cost(mut self, unit_cost: f64) -> Self {
        self.unit_cost = unit_cost;
        self
    }

    /// Reject the first `count` send calls with a throttle
    pub fn with_initial_throttles(self, count: u32, retry_after: Option<Duration>) -> Self {
        {
            let mut state = self.state.lock().expect("mock state lock poisoned");
            state.throttles_remaining = count;
            state.throttle_retry_after = retry_after;
        }
        self
    }

    /// Reject the first `count` send calls with a stale-routing signal, and
    /// serve `refreshed` from the next range map fetch onward
    pub fn with_stale_routing(self, count: u32, refreshed: RangeMap) -> Self {
        {
            let mut state = self.state.lock().expect("mock state lock poisoned");
            state.stale_remaining = count;
            state.maps.push(refreshed);
        }
        self
    }

    /// Fail an item with `kind` for its first `times` deliveries
    pub fn fail_item(self, item_id: impl Into<String>, kind: FailureKind, times: u32) -> Self {
        {
            let mut state = self.state.lock().expect("mock state lock poisoned");
            state.item_failures.insert(item_id.into(), (kind, times));
        }
        self
    }

    /// How many times the store confirmed this item
    pub fn success_count(&self, item_id: &str) -> u32 {
        let state = self.state.lock().expect("mock state lock poisoned");
        state.applied.get(item_id).copied().unwrap_or(0)
    }

    /// Every item id the store was ever asked to write, in delivery order
    pub fn delivered_ids(&self) -> Vec<String> {
        let state = self.state.lock().expect("mock state lock poisoned");
        state
            .sent_log
            .iter()
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect()
    }

    pub fn total_sends(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.state.lock().expect("mock state lock poisoned").fetch_calls
    }

    /// Highest number of sends observed at the same instant
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreTransport for MockStore {
    async fn send(
        &self,
        batch: &SubBatch,
        _mode: &BulkMode,
    ) -> Result<Vec<ItemOutcome>, TransportError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        let now_active = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now_active, Ordering::SeqCst);

        // A real store would reject a request whose items do not belong to
        // the addressed range; enforce the same contract here
        let misrouted = batch
            .items()
            .iter()
            .any(|item| !batch.range().contains(route_hash(item.partition_key())));
        if misrouted {
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            return Err(TransportError::transient("sub-batch spans partition ranges"));
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let result = {
            let mut state = self.state.lock().expect("mock state lock poisoned");

            if state.stale_remaining > 0 {
                state.stale_remaining -= 1;
                Err(TransportError::StaleRouting)
            } else if state.throttles_remaining > 0 {
                state.throttles_remaining -= 1;
                Err(TransportError::Throttled {
                    retry_after: state.throttle_retry_after,
                })
            } else {
                let mut outcomes = Vec::with_capacity(batch.len());
                let mut delivered = Vec::with_capacity(batch.len());
                for item in batch.items() {
                    delivered.push(item.id().to_string());
                    let scripted = match state.item_failures.get_mut(item.id()) {
                        Some((kind, remaining)) if *remaining > 0 => {
                            *remaining -= 1;
                            Some(kind.clone())
                        }
                        _ => None,
                    };
                    match scripted {
                        Some(kind) => outcomes.push(ItemOutcome::failure(item.id(), kind)),
                        None => {
                            *state.applied.entry(item.id().to_string()).or_insert(0) += 1;
                            outcomes.push(ItemOutcome::success(item.id(), self.unit_cost));
                        }
                    }
                }
                state.sent_log.push((batch.range_id(), delivered));
                Ok(outcomes)
            }
        };

        self.concurrent.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn fetch_range_map(&self) -> Result<RangeMap, TransportError> {
        let mut state = self.state.lock().expect("mock state lock poisoned");
        let idx = state.fetch_calls.min(state.maps.len() - 1);
        state.fetch_calls += 1;
        Ok(state.maps[idx].clone())
    }
}
