//! Bulk operation orchestration
//!
//! The engine turns a submitted item set into per-range sub-batches and
//! drives them to a terminal state: resolve and batch, admit against the
//! per-range budget, deliver, route failures through the retry coordinator,
//! and aggregate everything into one [`BulkResponse`].
//!
//! Dispatch is partition-parallel with a global in-flight bound; within one
//! range sub-batches go out strictly one at a time, in the order they were
//! closed. The dispatch loop is single-owner: workers only deliver batches
//! and report back, so retry state and queue bookkeeping need no locks.

use crate::bulkstream::batch::{Batcher, SubBatch};
use crate::bulkstream::cancel::CancelToken;
use crate::bulkstream::config::EngineConfig;
use crate::bulkstream::error::{BulkError, FailureKind};
use crate::bulkstream::governor::{Admission, ThroughputGovernor};
use crate::bulkstream::item::{BulkMode, Item};
use crate::bulkstream::partition::PartitionRouter;
use crate::bulkstream::progress::{NullProgressSink, ProgressSink, ProgressSnapshot};
use crate::bulkstream::response::{BulkResponse, ItemFailure, ResponseAccumulator};
use crate::bulkstream::retry::{RetryCoordinator, RetryDecision};
use crate::bulkstream::transport::{ItemOutcome, StoreTransport, TransportError};
use log::{debug, error, info, warn};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinSet;

/// Partition-aware bulk import/delete executor
///
/// One engine instance serves any number of sequential `execute` invocations
/// against the same store; the per-range throughput budget carries across
/// them. Each invocation is idempotent per item: items that succeeded in an
/// earlier invocation are never re-sent as long as the caller excludes them
/// from the next item set (the engine keeps no memory of earlier
/// invocations by design). Concurrent invocations share the budget but are
/// serialized per range only within themselves.
pub struct BulkOperationEngine {
    config: EngineConfig,
    transport: Arc<dyn StoreTransport>,
    router: PartitionRouter,
    governor: Arc<ThroughputGovernor>,
    progress: Arc<dyn ProgressSink>,
}

impl BulkOperationEngine {
    /// Build an engine, fetching the initial partition range map
    ///
    /// Fails fast on invalid configuration or an unreachable range map; no
    /// later call path reports configuration problems.
    pub async fn new(
        config: EngineConfig,
        transport: Arc<dyn StoreTransport>,
    ) -> Result<Self, BulkError> {
        config.validate()?;
        let router = PartitionRouter::new(Arc::clone(&transport)).await?;
        Ok(Self {
            config,
            transport,
            router,
            governor: Arc::new(ThroughputGovernor::new()),
            progress: Arc::new(NullProgressSink),
        })
    }

    /// Replace the default no-op progress sink
    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute a bulk operation to completion (or deadline)
    pub async fn execute(&self, items: Vec<Item>, mode: BulkMode) -> BulkResponse {
        self.execute_with_cancellation(items, mode, CancelToken::new())
            .await
    }

    /// Execute a bulk operation that an external party may cancel
    ///
    /// On cancellation no further sub-batches are admitted, in-flight
    /// sub-batches complete, and everything still queued is reported as
    /// failed with reason `Cancelled`. The response is always complete:
    /// `succeeded + failed == submitted`.
    pub async fn execute_with_cancellation(
        &self,
        items: Vec<Item>,
        mode: BulkMode,
        cancel: CancelToken,
    ) -> BulkResponse {
        let submitted = items.len();
        let deadline = self.config.operation_deadline.map(|d| Instant::now() + d);
        let accumulator = Arc::new(ResponseAccumulator::new());

        info!(
            "Starting bulk {} of {} items (max {} in flight)",
            mode.label(),
            submitted,
            self.config.max_in_flight
        );

        let reporter = self.spawn_progress_reporter(Arc::clone(&accumulator));

        let mut run = Invocation {
            engine: self,
            mode,
            cancel,
            deadline,
            accumulator: Arc::clone(&accumulator),
            batcher: Batcher::new(self.config.batch.clone()),
            retry: RetryCoordinator::new(self.config.retry.clone(), deadline),
            retry_heap: BinaryHeap::new(),
            queues: HashMap::new(),
            in_flight: HashSet::new(),
            join_set: JoinSet::new(),
            semaphore: Arc::new(Semaphore::new(self.config.max_in_flight)),
            outstanding: 0,
            stop_kind: None,
            seq: 0,
        };

        run.admit_items(items).await;
        run.drive().await;

        let (stop_tx, handle) = reporter;
        let _ = stop_tx.send(());
        let _ = handle.await;

        let response = accumulator.finish();
        if response.total_items() as usize != submitted {
            // The counting invariant is load-bearing for callers; a breach is
            // an engine bug worth shouting about, not silently returning
            error!(
                "Bulk {} accounting mismatch: {} submitted, {} resolved",
                run.mode.label(),
                submitted,
                response.total_items()
            );
        }
        info!("Bulk {} finished: {}", run.mode.label(), response);
        self.progress.report(ProgressSnapshot::capture(&accumulator)).await;
        response
    }

    fn spawn_progress_reporter(
        &self,
        accumulator: Arc<ResponseAccumulator>,
    ) -> (oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let sink = Arc::clone(&self.progress);
        let interval = self.config.progress_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of a tokio interval fires immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        sink.report(ProgressSnapshot::capture(&accumulator)).await;
                    }
                }
            }
        });
        (stop_tx, handle)
    }
}

/// An item parked until its retry backoff elapses
struct DelayedItem {
    ready_at: Instant,
    seq: u64,
    item: Item,
}

impl PartialEq for DelayedItem {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl Eq for DelayedItem {}

impl PartialOrd for DelayedItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedItem {
    // Reversed so the BinaryHeap pops the earliest ready time first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

enum WorkerOutcome {
    /// The transport call ran; per-item results or a request-level error
    Delivered(Result<Vec<ItemOutcome>, TransportError>),
    /// Cancellation or deadline interrupted the admission wait
    NotAdmitted,
}

struct WorkerReport {
    range_id: u64,
    map_version: u64,
    items: Vec<Item>,
    outcome: WorkerOutcome,
}

/// Mutable state of one `execute` invocation, owned by the dispatch loop
struct Invocation<'a> {
    engine: &'a BulkOperationEngine,
    mode: BulkMode,
    cancel: CancelToken,
    deadline: Option<Instant>,
    accumulator: Arc<ResponseAccumulator>,
    batcher: Batcher,
    retry: RetryCoordinator,
    retry_heap: BinaryHeap<DelayedItem>,
    /// Closed sub-batches awaiting dispatch, FIFO per range
    queues: HashMap<u64, VecDeque<SubBatch>>,
    /// Ranges with a sub-batch currently being delivered
    in_flight: HashSet<u64>,
    join_set: JoinSet<WorkerReport>,
    semaphore: Arc<Semaphore>,
    /// Items not yet in a terminal state
    outstanding: usize,
    /// Set once cancellation or the deadline fires; drives finalization
    stop_kind: Option<FailureKind>,
    seq: u64,
}

impl<'a> Invocation<'a> {
    /// Validate, deduplicate, and batch the submitted items
    async fn admit_items(&mut self, items: Vec<Item>) {
        let mut seen: HashSet<String> = HashSet::with_capacity(items.len());
        for mut item in items {
            if !item.has_id() {
                match self.mode {
                    BulkMode::Import(options) if options.auto_generate_ids => {
                        item.assign_id(uuid::Uuid::new_v4().to_string());
                    }
                    _ => {
                        self.accumulator.record_failure(ItemFailure {
                            item_id: String::new(),
                            partition_key: item.partition_key().to_string(),
                            kind: FailureKind::malformed("item has no id"),
                            attempts: 0,
                        });
                        continue;
                    }
                }
            }
            if !seen.insert(item.id().to_string()) {
                self.accumulator.record_failure(ItemFailure {
                    item_id: item.id().to_string(),
                    partition_key: item.partition_key().to_string(),
                    kind: FailureKind::malformed("duplicate id in submission"),
                    attempts: 0,
                });
                continue;
            }
            let range = self.engine.router.resolve(item.partition_key()).await;
            self.batcher.add(item, &range);
            self.outstanding += 1;
        }
    }

    /// Run the dispatch loop until every item is terminal or a stop signal
    /// has been fully honored
    async fn drive(&mut self) {
        loop {
            if self.outstanding == 0 {
                break;
            }

            self.check_stop_signals();
            let stopping = self.stop_kind.is_some();

            if stopping && self.join_set.is_empty() {
                break;
            }

            if !stopping {
                self.release_ready_retries().await;
                self.pump_closed_batches();
                self.dispatch_ready_ranges().await;
            }

            if self.join_set.is_empty() {
                let wait = self.next_wakeup();
                tokio::time::sleep(wait).await;
                continue;
            }

            match tokio::time::timeout(self.engine.config.poll_interval, self.join_set.join_next())
                .await
            {
                Err(_elapsed) => {} // poll tick: re-check cancel and deadline
                Ok(None) => {}
                Ok(Some(Err(join_err))) => {
                    error!("Bulk worker task failed to join: {}", join_err);
                }
                Ok(Some(Ok(report))) => self.handle_report(report).await,
            }
        }

        self.finalize().await;
    }

    fn check_stop_signals(&mut self) {
        if self.stop_kind.is_some() {
            return;
        }
        if self.cancel.is_cancelled() {
            info!("Bulk {} cancelled; letting in-flight work complete", self.mode.label());
            self.stop_kind = Some(FailureKind::Cancelled);
        } else if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                warn!(
                    "Bulk {} deadline elapsed with {} items unresolved",
                    self.mode.label(),
                    self.outstanding
                );
                self.stop_kind = Some(FailureKind::DeadlineExceeded);
            }
        }
    }

    /// Move retries whose backoff has elapsed back into the batcher
    async fn release_ready_retries(&mut self) {
        let now = Instant::now();
        while let Some(head) = self.retry_heap.peek() {
            if head.ready_at > now {
                break;
            }
            let delayed = self.retry_heap.pop().expect("peeked entry vanished");
            // The map may have been refreshed since the item last failed
            let range = self
                .engine
                .router
                .resolve(delayed.item.partition_key())
                .await;
            self.batcher.add(delayed.item, &range);
        }
    }

    fn pump_closed_batches(&mut self) {
        for batch in self.batcher.drain() {
            self.queues
                .entry(batch.range_id())
                .or_default()
                .push_back(batch);
        }
    }

    /// Spawn a worker for every range that has queued work and nothing in
    /// flight; the semaphore bounds how many actually hit the transport
    async fn dispatch_ready_ranges(&mut self) {
        let ready: Vec<u64> = self
            .queues
            .iter()
            .filter(|(range_id, queue)| {
                !queue.is_empty() && !self.in_flight.contains(*range_id)
            })
            .map(|(range_id, _)| *range_id)
            .collect();
        if ready.is_empty() {
            return;
        }

        // Version the batches were routed against; lets the router collapse
        // concurrent stale-routing signals into a single refresh
        let map_version = self.engine.router.version().await;

        for range_id in ready {
            let batch = match self.queues.get_mut(&range_id).and_then(VecDeque::pop_front) {
                Some(batch) => batch,
                None => continue,
            };
            self.in_flight.insert(range_id);
            self.spawn_worker(batch, map_version);
        }
    }

    fn spawn_worker(&mut self, batch: SubBatch, map_version: u64) {
        let transport = Arc::clone(&self.engine.transport);
        let governor = Arc::clone(&self.engine.governor);
        let semaphore = Arc::clone(&self.semaphore);
        let cancel = self.cancel.clone();
        let deadline = self.deadline;
        let poll_interval = self.engine.config.poll_interval;
        let estimated_cost = self.engine.config.estimated_units_per_item * batch.len() as f64;
        let mode = self.mode;

        self.join_set.spawn(deliver_batch(
            batch,
            mode,
            transport,
            governor,
            semaphore,
            cancel,
            deadline,
            poll_interval,
            estimated_cost,
            map_version,
        ));
    }

    async fn handle_report(&mut self, report: WorkerReport) {
        self.in_flight.remove(&report.range_id);

        match report.outcome {
            WorkerOutcome::NotAdmitted => {
                // Only happens once a stop signal fired; keep the items
                // pending so finalization accounts for them
                for item in report.items {
                    let range = self.engine.router.resolve(item.partition_key()).await;
                    self.batcher.add(item, &range);
                }
            }
            WorkerOutcome::Delivered(Ok(outcomes)) => {
                let mut by_id: HashMap<String, Item> = report
                    .items
                    .into_iter()
                    .map(|item| (item.id().to_string(), item))
                    .collect();

                for outcome in outcomes {
                    let item = match by_id.remove(outcome.item_id()) {
                        Some(item) => item,
                        None => {
                            warn!(
                                "Store returned an outcome for unknown item '{}'",
                                outcome.item_id()
                            );
                            continue;
                        }
                    };
                    if outcome.is_success() {
                        self.accumulator.record_success(outcome.units_consumed());
                        self.retry.clear(item.id());
                        self.outstanding -= 1;
                    } else {
                        let kind = outcome.into_error().unwrap_or_else(|| {
                            FailureKind::transient("store reported failure without a reason")
                        });
                        self.route_failure(item, kind).await;
                    }
                }

                // Items the store did not account for are treated as failed
                // sends; anything else would silently drop them
                for (_, item) in by_id {
                    warn!("No outcome returned for item '{}'", item.id());
                    self.route_failure(item, FailureKind::transient("no outcome returned"))
                        .await;
                }
            }
            WorkerOutcome::Delivered(Err(TransportError::Throttled { retry_after })) => {
                debug!(
                    "Range {} sub-batch throttled ({} items)",
                    report.range_id,
                    report.items.len()
                );
                for item in report.items {
                    self.route_failure(item, FailureKind::Throttled { retry_after })
                        .await;
                }
            }
            WorkerOutcome::Delivered(Err(TransportError::StaleRouting)) => {
                self.handle_stale_routing(report.map_version, report.items)
                    .await;
            }
            WorkerOutcome::Delivered(Err(TransportError::Transient { message })) => {
                for item in report.items {
                    self.route_failure(item, FailureKind::transient(message.clone()))
                        .await;
                }
            }
        }
    }

    /// Refresh the range map and re-route everything not in flight
    ///
    /// Stale routing is absorbed here: affected items do not consume retry
    /// attempts. A failed refresh degrades to a transient failure so the
    /// retry coordinator paces the next attempt.
    async fn handle_stale_routing(&mut self, observed_version: u64, items: Vec<Item>) {
        match self.engine.router.refresh(observed_version).await {
            Ok(_) => {
                let mut pending: Vec<Item> = items;
                for batch in self.batcher.drain() {
                    pending.extend(batch.into_items());
                }
                for (_, queue) in self.queues.iter_mut() {
                    for batch in queue.drain(..) {
                        pending.extend(batch.into_items());
                    }
                }
                info!(
                    "Re-routing {} pending items after range map refresh",
                    pending.len()
                );
                for item in pending {
                    let range = self.engine.router.resolve(item.partition_key()).await;
                    self.batcher.add(item, &range);
                }
            }
            Err(e) => {
                warn!("Range map refresh failed: {}", e);
                for item in items {
                    self.route_failure(item, FailureKind::transient("routing refresh failed"))
                        .await;
                }
            }
        }
    }

    async fn route_failure(&mut self, item: Item, kind: FailureKind) {
        if let Some(stop) = self.stop_kind.clone() {
            if kind.is_retryable() {
                // No more retries once stopping; the stop reason wins
                self.record_terminal_failure(item, stop);
                return;
            }
        }
        match self.retry.on_failure(item.id(), kind) {
            RetryDecision::Retry { after } => {
                self.seq += 1;
                self.retry_heap.push(DelayedItem {
                    ready_at: Instant::now() + after,
                    seq: self.seq,
                    item,
                });
            }
            RetryDecision::GiveUp { reason } => {
                self.record_terminal_failure(item, reason);
            }
        }
    }

    fn record_terminal_failure(&mut self, item: Item, kind: FailureKind) {
        let attempts = self.retry.attempts(item.id());
        self.accumulator.record_failure(ItemFailure {
            item_id: item.id().to_string(),
            partition_key: item.partition_key().to_string(),
            kind,
            attempts,
        });
        self.retry.clear(item.id());
        self.outstanding -= 1;
    }

    /// Sleep target when nothing is in flight: the next retry release, the
    /// deadline, or one poll interval, whichever comes first
    fn next_wakeup(&self) -> Duration {
        let now = Instant::now();
        let mut wake = now + self.engine.config.poll_interval;
        if let Some(head) = self.retry_heap.peek() {
            wake = wake.min(head.ready_at);
        }
        if let Some(deadline) = self.deadline {
            wake = wake.min(deadline);
        }
        wake.saturating_duration_since(now)
            .max(Duration::from_millis(1))
    }

    /// Drain remaining workers and mark everything still pending with the
    /// stop reason, so every submitted item reaches a terminal state
    async fn finalize(&mut self) {
        while let Some(joined) = self.join_set.join_next().await {
            match joined {
                Ok(report) => self.handle_report(report).await,
                Err(join_err) => error!("Bulk worker task failed to join: {}", join_err),
            }
        }

        if self.outstanding == 0 {
            return;
        }

        let stop = match self.stop_kind.clone() {
            Some(kind) => kind,
            None => {
                // drive() only exits with work left when a stop signal fired
                error!("Finalizing {} items without a stop reason", self.outstanding);
                FailureKind::Cancelled
            }
        };

        let mut leftovers: Vec<Item> = Vec::new();
        while let Some(delayed) = self.retry_heap.pop() {
            leftovers.push(delayed.item);
        }
        for batch in self.batcher.drain() {
            leftovers.extend(batch.into_items());
        }
        let range_ids: Vec<u64> = self.queues.keys().copied().collect();
        for range_id in range_ids {
            if let Some(queue) = self.queues.remove(&range_id) {
                for batch in queue {
                    leftovers.extend(batch.into_items());
                }
            }
        }

        info!(
            "Marking {} unresolved items as {}",
            leftovers.len(),
            stop
        );
        for item in leftovers {
            self.record_terminal_failure(item, stop.clone());
        }
    }
}

/// Deliver one sub-batch: wait out admission, send, settle the budget
#[allow(clippy::too_many_arguments)]
async fn deliver_batch(
    batch: SubBatch,
    mode: BulkMode,
    transport: Arc<dyn StoreTransport>,
    governor: Arc<ThroughputGovernor>,
    semaphore: Arc<Semaphore>,
    cancel: CancelToken,
    deadline: Option<Instant>,
    poll_interval: Duration,
    estimated_cost: f64,
    map_version: u64,
) -> WorkerReport {
    let range_id = batch.range_id();

    let not_admitted = |batch: SubBatch| WorkerReport {
        range_id,
        map_version,
        items: batch.into_items(),
        outcome: WorkerOutcome::NotAdmitted,
    };

    let stopped = |cancel: &CancelToken| {
        cancel.is_cancelled() || deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    };

    if stopped(&cancel) {
        return not_admitted(batch);
    }

    let _permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(_closed) => return not_admitted(batch),
    };

    loop {
        if stopped(&cancel) {
            return not_admitted(batch);
        }
        match governor.admit(batch.range(), estimated_cost) {
            Admission::Granted => break,
            Admission::Wait(wait) => {
                tokio::time::sleep(wait.min(poll_interval)).await;
            }
        }
    }

    debug!(
        "Delivering {} {} items to range {} ({} bytes)",
        batch.len(),
        mode.label(),
        range_id,
        batch.byte_size()
    );

    let result = transport.send(&batch, &mode).await;

    match &result {
        Ok(outcomes) => {
            let actual: f64 = outcomes.iter().map(|o| o.units_consumed()).sum();
            governor.settle(range_id, estimated_cost, actual);
        }
        Err(TransportError::Throttled { retry_after }) => {
            governor.throttle(range_id, *retry_after);
        }
        Err(_) => {
            // Nothing was charged for a failed request; return the estimate
            governor.settle(range_id, estimated_cost, 0.0);
        }
    }

    WorkerReport {
        range_id,
        map_version,
        items: batch.into_items(),
        outcome: WorkerOutcome::Delivered(result),
    }
}
