//! Partition-homogeneous batching
//!
//! The [`Batcher`] accumulates items per partition range and closes a
//! [`SubBatch`] when either the item-count or the byte-size ceiling is hit,
//! whichever comes first. Draining yields closed batches in close order,
//! then flushes whatever is still open.

use crate::bulkstream::config::BatchLimits;
use crate::bulkstream::item::Item;
use crate::bulkstream::partition::PartitionRange;
use std::collections::{HashMap, VecDeque};

/// A bounded, single-range group of items sent in one transport call
#[derive(Debug, Clone)]
pub struct SubBatch {
    range: PartitionRange,
    items: Vec<Item>,
    bytes: usize,
}

impl SubBatch {
    fn new(range: PartitionRange) -> Self {
        Self {
            range,
            items: Vec::new(),
            bytes: 0,
        }
    }

    pub fn range(&self) -> &PartitionRange {
        &self.range
    }

    pub fn range_id(&self) -> u64 {
        self.range.id
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn into_items(self) -> Vec<Item> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn byte_size(&self) -> usize {
        self.bytes
    }

    fn push(&mut self, item: Item) {
        self.bytes += item.size_bytes();
        self.items.push(item);
    }
}

/// Accumulates items into per-range sub-batches
pub struct Batcher {
    limits: BatchLimits,
    open: HashMap<u64, SubBatch>,
    closed: VecDeque<SubBatch>,
}

impl Batcher {
    pub fn new(limits: BatchLimits) -> Self {
        Self {
            limits,
            open: HashMap::new(),
            closed: VecDeque::new(),
        }
    }

    /// Add an item under the range that owns its partition key
    ///
    /// An item whose size alone exceeds the byte ceiling still ships, as a
    /// sub-batch of one; the store enforces its own hard request limit.
    pub fn add(&mut self, item: Item, range: &PartitionRange) {
        let open = self
            .open
            .entry(range.id)
            .or_insert_with(|| SubBatch::new(range.clone()));

        // Close on byte ceiling before the item joins, so batches stay under
        // the ceiling whenever the item itself fits in one
        if !open.is_empty() && open.bytes + item.size_bytes() > self.limits.max_bytes {
            let full = std::mem::replace(open, SubBatch::new(range.clone()));
            self.closed.push_back(full);
        }

        open.push(item);
        let at_item_ceiling = open.len() >= self.limits.max_items;

        if at_item_ceiling {
            if let Some(full) = self.open.remove(&range.id) {
                self.closed.push_back(full);
            }
        }
    }

    /// Number of items currently buffered, open and closed
    pub fn pending_items(&self) -> usize {
        self.open.values().map(SubBatch::len).sum::<usize>()
            + self.closed.iter().map(SubBatch::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.closed.is_empty() && self.open.values().all(SubBatch::is_empty)
    }

    /// Drain all buffered work: closed batches first (in close order), then
    /// the remaining open batches. Draining again before more `add` calls
    /// yields nothing.
    pub fn drain(&mut self) -> impl Iterator<Item = SubBatch> + '_ {
        for (_, batch) in self.open.drain() {
            if !batch.is_empty() {
                self.closed.push_back(batch);
            }
        }
        self.closed.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_range(id: u64) -> PartitionRange {
        PartitionRange {
            id,
            min_inclusive: 0,
            max_inclusive: u64::MAX,
            units_per_second: 1000.0,
        }
    }

    fn small_item(id: &str) -> Item {
        Item::document("pk", id, json!({"v": 1}))
    }

    #[test]
    fn test_closes_on_item_ceiling() {
        let mut batcher = Batcher::new(BatchLimits {
            max_items: 3,
            max_bytes: 1 << 20,
        });
        let range = test_range(0);
        for i in 0..7 {
            batcher.add(small_item(&format!("doc-{}", i)), &range);
        }
        let batches: Vec<_> = batcher.drain().collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(batches[1].len(), 3);
        assert_eq!(batches[2].len(), 1);
    }

    #[test]
    fn test_closes_on_byte_ceiling() {
        let item = small_item("doc-0");
        let per_item = item.size_bytes();
        let mut batcher = Batcher::new(BatchLimits {
            max_items: 100,
            max_bytes: per_item * 2,
        });
        let range = test_range(0);
        for i in 0..5 {
            batcher.add(small_item(&format!("doc-{}", i)), &range);
        }
        let batches: Vec<_> = batcher.drain().collect();
        assert!(batches.iter().all(|b| b.byte_size() <= per_item * 2));
        assert_eq!(batches.iter().map(SubBatch::len).sum::<usize>(), 5);
    }

    #[test]
    fn test_oversized_item_ships_alone() {
        let mut batcher = Batcher::new(BatchLimits {
            max_items: 100,
            max_bytes: 4,
        });
        let range = test_range(0);
        batcher.add(small_item("a-very-long-doc-id"), &range);
        let batches: Vec<_> = batcher.drain().collect();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
    }

    #[test]
    fn test_never_mixes_ranges() {
        let mut batcher = Batcher::new(BatchLimits {
            max_items: 10,
            max_bytes: 1 << 20,
        });
        batcher.add(small_item("a"), &test_range(1));
        batcher.add(small_item("b"), &test_range(2));
        batcher.add(small_item("c"), &test_range(1));
        let batches: Vec<_> = batcher.drain().collect();
        assert_eq!(batches.len(), 2);
        let by_range: std::collections::HashMap<u64, usize> =
            batches.iter().map(|b| (b.range_id(), b.len())).collect();
        assert_eq!(by_range[&1], 2);
        assert_eq!(by_range[&2], 1);
    }

    #[test]
    fn test_submission_order_preserved() {
        let mut batcher = Batcher::new(BatchLimits {
            max_items: 10,
            max_bytes: 1 << 20,
        });
        let range = test_range(0);
        for i in 0..5 {
            batcher.add(small_item(&format!("doc-{}", i)), &range);
        }
        let batch = batcher.drain().next().unwrap();
        let ids: Vec<_> = batch.items().iter().map(|i| i.id().to_string()).collect();
        assert_eq!(ids, vec!["doc-0", "doc-1", "doc-2", "doc-3", "doc-4"]);
    }

    #[test]
    fn test_drain_exhausts() {
        let mut batcher = Batcher::new(BatchLimits::default());
        batcher.add(small_item("a"), &test_range(0));
        assert_eq!(batcher.pending_items(), 1);
        assert_eq!(batcher.drain().count(), 1);
        assert_eq!(batcher.drain().count(), 0);
        assert_eq!(batcher.pending_items(), 0);
        assert!(batcher.is_empty());
    }
}
