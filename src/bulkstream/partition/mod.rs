//! Partition key space model
//!
//! The store's key space is the full 64-bit hash ring. A [`RangeMap`] is a
//! versioned snapshot of how that space is carved into [`PartitionRange`]s;
//! the map is replaced wholesale when the store reports stale routing (for
//! example after a range split).

pub mod router;

pub use router::PartitionRouter;

use serde::{Deserialize, Serialize};

/// Stable 64-bit hash of a partition key: FNV-1a with an avalanche finalizer
///
/// Routing must agree across refreshes of the range map, so the hash cannot
/// depend on per-process seeding. The finalizer matters: ranges select on
/// the high bits, and raw FNV-1a leaves those nearly constant for keys that
/// share a prefix.
pub fn route_hash(key: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xff51_afd7_ed55_8ccd);
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    hash ^= hash >> 33;
    hash
}

/// A contiguous segment of the hashed key space owned by one replica set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionRange {
    /// Stable identifier for this physical range
    pub id: u64,
    /// Inclusive lower bound in the hashed key space
    pub min_inclusive: u64,
    /// Inclusive upper bound in the hashed key space
    pub max_inclusive: u64,
    /// Provisioned capacity budget, in units per second
    pub units_per_second: f64,
}

impl PartitionRange {
    pub fn contains(&self, hash: u64) -> bool {
        hash >= self.min_inclusive && hash <= self.max_inclusive
    }
}

/// A versioned snapshot of all partition ranges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeMap {
    /// Monotonically increasing map version, bumped by the store on splits
    pub version: u64,
    /// Ranges sorted by `min_inclusive`, together covering the whole space
    ranges: Vec<PartitionRange>,
}

impl RangeMap {
    /// Build a map from a set of ranges, sorting and validating coverage
    pub fn new(version: u64, mut ranges: Vec<PartitionRange>) -> Result<Self, String> {
        if ranges.is_empty() {
            return Err("range map has no ranges".to_string());
        }
        ranges.sort_by_key(|r| r.min_inclusive);

        if ranges[0].min_inclusive != 0 {
            return Err("range map does not start at the bottom of the key space".to_string());
        }
        for pair in ranges.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if prev.max_inclusive == u64::MAX || next.min_inclusive != prev.max_inclusive + 1 {
                return Err(format!(
                    "gap or overlap between range {} and range {}",
                    prev.id, next.id
                ));
            }
        }
        if ranges[ranges.len() - 1].max_inclusive != u64::MAX {
            return Err("range map does not reach the top of the key space".to_string());
        }
        for range in &ranges {
            if !(range.units_per_second > 0.0) {
                return Err(format!("range {} has a non-positive budget", range.id));
            }
        }
        Ok(Self { version, ranges })
    }

    /// Split the key space into `count` equal ranges sharing one per-range
    /// budget; handy for tests and local stores
    pub fn uniform(version: u64, count: u32, units_per_second: f64) -> Self {
        assert!(count > 0, "uniform range map needs at least one range");
        let step = u64::MAX / u64::from(count);
        let mut ranges = Vec::with_capacity(count as usize);
        for i in 0..u64::from(count) {
            let min = i * step + if i == 0 { 0 } else { 1 };
            let max = if i == u64::from(count) - 1 {
                u64::MAX
            } else {
                (i + 1) * step
            };
            ranges.push(PartitionRange {
                id: i,
                min_inclusive: min,
                max_inclusive: max,
                units_per_second,
            });
        }
        // Coverage is correct by construction
        Self { version, ranges }
    }

    pub fn ranges(&self) -> &[PartitionRange] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Find the range owning a hashed key
    pub fn range_for_hash(&self, hash: u64) -> &PartitionRange {
        let idx = self
            .ranges
            .partition_point(|r| r.max_inclusive < hash);
        // Validated maps cover the whole space, so idx is always in bounds
        &self.ranges[idx.min(self.ranges.len() - 1)]
    }

    /// Find the range owning a partition key
    pub fn range_for_key(&self, key: &str) -> &PartitionRange {
        self.range_for_hash(route_hash(key))
    }
}
