//! Partition routing with a cached, lazily refreshed range map
//!
//! The router holds the last range map fetched from the store and resolves
//! every key against it without further I/O. When a transport call reports
//! stale routing, callers ask for a refresh; refreshes are single-flighted so
//! a burst of stale signals from concurrent sub-batches fetches the map once.

use crate::bulkstream::error::BulkError;
use crate::bulkstream::partition::{PartitionRange, RangeMap};
use crate::bulkstream::transport::StoreTransport;
use log::{debug, info};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub struct PartitionRouter {
    transport: Arc<dyn StoreTransport>,
    map: RwLock<Arc<RangeMap>>,
    /// Serializes refresh attempts; the version check under this lock is what
    /// collapses concurrent stale signals into a single fetch
    refresh_gate: Mutex<()>,
}

impl PartitionRouter {
    /// Fetch the initial range map and build a router over it
    pub async fn new(transport: Arc<dyn StoreTransport>) -> Result<Self, BulkError> {
        let map = transport
            .fetch_range_map()
            .await
            .map_err(|e| BulkError::routing(format!("initial range map fetch failed: {}", e)))?;
        info!(
            "Partition router initialized with {} ranges at version {}",
            map.len(),
            map.version
        );
        Ok(Self {
            transport,
            map: RwLock::new(Arc::new(map)),
            refresh_gate: Mutex::new(()),
        })
    }

    /// The currently cached range map
    pub async fn current(&self) -> Arc<RangeMap> {
        Arc::clone(&*self.map.read().await)
    }

    /// Version of the currently cached range map
    pub async fn version(&self) -> u64 {
        self.map.read().await.version
    }

    /// Resolve a partition key to its owning range
    pub async fn resolve(&self, key: &str) -> PartitionRange {
        self.map.read().await.range_for_key(key).clone()
    }

    /// Replace the cached map after a stale-routing signal
    ///
    /// `observed_version` is the version the caller was routing against when
    /// the store signalled staleness. If another caller already refreshed past
    /// it, the cached map is returned without touching the transport.
    pub async fn refresh(&self, observed_version: u64) -> Result<Arc<RangeMap>, BulkError> {
        let _gate = self.refresh_gate.lock().await;

        {
            let current = self.map.read().await;
            if current.version != observed_version {
                debug!(
                    "Skipping range map refresh: cached version {} already newer than {}",
                    current.version, observed_version
                );
                return Ok(Arc::clone(&current));
            }
        }

        let fresh = self
            .transport
            .fetch_range_map()
            .await
            .map_err(|e| BulkError::routing(format!("range map refresh failed: {}", e)))?;
        info!(
            "Range map refreshed: version {} -> {} ({} ranges)",
            observed_version,
            fresh.version,
            fresh.len()
        );
        let fresh = Arc::new(fresh);
        *self.map.write().await = Arc::clone(&fresh);
        Ok(fresh)
    }
}
