//! Work items and operation modes
//!
//! An [`Item`] is one unit of bulk work: a document payload for imports, or a
//! `(partition key, id)` tombstone for deletes. Items are immutable once
//! submitted; the engine moves them between batches but never rewrites them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unit of bulk work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    id: String,
    partition_key: String,
    /// Serialized document body; absent for deletes
    payload: Option<Value>,
    size_bytes: usize,
}

impl Item {
    /// Create an import item carrying a document payload
    ///
    /// The byte size is taken from the serialized form of the payload plus the
    /// key material, and is what the batcher counts against its byte ceiling.
    pub fn document(partition_key: impl Into<String>, id: impl Into<String>, payload: Value) -> Self {
        let partition_key = partition_key.into();
        let id = id.into();
        let size_bytes = estimate_size(&partition_key, &id, Some(&payload));
        Self {
            id,
            partition_key,
            payload: Some(payload),
            size_bytes,
        }
    }

    /// Create a delete item identified by partition key and id
    pub fn tombstone(partition_key: impl Into<String>, id: impl Into<String>) -> Self {
        let partition_key = partition_key.into();
        let id = id.into();
        let size_bytes = estimate_size(&partition_key, &id, None);
        Self {
            id,
            partition_key,
            payload: None,
            size_bytes,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Whether this item has an id; items without one are only admissible
    /// when the import options allow id generation
    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    pub(crate) fn assign_id(&mut self, id: String) {
        self.id = id;
    }
}

fn estimate_size(partition_key: &str, id: &str, payload: Option<&Value>) -> usize {
    let body = payload
        .map(|v| serde_json::to_vec(v).map(|b| b.len()).unwrap_or(0))
        .unwrap_or(0);
    partition_key.len() + id.len() + body
}

/// Options for bulk import operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOptions {
    /// Replace existing documents instead of failing with a conflict
    pub upsert: bool,
    /// Assign a generated unique id to items submitted without one
    pub auto_generate_ids: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            upsert: false,
            auto_generate_ids: false,
        }
    }
}

impl ImportOptions {
    pub fn upserting() -> Self {
        Self {
            upsert: true,
            auto_generate_ids: false,
        }
    }
}

/// The operation a bulk invocation performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BulkMode {
    Import(ImportOptions),
    Delete,
}

impl BulkMode {
    /// Plain insert-only import
    pub fn import() -> Self {
        BulkMode::Import(ImportOptions::default())
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, BulkMode::Delete)
    }

    pub fn label(&self) -> &'static str {
        match self {
            BulkMode::Import(_) => "import",
            BulkMode::Delete => "delete",
        }
    }
}
