//! Keyed sorted store: the storage contract every model mapper sits on.
//!
//! A store holds, per model, a mapping from primary key to a JSON record plus
//! any number of secondary index entries `(index, partition, sort)`. Range
//! scans walk one partition of one index in sort order; ties on the sort key
//! are broken by primary key so results are deterministic.
//!
//! There are no cross-key transactions. Callers that need multi-record
//! consistency order their writes so a partial apply stays invalidatable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::IndexerError;

/// Scan direction over an index's sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Asc,
    Desc,
}

/// One secondary index entry of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Index name, unique within the model.
    pub index: &'static str,
    /// Partition key; unpartitioned indices use the empty string.
    pub partition: String,
    /// Sort key, compared lexically.
    pub sort: String,
}

impl IndexEntry {
    pub fn new(index: &'static str, partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            index,
            partition: partition.into(),
            sort: sort.into(),
        }
    }

    /// An entry in an unpartitioned index.
    pub fn global(index: &'static str, sort: impl Into<String>) -> Self {
        Self::new(index, "", sort)
    }
}

/// A record as handed to [`KeyedStore::put`].
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub key: String,
    pub value: Value,
    pub indices: Vec<IndexEntry>,
}

/// Parameters of an ordered range scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanQuery {
    pub index: &'static str,
    /// `None` scans the unpartitioned (empty) partition.
    pub partition: Option<String>,
    pub direction: Direction,
    pub limit: usize,
    /// Strictly excluded boundary: `sort > bound` ascending, `sort < bound` descending.
    pub exclusive_bound: Option<String>,
}

impl ScanQuery {
    pub fn new(index: &'static str, direction: Direction, limit: usize) -> Self {
        Self {
            index,
            partition: None,
            direction,
            limit,
            exclusive_bound: None,
        }
    }

    pub fn partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    pub fn after(mut self, bound: Option<String>) -> Self {
        self.exclusive_bound = bound;
        self
    }

    /// The partition actually scanned.
    pub fn partition_key(&self) -> &str {
        self.partition.as_deref().unwrap_or("")
    }

    /// Returns `true` if `sort` lies strictly past the exclusive bound.
    pub fn admits(&self, sort: &str) -> bool {
        match (&self.exclusive_bound, self.direction) {
            (None, _) => true,
            (Some(bound), Direction::Asc) => sort > bound.as_str(),
            (Some(bound), Direction::Desc) => sort < bound.as_str(),
        }
    }
}

/// The keyed sorted store contract.
///
/// Implementations must allow reads concurrently with writes; a reader may
/// observe a block mid-application.
#[async_trait]
pub trait KeyedStore: Send + Sync {
    /// Load a record by primary key.
    async fn get(&self, model: &str, key: &str) -> Result<Option<Value>, IndexerError>;

    /// Upsert a record, replacing all index entries it previously had.
    async fn put(&self, model: &str, record: StoredRecord) -> Result<(), IndexerError>;

    /// Delete a record and its index entries. Deleting a missing key is a no-op.
    async fn delete(&self, model: &str, key: &str) -> Result<(), IndexerError>;

    /// Ordered range scan over one partition of one index.
    async fn scan(&self, model: &str, query: &ScanQuery) -> Result<Vec<Value>, IndexerError>;
}
