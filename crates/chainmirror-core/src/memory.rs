//! In-memory keyed sorted store.
//!
//! Used by tests, ephemeral mirrors, and as the reference behaviour the
//! persistent backends are checked against. Reads take a shared lock and
//! clone out of it, so each call sees a consistent snapshot.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::IndexerError;
use crate::store::{Direction, IndexEntry, KeyedStore, ScanQuery, StoredRecord};

#[derive(Default)]
struct ModelData {
    records: HashMap<String, (Value, Vec<IndexEntry>)>,
    /// `(index, partition)` → ordered `(sort, primary key)` pairs.
    indices: BTreeMap<(&'static str, String), BTreeSet<(String, String)>>,
}

impl ModelData {
    fn unlink(&mut self, key: &str, entries: &[IndexEntry]) {
        for entry in entries {
            let slot = (entry.index, entry.partition.clone());
            if let Some(set) = self.indices.get_mut(&slot) {
                set.remove(&(entry.sort.clone(), key.to_string()));
                if set.is_empty() {
                    self.indices.remove(&slot);
                }
            }
        }
    }
}

/// In-memory store. All data is lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    models: RwLock<HashMap<String, ModelData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held for `model`.
    pub fn count(&self, model: &str) -> Result<usize, IndexerError> {
        Ok(self.read()?.get(model).map_or(0, |d| d.records.len()))
    }

    /// Every `(key, value)` of `model`, ordered by key. Used to compare states.
    pub fn dump(&self, model: &str) -> Result<Vec<(String, Value)>, IndexerError> {
        let models = self.read()?;
        let mut rows: Vec<_> = models
            .get(model)
            .map(|d| {
                d.records
                    .iter()
                    .map(|(k, (v, _))| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(rows)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, ModelData>>, IndexerError> {
        self.models
            .read()
            .map_err(|_| IndexerError::Storage("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, ModelData>>, IndexerError> {
        self.models
            .write()
            .map_err(|_| IndexerError::Storage("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl KeyedStore for MemoryStore {
    async fn get(&self, model: &str, key: &str) -> Result<Option<Value>, IndexerError> {
        Ok(self
            .read()?
            .get(model)
            .and_then(|d| d.records.get(key))
            .map(|(v, _)| v.clone()))
    }

    async fn put(&self, model: &str, record: StoredRecord) -> Result<(), IndexerError> {
        let mut models = self.write()?;
        let data = models.entry(model.to_string()).or_default();

        if let Some((_, old)) = data.records.remove(&record.key) {
            data.unlink(&record.key, &old);
        }
        for entry in &record.indices {
            data.indices
                .entry((entry.index, entry.partition.clone()))
                .or_default()
                .insert((entry.sort.clone(), record.key.clone()));
        }
        data.records
            .insert(record.key, (record.value, record.indices));
        Ok(())
    }

    async fn delete(&self, model: &str, key: &str) -> Result<(), IndexerError> {
        let mut models = self.write()?;
        if let Some(data) = models.get_mut(model) {
            if let Some((_, old)) = data.records.remove(key) {
                data.unlink(key, &old);
            }
        }
        Ok(())
    }

    async fn scan(&self, model: &str, query: &ScanQuery) -> Result<Vec<Value>, IndexerError> {
        let models = self.read()?;
        let Some(data) = models.get(model) else {
            return Ok(vec![]);
        };
        let Some(set) = data
            .indices
            .get(&(query.index, query.partition_key().to_string()))
        else {
            return Ok(vec![]);
        };

        let ordered: Box<dyn Iterator<Item = &(String, String)>> = match query.direction {
            Direction::Asc => Box::new(set.iter()),
            Direction::Desc => Box::new(set.iter().rev()),
        };
        Ok(ordered
            .skip_while(|(sort, _)| !query.admits(sort))
            .take(query.limit)
            .filter_map(|(_, key)| data.records.get(key).map(|(v, _)| v.clone()))
            .collect())
    }
}
