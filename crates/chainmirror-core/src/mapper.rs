//! Model mapper convention.
//!
//! Every domain entity implements [`Entity`]: a model name, a deterministic
//! primary key, and its secondary index entries. [`ModelMapper`] is the thin
//! typed façade over a [`KeyedStore`] that concrete mappers wrap.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::IndexerError;
use crate::pagination::{Page, PageQuery};
use crate::store::{Direction, IndexEntry, KeyedStore, ScanQuery, StoredRecord};

/// A secondary index an entity exposes for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexDef {
    pub name: &'static str,
    /// Natural order of the index; queries default to it.
    pub direction: Direction,
}

impl IndexDef {
    pub const fn desc(name: &'static str) -> Self {
        Self {
            name,
            direction: Direction::Desc,
        }
    }

    pub const fn asc(name: &'static str) -> Self {
        Self {
            name,
            direction: Direction::Asc,
        }
    }
}

/// A persisted domain entity.
///
/// `primary_key` must be a pure function of immutable content: the same
/// entity always maps to the same key, which makes `put` idempotent and
/// `delete` during invalidation unambiguous.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    /// Model (table) name.
    const MODEL: &'static str;

    fn primary_key(&self) -> String;

    /// Secondary index entries of this record.
    fn index_entries(&self) -> Vec<IndexEntry> {
        vec![]
    }

    /// Sort key of this record within `index`, used as the page cursor.
    fn sort_key(&self, index: &IndexDef) -> String {
        self.index_entries()
            .into_iter()
            .find(|e| e.index == index.name)
            .map(|e| e.sort)
            .unwrap_or_default()
    }
}

/// Typed get/query/put/delete over one model.
pub struct ModelMapper<T> {
    store: Arc<dyn KeyedStore>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for ModelMapper<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> ModelMapper<T> {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<T>, IndexerError> {
        match self.store.get(T::MODEL, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Like [`get`](Self::get) but a missing record is a [`IndexerError::NotFound`].
    pub async fn require(&self, key: &str) -> Result<T, IndexerError> {
        self.get(key)
            .await?
            .ok_or_else(|| IndexerError::not_found(T::MODEL, key))
    }

    pub async fn put(&self, entity: &T) -> Result<(), IndexerError> {
        let record = StoredRecord {
            key: entity.primary_key(),
            value: serde_json::to_value(entity)?,
            indices: entity.index_entries(),
        };
        tracing::trace!(model = T::MODEL, key = %record.key, "put");
        self.store.put(T::MODEL, record).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), IndexerError> {
        tracing::trace!(model = T::MODEL, key, "delete");
        self.store.delete(T::MODEL, key).await
    }

    /// Raw scan in an explicit direction.
    pub async fn scan(
        &self,
        index: &IndexDef,
        partition: Option<&str>,
        direction: Direction,
        limit: usize,
        exclusive_bound: Option<String>,
    ) -> Result<Vec<T>, IndexerError> {
        let mut query = ScanQuery::new(index.name, direction, limit).after(exclusive_bound);
        if let Some(p) = partition {
            query = query.partition(p);
        }
        self.store
            .scan(T::MODEL, &query)
            .await?
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(IndexerError::from))
            .collect()
    }

    /// Paginated query in the index's natural order.
    pub async fn query(
        &self,
        index: &IndexDef,
        partition: Option<&str>,
        page: &PageQuery,
    ) -> Result<Page<T>, IndexerError> {
        let limit = page.effective_limit();
        let data = self
            .scan(index, partition, index.direction, limit, page.next.clone())
            .await?;
        Ok(Page::from_scan(data, limit, |item| item.sort_key(index)))
    }

    /// Every record of a partition in the index's natural order, fetched in
    /// pages of [`PageQuery::MAX_LIMIT`].
    pub async fn list(
        &self,
        index: &IndexDef,
        partition: Option<&str>,
    ) -> Result<Vec<T>, IndexerError> {
        let mut all = Vec::new();
        let mut bound = None;
        loop {
            let batch = self
                .scan(index, partition, index.direction, PageQuery::MAX_LIMIT, bound)
                .await?;
            let exhausted = batch.len() < PageQuery::MAX_LIMIT;
            bound = batch.last().map(|item| item.sort_key(index));
            all.extend(batch);
            if exhausted {
                return Ok(all);
            }
        }
    }

    /// First record of a partition in the index's natural order.
    pub async fn first(
        &self,
        index: &IndexDef,
        partition: Option<&str>,
    ) -> Result<Option<T>, IndexerError> {
        Ok(self
            .scan(index, partition, index.direction, 1, None)
            .await?
            .into_iter()
            .next())
    }
}
