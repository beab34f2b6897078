//! Indexed block records and their mapper.
//!
//! The driver derives the indexed tip from this mapper: the tip is the block
//! with the greatest height, found with a one-item descending scan.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::IndexerError;
use crate::handler::SubIndexer;
use crate::mapper::{Entity, IndexDef, ModelMapper};
use crate::pagination::{Page, PageQuery};
use crate::store::{IndexEntry, KeyedStore};
use crate::types::{encode_height, SourceBlock};

/// An indexed block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub hash: String,
    pub previous_hash: String,
    pub height: u32,
    pub time: i64,
    pub median_time: i64,
    pub difficulty: f64,
    pub minter: Option<String>,
    pub size: u64,
    pub weight: u64,
    pub version: i64,
    pub merkleroot: String,
    pub transaction_count: u32,
}

impl From<&SourceBlock> for Block {
    fn from(b: &SourceBlock) -> Self {
        Self {
            hash: b.hash.clone(),
            previous_hash: b.previous_hash.clone(),
            height: b.height,
            time: b.time,
            median_time: b.median_time,
            difficulty: b.difficulty,
            minter: b.minter.clone(),
            size: b.size,
            weight: b.weight,
            version: b.version,
            merkleroot: b.merkleroot.clone(),
            transaction_count: b.transactions.len() as u32,
        }
    }
}

/// Blocks ordered by height, newest first.
pub const BLOCK_BY_HEIGHT: IndexDef = IndexDef::desc("height");

impl Entity for Block {
    const MODEL: &'static str = "block";

    fn primary_key(&self) -> String {
        self.hash.clone()
    }

    fn index_entries(&self) -> Vec<IndexEntry> {
        vec![IndexEntry::global(BLOCK_BY_HEIGHT.name, encode_height(self.height))]
    }
}

/// Typed access to indexed blocks.
#[derive(Clone)]
pub struct BlockMapper {
    inner: ModelMapper<Block>,
}

impl BlockMapper {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self {
            inner: ModelMapper::new(store),
        }
    }

    pub async fn get(&self, hash: &str) -> Result<Option<Block>, IndexerError> {
        self.inner.get(hash).await
    }

    /// The indexed tip, if any block has been indexed.
    pub async fn get_highest(&self) -> Result<Option<Block>, IndexerError> {
        self.inner.first(&BLOCK_BY_HEIGHT, None).await
    }

    pub async fn get_by_height(&self, height: u32) -> Result<Option<Block>, IndexerError> {
        let bound = height.checked_add(1).map(encode_height);
        let found = self
            .inner
            .scan(&BLOCK_BY_HEIGHT, None, BLOCK_BY_HEIGHT.direction, 1, bound)
            .await?;
        Ok(found.into_iter().find(|b| b.height == height))
    }

    /// Blocks newest first; the cursor is the encoded height.
    pub async fn query(&self, page: &PageQuery) -> Result<Page<Block>, IndexerError> {
        self.inner.query(&BLOCK_BY_HEIGHT, None, page).await
    }

    pub async fn put(&self, block: &Block) -> Result<(), IndexerError> {
        self.inner.put(block).await
    }

    pub async fn delete(&self, hash: &str) -> Result<(), IndexerError> {
        self.inner.delete(hash).await
    }
}

/// Writes the [`Block`] record of every applied block.
///
/// The driver always registers it last, so the block record is the final
/// write of an apply and, with the reversed undo order, the first record
/// retracted by an invalidation.
pub struct BlockIndexer {
    blocks: BlockMapper,
}

impl BlockIndexer {
    pub fn new(blocks: BlockMapper) -> Self {
        Self { blocks }
    }
}

#[async_trait]
impl SubIndexer for BlockIndexer {
    fn name(&self) -> &str {
        "block"
    }

    async fn index_block_end(&self, block: &SourceBlock) -> Result<(), IndexerError> {
        self.blocks.put(&Block::from(block)).await
    }

    async fn invalidate_block_end(&self, block: &SourceBlock) -> Result<(), IndexerError> {
        self.blocks.delete(&block.hash).await
    }
}
