//! Sub-indexer trait and the ordered registry that dispatches to it.
//!
//! Applying block H runs `index_block_start` on every indexer in registry
//! order, then `index_transaction` for each transaction (in block order) on
//! every indexer interested in its op tag, then `index_block_end`.
//! Invalidating H runs the exact mirror backwards: block-end hooks in reverse
//! registry order, transactions in reverse block order, block-start hooks in
//! reverse registry order. Later hooks may read what earlier hooks wrote, so
//! undo has to walk that dependency backwards.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::IndexerError;
use crate::types::{DecodedOp, OpTag, SourceBlock, SourceTransaction};

/// A handler implementing the index/invalidate contract for one entity or op.
///
/// Every hook defaults to a no-op. Invalidate hooks must be idempotent and
/// must tolerate undoing a change that was only partially applied, or not
/// applied at all.
#[async_trait]
pub trait SubIndexer: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Op tags whose transactions this indexer wants via `index_transaction`.
    fn ops(&self) -> &[OpTag] {
        &[]
    }

    /// Seed bootstrap entities while applying the genesis block.
    async fn seed_genesis(&self, _block: &SourceBlock) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn index_block_start(&self, _block: &SourceBlock) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn index_transaction(
        &self,
        _block: &SourceBlock,
        _tx: &SourceTransaction,
        _op: &DecodedOp,
    ) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn index_block_end(&self, _block: &SourceBlock) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn invalidate_block_end(&self, _block: &SourceBlock) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn invalidate_transaction(
        &self,
        _block: &SourceBlock,
        _tx: &SourceTransaction,
        _op: &DecodedOp,
    ) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn invalidate_block_start(&self, _block: &SourceBlock) -> Result<(), IndexerError> {
        Ok(())
    }

    /// Remove what `seed_genesis` wrote.
    async fn unseed_genesis(&self, _block: &SourceBlock) -> Result<(), IndexerError> {
        Ok(())
    }
}

/// Ordered collection of sub-indexers plus a static op-tag routing table.
#[derive(Default)]
pub struct IndexerRegistry {
    indexers: Vec<Arc<dyn SubIndexer>>,
    by_tag: HashMap<OpTag, Vec<usize>>,
}

impl IndexerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an indexer. Registration order is dispatch order.
    pub fn register(&mut self, indexer: Arc<dyn SubIndexer>) {
        let slot = self.indexers.len();
        for tag in indexer.ops() {
            self.by_tag.entry(*tag).or_default().push(slot);
        }
        self.indexers.push(indexer);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, indexer: Arc<dyn SubIndexer>) -> Self {
        self.register(indexer);
        self
    }

    pub fn len(&self) -> usize {
        self.indexers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexers.is_empty()
    }

    /// Names of the indexers interested in `tag`, in dispatch order.
    pub fn interested(&self, tag: OpTag) -> Vec<&str> {
        self.slots(tag)
            .iter()
            .map(|&i| self.indexers[i].name())
            .collect()
    }

    fn slots(&self, tag: OpTag) -> &[usize] {
        self.by_tag.get(&tag).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Run every `index*` hook for `block`.
    pub async fn index_block(&self, block: &SourceBlock) -> Result<(), IndexerError> {
        if block.height == 0 {
            for indexer in &self.indexers {
                indexer.seed_genesis(block).await.map_err(|e| failed(indexer, "seed_genesis", e))?;
            }
        }
        for indexer in &self.indexers {
            indexer
                .index_block_start(block)
                .await
                .map_err(|e| failed(indexer, "index_block_start", e))?;
        }
        for (_, tx, op) in block.ops() {
            for &slot in self.slots(op.tag) {
                let indexer = &self.indexers[slot];
                indexer
                    .index_transaction(block, tx, op)
                    .await
                    .map_err(|e| failed(indexer, "index_transaction", e))?;
            }
        }
        for indexer in &self.indexers {
            indexer
                .index_block_end(block)
                .await
                .map_err(|e| failed(indexer, "index_block_end", e))?;
        }
        Ok(())
    }

    /// Run every `invalidate*` hook for `block`, mirroring [`index_block`](Self::index_block).
    pub async fn invalidate_block(&self, block: &SourceBlock) -> Result<(), IndexerError> {
        for indexer in self.indexers.iter().rev() {
            indexer
                .invalidate_block_end(block)
                .await
                .map_err(|e| failed(indexer, "invalidate_block_end", e))?;
        }
        for (_, tx, op) in block.ops().rev() {
            for &slot in self.slots(op.tag).iter().rev() {
                let indexer = &self.indexers[slot];
                indexer
                    .invalidate_transaction(block, tx, op)
                    .await
                    .map_err(|e| failed(indexer, "invalidate_transaction", e))?;
            }
        }
        for indexer in self.indexers.iter().rev() {
            indexer
                .invalidate_block_start(block)
                .await
                .map_err(|e| failed(indexer, "invalidate_block_start", e))?;
        }
        if block.height == 0 {
            for indexer in self.indexers.iter().rev() {
                indexer
                    .unseed_genesis(block)
                    .await
                    .map_err(|e| failed(indexer, "unseed_genesis", e))?;
            }
        }
        Ok(())
    }
}

fn failed(indexer: &Arc<dyn SubIndexer>, hook: &str, err: IndexerError) -> IndexerError {
    tracing::error!(indexer = indexer.name(), hook, error = %err, "hook failed");
    err
}
