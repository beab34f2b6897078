//! The chain-source boundary.
//!
//! A `ChainSource` is a JSON-RPC style client to a full node. Only the calls
//! the driver and the health probe need are modelled here; transport, retries
//! and payload decoding live with the implementor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::types::SourceBlock;

/// Subset of `getblockchaininfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainInfo {
    pub chain: String,
    /// Height of the node's best block.
    pub blocks: u32,
    #[serde(rename = "bestblockhash")]
    pub best_block_hash: String,
}

/// Trait for fetching chain data from a full node.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Hash of the best-chain block at `height`.
    ///
    /// Must return [`SourceError::HeightOutOfRange`] past the node's tip.
    async fn get_block_hash(&self, height: u32) -> Result<String, SourceError>;

    /// Full block with transactions (verbosity 2) and their decoded ops.
    async fn get_block(&self, hash: &str) -> Result<SourceBlock, SourceError>;

    async fn get_connection_count(&self) -> Result<u32, SourceError>;

    async fn get_blockchain_info(&self) -> Result<BlockchainInfo, SourceError>;

    /// Best-chain block at `height`.
    async fn get_block_at(&self, height: u32) -> Result<SourceBlock, SourceError> {
        let hash = self.get_block_hash(height).await?;
        self.get_block(&hash).await
    }
}

// ─── In-memory source (for testing) ──────────────────────────────────────────

use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory chain source for tests and offline replay.
///
/// Holds the current best chain plus every block it has ever served, so
/// blocks orphaned by [`set_chain`](Self::set_chain) stay fetchable by hash,
/// the way a node keeps stale blocks.
#[derive(Default)]
pub struct MemorySource {
    best: Mutex<Vec<SourceBlock>>,
    seen: Mutex<HashMap<String, SourceBlock>>,
}

impl MemorySource {
    pub fn new(chain: Vec<SourceBlock>) -> Self {
        let source = Self::default();
        source.set_chain(chain);
        source
    }

    /// Replace the best chain (index = height).
    pub fn set_chain(&self, chain: Vec<SourceBlock>) {
        if let Ok(mut seen) = self.seen.lock() {
            for block in &chain {
                seen.insert(block.hash.clone(), block.clone());
            }
        }
        if let Ok(mut best) = self.best.lock() {
            *best = chain;
        }
    }

    fn best(&self) -> Result<std::sync::MutexGuard<'_, Vec<SourceBlock>>, SourceError> {
        self.best
            .lock()
            .map_err(|_| SourceError::Rpc("memory source lock poisoned".into()))
    }
}

#[async_trait]
impl ChainSource for MemorySource {
    async fn get_block_hash(&self, height: u32) -> Result<String, SourceError> {
        self.best()?
            .get(height as usize)
            .map(|b| b.hash.clone())
            .ok_or(SourceError::HeightOutOfRange(height))
    }

    async fn get_block(&self, hash: &str) -> Result<SourceBlock, SourceError> {
        self.seen
            .lock()
            .map_err(|_| SourceError::Rpc("memory source lock poisoned".into()))?
            .get(hash)
            .cloned()
            .ok_or_else(|| SourceError::BlockNotFound(hash.to_string()))
    }

    async fn get_connection_count(&self) -> Result<u32, SourceError> {
        Ok(1)
    }

    async fn get_blockchain_info(&self) -> Result<BlockchainInfo, SourceError> {
        let best = self.best()?;
        let tip = best
            .last()
            .ok_or_else(|| SourceError::Rpc("empty chain".into()))?;
        Ok(BlockchainInfo {
            chain: "memory".into(),
            blocks: tip.height,
            best_block_hash: tip.hash.clone(),
        })
    }
}
