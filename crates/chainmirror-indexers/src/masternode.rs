//! Masternodes and the per-height masternode statistics.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::Arc;

use chainmirror_core::error::IndexerError;
use chainmirror_core::handler::SubIndexer;
use chainmirror_core::mapper::{Entity, IndexDef, ModelMapper};
use chainmirror_core::pagination::{Page, PageQuery};
use chainmirror_core::store::{IndexEntry, KeyedStore};
use chainmirror_core::types::{
    encode_height, to_units, BlockRef, DecodedOp, OpTag, SourceBlock, SourceTransaction,
};

use crate::payload::{self, CreateMasternode, ResignMasternode};

// ─── Models ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Masternode {
    /// Creation txid.
    pub id: String,
    /// Script of the collateral output.
    pub owner_script: String,
    pub operator_address: String,
    pub creation_height: u32,
    pub resign_height: Option<u32>,
    pub resign_tx: Option<String>,
    /// Collateral locked in output 1 of the creation tx, in base units.
    pub collateral: u64,
    pub block: BlockRef,
}

/// Masternodes, most recently created first.
pub const MASTERNODE_ALL: IndexDef = IndexDef::desc("all");

impl Entity for Masternode {
    const MODEL: &'static str = "masternode";

    fn primary_key(&self) -> String {
        self.id.clone()
    }

    fn index_entries(&self) -> Vec<IndexEntry> {
        vec![IndexEntry::global(
            MASTERNODE_ALL.name,
            format!("{}-{}", encode_height(self.creation_height), self.id),
        )]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasternodeStats {
    pub height: u32,
    pub block: BlockRef,
    /// Enabled masternodes after this block.
    pub count: u32,
    /// Total collateral locked by enabled masternodes, in base units.
    pub tvl: u64,
}

/// Stats by height, newest first.
pub const STATS_BY_HEIGHT: IndexDef = IndexDef::desc("height");

impl Entity for MasternodeStats {
    const MODEL: &'static str = "masternode_stats";

    fn primary_key(&self) -> String {
        self.height.to_string()
    }

    fn index_entries(&self) -> Vec<IndexEntry> {
        vec![IndexEntry::global(STATS_BY_HEIGHT.name, encode_height(self.height))]
    }
}

// ─── Mappers ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MasternodeMapper(ModelMapper<Masternode>);

impl MasternodeMapper {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self(ModelMapper::new(store))
    }

    pub async fn query_all(&self, page: &PageQuery) -> Result<Page<Masternode>, IndexerError> {
        self.0.query(&MASTERNODE_ALL, None, page).await
    }
}

impl Deref for MasternodeMapper {
    type Target = ModelMapper<Masternode>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Stats are keyed by height alone, so a write at a height already holding
/// another block's stats is refused rather than silently replacing them.
#[derive(Clone)]
pub struct MasternodeStatsMapper(ModelMapper<MasternodeStats>);

impl MasternodeStatsMapper {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self(ModelMapper::new(store))
    }

    pub async fn get_at(&self, height: u32) -> Result<Option<MasternodeStats>, IndexerError> {
        self.0.get(&height.to_string()).await
    }

    pub async fn get_latest(&self) -> Result<Option<MasternodeStats>, IndexerError> {
        self.0.first(&STATS_BY_HEIGHT, None).await
    }

    /// Latest stats strictly below `height`.
    pub async fn get_before(&self, height: u32) -> Result<Option<MasternodeStats>, IndexerError> {
        Ok(self
            .0
            .scan(
                &STATS_BY_HEIGHT,
                None,
                STATS_BY_HEIGHT.direction,
                1,
                Some(encode_height(height)),
            )
            .await?
            .into_iter()
            .next())
    }

    pub async fn query(&self, page: &PageQuery) -> Result<Page<MasternodeStats>, IndexerError> {
        self.0.query(&STATS_BY_HEIGHT, None, page).await
    }

    pub async fn put(&self, stats: &MasternodeStats) -> Result<(), IndexerError> {
        if let Some(existing) = self.get_at(stats.height).await? {
            if existing.block.hash != stats.block.hash {
                return Err(IndexerError::Consistency(format!(
                    "masternode stats at height {} belong to block {}, refusing to overwrite with {}",
                    stats.height, existing.block.hash, stats.block.hash
                )));
            }
        }
        self.0.put(stats).await
    }

    /// Delete the stats of `block`, leaving another block's stats at the same
    /// height untouched.
    pub async fn delete_for(&self, block: &SourceBlock) -> Result<(), IndexerError> {
        match self.get_at(block.height).await? {
            Some(existing) if existing.block.hash == block.hash => {
                self.0.delete(&block.height.to_string()).await
            }
            Some(existing) => {
                tracing::warn!(
                    height = block.height,
                    hash = %block.hash,
                    stored = %existing.block.hash,
                    "masternode stats belong to another block, not deleting"
                );
                Ok(())
            }
            None => Ok(()),
        }
    }
}

// ─── Indexers ────────────────────────────────────────────────────────────────

fn collateral(tx: &SourceTransaction, op: &DecodedOp) -> Result<(String, u64), IndexerError> {
    let out = tx.vout.get(1).ok_or_else(|| IndexerError::Payload {
        tag: op.tag,
        txid: tx.txid.clone(),
        reason: "missing collateral output".into(),
    })?;
    Ok((out.script.hex.clone(), to_units(out.value)))
}

pub struct CreateMasternodeIndexer {
    masternodes: MasternodeMapper,
}

impl CreateMasternodeIndexer {
    pub fn new(masternodes: MasternodeMapper) -> Self {
        Self { masternodes }
    }
}

#[async_trait]
impl SubIndexer for CreateMasternodeIndexer {
    fn name(&self) -> &str {
        "create_masternode"
    }

    fn ops(&self) -> &[OpTag] {
        &[OpTag::CreateMasternode]
    }

    async fn index_transaction(
        &self,
        block: &SourceBlock,
        tx: &SourceTransaction,
        op: &DecodedOp,
    ) -> Result<(), IndexerError> {
        let data: CreateMasternode = payload::decode(tx, op)?;
        let (owner_script, collateral) = collateral(tx, op)?;
        tracing::debug!(masternode = %tx.txid, collateral, "masternode created");
        self.masternodes
            .put(&Masternode {
                id: tx.txid.clone(),
                operator_address: data.operator_address.unwrap_or_else(|| owner_script.clone()),
                owner_script,
                creation_height: block.height,
                resign_height: None,
                resign_tx: None,
                collateral,
                block: BlockRef::from(block),
            })
            .await
    }

    async fn invalidate_transaction(
        &self,
        _block: &SourceBlock,
        tx: &SourceTransaction,
        _op: &DecodedOp,
    ) -> Result<(), IndexerError> {
        self.masternodes.delete(&tx.txid).await
    }
}

pub struct ResignMasternodeIndexer {
    masternodes: MasternodeMapper,
}

impl ResignMasternodeIndexer {
    pub fn new(masternodes: MasternodeMapper) -> Self {
        Self { masternodes }
    }
}

#[async_trait]
impl SubIndexer for ResignMasternodeIndexer {
    fn name(&self) -> &str {
        "resign_masternode"
    }

    fn ops(&self) -> &[OpTag] {
        &[OpTag::ResignMasternode]
    }

    async fn index_transaction(
        &self,
        block: &SourceBlock,
        tx: &SourceTransaction,
        op: &DecodedOp,
    ) -> Result<(), IndexerError> {
        let data: ResignMasternode = payload::decode(tx, op)?;
        let mut node = self.masternodes.require(&data.node_id).await?;
        node.resign_height = Some(block.height);
        node.resign_tx = Some(tx.txid.clone());
        tracing::debug!(masternode = %node.id, height = block.height, "masternode resigned");
        self.masternodes.put(&node).await
    }

    async fn invalidate_transaction(
        &self,
        block: &SourceBlock,
        tx: &SourceTransaction,
        op: &DecodedOp,
    ) -> Result<(), IndexerError> {
        let data: ResignMasternode = payload::decode(tx, op)?;
        let Some(mut node) = self.masternodes.get(&data.node_id).await? else {
            // created earlier in this block and not (or no longer) stored
            if block.creates_before(OpTag::CreateMasternode, &data.node_id, &tx.txid) {
                return Ok(());
            }
            return Err(IndexerError::not_found(Masternode::MODEL, data.node_id));
        };
        node.resign_height = None;
        node.resign_tx = None;
        self.masternodes.put(&node).await
    }
}

/// Writes [`MasternodeStats`] for every block that created or resigned a
/// masternode, carrying the totals forward from the previous stats.
pub struct MasternodeStatsIndexer {
    masternodes: MasternodeMapper,
    stats: MasternodeStatsMapper,
}

impl MasternodeStatsIndexer {
    pub fn new(masternodes: MasternodeMapper, stats: MasternodeStatsMapper) -> Self {
        Self { masternodes, stats }
    }
}

#[async_trait]
impl SubIndexer for MasternodeStatsIndexer {
    fn name(&self) -> &str {
        "masternode_stats"
    }

    async fn index_block_end(&self, block: &SourceBlock) -> Result<(), IndexerError> {
        let mut changed = false;
        let (mut count, mut tvl) = match self.stats.get_before(block.height).await? {
            Some(prev) => (prev.count as i64, prev.tvl as i128),
            None => (0, 0),
        };

        for (_, tx, op) in block.ops() {
            match op.tag {
                OpTag::CreateMasternode => {
                    let (_, locked) = collateral(tx, op)?;
                    count += 1;
                    tvl += locked as i128;
                    changed = true;
                }
                OpTag::ResignMasternode => {
                    let data: ResignMasternode = payload::decode(tx, op)?;
                    let node = self.masternodes.require(&data.node_id).await?;
                    count -= 1;
                    tvl -= node.collateral as i128;
                    changed = true;
                }
                _ => {}
            }
        }
        if !changed {
            return Ok(());
        }

        self.stats
            .put(&MasternodeStats {
                height: block.height,
                block: BlockRef::from(block),
                count: count.max(0) as u32,
                tvl: tvl.max(0) as u64,
            })
            .await
    }

    async fn invalidate_block_end(&self, block: &SourceBlock) -> Result<(), IndexerError> {
        self.stats.delete_for(block).await
    }
}
