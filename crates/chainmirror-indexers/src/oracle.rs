//! Price oracles: appointment, update and removal.
//!
//! Every appoint/update also writes an [`OracleHistory`] snapshot. Undoing an
//! update or a removal restores the oracle from the latest snapshot left
//! after the undo, so history must never be pruned while blocks can still be
//! invalidated.

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
    encode_height, BlockRef, DecodedOp, OpTag, SourceBlock, SourceTransaction,
};

use crate::payload::{self, AppointOracle, PricePair, RemoveOracle, UpdateOracle};

// ─── Models ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Oracle {
    /// Appointing txid.
    pub id: String,
    pub owner_address: String,
    pub weightage: u8,
    pub price_feeds: Vec<PricePair>,
    /// Block of the appoint or latest update.
    pub block: BlockRef,
}

/// Oracles by id.
pub const ORACLE_ALL: IndexDef = IndexDef::asc("all");

impl Entity for Oracle {
    const MODEL: &'static str = "oracle";

    fn primary_key(&self) -> String {
        self.id.clone()
    }

    fn index_entries(&self) -> Vec<IndexEntry> {
        vec![IndexEntry::global(ORACLE_ALL.name, &self.id)]
    }
}

/// Snapshot of an oracle as of one appoint or update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleHistory {
    /// `oracleId-height-txid`
    pub id: String,
    pub oracle_id: String,
    /// The appoint/update txid.
    pub txid: String,
    /// Position of that transaction in its block.
    pub order: u32,
    pub owner_address: String,
    pub weightage: u8,
    pub price_feeds: Vec<PricePair>,
    pub block: BlockRef,
}

/// History of one oracle, newest first: by height, then by position in the
/// block.
pub const HISTORY_BY_ORACLE: IndexDef = IndexDef::desc("oracle");

impl OracleHistory {
    fn snapshot(oracle: &Oracle, txid: &str, order: u32) -> Self {
        Self {
            id: format!("{}-{}-{}", oracle.id, oracle.block.height, txid),
            oracle_id: oracle.id.clone(),
            txid: txid.to_string(),
            order,
            owner_address: oracle.owner_address.clone(),
            weightage: oracle.weightage,
            price_feeds: oracle.price_feeds.clone(),
            block: oracle.block.clone(),
        }
    }

    fn to_oracle(&self) -> Oracle {
        Oracle {
            id: self.oracle_id.clone(),
            owner_address: self.owner_address.clone(),
            weightage: self.weightage,
            price_feeds: self.price_feeds.clone(),
            block: self.block.clone(),
        }
    }
}

impl Entity for OracleHistory {
    const MODEL: &'static str = "oracle_history";

    fn primary_key(&self) -> String {
        self.id.clone()
    }

    fn index_entries(&self) -> Vec<IndexEntry> {
        vec![IndexEntry::new(
            HISTORY_BY_ORACLE.name,
            &self.oracle_id,
            format!(
                "{}-{:08x}-{}",
                encode_height(self.block.height),
                self.order,
                self.txid
            ),
        )]
    }
}

/// Membership of an oracle in a price pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleTokenCurrency {
    /// `token-currency-oracleId`
    pub id: String,
    /// `token-currency`
    pub key: String,
    pub token: String,
    pub currency: String,
    pub oracle_id: String,
    pub weightage: u8,
    pub block: BlockRef,
}

/// Oracles of one pair.
pub const PAIR_ORACLES: IndexDef = IndexDef::asc("pair");

impl OracleTokenCurrency {
    fn id_of(pair: &PricePair, oracle_id: &str) -> String {
        format!("{}-{}", pair.key(), oracle_id)
    }
}

impl Entity for OracleTokenCurrency {
    const MODEL: &'static str = "oracle_token_currency";

    fn primary_key(&self) -> String {
        self.id.clone()
    }

    fn index_entries(&self) -> Vec<IndexEntry> {
        vec![IndexEntry::new(PAIR_ORACLES.name, &self.key, &self.oracle_id)]
    }
}

// ─── Mappers ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct OracleMapper(ModelMapper<Oracle>);

impl OracleMapper {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self(ModelMapper::new(store))
    }

    pub async fn query_all(&self, page: &PageQuery) -> Result<Page<Oracle>, IndexerError> {
        self.0.query(&ORACLE_ALL, None, page).await
    }
}

impl Deref for OracleMapper {
    type Target = ModelMapper<Oracle>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Clone)]
pub struct OracleHistoryMapper(ModelMapper<OracleHistory>);

impl OracleHistoryMapper {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self(ModelMapper::new(store))
    }

    pub async fn query_by_oracle(
        &self,
        oracle_id: &str,
        page: &PageQuery,
    ) -> Result<Page<OracleHistory>, IndexerError> {
        self.0.query(&HISTORY_BY_ORACLE, Some(oracle_id), page).await
    }

    /// Most recent snapshot of `oracle_id`.
    pub async fn get_latest(&self, oracle_id: &str) -> Result<Option<OracleHistory>, IndexerError> {
        self.0.first(&HISTORY_BY_ORACLE, Some(oracle_id)).await
    }
}

impl Deref for OracleHistoryMapper {
    type Target = ModelMapper<OracleHistory>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Clone)]
pub struct OracleTokenCurrencyMapper(ModelMapper<OracleTokenCurrency>);

impl OracleTokenCurrencyMapper {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self(ModelMapper::new(store))
    }

    pub async fn query_by_pair(
        &self,
        pair: &PricePair,
        page: &PageQuery,
    ) -> Result<Page<OracleTokenCurrency>, IndexerError> {
        self.0.query(&PAIR_ORACLES, Some(pair.key().as_str()), page).await
    }

    /// Every oracle currently publishing `pair`.
    pub async fn list_by_pair(
        &self,
        pair: &PricePair,
    ) -> Result<Vec<OracleTokenCurrency>, IndexerError> {
        self.0.list(&PAIR_ORACLES, Some(pair.key().as_str())).await
    }
}

impl Deref for OracleTokenCurrencyMapper {
    type Target = ModelMapper<OracleTokenCurrency>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// The three oracle mappers, shared by the oracle sub-indexers.
#[derive(Clone)]
pub struct OracleMappers {
    pub oracles: OracleMapper,
    pub history: OracleHistoryMapper,
    pub pairs: OracleTokenCurrencyMapper,
}

impl OracleMappers {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self {
            oracles: OracleMapper::new(Arc::clone(&store)),
            history: OracleHistoryMapper::new(Arc::clone(&store)),
            pairs: OracleTokenCurrencyMapper::new(store),
        }
    }

    async fn put_pairs(&self, oracle: &Oracle) -> Result<(), IndexerError> {
        for pair in &oracle.price_feeds {
            self.pairs
                .put(&OracleTokenCurrency {
                    id: OracleTokenCurrency::id_of(pair, &oracle.id),
                    key: pair.key(),
                    token: pair.token.clone(),
                    currency: pair.currency.clone(),
                    oracle_id: oracle.id.clone(),
                    weightage: oracle.weightage,
                    block: oracle.block.clone(),
                })
                .await?;
        }
        Ok(())
    }

    async fn delete_pairs(&self, oracle_id: &str, feeds: &[PricePair]) -> Result<(), IndexerError> {
        for pair in feeds {
            self.pairs
                .delete(&OracleTokenCurrency::id_of(pair, oracle_id))
                .await?;
        }
        Ok(())
    }

    /// Write `oracle`, its pairs and a history snapshot for `tx`.
    async fn write(
        &self,
        block: &SourceBlock,
        tx: &SourceTransaction,
        oracle: &Oracle,
    ) -> Result<(), IndexerError> {
        let order = payload::order_in(block, tx)?;
        self.oracles.put(oracle).await?;
        self.put_pairs(oracle).await?;
        self.history
            .put(&OracleHistory::snapshot(oracle, &tx.txid, order))
            .await
    }

    /// Bring back `oracle_id` as of its latest remaining snapshot, while
    /// undoing `tx` of `block`.
    ///
    /// Without any snapshot the oracle must have been appointed earlier in
    /// `block` itself, by an appointment that never landed or is already
    /// undone; there is nothing to restore then.
    async fn restore(
        &self,
        block: &SourceBlock,
        tx: &SourceTransaction,
        oracle_id: &str,
    ) -> Result<(), IndexerError> {
        let Some(previous) = self.history.get_latest(oracle_id).await? else {
            if block.creates_before(OpTag::AppointOracle, oracle_id, &tx.txid) {
                tracing::debug!(
                    oracle = oracle_id,
                    height = block.height,
                    "oracle appointed in the same block, nothing to restore"
                );
                return Ok(());
            }
            return Err(IndexerError::not_found(OracleHistory::MODEL, oracle_id));
        };
        let oracle = previous.to_oracle();
        self.oracles.put(&oracle).await?;
        self.put_pairs(&oracle).await
    }
}

// ─── Indexers ────────────────────────────────────────────────────────────────

pub struct AppointOracleIndexer {
    mappers: OracleMappers,
}

impl AppointOracleIndexer {
    pub fn new(mappers: OracleMappers) -> Self {
        Self { mappers }
    }
}

#[async_trait]
impl SubIndexer for AppointOracleIndexer {
    fn name(&self) -> &str {
        "appoint_oracle"
    }

    fn ops(&self) -> &[OpTag] {
        &[OpTag::AppointOracle]
    }

    async fn index_transaction(
        &self,
        block: &SourceBlock,
        tx: &SourceTransaction,
        op: &DecodedOp,
    ) -> Result<(), IndexerError> {
        let data: AppointOracle = payload::decode(tx, op)?;
        let oracle = Oracle {
            id: tx.txid.clone(),
            owner_address: data.owner_address,
            weightage: data.weightage,
            price_feeds: data.price_feeds,
            block: BlockRef::from(block),
        };
        tracing::debug!(oracle = %oracle.id, feeds = oracle.price_feeds.len(), "oracle appointed");
        self.mappers.write(block, tx, &oracle).await
    }

    async fn invalidate_transaction(
        &self,
        block: &SourceBlock,
        tx: &SourceTransaction,
        op: &DecodedOp,
    ) -> Result<(), IndexerError> {
        let data: AppointOracle = payload::decode(tx, op)?;
        let oracle_id = &tx.txid;
        self.mappers
            .history
            .delete(&format!("{oracle_id}-{}-{}", block.height, tx.txid))
            .await?;
        self.mappers.delete_pairs(oracle_id, &data.price_feeds).await?;
        self.mappers.oracles.delete(oracle_id).await
    }
}

pub struct UpdateOracleIndexer {
    mappers: OracleMappers,
}

impl UpdateOracleIndexer {
    pub fn new(mappers: OracleMappers) -> Self {
        Self { mappers }
    }
}

#[async_trait]
impl SubIndexer for UpdateOracleIndexer {
    fn name(&self) -> &str {
        "update_oracle"
    }

    fn ops(&self) -> &[OpTag] {
        &[OpTag::UpdateOracle]
    }

    async fn index_transaction(
        &self,
        block: &SourceBlock,
        tx: &SourceTransaction,
        op: &DecodedOp,
    ) -> Result<(), IndexerError> {
        let data: UpdateOracle = payload::decode(tx, op)?;
        let previous = self.mappers.oracles.require(&data.oracle_id).await?;
        self.mappers
            .delete_pairs(&previous.id, &previous.price_feeds)
            .await?;

        let oracle = Oracle {
            id: data.oracle_id,
            owner_address: data.owner_address,
            weightage: data.weightage,
            price_feeds: data.price_feeds,
            block: BlockRef::from(block),
        };
        tracing::debug!(oracle = %oracle.id, weightage = oracle.weightage, "oracle updated");
        self.mappers.write(block, tx, &oracle).await
    }

    async fn invalidate_transaction(
        &self,
        block: &SourceBlock,
        tx: &SourceTransaction,
        op: &DecodedOp,
    ) -> Result<(), IndexerError> {
        let data: UpdateOracle = payload::decode(tx, op)?;
        self.mappers
            .history
            .delete(&format!("{}-{}-{}", data.oracle_id, block.height, tx.txid))
            .await?;
        self.mappers
            .delete_pairs(&data.oracle_id, &data.price_feeds)
            .await?;
        self.mappers.restore(block, tx, &data.oracle_id).await
    }
}

pub struct RemoveOracleIndexer {
    mappers: OracleMappers,
}

impl RemoveOracleIndexer {
    pub fn new(mappers: OracleMappers) -> Self {
        Self { mappers }
    }
}

#[async_trait]
impl SubIndexer for RemoveOracleIndexer {
    fn name(&self) -> &str {
        "remove_oracle"
    }

    fn ops(&self) -> &[OpTag] {
        &[OpTag::RemoveOracle]
    }

    async fn index_transaction(
        &self,
        _block: &SourceBlock,
        tx: &SourceTransaction,
        op: &DecodedOp,
    ) -> Result<(), IndexerError> {
        let data: RemoveOracle = payload::decode(tx, op)?;
        let oracle = self.mappers.oracles.require(&data.oracle_id).await?;
        self.mappers
            .delete_pairs(&oracle.id, &oracle.price_feeds)
            .await?;
        tracing::debug!(oracle = %oracle.id, "oracle removed");
        self.mappers.oracles.delete(&oracle.id).await
    }

    async fn invalidate_transaction(
        &self,
        block: &SourceBlock,
        tx: &SourceTransaction,
        op: &DecodedOp,
    ) -> Result<(), IndexerError> {
        let data: RemoveOracle = payload::decode(tx, op)?;
        self.mappers.restore(block, tx, &data.oracle_id).await
    }
}
