//! Oracle price feeds and their per-block weighted aggregate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
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

use crate::oracle::OracleTokenCurrencyMapper;
use crate::payload::{self, PricePair, SetOracleData};

/// A feed older or newer than this, relative to block time, is ignored by
/// the aggregate (seconds).
pub const FEED_VALIDITY_SECS: u64 = 3600;

// ─── Models ──────────────────────────────────────────────────────────────────

/// One price published by one oracle for one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OraclePriceFeed {
    /// `token-currency-oracleId-txid`
    pub id: String,
    /// `token-currency-oracleId`
    pub key: String,
    pub token: String,
    pub currency: String,
    pub oracle_id: String,
    pub txid: String,
    /// Position of the publishing transaction in its block.
    pub order: u32,
    /// Oracle-reported timestamp.
    pub time: i64,
    /// Price in base units.
    pub amount: u64,
    pub block: BlockRef,
}

/// Feeds of one oracle for one pair, newest first: by height, then by
/// position in the block.
pub const FEED_BY_ORACLE_PAIR: IndexDef = IndexDef::desc("feed");

impl OraclePriceFeed {
    fn key_of(pair: &PricePair, oracle_id: &str) -> String {
        format!("{}-{}", pair.key(), oracle_id)
    }
}

impl Entity for OraclePriceFeed {
    const MODEL: &'static str = "oracle_price_feed";

    fn primary_key(&self) -> String {
        self.id.clone()
    }

    fn index_entries(&self) -> Vec<IndexEntry> {
        vec![IndexEntry::new(
            FEED_BY_ORACLE_PAIR.name,
            &self.key,
            format!(
                "{}-{:08x}-{}",
                encode_height(self.block.height),
                self.order,
                self.txid
            ),
        )]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleCount {
    /// Oracles whose latest feed was inside the validity window.
    pub active: u32,
    /// Oracles publishing the pair.
    pub total: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    /// Weightage-weighted average price, in base units.
    pub amount: u64,
    /// Sum of the active oracles' weightage.
    pub weightage: u32,
    pub oracles: OracleCount,
}

/// Aggregated price of one pair as of one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OraclePriceAggregated {
    /// `token-currency-height`
    pub id: String,
    /// `token-currency`
    pub key: String,
    pub token: String,
    pub currency: String,
    pub aggregated: Aggregate,
    pub block: BlockRef,
}

/// Aggregates of one pair, newest first.
pub const AGGREGATED_BY_PAIR: IndexDef = IndexDef::desc("pair");

impl OraclePriceAggregated {
    fn id_of(pair: &PricePair, height: u32) -> String {
        format!("{}-{}", pair.key(), height)
    }
}

impl Entity for OraclePriceAggregated {
    const MODEL: &'static str = "oracle_price_aggregated";

    fn primary_key(&self) -> String {
        self.id.clone()
    }

    fn index_entries(&self) -> Vec<IndexEntry> {
        vec![IndexEntry::new(
            AGGREGATED_BY_PAIR.name,
            &self.key,
            encode_height(self.block.height),
        )]
    }
}

// ─── Mappers ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct OraclePriceFeedMapper(ModelMapper<OraclePriceFeed>);

impl OraclePriceFeedMapper {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self(ModelMapper::new(store))
    }

    pub async fn query_by_oracle(
        &self,
        pair: &PricePair,
        oracle_id: &str,
        page: &PageQuery,
    ) -> Result<Page<OraclePriceFeed>, IndexerError> {
        let key = OraclePriceFeed::key_of(pair, oracle_id);
        self.0.query(&FEED_BY_ORACLE_PAIR, Some(key.as_str()), page).await
    }

    pub async fn get_latest(
        &self,
        pair: &PricePair,
        oracle_id: &str,
    ) -> Result<Option<OraclePriceFeed>, IndexerError> {
        let key = OraclePriceFeed::key_of(pair, oracle_id);
        self.0.first(&FEED_BY_ORACLE_PAIR, Some(key.as_str())).await
    }
}

impl Deref for OraclePriceFeedMapper {
    type Target = ModelMapper<OraclePriceFeed>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Clone)]
pub struct OraclePriceAggregatedMapper(ModelMapper<OraclePriceAggregated>);

impl OraclePriceAggregatedMapper {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self(ModelMapper::new(store))
    }

    pub async fn query_by_pair(
        &self,
        pair: &PricePair,
        page: &PageQuery,
    ) -> Result<Page<OraclePriceAggregated>, IndexerError> {
        let key = pair.key();
        self.0.query(&AGGREGATED_BY_PAIR, Some(key.as_str()), page).await
    }

    pub async fn get_latest(
        &self,
        pair: &PricePair,
    ) -> Result<Option<OraclePriceAggregated>, IndexerError> {
        let key = pair.key();
        self.0.first(&AGGREGATED_BY_PAIR, Some(key.as_str())).await
    }
}

impl Deref for OraclePriceAggregatedMapper {
    type Target = ModelMapper<OraclePriceAggregated>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ─── Indexer ─────────────────────────────────────────────────────────────────

/// Writes a feed per published price, then one aggregate per pair fed in
/// the block.
pub struct SetOracleDataIndexer {
    feeds: OraclePriceFeedMapper,
    aggregated: OraclePriceAggregatedMapper,
    pairs: OracleTokenCurrencyMapper,
}

impl SetOracleDataIndexer {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self {
            feeds: OraclePriceFeedMapper::new(Arc::clone(&store)),
            aggregated: OraclePriceAggregatedMapper::new(Arc::clone(&store)),
            pairs: OracleTokenCurrencyMapper::new(store),
        }
    }

    /// Distinct pairs fed by the block's `SetOracleData` transactions.
    fn fed_pairs(block: &SourceBlock) -> Result<BTreeSet<PricePair>, IndexerError> {
        let mut pairs = BTreeSet::new();
        for (_, tx, op) in block.ops().filter(|(_, _, op)| op.tag == OpTag::SetOracleData) {
            let data: SetOracleData = payload::decode(tx, op)?;
            pairs.extend(data.feeds().map(|(pair, _)| pair));
        }
        Ok(pairs)
    }

    async fn aggregate(
        &self,
        block: &SourceBlock,
        pair: &PricePair,
    ) -> Result<Option<Aggregate>, IndexerError> {
        let oracles = self.pairs.list_by_pair(pair).await?;
        let mut weighted: u128 = 0;
        let mut weightage: u32 = 0;
        let mut active: u32 = 0;

        for oracle in &oracles {
            if oracle.weightage == 0 {
                continue;
            }
            let Some(feed) = self.feeds.get_latest(pair, &oracle.oracle_id).await? else {
                continue;
            };
            if feed.time.abs_diff(block.time) > FEED_VALIDITY_SECS {
                continue;
            }
            weighted += feed.amount as u128 * oracle.weightage as u128;
            weightage += oracle.weightage as u32;
            active += 1;
        }

        if active == 0 {
            return Ok(None);
        }
        Ok(Some(Aggregate {
            amount: (weighted / weightage as u128) as u64,
            weightage,
            oracles: OracleCount {
                active,
                total: oracles.len() as u32,
            },
        }))
    }
}

#[async_trait]
impl SubIndexer for SetOracleDataIndexer {
    fn name(&self) -> &str {
        "set_oracle_data"
    }

    fn ops(&self) -> &[OpTag] {
        &[OpTag::SetOracleData]
    }

    async fn index_transaction(
        &self,
        block: &SourceBlock,
        tx: &SourceTransaction,
        op: &DecodedOp,
    ) -> Result<(), IndexerError> {
        let data: SetOracleData = payload::decode(tx, op)?;
        let order = payload::order_in(block, tx)?;
        for (pair, amount) in data.feeds() {
            let key = OraclePriceFeed::key_of(&pair, &data.oracle_id);
            self.feeds
                .put(&OraclePriceFeed {
                    id: format!("{key}-{}", tx.txid),
                    key,
                    token: pair.token,
                    currency: pair.currency,
                    oracle_id: data.oracle_id.clone(),
                    txid: tx.txid.clone(),
                    order,
                    time: data.timestamp,
                    amount: to_units(amount),
                    block: BlockRef::from(block),
                })
                .await?;
        }
        Ok(())
    }

    async fn index_block_end(&self, block: &SourceBlock) -> Result<(), IndexerError> {
        for pair in Self::fed_pairs(block)? {
            match self.aggregate(block, &pair).await? {
                Some(aggregated) => {
                    tracing::debug!(
                        pair = %pair.key(),
                        height = block.height,
                        amount = aggregated.amount,
                        active = aggregated.oracles.active,
                        "price aggregated"
                    );
                    self.aggregated
                        .put(&OraclePriceAggregated {
                            id: OraclePriceAggregated::id_of(&pair, block.height),
                            key: pair.key(),
                            token: pair.token.clone(),
                            currency: pair.currency.clone(),
                            aggregated,
                            block: BlockRef::from(block),
                        })
                        .await?;
                }
                None => {
                    tracing::debug!(pair = %pair.key(), height = block.height, "no active feeds")
                }
            }
        }
        Ok(())
    }

    async fn invalidate_block_end(&self, block: &SourceBlock) -> Result<(), IndexerError> {
        for pair in Self::fed_pairs(block)?.iter().rev() {
            self.aggregated
                .delete(&OraclePriceAggregated::id_of(pair, block.height))
                .await?;
        }
        Ok(())
    }

    async fn invalidate_transaction(
        &self,
        _block: &SourceBlock,
        tx: &SourceTransaction,
        op: &DecodedOp,
    ) -> Result<(), IndexerError> {
        let data: SetOracleData = payload::decode(tx, op)?;
        for (pair, _) in data.feeds() {
            let key = OraclePriceFeed::key_of(&pair, &data.oracle_id);
            self.feeds.delete(&format!("{key}-{}", tx.txid)).await?;
        }
        Ok(())
    }
}
