//! Transactions and their outputs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::Arc;

use chainmirror_core::error::IndexerError;
use chainmirror_core::handler::SubIndexer;
use chainmirror_core::mapper::{Entity, IndexDef, ModelMapper};
use chainmirror_core::pagination::{Page, PageQuery};
use chainmirror_core::store::{IndexEntry, KeyedStore};
use chainmirror_core::types::{to_units, BlockRef, SourceBlock, SourceTransaction};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: String,
    /// Position within the block.
    pub order: u32,
    pub block: BlockRef,
    pub hash: String,
    pub version: u32,
    pub size: u64,
    pub vsize: u64,
    pub weight: u64,
    pub lock_time: u64,
    pub vin_count: u32,
    pub vout_count: u32,
    /// Sum of all output values, in base units.
    pub total_vout_value: u64,
}

/// Transactions of one block, in block order.
pub const TRANSACTION_BY_BLOCK: IndexDef = IndexDef::asc("block");

impl Transaction {
    fn new(block: &SourceBlock, order: usize, tx: &SourceTransaction) -> Self {
        Self {
            txid: tx.txid.clone(),
            order: order as u32,
            block: BlockRef::from(block),
            hash: tx.hash.clone(),
            version: tx.version,
            size: tx.size,
            vsize: tx.vsize,
            weight: tx.weight,
            lock_time: tx.lock_time,
            vin_count: tx.vin.len() as u32,
            vout_count: tx.vout.len() as u32,
            total_vout_value: tx.vout.iter().map(|v| to_units(v.value)).sum(),
        }
    }
}

impl Entity for Transaction {
    const MODEL: &'static str = "transaction";

    fn primary_key(&self) -> String {
        self.txid.clone()
    }

    fn index_entries(&self) -> Vec<IndexEntry> {
        vec![IndexEntry::new(
            TRANSACTION_BY_BLOCK.name,
            &self.block.hash,
            format!("{:08x}", self.order),
        )]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionVout {
    /// `txid-n`
    pub id: String,
    pub txid: String,
    pub n: u32,
    pub value: u64,
    pub token_id: Option<u32>,
    pub script_hex: String,
    pub script_type: String,
}

/// Outputs of one transaction, by `n`.
pub const VOUT_BY_TXID: IndexDef = IndexDef::asc("txid");

impl Entity for TransactionVout {
    const MODEL: &'static str = "transaction_vout";

    fn primary_key(&self) -> String {
        self.id.clone()
    }

    fn index_entries(&self) -> Vec<IndexEntry> {
        vec![IndexEntry::new(
            VOUT_BY_TXID.name,
            &self.txid,
            format!("{:08x}", self.n),
        )]
    }
}

#[derive(Clone)]
pub struct TransactionMapper(ModelMapper<Transaction>);

impl TransactionMapper {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self(ModelMapper::new(store))
    }

    pub async fn query_by_block(
        &self,
        block_hash: &str,
        page: &PageQuery,
    ) -> Result<Page<Transaction>, IndexerError> {
        self.0
            .query(&TRANSACTION_BY_BLOCK, Some(block_hash), page)
            .await
    }
}

impl Deref for TransactionMapper {
    type Target = ModelMapper<Transaction>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Clone)]
pub struct TransactionVoutMapper(ModelMapper<TransactionVout>);

impl TransactionVoutMapper {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self(ModelMapper::new(store))
    }

    pub async fn query_by_txid(
        &self,
        txid: &str,
        page: &PageQuery,
    ) -> Result<Page<TransactionVout>, IndexerError> {
        self.0.query(&VOUT_BY_TXID, Some(txid), page).await
    }
}

impl Deref for TransactionVoutMapper {
    type Target = ModelMapper<TransactionVout>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ─── Indexer ─────────────────────────────────────────────────────────────────

/// Writes every transaction of a block and its outputs at block start.
pub struct TransactionIndexer {
    transactions: TransactionMapper,
    vouts: TransactionVoutMapper,
}

impl TransactionIndexer {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self {
            transactions: TransactionMapper::new(Arc::clone(&store)),
            vouts: TransactionVoutMapper::new(store),
        }
    }
}

#[async_trait]
impl SubIndexer for TransactionIndexer {
    fn name(&self) -> &str {
        "transaction"
    }

    async fn index_block_start(&self, block: &SourceBlock) -> Result<(), IndexerError> {
        for (order, tx) in block.transactions.iter().enumerate() {
            for vout in &tx.vout {
                self.vouts
                    .put(&TransactionVout {
                        id: format!("{}-{}", tx.txid, vout.n),
                        txid: tx.txid.clone(),
                        n: vout.n,
                        value: to_units(vout.value),
                        token_id: vout.token_id,
                        script_hex: vout.script.hex.clone(),
                        script_type: vout.script.kind.clone(),
                    })
                    .await?;
            }
            self.transactions
                .put(&Transaction::new(block, order, tx))
                .await?;
        }
        Ok(())
    }

    async fn invalidate_block_start(&self, block: &SourceBlock) -> Result<(), IndexerError> {
        for tx in block.transactions.iter().rev() {
            self.transactions.delete(&tx.txid).await?;
            for vout in tx.vout.iter().rev() {
                self.vouts.delete(&format!("{}-{}", tx.txid, vout.n)).await?;
            }
        }
        Ok(())
    }
}
