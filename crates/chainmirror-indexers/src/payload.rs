//! Typed payloads of the decoded custom operations.
//!
//! The wire codec hands each op over as `{tag, payload}` with an opaque JSON
//! payload; every sub-indexer deserializes the payload it subscribed to.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use chainmirror_core::error::IndexerError;
use chainmirror_core::types::{DecodedOp, SourceBlock, SourceTransaction};

/// Deserialize `op.payload` into `P`, attributing failures to the transaction.
pub fn decode<P: DeserializeOwned>(
    tx: &SourceTransaction,
    op: &DecodedOp,
) -> Result<P, IndexerError> {
    serde_json::from_value(op.payload.clone()).map_err(|e| IndexerError::Payload {
        tag: op.tag,
        txid: tx.txid.clone(),
        reason: e.to_string(),
    })
}

/// Position of `tx` in `block`; orders entities written by several
/// transactions of the same block.
pub fn order_in(block: &SourceBlock, tx: &SourceTransaction) -> Result<u32, IndexerError> {
    block.order_of(&tx.txid).ok_or_else(|| {
        IndexerError::Consistency(format!(
            "transaction {} is not part of block {}",
            tx.txid, block.hash
        ))
    })
}

/// A `token/currency` price pair an oracle publishes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PricePair {
    pub token: String,
    pub currency: String,
}

impl PricePair {
    /// `token-currency`, the partition key of everything priced in this pair.
    pub fn key(&self) -> String {
        format!("{}-{}", self.token, self.currency)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateToken {
    pub symbol: String,
    pub name: String,
    #[serde(default = "default_decimal")]
    pub decimal: u8,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub is_dat: bool,
    #[serde(default = "yes")]
    pub mintable: bool,
    #[serde(default = "yes")]
    pub tradeable: bool,
}

fn default_decimal() -> u8 {
    8
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointOracle {
    pub owner_address: String,
    pub weightage: u8,
    pub price_feeds: Vec<PricePair>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOracle {
    pub oracle_id: String,
    pub owner_address: String,
    pub weightage: u8,
    pub price_feeds: Vec<PricePair>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveOracle {
    pub oracle_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrencyAmount {
    pub currency: String,
    /// Decimal price as published.
    pub amount: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenPrice {
    pub token: String,
    pub prices: Vec<CurrencyAmount>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetOracleData {
    pub oracle_id: String,
    /// Oracle-reported publication time (unix seconds).
    pub timestamp: i64,
    pub token_prices: Vec<TokenPrice>,
}

impl SetOracleData {
    /// Flatten into `(pair, amount)` entries.
    pub fn feeds(&self) -> impl Iterator<Item = (PricePair, f64)> + '_ {
        self.token_prices.iter().flat_map(|tp| {
            tp.prices.iter().map(move |p| {
                (
                    PricePair {
                        token: tp.token.clone(),
                        currency: p.currency.clone(),
                    },
                    p.amount,
                )
            })
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMasternode {
    /// Operator address; defaults to the owner when absent.
    #[serde(default)]
    pub operator_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResignMasternode {
    pub node_id: String,
}
