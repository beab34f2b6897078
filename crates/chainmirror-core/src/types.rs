//! Shared types for the indexing pipeline.
//!
//! [`SourceBlock`] mirrors the verbosity-2 `getblock` JSON shape a full node
//! returns, with each transaction optionally carrying a [`DecodedOp`]
//! produced upstream by the wire codec.

use serde::{Deserialize, Serialize};

/// Number of base units in one coin.
pub const COIN: u64 = 100_000_000;

/// Convert a decimal coin amount (as reported by the node) into base units.
pub fn to_units(value: f64) -> u64 {
    (value * COIN as f64).round() as u64
}

/// Encode a height as fixed-width lowercase hex so that lexical order
/// equals numeric order.
pub fn encode_height(height: u32) -> String {
    format!("{height:08x}")
}

// ─── OpTag / DecodedOp ───────────────────────────────────────────────────────

/// Tag of a decoded custom transaction operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpTag {
    CreateToken,
    AppointOracle,
    UpdateOracle,
    RemoveOracle,
    SetOracleData,
    CreateMasternode,
    ResignMasternode,
}

impl std::fmt::Display for OpTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CreateToken => "CreateToken",
            Self::AppointOracle => "AppointOracle",
            Self::UpdateOracle => "UpdateOracle",
            Self::RemoveOracle => "RemoveOracle",
            Self::SetOracleData => "SetOracleData",
            Self::CreateMasternode => "CreateMasternode",
            Self::ResignMasternode => "ResignMasternode",
        };
        f.write_str(s)
    }
}

/// An operation decoded from a transaction by the external wire codec.
///
/// The payload stays opaque JSON until the interested sub-indexer
/// deserializes it into its own typed struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedOp {
    pub tag: OpTag,
    #[serde(default)]
    pub payload: serde_json::Value,
}

// ─── SourceBlock ─────────────────────────────────────────────────────────────

/// A full block as supplied by the chain source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceBlock {
    pub hash: String,
    /// Absent only for the genesis block.
    #[serde(rename = "previousblockhash", default)]
    pub previous_hash: String,
    pub height: u32,
    pub time: i64,
    #[serde(rename = "mediantime")]
    pub median_time: i64,
    #[serde(default)]
    pub difficulty: f64,
    #[serde(default)]
    pub minter: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub weight: u64,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub merkleroot: String,
    #[serde(rename = "tx", default)]
    pub transactions: Vec<SourceTransaction>,
}

impl SourceBlock {
    /// Returns `true` if `self` directly extends a block with `parent_hash` at `parent_height`.
    pub fn extends(&self, parent_hash: &str, parent_height: u32) -> bool {
        self.height == parent_height + 1 && self.previous_hash == parent_hash
    }

    /// Iterate over `(order, tx, op)` for every transaction carrying a decoded op.
    pub fn ops(&self) -> impl DoubleEndedIterator<Item = (usize, &SourceTransaction, &DecodedOp)> {
        self.transactions
            .iter()
            .enumerate()
            .filter_map(|(i, tx)| tx.op.as_ref().map(|op| (i, tx, op)))
    }

    /// Position of transaction `txid` in this block.
    pub fn order_of(&self, txid: &str) -> Option<u32> {
        self.transactions
            .iter()
            .position(|tx| tx.txid == txid)
            .map(|i| i as u32)
    }

    /// Returns `true` if a transaction ahead of `txid` in this block carries
    /// `tag` and has txid `id`, i.e. it created the entity `id`.
    pub fn creates_before(&self, tag: OpTag, id: &str, txid: &str) -> bool {
        self.ops()
            .take_while(|(_, tx, _)| tx.txid != txid)
            .any(|(_, tx, op)| op.tag == tag && tx.txid == id)
    }
}

/// A transaction inside a [`SourceBlock`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTransaction {
    pub txid: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub vsize: u64,
    #[serde(default)]
    pub weight: u64,
    #[serde(rename = "locktime", default)]
    pub lock_time: u64,
    #[serde(default)]
    pub vin: Vec<SourceVin>,
    #[serde(default)]
    pub vout: Vec<SourceVout>,
    /// Custom operation decoded by the wire codec, if any.
    #[serde(default)]
    pub op: Option<DecodedOp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceVin {
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub vout: Option<u32>,
    #[serde(default)]
    pub coinbase: Option<String>,
    #[serde(default)]
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceVout {
    pub value: f64,
    pub n: u32,
    #[serde(rename = "scriptPubKey", default)]
    pub script: ScriptPubKey,
    #[serde(rename = "tokenId", default)]
    pub token_id: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptPubKey {
    #[serde(default)]
    pub hex: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

// ─── BlockRef ────────────────────────────────────────────────────────────────

/// The block context every indexed entity records about its origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub hash: String,
    pub height: u32,
    pub time: i64,
    pub median_time: i64,
}

impl From<&SourceBlock> for BlockRef {
    fn from(block: &SourceBlock) -> Self {
        Self {
            hash: block.hash.clone(),
            height: block.height,
            time: block.time,
            median_time: block.median_time,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
