//! Chain fixtures for the end-to-end tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use chainmirror_core::config::SyncConfig;
use chainmirror_core::driver::SyncDriver;
use chainmirror_core::error::IndexerError;
use chainmirror_core::handler::{IndexerRegistry, SubIndexer};
use chainmirror_core::memory::MemoryStore;
use chainmirror_core::source::MemorySource;
use chainmirror_core::store::KeyedStore;
use chainmirror_core::types::{DecodedOp, OpTag, SourceBlock, SourceTransaction};
use chainmirror_indexers::default_registry;

pub const T0: i64 = 1_700_000_000;

/// Every model the default registry and the driver write, except the
/// status ledger whose timestamp differs between runs.
pub const MODELS: &[&str] = &[
    "block",
    "transaction",
    "transaction_vout",
    "token",
    "oracle",
    "oracle_history",
    "oracle_token_currency",
    "oracle_price_feed",
    "oracle_price_aggregated",
    "masternode",
    "masternode_stats",
];

// ─── Transactions ────────────────────────────────────────────────────────────

fn with_op(txid: &str, tag: &str, payload: Value) -> Value {
    json!({
        "txid": txid,
        "vout": [{ "value": 0.0, "n": 0, "scriptPubKey": { "hex": "6a", "type": "nulldata" } }],
        "op": { "tag": tag, "payload": payload }
    })
}

fn pairs(pairs: &[(&str, &str)]) -> Value {
    pairs
        .iter()
        .map(|(token, currency)| json!({ "token": token, "currency": currency }))
        .collect()
}

pub fn create_token(txid: &str, symbol: &str) -> Value {
    with_op(txid, "CreateToken", json!({ "symbol": symbol, "name": symbol, "isDat": true }))
}

pub fn appoint(txid: &str, weightage: u8, feeds: &[(&str, &str)]) -> Value {
    with_op(
        txid,
        "AppointOracle",
        json!({ "ownerAddress": format!("owner-{txid}"), "weightage": weightage, "priceFeeds": pairs(feeds) }),
    )
}

pub fn update(txid: &str, oracle: &str, weightage: u8, feeds: &[(&str, &str)]) -> Value {
    with_op(
        txid,
        "UpdateOracle",
        json!({ "oracleId": oracle, "ownerAddress": format!("owner-{oracle}"), "weightage": weightage, "priceFeeds": pairs(feeds) }),
    )
}

pub fn remove(txid: &str, oracle: &str) -> Value {
    with_op(txid, "RemoveOracle", json!({ "oracleId": oracle }))
}

pub fn set_data(txid: &str, oracle: &str, time: i64, prices: &[(&str, &str, f64)]) -> Value {
    let token_prices: Vec<Value> = prices
        .iter()
        .map(|(token, currency, amount)| {
            json!({ "token": token, "prices": [{ "currency": currency, "amount": amount }] })
        })
        .collect();
    with_op(
        txid,
        "SetOracleData",
        json!({ "oracleId": oracle, "timestamp": time, "tokenPrices": token_prices }),
    )
}

pub fn create_masternode(txid: &str, collateral: f64) -> Value {
    json!({
        "txid": txid,
        "vout": [
            { "value": 0.0, "n": 0, "scriptPubKey": { "hex": "6a", "type": "nulldata" } },
            { "value": collateral, "n": 1, "scriptPubKey": { "hex": format!("owner-{txid}"), "type": "pubkeyhash" } }
        ],
        "op": { "tag": "CreateMasternode", "payload": {} }
    })
}

pub fn resign_masternode(txid: &str, node: &str) -> Value {
    with_op(txid, "ResignMasternode", json!({ "nodeId": node }))
}

// ─── Chains ──────────────────────────────────────────────────────────────────

pub fn time_of(height: u32) -> i64 {
    T0 + height as i64 * 30
}

/// Builds a linear chain; block hashes are `{fork}{height}`.
pub struct ChainBuilder {
    fork: String,
    blocks: Vec<SourceBlock>,
}

impl ChainBuilder {
    pub fn new(fork: &str) -> Self {
        Self {
            fork: fork.into(),
            blocks: vec![],
        }
    }

    /// Continue `base[..keep]` under a new fork name.
    pub fn fork(base: &[SourceBlock], keep: usize, fork: &str) -> Self {
        Self {
            fork: fork.into(),
            blocks: base[..keep].to_vec(),
        }
    }

    /// Append a block holding a coinbase plus `txs`.
    pub fn block(mut self, txs: Vec<Value>) -> Self {
        let height = self.blocks.len() as u32;
        let hash = format!("{}{height}", self.fork);
        let previous = self.blocks.last().map(|b| b.hash.clone()).unwrap_or_default();
        let mut all = vec![json!({
            "txid": format!("cb-{hash}"),
            "vin": [{ "coinbase": "04ffff001d", "sequence": 4294967295u64 }],
            "vout": [{ "value": 200.0, "n": 0, "scriptPubKey": { "hex": format!("minter-{hash}"), "type": "pubkeyhash" } }]
        })];
        all.extend(txs);
        let block = serde_json::from_value(json!({
            "hash": hash,
            "previousblockhash": previous,
            "height": height,
            "time": time_of(height),
            "mediantime": time_of(height) - 15,
            "difficulty": 1.0,
            "tx": all,
        }))
        .expect("fixture block");
        self.blocks.push(block);
        self
    }

    pub fn empty(mut self, count: usize) -> Self {
        for _ in 0..count {
            self = self.block(vec![]);
        }
        self
    }

    pub fn build(self) -> Vec<SourceBlock> {
        self.blocks
    }
}

/// Heights 0..=5 exercising every op tag.
pub fn chain_a() -> Vec<SourceBlock> {
    ChainBuilder::new("a")
        .block(vec![])
        .block(vec![
            create_token("tok-btc", "BTC"),
            appoint("o1", 1, &[("BTC", "USD")]),
            create_masternode("mn1", 20000.0),
        ])
        .block(vec![
            set_data("f2", "o1", time_of(2), &[("BTC", "USD", 100.0)]),
            appoint("o2", 2, &[("BTC", "USD")]),
        ])
        .block(vec![
            set_data("f3a", "o1", time_of(3), &[("BTC", "USD", 101.0)]),
            set_data("f3b", "o2", time_of(3), &[("BTC", "USD", 104.0)]),
            update("u3", "o1", 3, &[("BTC", "USD"), ("ETH", "USD")]),
        ])
        .block(vec![
            set_data("f4", "o1", time_of(4), &[("BTC", "USD", 105.0), ("ETH", "USD", 2000.0)]),
            create_masternode("mn2", 20000.0),
            resign_masternode("r4", "mn1"),
        ])
        .block(vec![
            remove("x5", "o2"),
            set_data("f5", "o1", time_of(5), &[("BTC", "USD", 106.0)]),
        ])
        .build()
}

/// Chain A with heights 4 and 5 replaced.
pub fn chain_b() -> Vec<SourceBlock> {
    ChainBuilder::fork(&chain_a(), 4, "b")
        .block(vec![
            set_data("g4", "o2", time_of(4), &[("BTC", "USD", 99.0)]),
            create_masternode("mn3", 20000.0),
        ])
        .block(vec![update("v5", "o2", 5, &[("BTC", "USD")])])
        .build()
}

/// Chain A plus a block whose transactions depend on each other, and a block
/// removing `o1` after it.
///
/// Block 6 feeds BTC-USD twice from `o1` (`fz` before `fa`), creates and
/// resigns `mn9`, appoints and updates `o9`, appoints and removes `o8`, and
/// updates `o1` twice (`zz` before `aa`). Every second pair orders differently
/// by txid than by position.
pub fn chain_c() -> Vec<SourceBlock> {
    ChainBuilder::fork(&chain_a(), 6, "c")
        .block(vec![
            set_data("fz", "o1", time_of(6), &[("BTC", "USD", 107.0)]),
            set_data("fa", "o1", time_of(6), &[("BTC", "USD", 108.0)]),
            create_masternode("mn9", 20000.0),
            resign_masternode("r9", "mn9"),
            appoint("o9", 1, &[("ETH", "USD")]),
            update("u9", "o9", 2, &[("BTC", "USD")]),
            appoint("o8", 4, &[("BTC", "USD")]),
            remove("x8", "o8"),
            update("zz", "o1", 7, &[("ETH", "USD")]),
            update("aa", "o1", 9, &[("BTC", "USD"), ("DOGE", "USD")]),
        ])
        .block(vec![remove("x7", "o1")])
        .build()
}

// ─── Harness ─────────────────────────────────────────────────────────────────

/// Fails one hook once, at a chosen height or transaction.
#[derive(Default)]
pub struct FailOnce {
    pub index_end_at: Mutex<Option<u32>>,
    pub invalidate_end_at: Mutex<Option<u32>>,
    /// Fails `index_transaction` of this txid, after the domain indexers
    /// registered ahead of it have applied it.
    pub index_tx_at: Mutex<Option<String>>,
}

fn trip<T: PartialEq + std::fmt::Debug>(slot: &Mutex<Option<T>>, at: &T) -> Result<(), IndexerError> {
    let mut armed = slot.lock().expect("fail-once lock");
    if armed.as_ref() == Some(at) {
        *armed = None;
        return Err(IndexerError::Handler {
            handler: "fail_once".into(),
            reason: format!("injected failure at {at:?}"),
        });
    }
    Ok(())
}

const ALL_OPS: &[OpTag] = &[
    OpTag::CreateToken,
    OpTag::AppointOracle,
    OpTag::UpdateOracle,
    OpTag::RemoveOracle,
    OpTag::SetOracleData,
    OpTag::CreateMasternode,
    OpTag::ResignMasternode,
];

#[async_trait]
impl SubIndexer for FailOnce {
    fn name(&self) -> &str {
        "fail_once"
    }

    fn ops(&self) -> &[OpTag] {
        ALL_OPS
    }

    async fn index_transaction(
        &self,
        _block: &SourceBlock,
        tx: &SourceTransaction,
        _op: &DecodedOp,
    ) -> Result<(), IndexerError> {
        trip(&self.index_tx_at, &tx.txid)
    }

    async fn index_block_end(&self, block: &SourceBlock) -> Result<(), IndexerError> {
        trip(&self.index_end_at, &block.height)
    }

    async fn invalidate_block_end(&self, block: &SourceBlock) -> Result<(), IndexerError> {
        trip(&self.invalidate_end_at, &block.height)
    }
}

pub struct Mirror {
    pub store: Arc<MemoryStore>,
    pub source: Arc<MemorySource>,
    pub driver: SyncDriver,
}

pub fn driver_over(
    store: Arc<dyn KeyedStore>,
    source: Arc<MemorySource>,
    extra: Option<Arc<dyn SubIndexer>>,
) -> SyncDriver {
    let config = SyncConfig::default();
    let mut registry: IndexerRegistry = default_registry(Arc::clone(&store), &config);
    if let Some(extra) = extra {
        registry.register(extra);
    }
    let driver = SyncDriver::new(source, store, registry, config);
    driver.start();
    driver
}

pub fn mirror(chain: Vec<SourceBlock>, extra: Option<Arc<dyn SubIndexer>>) -> Mirror {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(MemorySource::new(chain));
    let driver = driver_over(store.clone(), source.clone(), extra);
    Mirror {
        store,
        source,
        driver,
    }
}

/// Index `chain` from scratch and return the resulting store.
pub async fn indexed(chain: Vec<SourceBlock>) -> Arc<MemoryStore> {
    let m = mirror(chain, None);
    m.driver.cycle().await.expect("fresh index");
    m.store
}

pub fn assert_same_state(actual: &MemoryStore, expected: &MemoryStore) {
    for model in MODELS {
        assert_eq!(actual.dump(model).unwrap(), expected.dump(model).unwrap(), "model {model}");
    }
}
