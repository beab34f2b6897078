//! chainmirror-core: the reorg-safe engine that mirrors a UTXO chain into a
//! keyed, sorted store.
//!
//! # Architecture
//!
//! ```text
//! SyncService (poll timer)
//!   └── SyncDriver          (genesis, forward apply, single-block undo)
//!         ├── StatusLedger  (crash-resume marker: hash, height, status)
//!         ├── ChainSource   (full-node RPC boundary)
//!         └── IndexerRegistry
//!               ├── domain SubIndexers (registered by the caller)
//!               └── BlockIndexer       (always last)
//!                     └── ModelMapper<T> → KeyedStore (memory / SQLite)
//! ```

pub mod block;
pub mod config;
pub mod driver;
pub mod error;
pub mod handler;
pub mod health;
pub mod mapper;
pub mod memory;
pub mod pagination;
pub mod service;
pub mod source;
pub mod status;
pub mod store;
pub mod types;

pub use block::{Block, BlockIndexer, BlockMapper};
pub use config::SyncConfig;
pub use driver::{CycleOutcome, SyncDriver, SyncStep};
pub use error::{IndexerError, SourceError};
pub use handler::{IndexerRegistry, SubIndexer};
pub use health::{HealthProbe, Probe};
pub use mapper::{Entity, IndexDef, ModelMapper};
pub use memory::MemoryStore;
pub use pagination::{Page, PageQuery, PageToken};
pub use service::SyncService;
pub use source::{BlockchainInfo, ChainSource, MemorySource};
pub use status::{Status, StatusLedger, SyncStatus};
pub use store::{Direction, IndexEntry, KeyedStore, ScanQuery, StoredRecord};
pub use types::{
    encode_height, to_units, BlockRef, DecodedOp, OpTag, ScriptPubKey, SourceBlock,
    SourceTransaction, SourceVin, SourceVout, COIN,
};
