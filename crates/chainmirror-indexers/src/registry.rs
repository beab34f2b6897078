//! The standard sub-indexer set, in dispatch order.

use std::sync::Arc;

use chainmirror_core::config::SyncConfig;
use chainmirror_core::handler::IndexerRegistry;
use chainmirror_core::store::KeyedStore;

use crate::masternode::{
    CreateMasternodeIndexer, MasternodeMapper, MasternodeStatsIndexer, MasternodeStatsMapper,
    ResignMasternodeIndexer,
};
use crate::oracle::{AppointOracleIndexer, OracleMappers, RemoveOracleIndexer, UpdateOracleIndexer};
use crate::price::SetOracleDataIndexer;
use crate::token::TokenIndexer;
use crate::transaction::TransactionIndexer;

/// Build the registry of every domain sub-indexer over `store`.
///
/// The [`BlockIndexer`](chainmirror_core::block::BlockIndexer) is not part of
/// it: [`SyncDriver::new`](chainmirror_core::driver::SyncDriver::new) appends
/// it last.
pub fn default_registry(store: Arc<dyn KeyedStore>, config: &SyncConfig) -> IndexerRegistry {
    let oracles = OracleMappers::new(Arc::clone(&store));
    let masternodes = MasternodeMapper::new(Arc::clone(&store));
    let stats = MasternodeStatsMapper::new(Arc::clone(&store));

    IndexerRegistry::new()
        .with(Arc::new(TransactionIndexer::new(Arc::clone(&store))))
        .with(Arc::new(TokenIndexer::new(
            Arc::clone(&store),
            config.native_token_symbol.clone(),
        )))
        .with(Arc::new(AppointOracleIndexer::new(oracles.clone())))
        .with(Arc::new(UpdateOracleIndexer::new(oracles.clone())))
        .with(Arc::new(RemoveOracleIndexer::new(oracles)))
        .with(Arc::new(SetOracleDataIndexer::new(store)))
        .with(Arc::new(CreateMasternodeIndexer::new(masternodes.clone())))
        .with(Arc::new(ResignMasternodeIndexer::new(masternodes.clone())))
        .with(Arc::new(MasternodeStatsIndexer::new(masternodes, stats)))
}
