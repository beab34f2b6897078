//! Tokens created on chain, plus the native token seeded at genesis.

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

use crate::payload::{self, CreateToken};

/// Key of the native token.
pub const NATIVE_TOKEN_ID: &str = "0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// Creation txid, or [`NATIVE_TOKEN_ID`].
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub decimal: u8,
    pub limit: u64,
    pub is_dat: bool,
    pub mintable: bool,
    pub tradeable: bool,
    pub block: BlockRef,
}

/// Tokens in creation order.
pub const TOKEN_ALL: IndexDef = IndexDef::asc("all");

impl Entity for Token {
    const MODEL: &'static str = "token";

    fn primary_key(&self) -> String {
        self.id.clone()
    }

    fn index_entries(&self) -> Vec<IndexEntry> {
        vec![IndexEntry::global(
            TOKEN_ALL.name,
            format!("{}-{}", encode_height(self.block.height), self.id),
        )]
    }
}

#[derive(Clone)]
pub struct TokenMapper(ModelMapper<Token>);

impl TokenMapper {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self(ModelMapper::new(store))
    }

    pub async fn query_all(&self, page: &PageQuery) -> Result<Page<Token>, IndexerError> {
        self.0.query(&TOKEN_ALL, None, page).await
    }
}

impl Deref for TokenMapper {
    type Target = ModelMapper<Token>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub struct TokenIndexer {
    tokens: TokenMapper,
    native_symbol: String,
}

impl TokenIndexer {
    pub fn new(store: Arc<dyn KeyedStore>, native_symbol: impl Into<String>) -> Self {
        Self {
            tokens: TokenMapper::new(store),
            native_symbol: native_symbol.into(),
        }
    }
}

#[async_trait]
impl SubIndexer for TokenIndexer {
    fn name(&self) -> &str {
        "token"
    }

    fn ops(&self) -> &[OpTag] {
        &[OpTag::CreateToken]
    }

    async fn seed_genesis(&self, block: &SourceBlock) -> Result<(), IndexerError> {
        tracing::info!(symbol = %self.native_symbol, "seeding native token");
        self.tokens
            .put(&Token {
                id: NATIVE_TOKEN_ID.into(),
                symbol: self.native_symbol.clone(),
                name: format!("Default Defi token ({})", self.native_symbol),
                decimal: 8,
                limit: 0,
                is_dat: true,
                mintable: false,
                tradeable: true,
                block: BlockRef::from(block),
            })
            .await
            .map_err(|e| IndexerError::Genesis(e.to_string()))
    }

    async fn unseed_genesis(&self, _block: &SourceBlock) -> Result<(), IndexerError> {
        self.tokens.delete(NATIVE_TOKEN_ID).await
    }

    async fn index_transaction(
        &self,
        block: &SourceBlock,
        tx: &SourceTransaction,
        op: &DecodedOp,
    ) -> Result<(), IndexerError> {
        let data: CreateToken = payload::decode(tx, op)?;
        tracing::debug!(symbol = %data.symbol, txid = %tx.txid, "token created");
        self.tokens
            .put(&Token {
                id: tx.txid.clone(),
                symbol: data.symbol,
                name: data.name,
                decimal: data.decimal,
                limit: data.limit,
                is_dat: data.is_dat,
                mintable: data.mintable,
                tradeable: data.tradeable,
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
        self.tokens.delete(&tx.txid).await
    }
}
