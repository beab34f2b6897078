//! Error types for the chainmirror pipeline.

use thiserror::Error;

use crate::types::OpTag;

/// Errors reported by a [`ChainSource`](crate::source::ChainSource).
#[derive(Debug, Error)]
pub enum SourceError {
    /// The requested height is past the source's current best block.
    ///
    /// This is the expected "nothing new yet" signal when polling the tip.
    #[error("block height {0} out of range")]
    HeightOutOfRange(u32),

    /// The source does not know a block with this hash.
    #[error("block not found: {0}")]
    BlockNotFound(String),

    /// Transport or node-side failure.
    #[error("RPC error: {0}")]
    Rpc(String),
}

impl SourceError {
    /// Returns `true` if this is the expected end-of-chain signal.
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, Self::HeightOutOfRange(_))
    }
}

/// Errors that can occur while indexing, invalidating or querying.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A decoded operation payload does not have the shape its tag promises.
    #[error("Malformed {tag} payload in tx {txid}: {reason}")]
    Payload {
        tag: OpTag,
        txid: String,
        reason: String,
    },

    #[error("Handler error in '{handler}': {reason}")]
    Handler { handler: String, reason: String },

    /// State required to index or roll back is missing.
    ///
    /// Always fatal: it means keys were not deterministic or history was
    /// not retained.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// A store-level invariant would be broken by a write.
    #[error("Consistency violation: {0}")]
    Consistency(String),

    #[error("Genesis indexing failed: {0}")]
    Genesis(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Timed out after {ms}ms waiting for the sync cycle to finish")]
    StopTimeout { ms: u64 },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Shorthand for [`IndexerError::NotFound`].
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    /// Returns `true` for the not-found consistency error kind.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if the source reported the expected end of chain.
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, Self::Source(e) if e.is_out_of_range())
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(err: serde_json::Error) -> Self {
        IndexerError::Serialization(err.to_string())
    }
}
