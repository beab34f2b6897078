//! Status ledger: the singleton record of the driver's last attempted
//! operation, used only for crash recovery.
//!
//! The driver writes it immediately before and after every apply/undo. A
//! non-terminal status found at the top of a cycle means the previous attempt
//! was interrupted and the recorded block must be invalidated first.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::IndexerError;
use crate::mapper::{Entity, ModelMapper};
use crate::store::KeyedStore;

/// Phase of the last apply/undo attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Indexing,
    Indexed,
    Invalidating,
    Invalidated,
    Error,
}

impl Status {
    /// `Indexed` and `Invalidated` are the only safe resting states.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Indexed | Self::Invalidated)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Indexing => write!(f, "indexing"),
            Self::Indexed => write!(f, "indexed"),
            Self::Invalidating => write!(f, "invalidating"),
            Self::Invalidated => write!(f, "invalidated"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// The persisted ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub hash: String,
    pub height: u32,
    pub status: Status,
    /// Unix timestamp of the write.
    pub updated_at: i64,
}

const STATUS_KEY: &str = "sync";

impl Entity for SyncStatus {
    const MODEL: &'static str = "sync_status";

    fn primary_key(&self) -> String {
        STATUS_KEY.to_string()
    }
}

/// Reads and writes the singleton [`SyncStatus`].
#[derive(Clone)]
pub struct StatusLedger {
    inner: ModelMapper<SyncStatus>,
}

impl StatusLedger {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self {
            inner: ModelMapper::new(store),
        }
    }

    pub async fn get(&self) -> Result<Option<SyncStatus>, IndexerError> {
        self.inner.get(STATUS_KEY).await
    }

    pub async fn put(&self, hash: &str, height: u32, status: Status) -> Result<(), IndexerError> {
        tracing::debug!(height, hash, %status, "sync status");
        self.inner
            .put(&SyncStatus {
                hash: hash.to_string(),
                height,
                status,
                updated_at: chrono::Utc::now().timestamp(),
            })
            .await
    }
}
