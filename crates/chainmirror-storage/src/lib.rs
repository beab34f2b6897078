//! chainmirror-storage: keyed sorted store backends for ChainMirror.
//!
//! Backends:
//! - `MemoryStore`: in-memory (dev/testing, no persistence), re-exported from core
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)

#[cfg(feature = "memory")]
pub use chainmirror_core::memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
