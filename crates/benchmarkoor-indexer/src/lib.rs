//! Incremental indexing of persisted benchmark runs
//!
//! A periodic background pass lists runs from the storage reader, diffs
//! them against the key-ordered store, and upserts per-run and per-test
//! records. Reindexing is idempotent and nothing is ever deleted.

pub mod error;
pub mod indexer;
pub mod store;

pub use error::{IndexerError, Result};
pub use indexer::{Indexer, IndexerConfig, PassStats};
pub use store::{IndexStore, RedbStore, RunIndexEntry, TestIndexRow, UPSERT_BATCH_SIZE};
