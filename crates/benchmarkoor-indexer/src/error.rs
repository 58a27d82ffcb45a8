//! Error types for the indexer

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Storage error: {0}")]
    Storage(#[from] benchmarkoor_storage::StorageError),

    #[error("Index store error: {0}")]
    Store(#[from] redb::Error),

    #[error("Failed to decode run artifact: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redb::DatabaseError> for IndexerError {
    fn from(error: redb::DatabaseError) -> Self {
        Self::Store(error.into())
    }
}

impl From<redb::TransactionError> for IndexerError {
    fn from(error: redb::TransactionError) -> Self {
        Self::Store(error.into())
    }
}

impl From<redb::TableError> for IndexerError {
    fn from(error: redb::TableError) -> Self {
        Self::Store(error.into())
    }
}

impl From<redb::StorageError> for IndexerError {
    fn from(error: redb::StorageError) -> Self {
        Self::Store(error.into())
    }
}

impl From<redb::CommitError> for IndexerError {
    fn from(error: redb::CommitError) -> Self {
        Self::Store(error.into())
    }
}
