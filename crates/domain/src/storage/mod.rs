//! Persistence contracts consumed by the reconciliation engine and the chain
//! scanners. Implementations live in the storage crate.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{TransferId, TransferRecord};

/// Common result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("corrupt row for `{key}`: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StorageError {
    pub fn from_source(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }

    /// Backend failures may clear up on their own; a corrupt row will not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// Durable transfer records keyed by [`TransferId`].
///
/// Both write operations are conditional so concurrent scanners racing on the
/// same identifier cannot overwrite each other; a `false` return tells the
/// caller its precondition no longer held and it must re-read.
#[async_trait]
pub trait TransferStore: Send + Sync {
    async fn find_transfer(&self, id: &TransferId) -> StorageResult<Option<TransferRecord>>;

    /// Inserts `record` unless a row for its identifier already exists.
    /// Returns `true` when this call created the row.
    async fn insert_transfer(&self, record: &TransferRecord) -> StorageResult<bool>;

    /// Writes both legs and the match flag of a completed record, but only if
    /// the stored row still has an empty second leg. Returns `true` when the
    /// update was applied.
    async fn complete_transfer(&self, record: &TransferRecord) -> StorageResult<bool>;

    /// All records whose match flag is still `false`, oldest first.
    async fn find_unmatched(&self) -> StorageResult<Vec<TransferRecord>>;
}

/// Per-chain scan cursor: the last block whose logs were fully processed.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load_checkpoint(&self, chain: &str) -> StorageResult<Option<u64>>;
    async fn save_checkpoint(&self, chain: &str, block: u64) -> StorageResult<()>;
}
