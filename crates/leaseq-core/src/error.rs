//! Error types for leaseq-core.
//!
//! `QueueEmpty` と `LeaseNotFound` は「想定内」のエラー（HTTP 層で 404 に変換される）。
//! ストレージ由来のエラーはラップせずにそのまま呼び出し元へ返す。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// No task available in any source.
    #[error("queue is empty")]
    QueueEmpty,

    /// Confirm on an absent, expired or unknown lease key.
    #[error("lease not found: {0}")]
    LeaseNotFound(String),

    /// Store used before initialization or after close.
    #[error("store unavailable: {0}")]
    StoreUnavailable(&'static str),

    #[error("empty payload cannot be leased")]
    EmptyPayload,

    #[error("malformed lease key: {0}")]
    InvalidLeaseKey(String),

    #[error("corrupt task record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl QueueError {
    /// Expected outcomes that callers map to "not found" rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, QueueError::QueueEmpty | QueueError::LeaseNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
