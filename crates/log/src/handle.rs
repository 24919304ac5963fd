//! The abstract log handle trait

use async_trait::async_trait;
use bytes::Bytes;
use tokio_stream::Stream;

use crate::types::{LogEvent, Record};

/// Result type for log operations
pub type LogResult<T> = Result<T, LogError>;

/// Errors that can occur against a log backend.
///
/// `NotFound` is the only non-fatal variant: it marks a gap (pruned,
/// never-written, or out-of-range record number) and drives ordinary
/// branching in callers. Everything else is a backend failure and
/// propagates unchanged.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// No record stored at the addressed record number
    #[error("record not found: {0}")]
    NotFound(i64),

    /// No record with the given content hash
    #[error("no record with hash {0}")]
    HashNotFound(String),

    /// Log backend error
    #[error("log backend error: {0}")]
    Backend(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LogError {
    /// Whether this error marks a gap rather than a backend failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::HashNotFound(_))
    }
}

/// Finite stream of read events, terminated by [`LogEvent::Done`]
pub type EventStream = Box<dyn Stream<Item = LogEvent> + Send + Unpin>;

/// Handle to a single named append-only log.
///
/// Record numbers are 1-based. Read selectors are signed: values
/// `<= -1` address relative to the most recent record, so `-1` is the
/// latest record and `-2` the one before it.
#[async_trait]
pub trait LogHandle: Send + Sync + 'static {
    /// Read a single record by record number
    async fn read(&self, recno: i64) -> LogResult<Record>;

    /// Read a single record by SHA-256 content hash
    async fn read_by_hash(&self, hash: &[u8; 32]) -> LogResult<Record>;

    /// Issue an asynchronous batched read of `count` records starting at
    /// `start`.
    ///
    /// The returned stream yields one event per addressed record number
    /// (`Data` or `Missing`) in unspecified arrival order, followed by a
    /// single `Done`.
    async fn read_async(&self, start: i64, count: u64) -> LogResult<EventStream>;

    /// Append a payload; the log assigns the record number and timestamp
    async fn append(&self, payload: Bytes) -> LogResult<Record>;
}

#[async_trait]
impl<T: LogHandle> LogHandle for std::sync::Arc<T> {
    async fn read(&self, recno: i64) -> LogResult<Record> {
        (**self).read(recno).await
    }

    async fn read_by_hash(&self, hash: &[u8; 32]) -> LogResult<Record> {
        (**self).read_by_hash(hash).await
    }

    async fn read_async(&self, start: i64, count: u64) -> LogResult<EventStream> {
        (**self).read_async(start, count).await
    }

    async fn append(&self, payload: Bytes) -> LogResult<Record> {
        (**self).append(payload).await
    }
}
