//! In-memory log implementation
//!
//! A `BTreeMap`-backed [`LogHandle`] for tests and demos. Individual
//! records can be deleted to create gaps, which is how pruned regions of
//! a production log are simulated.

use async_trait::async_trait;
use bytes::Bytes;
use dataplane_log::{EventStream, LogError, LogEvent, LogHandle, LogResult, Record, Timestamp};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory log keyed by record number
#[derive(Clone, Default)]
pub struct MemoryLog {
    records: Arc<RwLock<BTreeMap<u64, Record>>>,
}

impl MemoryLog {
    /// Create a new empty log
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Append a payload with an explicit timestamp.
    ///
    /// Timestamps are normally assigned by the log clock; tests use this
    /// to lay out a known time axis.
    pub async fn append_with_timestamp(&self, payload: Bytes, timestamp: Timestamp) -> Record {
        let mut records = self.records.write().await;
        let recno = records.keys().next_back().map_or(1, |&last| last + 1);
        let record = Record {
            recno,
            timestamp,
            payload,
        };
        records.insert(recno, record.clone());
        record
    }

    /// Delete the record at `recno`, leaving a gap.
    ///
    /// Returns true if the record existed and was deleted.
    pub async fn delete(&self, recno: u64) -> bool {
        self.records.write().await.remove(&recno).is_some()
    }

    /// Number of records currently stored
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the log holds no records
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Resolve a signed selector to an absolute record number.
    ///
    /// Selectors `<= -1` count back from the most recent record; `0` is
    /// never a valid record number.
    fn resolve(records: &BTreeMap<u64, Record>, recno: i64) -> LogResult<u64> {
        if recno >= 1 {
            return Ok(recno as u64);
        }
        let last = *records
            .keys()
            .next_back()
            .ok_or(LogError::NotFound(recno))?;
        let resolved = last as i64 + 1 + recno;
        if resolved < 1 {
            return Err(LogError::NotFound(recno));
        }
        Ok(resolved as u64)
    }
}

#[async_trait]
impl LogHandle for MemoryLog {
    async fn read(&self, recno: i64) -> LogResult<Record> {
        let records = self.records.read().await;
        let resolved = Self::resolve(&records, recno)?;
        records
            .get(&resolved)
            .cloned()
            .ok_or(LogError::NotFound(recno))
    }

    async fn read_by_hash(&self, hash: &[u8; 32]) -> LogResult<Record> {
        let records = self.records.read().await;
        records
            .values()
            .find(|record| record.content_hash() == *hash)
            .cloned()
            .ok_or_else(|| LogError::HashNotFound(hex::encode(hash)))
    }

    async fn read_async(&self, start: i64, count: u64) -> LogResult<EventStream> {
        let records = self.records.read().await;
        let mut events = Vec::with_capacity(count as usize + 1);
        match Self::resolve(&records, start) {
            Ok(resolved) => {
                for recno in resolved..resolved + count {
                    match records.get(&recno) {
                        Some(record) => events.push(LogEvent::Data(record.clone())),
                        None => events.push(LogEvent::Missing(recno as i64)),
                    }
                }
            }
            Err(LogError::NotFound(_)) => {
                for offset in 0..count as i64 {
                    events.push(LogEvent::Missing(start + offset));
                }
            }
            Err(e) => return Err(e),
        }
        events.push(LogEvent::Done);
        Ok(Box::new(tokio_stream::iter(events)))
    }

    async fn append(&self, payload: Bytes) -> LogResult<Record> {
        Ok(self.append_with_timestamp(payload, Timestamp::now()).await)
    }
}

impl std::fmt::Debug for MemoryLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLog")
            .field("records", &"<locked>")
            .finish()
    }
}
