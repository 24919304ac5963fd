//! Core record and log types

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Log name type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogName(String);

impl LogName {
    /// Create a new log name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for LogName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for LogName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Wall-clock instant carried by every committed record, as fractional
/// seconds since the Unix epoch.
///
/// Record timestamps are assigned by the log at append time and are
/// assumed non-decreasing in record-number order. That monotonicity is a
/// precondition of time-indexed queries, not something this layer checks
/// or enforces.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Timestamp(f64);

impl Timestamp {
    /// Create a timestamp from fractional epoch seconds
    pub fn from_secs(secs: f64) -> Self {
        Self(secs)
    }

    /// Create a timestamp from split seconds/nanoseconds parts
    pub fn from_parts(sec: i64, nsec: u32) -> Self {
        Self(sec as f64 + f64::from(nsec) / 1e9)
    }

    /// The current wall-clock time
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(elapsed.as_secs_f64())
    }

    /// Fractional seconds since the Unix epoch
    pub fn as_secs_f64(self) -> f64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.9}", self.0)
    }
}

impl From<f64> for Timestamp {
    fn from(secs: f64) -> Self {
        Self(secs)
    }
}

/// A committed record in an append-only log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Record number, 1-based and strictly increasing
    pub recno: u64,
    /// Commit timestamp assigned by the log at append time
    pub timestamp: Timestamp,
    /// Record payload
    pub payload: Bytes,
}

impl Record {
    /// SHA-256 digest of the payload, the record's content identity
    pub fn content_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(&self.payload);
        hasher.finalize().into()
    }
}

/// How a query addresses a record.
///
/// Selector dispatch is a `match` over this type rather than runtime
/// inspection of the argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QueryKey {
    /// By record number; values `<= -1` address backwards from the most
    /// recent record (`-1` is the latest)
    ByRecno(i64),
    /// By SHA-256 content hash
    ByHash([u8; 32]),
    /// By wall-clock time: the latest record at or before the instant
    ByTimestamp(Timestamp),
}

/// An event delivered on an asynchronous read stream.
///
/// Arrival order of `Data` events is not specified; consumers that need
/// record-number order must sort. Every stream is terminated by a single
/// `Done` event. Consumers must tolerate (log and skip) event kinds they
/// do not understand.
#[derive(Debug, Clone)]
pub enum LogEvent {
    /// A record satisfying one of the batched reads
    Data(Record),
    /// A batched read that addressed a missing record number
    Missing(i64),
    /// End of the batch
    Done,
    /// The backend is shutting down; no further events will arrive
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_parts() {
        let ts = Timestamp::from_parts(1000, 500_000_000);
        assert!((ts.as_secs_f64() - 1000.5).abs() < 1e-9);
    }

    #[test]
    fn test_timestamp_ordering() {
        assert!(Timestamp::from_secs(1.0) < Timestamp::from_secs(2.0));
        assert!(Timestamp::from_secs(2.0) >= Timestamp::from_secs(2.0));
    }

    #[test]
    fn test_content_hash_is_stable() {
        let a = Record {
            recno: 1,
            timestamp: Timestamp::from_secs(0.0),
            payload: Bytes::from_static(b"payload"),
        };
        let b = Record {
            recno: 2,
            timestamp: Timestamp::from_secs(5.0),
            payload: Bytes::from_static(b"payload"),
        };
        assert_eq!(a.content_hash(), b.content_hash());
    }
}
