//! Abstract interface to an append-only record log
//!
//! This crate defines the minimal contract a log backend must provide:
//! read-by-record-number (with relative addressing from the tail),
//! read-by-content-hash, batched asynchronous reads, and append. The
//! storage engine behind the interface is deliberately out of scope —
//! backends range from an in-memory map to a replicated log server.
//!
//! A missing record number is not a failure of the backend: logs may be
//! pruned or sparse, so [`LogError::NotFound`] is an ordinary query
//! outcome that callers are expected to branch on.

pub mod handle;
pub mod types;

pub use handle::{EventStream, LogError, LogHandle, LogResult};
pub use types::{LogEvent, LogName, QueryKey, Record, Timestamp};
