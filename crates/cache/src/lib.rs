//! Caching and query-by-time layer over an append-only log
//!
//! [`RecordCache`] wraps a [`dataplane_log::LogHandle`] with a bounded
//! read-through cache so repeated probes of the same record numbers do
//! not repeat round trips. [`LogCache`] builds on it with time-indexed
//! queries: a gap-tolerant binary search mapping a wall-clock instant to
//! the latest record at or before it, and stride-sampled range reads.
//!
//! A cache instance has a single logical owner; all methods take
//! `&mut self` and there is no internal locking.

pub mod cache;
pub mod query;

pub use cache::{CacheConfig, RecordCache};
pub use query::{DEFAULT_SAMPLE_POINTS, LogCache};
