//! Bounded read-through record cache

use futures::StreamExt;
use futures::stream::SelectAll;
use tracing::warn;

use dataplane_log::{LogEvent, LogHandle, LogResult, Record};
use std::collections::HashMap;

/// Record cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Soft bound on the number of cached entries. The cache is allowed
    /// to grow to twice this before eviction runs, and eviction drains
    /// back down to exactly this many entries.
    pub limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { limit: 10_000 }
    }
}

/// A cached read outcome. `record: None` is a remembered gap: the log
/// answered "not found" for this record number, and re-asking will not
/// change that until the entry is evicted.
struct CacheEntry {
    record: Option<Record>,
    last_access: u64,
}

/// Bounded mapping from record number to read outcome, with
/// least-recently-used eviction above a soft limit.
///
/// The smallest and largest cached record numbers are never evicted:
/// they anchor the bounds of time-indexed searches.
pub struct RecordCache<L: LogHandle> {
    log: L,
    entries: HashMap<u64, CacheEntry>,
    limit: usize,
    /// Logical access clock; bumped on every hit and insertion
    clock: u64,
}

impl<L: LogHandle> RecordCache<L> {
    /// Create a cache over `log` with the default configuration
    pub fn new(log: L) -> Self {
        Self::with_config(log, CacheConfig::default())
    }

    /// Create a cache over `log` with an explicit configuration
    pub fn with_config(log: L, config: CacheConfig) -> Self {
        Self {
            log,
            entries: HashMap::new(),
            limit: config.limit,
            clock: 0,
        }
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `recno` currently has a cached outcome
    pub fn contains(&self, recno: u64) -> bool {
        self.entries.contains_key(&recno)
    }

    /// Read a single record through the cache.
    ///
    /// Selectors `<= -1` address relative to the most recent record and
    /// never hit the cache: the tail moves, so they always go to the
    /// log. A positive miss delegates to the log and caches the outcome
    /// under the resolved record number — including a "not found", so
    /// gap-boundary searches do not repeat the round trip. Returns
    /// `Ok(None)` for a gap; any other log failure propagates.
    pub async fn read(&mut self, recno: i64) -> LogResult<Option<Record>> {
        if recno > 0 {
            self.clock += 1;
            if let Some(entry) = self.entries.get_mut(&(recno as u64)) {
                entry.last_access = self.clock;
                return Ok(entry.record.clone());
            }
        }

        let outcome = match self.log.read(recno).await {
            Ok(record) => Some(record),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        // A found record resolves to its own (positive) number; a miss
        // resolves to the queried number, which is only meaningful when
        // positive.
        let resolved = outcome.as_ref().map_or(recno, |r| r.recno as i64);
        if resolved > 0 {
            self.insert(resolved as u64, outcome.clone());
            self.cleanup();
        }

        Ok(outcome)
    }

    /// Read a record by content hash, caching it under its record number
    pub async fn read_by_hash(&mut self, hash: &[u8; 32]) -> LogResult<Option<Record>> {
        let outcome = match self.log.read_by_hash(hash).await {
            Ok(record) => Some(record),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        if let Some(record) = &outcome {
            self.insert(record.recno, Some(record.clone()));
            self.cleanup();
        }

        Ok(outcome)
    }

    /// Batched asynchronous read of `count` record numbers starting at
    /// `start`, sampling every `step`-th one when `step > 1`.
    ///
    /// Responses arrive in whatever order the log delivers them; every
    /// record is inserted into the cache as it arrives, a single cleanup
    /// pass runs at the end, and the result is sorted by record number
    /// before returning.
    pub async fn multi_read(
        &mut self,
        start: u64,
        count: u64,
        step: u64,
    ) -> LogResult<Vec<Record>> {
        let mut streams = SelectAll::new();
        if step <= 1 {
            streams.push(self.log.read_async(start as i64, count).await?);
        } else {
            for recno in (start..start + count).step_by(step as usize) {
                streams.push(self.log.read_async(recno as i64, 1).await?);
            }
        }

        let mut pending = streams.len();
        let mut collected = Vec::new();
        while pending > 0 {
            let Some(event) = streams.next().await else {
                break;
            };
            match event {
                LogEvent::Data(record) => {
                    self.insert(record.recno, Some(record.clone()));
                    collected.push(record);
                }
                LogEvent::Missing(_) => {}
                LogEvent::Done => pending -= 1,
                other => warn!(?other, "unexpected event on read stream"),
            }
        }

        self.cleanup();
        collected.sort_by_key(|record| record.recno);
        Ok(collected)
    }

    fn insert(&mut self, recno: u64, record: Option<Record>) {
        self.clock += 1;
        self.entries.insert(
            recno,
            CacheEntry {
                record,
                last_access: self.clock,
            },
        );
    }

    /// Evict down to the configured limit once the soft limit is
    /// doubled. The current smallest and largest record numbers are
    /// exempt; everything else goes in ascending last-access order.
    /// Eviction is O(n log n) but runs at most once per `limit`
    /// insertions.
    fn cleanup(&mut self) {
        if self.entries.len() <= 2 * self.limit {
            return;
        }

        let Some(&min_recno) = self.entries.keys().min() else {
            return;
        };
        let Some(&max_recno) = self.entries.keys().max() else {
            return;
        };

        let mut order: Vec<(u64, u64)> = self
            .entries
            .iter()
            .filter(|&(&recno, _)| recno != min_recno && recno != max_recno)
            .map(|(&recno, entry)| (recno, entry.last_access))
            .collect();
        order.sort_by_key(|&(_, last_access)| last_access);

        let mut victims = order.into_iter();
        while self.entries.len() > self.limit {
            let Some((victim, _)) = victims.next() else {
                break;
            };
            self.entries.remove(&victim);
        }
    }
}

impl<L: LogHandle> std::fmt::Debug for RecordCache<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCache")
            .field("entries", &self.entries.len())
            .field("limit", &self.limit)
            .finish()
    }
}
