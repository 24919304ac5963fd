//! Time-indexed queries over a cached log
//!
//! Maps wall-clock instants to record numbers with a binary search that
//! tolerates gaps: a "not found" at the midpoint is a valid but
//! uninformative answer, so the search bisects out the gap's boundaries
//! and decides from the records on either side. This keeps the worst
//! case at O(log n) + O(log gap) probes instead of a linear scan.
//!
//! Correctness assumes record timestamps are non-decreasing in record
//! number order. That is a precondition on the underlying log; if it is
//! violated, results are undefined.

use dataplane_log::{LogError, LogHandle, LogResult, QueryKey, Record, Timestamp};
use tracing::debug;

use crate::cache::{CacheConfig, RecordCache};

/// Default number of points a range query is sampled down to
pub const DEFAULT_SAMPLE_POINTS: u64 = 1000;

/// How many record numbers are probed from each end of the log before
/// it is considered empty
const BOUND_PROBES: i64 = 10;

/// Caching, time-indexed view of a single log.
///
/// Single logical owner; all methods take `&mut self`.
pub struct LogCache<L: LogHandle> {
    cache: RecordCache<L>,
}

impl<L: LogHandle> LogCache<L> {
    /// Create a view over `log` with the default cache configuration
    pub fn new(log: L) -> Self {
        Self::with_config(log, CacheConfig::default())
    }

    /// Create a view over `log` with an explicit cache configuration
    pub fn with_config(log: L, config: CacheConfig) -> Self {
        Self {
            cache: RecordCache::with_config(log, config),
        }
    }

    /// The underlying record cache
    pub fn cache(&self) -> &RecordCache<L> {
        &self.cache
    }

    /// Read a single record through the cache; `Ok(None)` marks a gap
    pub async fn read(&mut self, recno: i64) -> LogResult<Option<Record>> {
        self.cache.read(recno).await
    }

    /// Look up a record by selector
    pub async fn query(&mut self, key: QueryKey) -> LogResult<Option<Record>> {
        match key {
            QueryKey::ByRecno(recno) => self.cache.read(recno).await,
            QueryKey::ByHash(hash) => self.cache.read_by_hash(&hash).await,
            QueryKey::ByTimestamp(t) => self.get(t).await,
        }
    }

    /// The earliest readable record, probing record numbers `1..=10`.
    ///
    /// `None` means the log is empty (or pruned past the probe window).
    pub async fn least_recent(&mut self) -> LogResult<Option<Record>> {
        for recno in 1..=BOUND_PROBES {
            if let Some(record) = self.cache.read(recno).await? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// The latest readable record, probing selectors `-1..=-10`
    pub async fn most_recent(&mut self) -> LogResult<Option<Record>> {
        for back in 1..=BOUND_PROBES {
            if let Some(record) = self.cache.read(-back).await? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Find the number of the latest record at or before `t`.
    ///
    /// Times before the first record clamp to the first record number;
    /// times at or after the last record clamp to the last. `None`
    /// means the log is empty.
    pub async fn find(&mut self, t: Timestamp) -> LogResult<Option<u64>> {
        let Some(first) = self.least_recent().await? else {
            return Ok(None);
        };
        let Some(last) = self.most_recent().await? else {
            return Ok(None);
        };

        let (mut start, mut end) = (first.recno, last.recno);
        if t < first.timestamp {
            return Ok(Some(start));
        }
        if t >= last.timestamp {
            return Ok(Some(end));
        }

        // Invariant: timestamp(start) <= t < timestamp(end), and both
        // ends are readable.
        while start < end - 1 {
            let p = (start + end) / 2;
            match self.cache.read(p as i64).await? {
                Some(record) => {
                    if t < record.timestamp {
                        end = p;
                    } else {
                        start = p;
                    }
                }
                None => {
                    debug!(midpoint = p, "found a gap, searching boundaries");
                    let l = self.find_left_gap_boundary(start, p).await?;
                    let r = self.find_right_gap_boundary(p, end).await?;

                    let before = self.read_present(l - 1).await?;
                    let after = self.read_present(r + 1).await?;

                    if t < before.timestamp {
                        end = l - 1;
                    } else if t >= after.timestamp {
                        start = r + 1;
                    } else {
                        // The target time falls inside the gap itself;
                        // the last record before the gap is the answer.
                        return Ok(Some(l - 1));
                    }
                }
            }
        }

        Ok(Some(start))
    }

    /// The latest record at or before `t`; `None` means the log is empty
    pub async fn get(&mut self, t: Timestamp) -> LogResult<Option<Record>> {
        match self.find(t).await? {
            Some(recno) => Ok(Some(self.read_present(recno).await?)),
            None => Ok(None),
        }
    }

    /// Records between `t_start` and `t_end`, sampled down to roughly
    /// [`DEFAULT_SAMPLE_POINTS`] points
    pub async fn get_range(
        &mut self,
        t_start: Timestamp,
        t_end: Timestamp,
    ) -> LogResult<Vec<Record>> {
        self.get_range_sampled(t_start, t_end, DEFAULT_SAMPLE_POINTS)
            .await
    }

    /// Records between `t_start` and `t_end`, sampled down to roughly
    /// `num_points` points.
    ///
    /// The result is ordered by record number. An empty range is not an
    /// error. The sample count may come out below `num_points` near log
    /// boundaries and never exceeds the raw record count in range.
    pub async fn get_range_sampled(
        &mut self,
        t_start: Timestamp,
        t_end: Timestamp,
        num_points: u64,
    ) -> LogResult<Vec<Record>> {
        let Some(found_start) = self.find(t_start).await? else {
            return Ok(Vec::new());
        };
        let Some(found_end) = self.find(t_end).await? else {
            return Ok(Vec::new());
        };

        let start = found_start + 1;
        let end = found_end;
        if start > end {
            return Ok(Vec::new());
        }

        let count = end + 1 - start;
        let step = (count / num_points.max(1)).max(1);
        self.cache.multi_read(start, count, step).await
    }

    /// Bisect `[start, end]` where `start` is readable and `end` is
    /// not, converging on the first unreadable record number
    async fn find_left_gap_boundary(&mut self, start: u64, end: u64) -> LogResult<u64> {
        let (mut start, mut end) = (start, end);
        while start < end - 1 {
            let mid = (start + end) / 2;
            if self.cache.read(mid as i64).await?.is_none() {
                end = mid;
            } else {
                start = mid;
            }
        }
        Ok(end)
    }

    /// Bisect `[start, end]` where `start` is unreadable and `end` is
    /// readable, converging on the last unreadable record number
    async fn find_right_gap_boundary(&mut self, start: u64, end: u64) -> LogResult<u64> {
        let (mut start, mut end) = (start, end);
        while start < end - 1 {
            let mid = (start + end) / 2;
            if self.cache.read(mid as i64).await?.is_none() {
                start = mid;
            } else {
                end = mid;
            }
        }
        Ok(start)
    }

    /// Read a record number that is known to exist; an absent record
    /// here means the log mutated out from under the search
    async fn read_present(&mut self, recno: u64) -> LogResult<Record> {
        self.cache
            .read(recno as i64)
            .await?
            .ok_or_else(|| LogError::Backend(format!("record {recno} vanished during search")))
    }
}

impl<L: LogHandle> std::fmt::Debug for LogCache<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogCache").field("cache", &self.cache).finish()
    }
}
