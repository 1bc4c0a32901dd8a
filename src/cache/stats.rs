//! Hit/miss accounting.
//!
//! Counts lookups and keeps a bounded log of the most recent ones. State is
//! process-local; nothing is aggregated across processes.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use serde::Serialize;
use time::OffsetDateTime;

use super::config::SmartCacheConfig;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::stats";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupStatus {
    Hit,
    Miss,
}

/// One recorded lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRecord {
    pub key: String,
    pub table: String,
    pub operation: String,
    pub status: LookupStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

/// Point-in-time view of the recorder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub total: u64,
    /// Percentage with two decimals; `0.0` before any lookup.
    pub hit_ratio: f64,
    /// Newest first.
    pub queries: Vec<QueryRecord>,
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    /// Oldest first.
    queries: VecDeque<QueryRecord>,
}

pub struct CacheStats {
    inner: Mutex<Counters>,
    limit: NonZeroUsize,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::with_limit(SmartCacheConfig::default().query_log_limit_non_zero())
    }

    pub fn with_limit(limit: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(Counters::default()),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit.get()
    }

    pub fn record_hit(&self, key: &str, table: &str, operation: &str) {
        self.record(key, table, operation, LookupStatus::Hit);
    }

    pub fn record_miss(&self, key: &str, table: &str, operation: &str) {
        self.record(key, table, operation, LookupStatus::Miss);
    }

    fn record(&self, key: &str, table: &str, operation: &str, status: LookupStatus) {
        let entry = QueryRecord {
            key: key.to_string(),
            table: table.to_string(),
            operation: operation.to_string(),
            status,
            recorded_at: OffsetDateTime::now_utc(),
        };

        let mut inner = mutex_lock(&self.inner, SOURCE, "record");
        match status {
            LookupStatus::Hit => inner.hits += 1,
            LookupStatus::Miss => inner.misses += 1,
        }
        inner.queries.push_back(entry);
        while inner.queries.len() > self.limit.get() {
            inner.queries.pop_front();
        }
    }

    pub fn hits(&self) -> u64 {
        mutex_lock(&self.inner, SOURCE, "hits").hits
    }

    pub fn misses(&self) -> u64 {
        mutex_lock(&self.inner, SOURCE, "misses").misses
    }

    pub fn reset(&self) {
        *mutex_lock(&self.inner, SOURCE, "reset") = Counters::default();
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = mutex_lock(&self.inner, SOURCE, "snapshot");
        let total = inner.hits + inner.misses;
        StatsSnapshot {
            hits: inner.hits,
            misses: inner.misses,
            total,
            hit_ratio: hit_ratio(inner.hits, total),
            queries: inner.queries.iter().rev().cloned().collect(),
        }
    }
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

fn hit_ratio(hits: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let percent = hits as f64 / total as f64 * 100.0;
    (percent * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    #[test]
    fn empty_snapshot() {
        let stats = CacheStats::new();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total, 0);
        assert_eq!(snapshot.hit_ratio, 0.0);
        assert!(snapshot.queries.is_empty());
    }

    #[test]
    fn three_hits_one_miss_is_seventy_five_percent() {
        let stats = CacheStats::new();
        stats.record_miss("k", "posts", "get");
        for _ in 0..3 {
            stats.record_hit("k", "posts", "get");
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.hits, 3);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.total, 4);
        assert_eq!(snapshot.hit_ratio, 75.0);
    }

    #[test]
    fn ratio_rounds_to_two_decimals() {
        let stats = CacheStats::new();
        stats.record_hit("k", "posts", "get");
        stats.record_miss("k", "posts", "get");
        stats.record_miss("k", "posts", "get");
        assert_eq!(stats.snapshot().hit_ratio, 33.33);
    }

    #[test]
    fn queries_are_newest_first() {
        let stats = CacheStats::new();
        stats.record_miss("first", "posts", "get");
        stats.record_hit("second", "posts", "count");

        let queries = stats.snapshot().queries;
        assert_eq!(queries[0].key, "second");
        assert_eq!(queries[0].status, LookupStatus::Hit);
        assert_eq!(queries[0].operation, "count");
        assert_eq!(queries[1].key, "first");
    }

    #[test]
    fn log_keeps_only_the_most_recent_entries() {
        let stats = CacheStats::new();
        for i in 0..150 {
            stats.record_miss(&format!("key-{i}"), "posts", "get");
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.misses, 150);
        assert_eq!(snapshot.queries.len(), 100);
        assert_eq!(snapshot.queries[0].key, "key-149");
        assert_eq!(snapshot.queries[99].key, "key-50");
        assert!(snapshot.queries.iter().all(|q| q.key != "key-49"));
    }

    #[test]
    fn custom_limit() {
        let stats = CacheStats::with_limit(NonZeroUsize::new(2).expect("non-zero"));
        stats.record_miss("a", "posts", "get");
        stats.record_miss("b", "posts", "get");
        stats.record_miss("c", "posts", "get");
        let keys: Vec<_> = stats.snapshot().queries.into_iter().map(|q| q.key).collect();
        assert_eq!(keys, ["c", "b"]);
    }

    #[test]
    fn reset_clears_everything() {
        let stats = CacheStats::new();
        stats.record_hit("k", "posts", "get");
        stats.record_miss("k", "posts", "get");
        stats.reset();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.hits, 0);
        assert_eq!(snapshot.misses, 0);
        assert_eq!(snapshot.total, 0);
        assert!(snapshot.queries.is_empty());
    }

    #[test]
    fn snapshot_serializes_status_in_lowercase() {
        let stats = CacheStats::new();
        stats.record_hit("k", "posts", "get");
        let json = serde_json::to_value(stats.snapshot()).expect("serialize");
        assert_eq!(json["queries"][0]["status"], "hit");
        assert_eq!(json["hit_ratio"], 100.0);
    }

    #[test]
    fn stats_recover_from_poisoned_lock() {
        let stats = CacheStats::new();

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = stats.inner.lock().expect("stats lock should be acquired");
            panic!("poison stats lock");
        }));

        stats.record_hit("k", "posts", "get");
        assert_eq!(stats.hits(), 1);
    }
}
