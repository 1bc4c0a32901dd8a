//! Tag-aware get-or-compute over a [`CacheStore`].
//!
//! The manager owns the key prefix and the hit/miss bookkeeping. Existence is
//! checked before the store's remember call so the recorder sees whether the
//! entry was already there, whatever the store does afterwards.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::error::{BoxError, CacheError, CacheResult, StoreError};

use super::config::SmartCacheConfig;
use super::keys::TagScope;
use super::stats::CacheStats;
use super::store::{CacheStore, Payload, Ttl};

pub(crate) const METRIC_HIT_TOTAL: &str = "smartcache_hit_total";
pub(crate) const METRIC_MISS_TOTAL: &str = "smartcache_miss_total";
pub(crate) const METRIC_BYPASS_TOTAL: &str = "smartcache_bypass_total";
pub(crate) const METRIC_TAG_FLUSH_TOTAL: &str = "smartcache_tag_flush_total";
pub(crate) const METRIC_INVALIDATION_DROPPED_TOTAL: &str = "smartcache_invalidation_dropped_total";

/// Labels a lookup for stats and metrics.
#[derive(Debug, Clone, Copy)]
pub struct LookupContext<'a> {
    pub table: &'a str,
    pub operation: &'a str,
}

impl<'a> LookupContext<'a> {
    pub fn new(table: &'a str, operation: &'a str) -> Self {
        Self { table, operation }
    }
}

/// What happened to an invalidation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// This many tags were purged.
    Flushed(usize),
    /// The store has no tag support; nothing was purged.
    Unsupported,
}

pub struct CacheManager {
    config: SmartCacheConfig,
    store: Arc<dyn CacheStore>,
    stats: Arc<CacheStats>,
    degraded_reported: AtomicBool,
}

impl CacheManager {
    pub fn new(config: SmartCacheConfig, store: Arc<dyn CacheStore>) -> Self {
        let stats = Arc::new(CacheStats::with_limit(config.query_log_limit_non_zero()));
        Self::with_stats(config, store, stats)
    }

    /// Share a recorder between managers, e.g. one per store.
    pub fn with_stats(
        config: SmartCacheConfig,
        store: Arc<dyn CacheStore>,
        stats: Arc<CacheStats>,
    ) -> Self {
        Self {
            config,
            store,
            stats,
            degraded_reported: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SmartCacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    pub fn default_ttl(&self) -> Ttl {
        self.config.default_ttl()
    }

    pub fn stats(&self) -> &Arc<CacheStats> {
        &self.stats
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Capability check: can the store purge by tag?
    pub fn supports_tags(&self) -> bool {
        self.store.supports_tags()
    }

    pub fn full_key(&self, key: &str) -> String {
        format!("{}.{}", self.config.prefix, key)
    }

    pub fn tag(&self, scope: &TagScope) -> String {
        scope.tag(&self.config.prefix)
    }

    /// Return the cached value for `key`, or run `compute` and cache its result.
    ///
    /// With caching disabled this is exactly `compute()`: no store access and
    /// no stats. When the store lacks tag support the entry is cached untagged
    /// and only expiry or a full flush can remove it.
    pub fn get_or_compute<T, E, F>(
        &self,
        key: &str,
        tags: &[String],
        ttl: Ttl,
        context: LookupContext<'_>,
        compute: F,
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned,
        E: Into<BoxError>,
        F: FnOnce() -> Result<T, E>,
    {
        if !self.config.enabled {
            return self.bypass(context, compute);
        }

        let full_key = self.full_key(key);
        let tagged = !tags.is_empty() && self.store.supports_tags();
        if !tags.is_empty() && !tagged {
            self.report_degraded();
        }

        let existed = if tagged {
            self.store.has_tagged(&full_key, tags)?
        } else {
            self.store.has(&full_key)?
        };
        self.observe(&full_key, existed, context);

        let mut pending = Some(compute);
        let mut produce = || -> CacheResult<Payload> {
            let compute = pending.take().ok_or_else(|| {
                StoreError::backend("store invoked the compute callback more than once")
            })?;
            let value = compute().map_err(CacheError::compute)?;
            Ok(serde_json::to_value(value).map_err(StoreError::from)?)
        };

        let payload = if tagged {
            self.store
                .remember_with_tags(&full_key, tags, ttl, &mut produce)?
        } else {
            self.store.remember(&full_key, ttl, &mut produce)?
        };

        serde_json::from_value(payload).map_err(CacheError::Decode)
    }

    /// Run `compute` without touching the store or the stats.
    pub(crate) fn bypass<T, E, F>(&self, context: LookupContext<'_>, compute: F) -> CacheResult<T>
    where
        E: Into<BoxError>,
        F: FnOnce() -> Result<T, E>,
    {
        counter!(
            METRIC_BYPASS_TOTAL,
            "table" => context.table.to_string(),
            "op" => context.operation.to_string()
        )
        .increment(1);
        compute().map_err(CacheError::compute)
    }

    /// Purge every entry associated with any of `tags`.
    ///
    /// Best effort: without tag support the request is dropped (and logged
    /// when logging is on) instead of failing.
    pub fn invalidate(&self, tags: &[String]) -> CacheResult<FlushOutcome> {
        if !self.store.supports_tags() {
            counter!(METRIC_INVALIDATION_DROPPED_TOTAL).increment(tags.len() as u64);
            if self.config.logging {
                warn!(
                    tags = ?tags,
                    result = "dropped",
                    "Cache store does not support tags; invalidation skipped, manual cache clearing required"
                );
            }
            return Ok(FlushOutcome::Unsupported);
        }

        for tag in tags {
            self.store.flush_tag(tag)?;
            counter!(METRIC_TAG_FLUSH_TOTAL).increment(1);
            if self.config.logging {
                info!("Cache invalidated for tag: {tag}");
            }
        }
        Ok(FlushOutcome::Flushed(tags.len()))
    }

    pub fn invalidate_scope(&self, scope: &TagScope) -> CacheResult<FlushOutcome> {
        self.invalidate(&[self.tag(scope)])
    }

    /// Drop every entry in the store, tagged or not.
    pub fn flush_all(&self) -> CacheResult<()> {
        self.store.flush()
    }

    fn observe(&self, full_key: &str, hit: bool, context: LookupContext<'_>) {
        let (metric, status) = if hit {
            (METRIC_HIT_TOTAL, "HIT")
        } else {
            (METRIC_MISS_TOTAL, "MISS")
        };
        counter!(
            metric,
            "table" => context.table.to_string(),
            "op" => context.operation.to_string()
        )
        .increment(1);
        if hit {
            self.stats
                .record_hit(full_key, context.table, context.operation);
        } else {
            self.stats
                .record_miss(full_key, context.table, context.operation);
        }
        if self.config.logging {
            info!(table = context.table, op = context.operation, "Cache {status}: {full_key}");
        }
    }

    fn report_degraded(&self) {
        if !self.degraded_reported.swap(true, Ordering::Relaxed) {
            warn!(
                prefix = %self.config.prefix,
                result = "degraded",
                "Cache store does not support tags; caching without tags, tag invalidation is disabled"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::cache::store::MemoryStore;

    fn manager_with(store: MemoryStore, config: SmartCacheConfig) -> CacheManager {
        CacheManager::new(config, Arc::new(store))
    }

    fn manager() -> CacheManager {
        manager_with(MemoryStore::new(), SmartCacheConfig::default())
    }

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    const POSTS: LookupContext<'static> = LookupContext {
        table: "posts",
        operation: "get",
    };

    #[test]
    fn first_access_misses_then_hits() {
        let manager = manager();
        let calls = Cell::new(0);
        let load = || {
            calls.set(calls.get() + 1);
            Ok::<_, CacheError>(vec![1, 2, 3])
        };

        let tags = tags(&["smart_cache", "smart_cache.posts"]);
        for _ in 0..4 {
            let rows: Vec<i32> = manager
                .get_or_compute("k", &tags, Ttl::Forever, POSTS, load)
                .expect("lookup");
            assert_eq!(rows, [1, 2, 3]);
        }

        assert_eq!(calls.get(), 1);
        let snapshot = manager.stats().snapshot();
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.hits, 3);
        assert_eq!(snapshot.hit_ratio, 75.0);
        assert_eq!(snapshot.queries[0].key, "smart_cache.k");
    }

    #[test]
    fn invalidated_tag_causes_a_new_miss() {
        let manager = manager();
        let tags = tags(&["smart_cache", "smart_cache.posts"]);
        let _: u32 = manager
            .get_or_compute("k", &tags, Ttl::Forever, POSTS, || Ok::<_, CacheError>(1))
            .expect("lookup");

        let outcome = manager
            .invalidate(&["smart_cache.posts".to_string()])
            .expect("invalidate");
        assert_eq!(outcome, FlushOutcome::Flushed(1));

        let value: u32 = manager
            .get_or_compute("k", &tags, Ttl::Forever, POSTS, || Ok::<_, CacheError>(2))
            .expect("lookup");
        assert_eq!(value, 2);
        assert_eq!(manager.stats().misses(), 2);
        assert_eq!(manager.stats().hits(), 0);
    }

    #[test]
    fn disabled_cache_always_computes_and_records_nothing() {
        let config = SmartCacheConfig {
            enabled: false,
            ..Default::default()
        };
        let manager = manager_with(MemoryStore::new(), config);
        let calls = Cell::new(0);

        for _ in 0..3 {
            let _: u32 = manager
                .get_or_compute("k", &tags(&["smart_cache.posts"]), Ttl::Forever, POSTS, || {
                    calls.set(calls.get() + 1);
                    Ok::<_, CacheError>(7)
                })
                .expect("lookup");
        }

        assert_eq!(calls.get(), 3);
        assert_eq!(manager.stats().snapshot().total, 0);
    }

    #[test]
    fn untagged_store_still_caches() {
        let manager = manager_with(MemoryStore::untagged(), SmartCacheConfig::default());
        let calls = Cell::new(0);
        for _ in 0..2 {
            let _: u32 = manager
                .get_or_compute("k", &tags(&["smart_cache.posts"]), Ttl::Forever, POSTS, || {
                    calls.set(calls.get() + 1);
                    Ok::<_, CacheError>(7)
                })
                .expect("lookup");
        }
        assert_eq!(calls.get(), 1);
        assert_eq!(manager.stats().hits(), 1);
    }

    #[test]
    fn invalidate_without_tag_support_is_a_no_op() {
        let manager = manager_with(MemoryStore::untagged(), SmartCacheConfig::default());
        let _: u32 = manager
            .get_or_compute("k", &tags(&["smart_cache.posts"]), Ttl::Forever, POSTS, || {
                Ok::<_, CacheError>(7)
            })
            .expect("lookup");

        let outcome = manager
            .invalidate(&["smart_cache.posts".to_string()])
            .expect("invalidate never fails for missing tag support");
        assert_eq!(outcome, FlushOutcome::Unsupported);
        assert!(manager.store().has("smart_cache.k").expect("has"));
    }

    #[test]
    fn compute_errors_propagate() {
        let manager = manager();
        let result: CacheResult<u32> =
            manager.get_or_compute("k", &[], Ttl::Forever, POSTS, || Err("database is down"));
        let err = result.expect_err("compute failure");
        assert_eq!(err.to_string(), "query failed: database is down");
        assert!(!manager.store().has("smart_cache.k").expect("has"));
    }

    #[test]
    fn decode_errors_surface_when_types_disagree() {
        let manager = manager();
        let _: String = manager
            .get_or_compute("k", &[], Ttl::Forever, POSTS, || {
                Ok::<_, CacheError>("text".to_string())
            })
            .expect("lookup");

        let result: CacheResult<u32> =
            manager.get_or_compute("k", &[], Ttl::Forever, POSTS, || Ok::<_, CacheError>(1));
        assert!(matches!(result, Err(CacheError::Decode(_))));
    }

    #[test]
    fn key_and_tag_helpers_use_the_prefix() {
        let manager = manager();
        assert_eq!(manager.full_key("posts.find.7"), "smart_cache.posts.find.7");
        assert_eq!(manager.tag(&TagScope::table("posts")), "smart_cache.posts");
        assert!(manager.supports_tags());
    }
}
