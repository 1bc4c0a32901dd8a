//! Runtime cache configuration.
//!
//! Read once when the [`CacheManager`](super::CacheManager) is built; there is
//! no hot reload. Per-call overrides (TTL, bypass) live on
//! [`CacheableQuery`](super::CacheableQuery) instead of mutating this value.

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use super::store::Ttl;

pub const DEFAULT_PREFIX: &str = "smart_cache";
const DEFAULT_TTL_MINUTES: u64 = 60;
const DEFAULT_QUERY_LOG_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SmartCacheConfig {
    /// Master switch. When off every lookup runs the query directly.
    pub enabled: bool,
    /// Default entry lifetime in minutes. `0` keeps entries until a tag flush.
    pub ttl_minutes: u64,
    /// Namespace for keys and tags.
    pub prefix: String,
    /// Emit hit/miss and invalidation log lines.
    pub logging: bool,
    /// How many recent lookups the stats recorder retains.
    pub query_log_limit: usize,
}

impl Default for SmartCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_minutes: DEFAULT_TTL_MINUTES,
            prefix: DEFAULT_PREFIX.to_string(),
            logging: false,
            query_log_limit: DEFAULT_QUERY_LOG_LIMIT,
        }
    }
}

impl SmartCacheConfig {
    pub fn default_ttl(&self) -> Ttl {
        Ttl::from_minutes(self.ttl_minutes)
    }

    /// Returns the query log bound as NonZeroUsize, clamping to 1 if zero.
    pub fn query_log_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.query_log_limit).unwrap_or(NonZeroUsize::MIN)
    }
}
