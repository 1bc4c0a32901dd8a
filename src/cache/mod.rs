//! SmartCache
//!
//! Transparent query-result caching with tag-based invalidation:
//!
//! - **Keys**: derived from query shape, bound values and eager loads
//! - **Tags**: `{prefix}` (global), `{prefix}.{table}`, `{prefix}.{table}.{id}`
//! - **Invalidation**: every entity mutation purges its table tag, its record
//!   tag and the table tags of the entity types it declares (one hop)
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! ttl_minutes = 60   # 0 = until invalidated
//! prefix = "smart_cache"
//! logging = false
//! ```

mod admin;
mod config;
mod discovery;
mod entity;
mod events;
mod invalidation;
mod keys;
mod lock;
mod manager;
mod query;
mod registry;
mod stats;
mod store;

pub use admin::{AdminOutcome, CacheAdmin, DashboardFeed};
pub use config::{DEFAULT_PREFIX, SmartCacheConfig};
pub use discovery::{
    DiscoveredEntity, EntityDeclaration, EntityRegistry, EntityRegistryBuilder, mermaid_diagram,
    related_tables,
};
pub use entity::{CacheableEntity, EntityDescriptor, EntityRef};
pub use events::{MutationEvent, MutationKind, MutationListener};
pub use invalidation::{InvalidationCoordinator, InvalidationReport};
pub use keys::{
    Aggregate, Binding, Operation, QueryShape, RecordId, TagScope, derive_key, find_key,
};
pub use manager::{CacheManager, FlushOutcome, LookupContext};
pub use query::{CacheableQuery, QueryCacheExt, QuerySource};
pub use registry::TagIndex;
pub use stats::{CacheStats, LookupStatus, QueryRecord, StatsSnapshot};
pub use store::{CacheStore, Clock, Compute, ManualClock, MemoryStore, Payload, SystemClock, Ttl};

pub(crate) mod metric_names {
    pub(crate) use super::invalidation::{METRIC_INVALIDATE_MS, METRIC_MUTATION_TOTAL};
    pub(crate) use super::manager::{
        METRIC_BYPASS_TOTAL, METRIC_HIT_TOTAL, METRIC_INVALIDATION_DROPPED_TOTAL,
        METRIC_MISS_TOTAL, METRIC_TAG_FLUSH_TOTAL,
    };
}
