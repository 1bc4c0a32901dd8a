//! Administrative operations over the cache.
//!
//! Bulk clears require a store with tag support: without it nothing could be
//! purged selectively, so the operation fails instead of reporting a clear
//! that did not happen.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::error::{CacheError, CacheResult};

use super::discovery::{DiscoveredEntity, EntityRegistry, mermaid_diagram, related_tables};
use super::keys::TagScope;
use super::manager::CacheManager;
use super::stats::StatsSnapshot;

/// Result of an administrative clear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminOutcome {
    pub message: String,
    /// Tags purged, in order.
    pub tags: Vec<String>,
    /// Entity types affected.
    pub entities: usize,
}

impl fmt::Display for AdminOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Read-only projection for a dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardFeed {
    pub stats: StatsSnapshot,
    pub enabled: bool,
    pub supports_tags: bool,
    pub prefix: String,
    pub ttl_minutes: u64,
    pub entities: Vec<DiscoveredEntity>,
    pub diagram: String,
}

pub struct CacheAdmin {
    manager: Arc<CacheManager>,
    registry: Arc<EntityRegistry>,
}

impl CacheAdmin {
    pub fn new(manager: Arc<CacheManager>, registry: Arc<EntityRegistry>) -> Self {
        Self { manager, registry }
    }

    /// Purge the table cache of one registered entity type.
    pub fn clear_entity(&self, name: &str) -> CacheResult<AdminOutcome> {
        self.require_tags()?;
        let descriptor = self
            .registry
            .get(name)
            .ok_or_else(|| CacheError::unknown_entity(name))?;

        let scope = TagScope::table(&descriptor.table);
        self.manager.invalidate_scope(&scope)?;
        let tag = self.manager.tag(&scope);
        info!(entity = name, tag = %tag, "Entity cache cleared");

        Ok(AdminOutcome {
            message: format!("Cache cleared for {name} (tag: {tag})"),
            tags: vec![tag],
            entities: 1,
        })
    }

    /// Purge everything this cache wrote and reset the stats.
    pub fn clear_all(&self) -> CacheResult<AdminOutcome> {
        self.require_tags()?;

        let mut tags = vec![self.manager.tag(&TagScope::Global)];
        tags.extend(
            self.registry
                .tables()
                .into_iter()
                .map(|table| self.manager.tag(&TagScope::table(table))),
        );
        self.manager.invalidate(&tags)?;
        self.manager.stats().reset();

        let entities = self.registry.len();
        info!(entities, tags = tags.len(), "All cache entries cleared");

        Ok(AdminOutcome {
            message: format!("All cache entries cleared ({entities} entities)."),
            tags,
            entities,
        })
    }

    /// Purge one table and the tables its entity types declare as targets.
    pub fn clear_table(&self, table: &str) -> CacheResult<AdminOutcome> {
        self.require_tags()?;
        if self.registry.by_table(table).is_none() {
            return Err(CacheError::unknown_table(table));
        }

        let entities = self.registry.discover();
        let related = related_tables(table, &entities);

        let tags: Vec<String> = std::iter::once(table)
            .chain(related.iter().map(String::as_str))
            .map(|t| self.manager.tag(&TagScope::table(t)))
            .collect();
        self.manager.invalidate(&tags)?;

        let mut message = format!("Cache cleared for table: {table}.");
        if !related.is_empty() {
            message.push_str(&format!(" Also cleared: {}.", related.join(", ")));
        }
        info!(table, related = ?related, "Table cache cleared");

        Ok(AdminOutcome {
            message,
            tags,
            entities: entities.iter().filter(|e| e.table == table).count() + related.len(),
        })
    }

    pub fn dashboard(&self) -> DashboardFeed {
        let entities = self.registry.discover();
        DashboardFeed {
            stats: self.manager.stats().snapshot(),
            enabled: self.manager.is_enabled(),
            supports_tags: self.manager.supports_tags(),
            prefix: self.manager.prefix().to_string(),
            ttl_minutes: self.manager.config().ttl_minutes,
            diagram: mermaid_diagram(&entities),
            entities,
        }
    }

    fn require_tags(&self) -> CacheResult<()> {
        if self.manager.supports_tags() {
            Ok(())
        } else {
            Err(CacheError::TagsUnsupported)
        }
    }
}
