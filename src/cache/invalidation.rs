//! Invalidation coordinator.
//!
//! Turns a mutated record into the tags to purge: its table tag, its record
//! tag when the record has an id, and the table tag of every declared target.
//! Targets are resolved one hop only.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use crate::error::CacheResult;

use super::entity::{CacheableEntity, EntityRef};
use super::events::{MutationEvent, MutationKind, MutationListener};
use super::keys::{RecordId, TagScope};
use super::manager::{CacheManager, FlushOutcome};

pub(crate) const METRIC_MUTATION_TOTAL: &str = "smartcache_mutation_total";
pub(crate) const METRIC_INVALIDATE_MS: &str = "smartcache_invalidate_ms";

/// Tags purged for one mutation, in the order they were purged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationReport {
    pub tags: Vec<String>,
    /// False when the store lacks tag support and every flush was dropped.
    pub applied: bool,
}

/// Purges cache tags in response to entity mutations.
///
/// Runs synchronously on the caller's thread. Each tag is a separate store
/// call; a failure part-way leaves the earlier tags purged.
pub struct InvalidationCoordinator {
    manager: Arc<CacheManager>,
}

impl InvalidationCoordinator {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<CacheManager> {
        &self.manager
    }

    /// Tags a mutation of (`table`, `record_id`) must purge, in purge order.
    pub fn tags_for(
        &self,
        table: &str,
        record_id: Option<&RecordId>,
        declared: &[EntityRef],
    ) -> Vec<String> {
        let mut tags = Vec::with_capacity(2 + declared.len());
        tags.push(self.manager.tag(&TagScope::table(table)));
        if let Some(id) = record_id.filter(|id| !id.is_empty()) {
            tags.push(self.manager.tag(&TagScope::record(table, id.clone())));
        }
        for target in declared {
            tags.push(self.manager.tag(&TagScope::table(&target.table)));
        }
        tags
    }

    /// Purge the caches affected by a change to one record of `table`.
    pub fn on_mutate(
        &self,
        entity: &str,
        table: &str,
        record_id: Option<&RecordId>,
        declared: &[EntityRef],
    ) -> CacheResult<InvalidationReport> {
        let tags = self.tags_for(table, record_id, declared);
        let mut applied = true;
        for tag in &tags {
            if self.manager.invalidate(std::slice::from_ref(tag))? == FlushOutcome::Unsupported {
                applied = false;
            }
        }
        debug!(
            entity,
            table,
            record_id = record_id.map(RecordId::as_str),
            tags = ?tags,
            applied,
            "Entity caches invalidated"
        );
        Ok(InvalidationReport { tags, applied })
    }

    /// Handle one lifecycle event.
    pub fn handle(&self, event: &MutationEvent) -> CacheResult<InvalidationReport> {
        let started_at = Instant::now();
        info!(
            event_id = %event.id,
            event_kind = %event.kind,
            entity = %event.entity,
            table = %event.table,
            "Mutation received"
        );
        counter!(METRIC_MUTATION_TOTAL, "kind" => event.kind.as_str()).increment(1);

        let report = self.on_mutate(
            &event.entity,
            &event.table,
            event.record_id.as_ref(),
            &event.invalidates,
        );

        histogram!(METRIC_INVALIDATE_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        report
    }

    /// Handle `event` without surfacing failures to the writer.
    pub fn notify(&self, event: &MutationEvent) {
        if let Err(error) = self.handle(event) {
            warn!(
                event_id = %event.id,
                table = %event.table,
                error = %error,
                result = "failed",
                "Cache invalidation failed"
            );
        }
    }

    pub fn created<E: CacheableEntity>(&self, record: &E) {
        self.notify(&MutationEvent::for_entity(MutationKind::Created, record));
    }

    pub fn updated<E: CacheableEntity>(&self, record: &E) {
        self.notify(&MutationEvent::for_entity(MutationKind::Updated, record));
    }

    pub fn deleted<E: CacheableEntity>(&self, record: &E) {
        self.notify(&MutationEvent::for_entity(MutationKind::Deleted, record));
    }

    pub fn restored<E: CacheableEntity>(&self, record: &E) {
        self.notify(&MutationEvent::for_entity(MutationKind::Restored, record));
    }

    pub fn force_deleted<E: CacheableEntity>(&self, record: &E) {
        self.notify(&MutationEvent::for_entity(MutationKind::ForceDeleted, record));
    }
}

impl MutationListener for InvalidationCoordinator {
    fn on_mutation(&self, event: &MutationEvent) {
        self.notify(event);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cache::config::SmartCacheConfig;
    use crate::cache::store::{CacheStore, MemoryStore, Ttl};

    fn coordinator_with(store: MemoryStore) -> (InvalidationCoordinator, Arc<MemoryStore>) {
        let store = Arc::new(store);
        let manager = Arc::new(CacheManager::new(
            SmartCacheConfig::default(),
            store.clone(),
        ));
        (InvalidationCoordinator::new(manager), store)
    }

    fn seed(store: &MemoryStore, key: &str, tags: &[&str]) {
        let tags: Vec<String> = tags.iter().map(|tag| tag.to_string()).collect();
        store
            .remember_with_tags(key, &tags, Ttl::Forever, &mut || Ok(json!(true)))
            .expect("seed");
    }

    #[test]
    fn tags_are_table_then_record_then_related() {
        let (coordinator, _) = coordinator_with(MemoryStore::new());
        let tags = coordinator.tags_for(
            "comments",
            Some(&RecordId::from(3)),
            &[EntityRef::new("Post", "posts")],
        );
        assert_eq!(
            tags,
            [
                "smart_cache.comments",
                "smart_cache.comments.3",
                "smart_cache.posts"
            ]
        );
    }

    #[test]
    fn missing_or_empty_id_skips_the_record_tag() {
        let (coordinator, _) = coordinator_with(MemoryStore::new());
        assert_eq!(coordinator.tags_for("posts", None, &[]), ["smart_cache.posts"]);
        assert_eq!(
            coordinator.tags_for("posts", Some(&RecordId::new("")), &[]),
            ["smart_cache.posts"]
        );
    }

    #[test]
    fn record_mutation_spares_other_records_of_unrelated_tables() {
        let (coordinator, store) = coordinator_with(MemoryStore::new());
        seed(&store, "find7", &["smart_cache.posts.7"]);
        seed(&store, "find8", &["smart_cache.posts.8"]);

        let report = coordinator
            .on_mutate("Post", "posts", Some(&RecordId::from(7)), &[])
            .expect("invalidate");

        assert!(report.applied);
        assert!(!store.has("find7").expect("has"));
        assert!(store.has("find8").expect("has"));
    }

    #[test]
    fn declared_targets_are_not_followed_transitively() {
        let (coordinator, store) = coordinator_with(MemoryStore::new());
        seed(&store, "posts", &["smart_cache.posts"]);
        seed(&store, "users", &["smart_cache.users"]);

        // Comment -> Post is declared; Post -> User is not walked.
        coordinator
            .on_mutate("Comment", "comments", None, &[EntityRef::new("Post", "posts")])
            .expect("invalidate");

        assert!(!store.has("posts").expect("has"));
        assert!(store.has("users").expect("has"));
    }

    #[test]
    fn untagged_store_reports_not_applied() {
        let (coordinator, _) = coordinator_with(MemoryStore::untagged());
        let report = coordinator
            .on_mutate("Post", "posts", Some(&RecordId::from(1)), &[])
            .expect("never fails for missing tag support");
        assert!(!report.applied);
        assert_eq!(report.tags.len(), 2);
    }

    #[test]
    fn listener_entry_point_invalidates() {
        let (coordinator, store) = coordinator_with(MemoryStore::new());
        seed(&store, "list", &["smart_cache.posts"]);

        let listener: &dyn MutationListener = &coordinator;
        listener.on_mutation(&MutationEvent::new(
            MutationKind::ForceDeleted,
            "Post",
            "posts",
            Some(RecordId::from(9)),
            vec![],
        ));

        assert!(!store.has("list").expect("has"));
    }
}
