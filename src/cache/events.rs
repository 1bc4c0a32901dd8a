//! Entity mutation events.
//!
//! The data-access layer reports every lifecycle transition of a cacheable
//! record as a [`MutationEvent`] and hands it to a [`MutationListener`]
//! synchronously, right after the write succeeds.

use std::fmt;

use time::OffsetDateTime;
use uuid::Uuid;

use super::entity::{CacheableEntity, EntityRef};
use super::keys::RecordId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Created,
    Updated,
    Deleted,
    /// A soft-deleted record was brought back.
    Restored,
    /// A record was removed permanently, bypassing soft deletion.
    ForceDeleted,
}

impl MutationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationKind::Created => "created",
            MutationKind::Updated => "updated",
            MutationKind::Deleted => "deleted",
            MutationKind::Restored => "restored",
            MutationKind::ForceDeleted => "force_deleted",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle transition of one record.
#[derive(Debug, Clone)]
pub struct MutationEvent {
    /// Correlates log lines for this event.
    pub id: Uuid,
    pub kind: MutationKind,
    pub entity: String,
    pub table: String,
    pub record_id: Option<RecordId>,
    /// The mutated type's declared invalidation targets.
    pub invalidates: Vec<EntityRef>,
    pub occurred_at: OffsetDateTime,
}

impl MutationEvent {
    pub fn new(
        kind: MutationKind,
        entity: impl Into<String>,
        table: impl Into<String>,
        record_id: Option<RecordId>,
        invalidates: Vec<EntityRef>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            entity: entity.into(),
            table: table.into(),
            record_id,
            invalidates,
            occurred_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn for_entity<E: CacheableEntity>(kind: MutationKind, record: &E) -> Self {
        Self::new(kind, E::NAME, E::TABLE, record.record_id(), E::invalidates())
    }
}

/// Receiver of mutation notifications.
///
/// Implementations must not fail the write that triggered them; errors are
/// theirs to log.
pub trait MutationListener: Send + Sync {
    fn on_mutation(&self, event: &MutationEvent);
}

impl<F> MutationListener for F
where
    F: Fn(&MutationEvent) + Send + Sync,
{
    fn on_mutation(&self, event: &MutationEvent) {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Comment {
        id: Option<i64>,
    }

    impl CacheableEntity for Comment {
        const NAME: &'static str = "Comment";
        const TABLE: &'static str = "comments";

        fn invalidates() -> Vec<EntityRef> {
            vec![EntityRef::new("Post", "posts")]
        }

        fn record_id(&self) -> Option<RecordId> {
            self.id.map(RecordId::from)
        }
    }

    #[test]
    fn event_from_entity() {
        let event = MutationEvent::for_entity(MutationKind::Updated, &Comment { id: Some(4) });

        assert!(!event.id.is_nil());
        assert_eq!(event.kind, MutationKind::Updated);
        assert_eq!(event.entity, "Comment");
        assert_eq!(event.table, "comments");
        assert_eq!(event.record_id, Some(RecordId::from(4)));
        assert_eq!(event.invalidates, vec![EntityRef::new("Post", "posts")]);
    }

    #[test]
    fn unsaved_record_has_no_id() {
        let event = MutationEvent::for_entity(MutationKind::Created, &Comment { id: None });
        assert!(event.record_id.is_none());
    }

    #[test]
    fn events_get_distinct_ids() {
        let a = MutationEvent::new(MutationKind::Deleted, "Post", "posts", None, vec![]);
        let b = MutationEvent::new(MutationKind::Deleted, "Post", "posts", None, vec![]);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn closures_are_listeners() {
        let seen = Mutex::new(Vec::new());
        let listener = |event: &MutationEvent| {
            seen.lock().expect("seen lock").push(event.kind);
        };

        listener.on_mutation(&MutationEvent::new(
            MutationKind::Restored,
            "Post",
            "posts",
            Some(RecordId::from(1)),
            vec![],
        ));

        assert_eq!(*seen.lock().expect("seen lock"), vec![MutationKind::Restored]);
    }

    #[test]
    fn kind_labels() {
        assert_eq!(MutationKind::ForceDeleted.to_string(), "force_deleted");
        assert_eq!(MutationKind::Created.as_str(), "created");
    }
}
