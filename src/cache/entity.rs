//! Cacheable entity declarations.
//!
//! An entity type opts into caching by implementing [`CacheableEntity`]: it
//! names its table and lists the other entity types whose table-level cache
//! must be purged whenever one of its records changes.

use serde::{Deserialize, Serialize};

use super::keys::RecordId;

pub trait CacheableEntity: 'static {
    /// Short type name used in listings and diagrams, e.g. `"Post"`.
    const NAME: &'static str;
    /// Backing table, e.g. `"posts"`.
    const TABLE: &'static str;

    /// Entity types whose table cache a change to this type invalidates.
    ///
    /// Resolved one hop only: the targets' own declarations are not followed.
    fn invalidates() -> Vec<EntityRef> {
        Vec::new()
    }

    /// Primary key of this record, if it has one yet.
    fn record_id(&self) -> Option<RecordId>;
}

/// A resolved reference to a cacheable entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub name: String,
    pub table: String,
}

impl EntityRef {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
        }
    }

    pub fn of<E: CacheableEntity>() -> Self {
        Self::new(E::NAME, E::TABLE)
    }
}

/// Everything the cache knows about one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityDescriptor {
    /// Fully qualified type name, or the declared name for config entries.
    pub type_name: String,
    pub name: String,
    pub table: String,
    pub invalidates: Vec<EntityRef>,
}

impl EntityDescriptor {
    pub fn of<E: CacheableEntity>() -> Self {
        Self {
            type_name: std::any::type_name::<E>().to_string(),
            name: E::NAME.to_string(),
            table: E::TABLE.to_string(),
            invalidates: E::invalidates(),
        }
    }

    pub fn as_ref(&self) -> EntityRef {
        EntityRef::new(&self.name, &self.table)
    }
}
