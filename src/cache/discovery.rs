//! Registry of cacheable entity types.
//!
//! Entity types are registered explicitly at startup, either as Rust types
//! through [`EntityRegistryBuilder::register`] or as declarations read from
//! configuration. The registry backs the relation diagram, the per-entity
//! enable switch and cascading administrative invalidation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

use super::entity::{CacheableEntity, EntityDescriptor, EntityRef};
use super::manager::CacheManager;
use super::query::{CacheableQuery, QuerySource};

/// An entity type declared in configuration rather than code.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EntityDeclaration {
    pub name: String,
    pub table: String,
    /// Names of other declared or registered entity types.
    #[serde(default)]
    pub invalidates: Vec<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

/// Listing row for one registered entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredEntity {
    pub type_name: String,
    pub table: String,
    pub short_name: String,
    pub invalidates: Vec<String>,
}

#[derive(Debug, Default)]
pub struct EntityRegistryBuilder {
    descriptors: Vec<EntityDescriptor>,
    declarations: Vec<EntityDeclaration>,
    disabled: BTreeSet<String>,
}

impl EntityRegistryBuilder {
    pub fn register<E: CacheableEntity>(mut self) -> Self {
        self.descriptors.push(EntityDescriptor::of::<E>());
        self
    }

    pub fn declare(mut self, declaration: EntityDeclaration) -> Self {
        if !declaration.enabled {
            self.disabled.insert(declaration.name.clone());
        }
        self.declarations.push(declaration);
        self
    }

    pub fn declare_all(self, declarations: impl IntoIterator<Item = EntityDeclaration>) -> Self {
        declarations.into_iter().fold(self, Self::declare)
    }

    /// Route queries over this entity's table straight to the source.
    pub fn disable(mut self, name: impl Into<String>) -> Self {
        self.disabled.insert(name.into());
        self
    }

    /// Resolve declared targets and freeze the registry.
    ///
    /// Fails with [`CacheError::UnknownEntity`] when a declaration or the
    /// disabled set names an entity that was never registered. A later entry
    /// with an already registered name replaces the earlier one.
    pub fn build(self) -> CacheResult<EntityRegistry> {
        let mut entities: BTreeMap<String, EntityDescriptor> = self
            .descriptors
            .into_iter()
            .map(|descriptor| (descriptor.name.clone(), descriptor))
            .collect();

        let known: BTreeMap<String, String> = entities
            .values()
            .map(|d| (d.name.clone(), d.table.clone()))
            .chain(
                self.declarations
                    .iter()
                    .map(|d| (d.name.clone(), d.table.clone())),
            )
            .collect();

        for declaration in self.declarations {
            let invalidates = declaration
                .invalidates
                .iter()
                .map(|target| {
                    known
                        .get(target)
                        .map(|table| EntityRef::new(target, table))
                        .ok_or_else(|| CacheError::unknown_entity(target))
                })
                .collect::<CacheResult<Vec<_>>>()?;
            entities.insert(
                declaration.name.clone(),
                EntityDescriptor {
                    type_name: declaration.name.clone(),
                    name: declaration.name,
                    table: declaration.table,
                    invalidates,
                },
            );
        }

        if let Some(unknown) = self.disabled.iter().find(|name| !entities.contains_key(*name)) {
            return Err(CacheError::unknown_entity(unknown));
        }

        Ok(EntityRegistry {
            entities,
            disabled: self.disabled,
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct EntityRegistry {
    /// Keyed, and therefore ordered, by short name.
    entities: BTreeMap<String, EntityDescriptor>,
    disabled: BTreeSet<String>,
}

impl EntityRegistry {
    pub fn builder() -> EntityRegistryBuilder {
        EntityRegistryBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&EntityDescriptor> {
        self.entities.get(name)
    }

    pub fn by_table(&self, table: &str) -> Option<&EntityDescriptor> {
        self.entities.values().find(|d| d.table == table)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.entities.values()
    }

    /// Distinct tables of all registered entity types, sorted.
    pub fn tables(&self) -> Vec<&str> {
        let tables: BTreeSet<&str> = self.entities.values().map(|d| d.table.as_str()).collect();
        tables.into_iter().collect()
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        !self.disabled.contains(name)
    }

    /// Unregistered tables are always cacheable.
    pub fn is_table_enabled(&self, table: &str) -> bool {
        self.entities
            .values()
            .filter(|d| d.table == table)
            .all(|d| self.is_enabled(&d.name))
    }

    /// Build a cached query that honours this registry's enable switch.
    pub fn cached<'m, Q>(&self, manager: &'m CacheManager, source: &Q) -> CacheableQuery<'m>
    where
        Q: QuerySource + ?Sized,
    {
        let shape = source.shape();
        let bypass = !self.is_table_enabled(shape.table());
        CacheableQuery::new(manager, shape).bypass_if(bypass)
    }

    /// Listing of every registered entity type, sorted by short name.
    pub fn discover(&self) -> Vec<DiscoveredEntity> {
        self.entities
            .values()
            .map(|descriptor| DiscoveredEntity {
                type_name: descriptor.type_name.clone(),
                table: descriptor.table.clone(),
                short_name: descriptor.name.clone(),
                invalidates: descriptor
                    .invalidates
                    .iter()
                    .map(|target| target.name.clone())
                    .collect(),
            })
            .collect()
    }
}

/// Render declared relations as a Mermaid `graph LR` block.
///
/// Each `A invalidates B` becomes one edge. When nothing declares a relation
/// every entity is drawn as an isolated node instead.
pub fn mermaid_diagram(entities: &[DiscoveredEntity]) -> String {
    let mut out = String::from("graph LR");
    let mut has_relations = false;

    for entity in entities {
        let from = &entity.short_name;
        for to in &entity.invalidates {
            let _ = write!(
                out,
                "\n    {from}[\"📦 {from}\"] -->|invalidates| {to}[\"📦 {to}\"]"
            );
            has_relations = true;
        }
    }

    if !has_relations {
        for entity in entities {
            let name = &entity.short_name;
            let _ = write!(out, "\n    {name}[\"📦 {name}\"]");
        }
    }

    out
}

/// Tables whose cache must be purged along with `table`.
///
/// One hop: the targets declared by the entity types stored in `table`.
pub fn related_tables(table: &str, entities: &[DiscoveredEntity]) -> Vec<String> {
    entities
        .iter()
        .filter(|entity| entity.table == table)
        .flat_map(|entity| entity.invalidates.iter())
        .flat_map(|target| {
            entities
                .iter()
                .filter(move |candidate| &candidate.short_name == target)
                .map(|candidate| candidate.table.clone())
        })
        .collect()
}
