//! Cached terminal operations for entity queries.
//!
//! [`CacheableQuery`] pairs a [`QueryShape`] with a [`CacheManager`] and
//! exposes the terminal operations a data-access layer runs: rows, first row,
//! count, aggregates and find-by-id. Every result is tagged with the global
//! tag and the table tag; find results also carry the record tag.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{BoxError, CacheResult};

use super::keys::{Operation, QueryShape, RecordId, TagScope, derive_key};
use super::manager::{CacheManager, LookupContext};
use super::store::Ttl;

/// Anything that can describe the query it is about to run.
pub trait QuerySource {
    fn shape(&self) -> QueryShape;
}

impl QuerySource for QueryShape {
    fn shape(&self) -> QueryShape {
        self.clone()
    }
}

/// Entry point for routing a query through the cache.
pub trait QueryCacheExt: QuerySource {
    fn cached<'m>(&self, manager: &'m CacheManager) -> CacheableQuery<'m> {
        CacheableQuery::new(manager, self.shape())
    }
}

impl<T: QuerySource + ?Sized> QueryCacheExt for T {}

#[derive(Clone)]
pub struct CacheableQuery<'m> {
    manager: &'m CacheManager,
    shape: QueryShape,
    ttl: Option<Ttl>,
    bypass: bool,
}

impl<'m> CacheableQuery<'m> {
    pub fn new(manager: &'m CacheManager, shape: QueryShape) -> Self {
        Self {
            manager,
            shape,
            ttl: None,
            bypass: false,
        }
    }

    pub fn shape(&self) -> &QueryShape {
        &self.shape
    }

    /// Override the configured TTL for this query; `0` caches forever.
    pub fn ttl(mut self, minutes: u64) -> Self {
        self.ttl = Some(Ttl::from_minutes(minutes));
        self
    }

    /// Run this query straight against the source.
    pub fn without_cache(mut self) -> Self {
        self.bypass = true;
        self
    }

    pub(crate) fn bypass_if(mut self, bypass: bool) -> Self {
        self.bypass |= bypass;
        self
    }

    pub fn is_cached(&self) -> bool {
        !self.bypass && self.manager.is_enabled()
    }

    pub fn effective_ttl(&self) -> Ttl {
        self.ttl.unwrap_or_else(|| self.manager.default_ttl())
    }

    pub fn get<T, E, F>(&self, fetch: F) -> CacheResult<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
        E: Into<BoxError>,
        F: FnOnce() -> Result<Vec<T>, E>,
    {
        self.run(&Operation::Get, fetch)
    }

    pub fn first<T, E, F>(&self, fetch: F) -> CacheResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        E: Into<BoxError>,
        F: FnOnce() -> Result<Option<T>, E>,
    {
        self.run(&Operation::First, fetch)
    }

    pub fn count<E, F>(&self, fetch: F) -> CacheResult<u64>
    where
        E: Into<BoxError>,
        F: FnOnce() -> Result<u64, E>,
    {
        self.run(&Operation::Count, fetch)
    }

    pub fn sum<T, E, F>(&self, column: &str, fetch: F) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned,
        E: Into<BoxError>,
        F: FnOnce() -> Result<T, E>,
    {
        self.run(&Operation::sum(column), fetch)
    }

    /// `None` over an empty set.
    pub fn avg<E, F>(&self, column: &str, fetch: F) -> CacheResult<Option<f64>>
    where
        E: Into<BoxError>,
        F: FnOnce() -> Result<Option<f64>, E>,
    {
        self.run(&Operation::avg(column), fetch)
    }

    pub fn max<T, E, F>(&self, column: &str, fetch: F) -> CacheResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        E: Into<BoxError>,
        F: FnOnce() -> Result<Option<T>, E>,
    {
        self.run(&Operation::max(column), fetch)
    }

    pub fn min<T, E, F>(&self, column: &str, fetch: F) -> CacheResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        E: Into<BoxError>,
        F: FnOnce() -> Result<Option<T>, E>,
    {
        self.run(&Operation::min(column), fetch)
    }

    /// Look one record up by primary key.
    ///
    /// The key depends only on table and id, so every query shape over the
    /// same table shares the entry.
    pub fn find<T, E, F>(&self, id: impl Into<RecordId>, fetch: F) -> CacheResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        E: Into<BoxError>,
        F: FnOnce() -> Result<Option<T>, E>,
    {
        self.run(&Operation::Find(id.into()), fetch)
    }

    fn run<T, E, F>(&self, operation: &Operation, fetch: F) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned,
        E: Into<BoxError>,
        F: FnOnce() -> Result<T, E>,
    {
        let context = LookupContext::new(self.shape.table(), operation.label());
        if self.bypass {
            return self.manager.bypass(context, fetch);
        }

        let key = derive_key(&self.shape, operation);
        let tags = self.tags_for(operation);
        self.manager
            .get_or_compute(&key, &tags, self.effective_ttl(), context, fetch)
    }

    fn tags_for(&self, operation: &Operation) -> Vec<String> {
        let table = self.shape.table();
        let mut tags = vec![
            self.manager.tag(&TagScope::Global),
            self.manager.tag(&TagScope::table(table)),
        ];
        if let Operation::Find(id) = operation {
            tags.push(self.manager.tag(&TagScope::record(table, id.clone())));
        }
        tags
    }
}
