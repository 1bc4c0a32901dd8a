//! Store primitive and the in-process reference store.
//!
//! [`CacheStore`] is the boundary to whatever key/value engine holds cached
//! payloads. Tag support is a runtime capability: a store reports it through
//! [`CacheStore::supports_tags`] and the manager degrades to untagged caching
//! when it is absent. Expiry belongs to the store; the manager only passes a
//! [`Ttl`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::debug;

use crate::error::{CacheError, CacheResult};

use super::lock::{mutex_lock, rw_read, rw_write};
use super::registry::TagIndex;

const SOURCE: &str = "cache::store";

/// Opaque cached payload.
pub type Payload = Value;

/// Producer invoked on a miss. Only ever called outside store locks.
pub type Compute<'a> = &'a mut dyn FnMut() -> CacheResult<Payload>;

/// Entry lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Keep until a tag flush or a full flush.
    Forever,
    After(Duration),
}

impl Ttl {
    /// Callers speak minutes; `0` means no expiry.
    pub fn from_minutes(minutes: u64) -> Self {
        if minutes == 0 {
            Ttl::Forever
        } else {
            Ttl::After(Duration::from_secs(minutes.saturating_mul(60)))
        }
    }

    pub fn as_duration(self) -> Option<Duration> {
        match self {
            Ttl::Forever => None,
            Ttl::After(duration) => Some(duration),
        }
    }
}

/// Key/value engine the manager caches into.
pub trait CacheStore: Send + Sync {
    /// Whether tag-scoped writes and bulk deletes are available.
    fn supports_tags(&self) -> bool;

    /// Whether a live entry exists under `key`.
    fn has(&self, key: &str) -> CacheResult<bool>;

    /// Whether a live entry exists under `key` within the scope of `tags`.
    fn has_tagged(&self, key: &str, tags: &[String]) -> CacheResult<bool> {
        let _ = tags;
        self.has(key)
    }

    /// Return the entry under `key`, computing and storing it on a miss.
    fn remember(&self, key: &str, ttl: Ttl, compute: Compute<'_>) -> CacheResult<Payload>;

    /// Like [`remember`](Self::remember) but associates the entry with `tags`.
    fn remember_with_tags(
        &self,
        key: &str,
        tags: &[String],
        ttl: Ttl,
        compute: Compute<'_>,
    ) -> CacheResult<Payload>;

    /// Delete every entry associated with `tag`.
    fn flush_tag(&self, tag: &str) -> CacheResult<()>;

    /// Delete everything.
    fn flush(&self) -> CacheResult<()>;
}

/// Time source for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *mutex_lock(&self.offset, SOURCE, "manual_clock.advance") += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *mutex_lock(&self.offset, SOURCE, "manual_clock.now")
    }
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Payload,
    tags: HashSet<String>,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| now < deadline)
    }

    fn covers(&self, tags: &[String]) -> bool {
        tags.iter().all(|tag| self.tags.contains(tag))
    }
}

/// In-process store with TTL expiry and an optional tag index.
///
/// Entries are visible only inside this process. Built with
/// [`MemoryStore::untagged`] it behaves like a plain key/value cache that
/// cannot flush by tag.
///
/// Lock order is `entries` then the tag index. Every write keeps the
/// `entries` guard until the index agrees with the map, so a live entry is
/// always reachable from each of its tags.
pub struct MemoryStore {
    entries: RwLock<HashMap<String, StoredEntry>>,
    index: Option<TagIndex>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Tag-capable store on the system clock.
    pub fn new() -> Self {
        Self::build(true, Arc::new(SystemClock))
    }

    /// Store without tag support.
    pub fn untagged() -> Self {
        Self::build(false, Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::build(true, clock)
    }

    fn build(tags: bool, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            index: tags.then(TagIndex::new),
            clock,
        }
    }

    /// Number of stored entries, including any not yet reaped after expiry.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tags currently attached to `key`.
    pub fn tags_for(&self, key: &str) -> HashSet<String> {
        self.index
            .as_ref()
            .map(|index| index.tags_for_key(key))
            .unwrap_or_default()
    }

    fn lookup(&self, key: &str, tags: &[String]) -> Option<Payload> {
        let now = self.clock.now();
        {
            let entries = rw_read(&self.entries, SOURCE, "lookup");
            match entries.get(key) {
                Some(entry) if entry.is_live(now) => {
                    return entry.covers(tags).then(|| entry.value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        self.reap(key, now);
        None
    }

    fn reap(&self, key: &str, now: Instant) {
        let mut entries = rw_write(&self.entries, SOURCE, "reap");
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
            if let Some(index) = &self.index {
                index.unregister(key);
            }
            drop(entries);
            debug!(key, "Expired cache entry reaped");
        }
    }

    fn store(&self, key: &str, tags: &[String], ttl: Ttl, value: Payload) {
        let tags: HashSet<String> = tags.iter().cloned().collect();
        let expires_at = ttl.as_duration().map(|ttl| self.clock.now() + ttl);
        let mut entries = rw_write(&self.entries, SOURCE, "store");
        entries.insert(
            key.to_string(),
            StoredEntry {
                value,
                tags: tags.clone(),
                expires_at,
            },
        );
        if let Some(index) = &self.index {
            index.register(key, tags);
        }
    }

    fn remember_scoped(
        &self,
        key: &str,
        tags: &[String],
        ttl: Ttl,
        compute: Compute<'_>,
    ) -> CacheResult<Payload> {
        if let Some(value) = self.lookup(key, tags) {
            return Ok(value);
        }
        // Concurrent misses may both compute; the later write wins.
        let value = compute()?;
        self.store(key, tags, ttl, value.clone());
        Ok(value)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for MemoryStore {
    fn supports_tags(&self) -> bool {
        self.index.is_some()
    }

    fn has(&self, key: &str) -> CacheResult<bool> {
        Ok(self.lookup(key, &[]).is_some())
    }

    fn has_tagged(&self, key: &str, tags: &[String]) -> CacheResult<bool> {
        if self.index.is_none() {
            return self.has(key);
        }
        Ok(self.lookup(key, tags).is_some())
    }

    fn remember(&self, key: &str, ttl: Ttl, compute: Compute<'_>) -> CacheResult<Payload> {
        self.remember_scoped(key, &[], ttl, compute)
    }

    fn remember_with_tags(
        &self,
        key: &str,
        tags: &[String],
        ttl: Ttl,
        compute: Compute<'_>,
    ) -> CacheResult<Payload> {
        if self.index.is_none() {
            return Err(CacheError::TagsUnsupported);
        }
        self.remember_scoped(key, tags, ttl, compute)
    }

    fn flush_tag(&self, tag: &str) -> CacheResult<()> {
        let Some(index) = &self.index else {
            return Err(CacheError::TagsUnsupported);
        };
        let mut entries = rw_write(&self.entries, SOURCE, "flush_tag");
        let keys = index.unregister_tag(tag);
        for key in &keys {
            entries.remove(key);
        }
        debug!(tag, purged = keys.len(), "Tag flushed");
        Ok(())
    }

    fn flush(&self) -> CacheResult<()> {
        let mut entries = rw_write(&self.entries, SOURCE, "flush");
        entries.clear();
        if let Some(index) = &self.index {
            index.clear();
        }
        Ok(())
    }
}
