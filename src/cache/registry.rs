//! Bidirectional tag index.
//!
//! Tracks which cache keys were written under which tags so a tag flush can
//! find every affected entry, and so removing an entry can clean up the tags
//! that pointed at it.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::registry";

/// Maps tag → keys and key → tags.
pub struct TagIndex {
    tag_to_keys: RwLock<HashMap<String, HashSet<String>>>,
    key_to_tags: RwLock<HashMap<String, HashSet<String>>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self {
            tag_to_keys: RwLock::new(HashMap::new()),
            key_to_tags: RwLock::new(HashMap::new()),
        }
    }

    /// Associate `key` with exactly `tags`, replacing any earlier association.
    pub fn register(&self, key: &str, tags: HashSet<String>) {
        let mut t2k = rw_write(&self.tag_to_keys, SOURCE, "register.tag_to_keys");
        let mut k2t = rw_write(&self.key_to_tags, SOURCE, "register.key_to_tags");

        if let Some(previous) = k2t.remove(key) {
            detach(&mut t2k, key, previous);
        }
        for tag in &tags {
            t2k.entry(tag.clone()).or_default().insert(key.to_string());
        }
        if !tags.is_empty() {
            k2t.insert(key.to_string(), tags);
        }
    }

    pub fn keys_for_tag(&self, tag: &str) -> HashSet<String> {
        rw_read(&self.tag_to_keys, SOURCE, "keys_for_tag")
            .get(tag)
            .cloned()
            .unwrap_or_default()
    }

    pub fn tags_for_key(&self, key: &str) -> HashSet<String> {
        rw_read(&self.key_to_tags, SOURCE, "tags_for_key")
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Forget a key, e.g. after expiry or overwrite without tags.
    pub fn unregister(&self, key: &str) {
        let mut t2k = rw_write(&self.tag_to_keys, SOURCE, "unregister.tag_to_keys");
        let mut k2t = rw_write(&self.key_to_tags, SOURCE, "unregister.key_to_tags");

        if let Some(tags) = k2t.remove(key) {
            detach(&mut t2k, key, tags);
        }
    }

    /// Drop a tag together with every key it reaches.
    ///
    /// Returns the keys that were attached to the tag; those keys are removed
    /// from every other tag as well, since their entries are about to go.
    pub fn unregister_tag(&self, tag: &str) -> HashSet<String> {
        let mut t2k = rw_write(&self.tag_to_keys, SOURCE, "unregister_tag.tag_to_keys");
        let mut k2t = rw_write(&self.key_to_tags, SOURCE, "unregister_tag.key_to_tags");

        let affected = t2k.remove(tag).unwrap_or_default();
        for key in &affected {
            if let Some(tags) = k2t.remove(key) {
                detach(&mut t2k, key, tags);
            }
        }
        affected
    }

    pub fn clear(&self) {
        rw_write(&self.tag_to_keys, SOURCE, "clear.tag_to_keys").clear();
        rw_write(&self.key_to_tags, SOURCE, "clear.key_to_tags").clear();
    }

    pub fn tag_count(&self) -> usize {
        rw_read(&self.tag_to_keys, SOURCE, "tag_count").len()
    }

    pub fn key_count(&self) -> usize {
        rw_read(&self.key_to_tags, SOURCE, "key_count").len()
    }
}

impl Default for TagIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn detach(
    tag_to_keys: &mut HashMap<String, HashSet<String>>,
    key: &str,
    tags: HashSet<String>,
) {
    for tag in tags {
        if let Some(keys) = tag_to_keys.get_mut(&tag) {
            keys.remove(key);
            if keys.is_empty() {
                tag_to_keys.remove(&tag);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    fn tags(values: &[&str]) -> HashSet<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn register_and_lookup() {
        let index = TagIndex::new();
        index.register("smart_cache.posts.find.7", tags(&["smart_cache.posts", "smart_cache.posts.7"]));

        assert!(
            index
                .keys_for_tag("smart_cache.posts.7")
                .contains("smart_cache.posts.find.7")
        );
        assert_eq!(index.tags_for_key("smart_cache.posts.find.7").len(), 2);
    }

    #[test]
    fn reregister_replaces_tags() {
        let index = TagIndex::new();
        index.register("k", tags(&["a", "b"]));
        index.register("k", tags(&["b"]));

        assert!(index.keys_for_tag("a").is_empty());
        assert_eq!(index.tags_for_key("k"), tags(&["b"]));
        assert_eq!(index.tag_count(), 1);
    }

    #[test]
    fn unregister_cleans_up_mappings() {
        let index = TagIndex::new();
        index.register("k", tags(&["a"]));
        assert_eq!(index.key_count(), 1);
        assert_eq!(index.tag_count(), 1);

        index.unregister("k");
        assert_eq!(index.key_count(), 0);
        assert_eq!(index.tag_count(), 0);
    }

    #[test]
    fn unregister_tag_returns_affected_keys_and_detaches_them_elsewhere() {
        let index = TagIndex::new();
        index.register("list", tags(&["p", "p.posts"]));
        index.register("find7", tags(&["p", "p.posts", "p.posts.7"]));
        index.register("find8", tags(&["p", "p.posts", "p.posts.8"]));

        let affected = index.unregister_tag("p.posts.7");
        assert_eq!(affected, tags(&["find7"]));
        assert!(!index.keys_for_tag("p.posts").contains("find7"));
        assert!(index.keys_for_tag("p.posts").contains("find8"));
        assert!(index.keys_for_tag("p.posts.7").is_empty());
    }

    #[test]
    fn clear_removes_all_mappings() {
        let index = TagIndex::new();
        index.register("k", tags(&["a", "b"]));
        index.clear();
        assert_eq!(index.key_count(), 0);
        assert_eq!(index.tag_count(), 0);
    }

    #[test]
    fn index_recovers_from_poisoned_lock() {
        let index = TagIndex::new();

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = index
                .tag_to_keys
                .write()
                .expect("tag_to_keys lock should be acquired");
            panic!("poison tag_to_keys lock");
        }));

        index.register("k", tags(&["a"]));
        assert_eq!(index.keys_for_tag("a"), tags(&["k"]));
    }
}
