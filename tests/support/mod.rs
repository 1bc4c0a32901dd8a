//! Entity fixtures shared by the integration tests: a small blog schema in
//! which comments invalidate posts.

#![allow(dead_code)]

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smartcache::cache::{
    CacheManager, CacheableEntity, EntityRef, EntityRegistry, MemoryStore, QueryShape, RecordId,
    SmartCacheConfig,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub published: bool,
}

impl Post {
    pub fn new(id: i64, title: &str, published: bool) -> Self {
        Self {
            id,
            title: title.to_string(),
            published,
        }
    }
}

impl CacheableEntity for Post {
    const NAME: &'static str = "Post";
    const TABLE: &'static str = "posts";

    fn record_id(&self) -> Option<RecordId> {
        Some(self.id.into())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub body: String,
}

impl CacheableEntity for Comment {
    const NAME: &'static str = "Comment";
    const TABLE: &'static str = "comments";

    fn invalidates() -> Vec<EntityRef> {
        vec![EntityRef::of::<Post>()]
    }

    fn record_id(&self) -> Option<RecordId> {
        Some(self.id.into())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
}

impl CacheableEntity for User {
    const NAME: &'static str = "User";
    const TABLE: &'static str = "users";

    fn record_id(&self) -> Option<RecordId> {
        Some(self.id.into())
    }
}

pub fn blog_registry() -> EntityRegistry {
    EntityRegistry::builder()
        .register::<Post>()
        .register::<User>()
        .register::<Comment>()
        .build()
        .expect("blog registry should build")
}

pub fn manager_over(store: Arc<MemoryStore>, config: SmartCacheConfig) -> Arc<CacheManager> {
    Arc::new(CacheManager::new(config, store))
}

pub fn published_posts() -> QueryShape {
    QueryShape::new("posts", "select * from \"posts\" where \"published\" = ?").bind(true)
}
