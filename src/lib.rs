//! Query-result caching with tag-based, relation-aware invalidation.

pub mod cache;
pub mod config;
pub mod error;
pub mod telemetry;

pub use error::{BoxError, CacheError, CacheResult, StoreError};
