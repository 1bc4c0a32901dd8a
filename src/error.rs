use std::error::Error as StdError;

use thiserror::Error;

/// Boxed error produced by a caller-supplied compute closure.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Failures raised by a [`CacheStore`](crate::cache::CacheStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache backend error: {message}")]
    Backend { message: String },
    #[error("failed to serialize cached value: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("query failed: {0}")]
    Compute(BoxError),
    #[error("cached value does not match the requested type: {0}")]
    Decode(serde_json::Error),
    #[error("entity `{0}` is not registered for caching")]
    UnknownEntity(String),
    #[error("no cacheable entity is mapped to table `{0}`")]
    UnknownTable(String),
    #[error("cache store does not support tags; tag-scoped clearing is unavailable")]
    TagsUnsupported,
}

impl CacheError {
    pub fn compute(error: impl Into<BoxError>) -> Self {
        Self::Compute(error.into())
    }

    pub fn unknown_entity(name: impl Into<String>) -> Self {
        Self::UnknownEntity(name.into())
    }

    pub fn unknown_table(table: impl Into<String>) -> Self {
        Self::UnknownTable(table.into())
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
