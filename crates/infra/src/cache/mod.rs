//! Read-through JSON cache for list/detail endpoints.
//!
//! The cache is never the source of truth: backend failures read as misses and
//! write/invalidate failures are logged and swallowed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::best_effort::best_effort;
use crate::config::CacheConfig;

pub mod glob;
pub mod keys;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_cache;

pub use memory::InMemoryCache;
#[cfg(feature = "redis")]
pub use redis_cache::RedisCache;

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

/// Raw string key/value storage with TTLs and glob deletion.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Delete every key matching a Redis-style glob; returns how many went.
    async fn delete_matching(&self, pattern: &str) -> Result<u64, CacheError>;
}

/// Which TTL a cached value gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    /// Lists and anything that changes on writes.
    Short,
    /// Immutable details (finished jobs, stored analyses).
    Long,
}

#[derive(Clone)]
pub struct CacheLayer {
    backend: Arc<dyn CacheBackend>,
    config: CacheConfig,
}

impl CacheLayer {
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self { backend, config }
    }

    pub fn in_memory(config: CacheConfig) -> Self {
        Self::new(Arc::new(InMemoryCache::new()), config)
    }

    pub fn ttl(&self, class: TtlClass) -> Duration {
        match class {
            TtlClass::Short => self.config.short_ttl,
            TtlClass::Long => self.config.long_ttl,
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key, error = %e, "cache read failed; treating as miss");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key, error = %e, "undecodable cache entry; treating as miss");
                None
            }
        }
    }

    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, class: TtlClass) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "value not cacheable");
                return;
            }
        };
        best_effort("cache.set", self.backend.set(key, raw, self.ttl(class))).await;
    }

    pub async fn invalidate_pattern(&self, pattern: &str) {
        if let Some(n) = best_effort("cache.invalidate", self.backend.delete_matching(pattern)).await {
            tracing::debug!(pattern, removed = n, "cache invalidated");
        }
    }

    /// Return the cached value or load, cache, and return it.
    ///
    /// `Ok(None)` from the loader (not found) is not cached.
    pub async fn get_or_load<T, E, F, Fut>(&self, key: &str, class: TtlClass, load: F) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Option<T>, E>>,
    {
        if let Some(hit) = self.get_json::<T>(key).await {
            return Ok(Some(hit));
        }
        let loaded = load().await?;
        if let Some(v) = &loaded {
            self.set_json(key, v, class).await;
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct DownBackend;

    #[async_trait]
    impl CacheBackend for DownBackend {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn delete_matching(&self, _pattern: &str) -> Result<u64, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn set_then_invalidate_misses() {
        let cache = CacheLayer::in_memory(CacheConfig::default());
        cache.set_json("docs:list:u1:0:20", &json!([1, 2]), TtlClass::Short).await;
        assert_eq!(cache.get_json::<Vec<u8>>("docs:list:u1:0:20").await, Some(vec![1, 2]));

        cache.invalidate_pattern("docs:list:u1:*").await;
        assert_eq!(cache.get_json::<Vec<u8>>("docs:list:u1:0:20").await, None);
    }

    #[tokio::test]
    async fn unavailable_backend_degrades_to_misses() {
        let cache = CacheLayer::new(Arc::new(DownBackend), CacheConfig::default());
        cache.set_json("k", &1, TtlClass::Long).await;
        cache.invalidate_pattern("*").await;
        assert_eq!(cache.get_json::<i32>("k").await, None);

        let loaded: Result<Option<i32>, ()> = cache.get_or_load("k", TtlClass::Long, || async { Ok(Some(5)) }).await;
        assert_eq!(loaded, Ok(Some(5)));
    }

    #[tokio::test]
    async fn get_or_load_populates_once() {
        let cache = CacheLayer::in_memory(CacheConfig::default());
        let first: Result<Option<String>, ()> =
            cache.get_or_load("a", TtlClass::Short, || async { Ok(Some("x".to_string())) }).await;
        let second: Result<Option<String>, ()> =
            cache.get_or_load("a", TtlClass::Short, || async { Ok(Some("y".to_string())) }).await;
        assert_eq!(first, Ok(Some("x".into())));
        assert_eq!(second, Ok(Some("x".into())));
    }

    #[tokio::test]
    async fn not_found_is_not_cached() {
        let cache = CacheLayer::in_memory(CacheConfig::default());
        let _: Result<Option<i32>, ()> = cache.get_or_load("gone", TtlClass::Long, || async { Ok(None) }).await;
        assert_eq!(cache.get_json::<i32>("gone").await, None);
    }
}
