//! Redis cache backend: `GET`, `SET EX`, and `SCAN MATCH` + `DEL` invalidation.

use std::time::Duration;

use async_trait::async_trait;

use super::{CacheBackend, CacheError};
use crate::redis_conn::RedisHandle;

const SCAN_BATCH: usize = 200;

#[derive(Debug, Clone)]
pub struct RedisCache {
    redis: RedisHandle,
}

impl RedisCache {
    pub fn new(redis: RedisHandle) -> Self {
        Self { redis }
    }
}

fn unavailable(e: redis::RedisError) -> CacheError {
    CacheError::Unavailable(e.to_string())
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.redis.conn();
        redis::cmd("GET").arg(key).query_async(&mut conn).await.map_err(unavailable)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.redis.conn();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, CacheError> {
        let mut conn = self.redis.conn();
        let mut cursor: u64 = 0;
        let mut removed = 0u64;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;
            if !keys.is_empty() {
                let n: u64 = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await.map_err(unavailable)?;
                removed += n;
            }
            if next == 0 {
                return Ok(removed);
            }
            cursor = next;
        }
    }
}
