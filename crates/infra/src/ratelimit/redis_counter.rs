use std::time::Duration;

use async_trait::async_trait;

use super::{CounterStore, CounterStoreError};
use crate::redis_conn::RedisHandle;

/// Increment and re-arm the expiry in one atomic step.
const HIT: &str = r#"
local count = redis.call('INCR', KEYS[1])
redis.call('PEXPIRE', KEYS[1], ARGV[1])
return count
"#;

pub struct RedisCounterStore {
    redis: RedisHandle,
    script: redis::Script,
}

impl RedisCounterStore {
    pub fn new(redis: RedisHandle) -> Self {
        Self {
            redis,
            script: redis::Script::new(HIT),
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<u64, CounterStoreError> {
        let mut conn = self.redis.conn();
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);
        self.script
            .key(key)
            .arg(window_ms)
            .invoke_async::<_, u64>(&mut conn)
            .await
            .map_err(|e| CounterStoreError::Unavailable(e.to_string()))
    }
}
