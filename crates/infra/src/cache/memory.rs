use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::glob;
use super::{CacheBackend, CacheError};

/// Expired entries are swept once per this many writes.
const SWEEP_EVERY: u64 = 256;

#[derive(Debug, Default)]
struct Entries {
    by_key: HashMap<String, (String, Instant)>,
    writes: u64,
}

/// Process-local cache for tests/dev.
///
/// Expired entries are dropped when read, and swept periodically on writes so
/// keys that are never read again do not pile up.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: Mutex<Entries>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().await.by_key.values().filter(|(_, exp)| *exp > now).count()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().await;
        match entries.by_key.get(key) {
            Some((_, exp)) if *exp <= Instant::now() => {
                entries.by_key.remove(key);
                Ok(None)
            }
            Some((v, _)) => Ok(Some(v.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.writes += 1;
        if entries.writes % SWEEP_EVERY == 0 {
            entries.by_key.retain(|_, (_, exp)| *exp > now);
        }
        entries.by_key.insert(key.to_string(), (value, now + ttl));
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, CacheError> {
        let mut entries = self.entries.lock().await;
        let before = entries.by_key.len();
        entries.by_key.retain(|k, _| !glob::matches(pattern, k));
        Ok((before - entries.by_key.len()) as u64)
    }
}
