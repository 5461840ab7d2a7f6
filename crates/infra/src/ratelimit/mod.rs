//! Fixed-window rate limiting keyed by caller identity and route.
//!
//! Each `(identity, route)` pair owns a counter whose expiry is re-armed to one
//! window on every hit; the count resets once a full window passes without
//! traffic. A burst straddling a window boundary can see up to twice the
//! limit; that is accepted.
//!
//! If the counter store is unreachable, requests are allowed (fail open).

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

use docflow_core::UserId;

use crate::config::RateLimitConfig;

#[cfg(feature = "redis")]
pub mod redis_counter;

#[cfg(feature = "redis")]
pub use redis_counter::RedisCounterStore;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CounterStoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Atomic windowed counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key`, (re)set its expiry to `window`, and return the count.
    async fn hit(&self, key: &str, window: Duration) -> Result<u64, CounterStoreError>;
}

/// Who is being limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Identity {
    User(UserId),
    Ip(IpAddr),
    Unknown,
}

impl Identity {
    /// The authenticated user if there is one, else the network origin.
    pub fn resolve(user: Option<UserId>, ip: Option<IpAddr>) -> Self {
        match (user, ip) {
            (Some(u), _) => Identity::User(u),
            (None, Some(ip)) => Identity::Ip(ip),
            (None, None) => Identity::Unknown,
        }
    }
}

impl core::fmt::Display for Identity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Identity::User(u) => write!(f, "user:{u}"),
            Identity::Ip(ip) => write!(f, "ip:{ip}"),
            Identity::Unknown => f.write_str("unknown"),
        }
    }
}

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Count after this hit; `None` when the store was unavailable.
    pub count: Option<u64>,
    pub limit: u64,
}

impl Decision {
    pub fn remaining(&self) -> u64 {
        self.count.map_or(self.limit, |c| self.limit.saturating_sub(c))
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub fn in_memory(config: RateLimitConfig) -> Self {
        Self::new(Arc::new(InMemoryCounterStore::new()), config)
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    pub fn key(identity: &Identity, route: &str) -> String {
        format!("rate:{identity}:{route}")
    }

    pub async fn check(&self, identity: &Identity, route: &str) -> Decision {
        let key = Self::key(identity, route);
        match self.store.hit(&key, self.config.window).await {
            Ok(count) => Decision {
                allowed: count <= self.config.max_requests,
                count: Some(count),
                limit: self.config.max_requests,
            },
            Err(e) => {
                warn!(key = %key, error = %e, "rate limiter store unavailable; allowing request");
                Decision {
                    allowed: true,
                    count: None,
                    limit: self.config.max_requests,
                }
            }
        }
    }

    pub async fn allow(&self, identity: &Identity, route: &str) -> bool {
        self.check(identity, route).await.allowed
    }
}

/// Expired counters are swept once per this many hits.
const SWEEP_EVERY: u64 = 1024;

#[derive(Debug, Default)]
struct Counters {
    by_key: HashMap<String, (u64, Instant)>,
    hits: u64,
}

/// Process-local counters for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    counters: Mutex<Counters>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<u64, CounterStoreError> {
        let now = Instant::now();
        let mut counters = self.counters.lock().await;
        counters.hits += 1;
        if counters.hits % SWEEP_EVERY == 0 {
            counters.by_key.retain(|_, (_, expires)| *expires > now);
        }

        let entry = counters.by_key.entry(key.to_string()).or_insert((0, now));
        if entry.1 <= now {
            entry.0 = 0;
        }
        entry.0 += 1;
        entry.1 = now + window;
        Ok(entry.0)
    }
}
