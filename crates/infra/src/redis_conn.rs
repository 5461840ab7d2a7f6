//! Shared Redis connection handle.
//!
//! Built once at startup and passed to every Redis-backed component. Regular
//! commands share a multiplexed, auto-reconnecting [`ConnectionManager`]; blocking
//! commands (`BLPOP`) get their own connection so they never stall the others.

use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{Client, RedisResult};

#[derive(Clone)]
pub struct RedisHandle {
    client: Client,
    manager: ConnectionManager,
}

impl RedisHandle {
    pub async fn connect(url: &str) -> RedisResult<Self> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client.clone()).await?;
        tracing::info!(url = %redact(url), "connected to redis");
        Ok(Self { client, manager })
    }

    /// Shared connection for non-blocking commands.
    pub fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// A fresh connection reserved for blocking commands.
    pub async fn dedicated(&self) -> RedisResult<MultiplexedConnection> {
        self.client.get_multiplexed_async_connection().await
    }

    pub async fn ping(&self) -> RedisResult<()> {
        let mut conn = self.conn();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await.map(|_| ())
    }
}

impl std::fmt::Debug for RedisHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisHandle").finish_non_exhaustive()
    }
}

/// Strip credentials from a connection URL before logging it.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => format!("{}://***{}", &url[..scheme], &url[at..]),
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::redact;

    #[test]
    fn redacts_credentials() {
        assert_eq!(redact("redis://user:pw@host:6379/0"), "redis://***@host:6379/0");
        assert_eq!(redact("redis://localhost:6379"), "redis://localhost:6379");
    }
}
