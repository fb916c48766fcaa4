//! Shared decision store backed by Redis.
//!
//! Every bouncer instance pointed at the same server sees the same
//! decisions and the same refresh lease, so the lease doubles as
//! cross-instance exclusion for stream refreshes.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::{Result, StorageError};
use crate::store::DecisionStore;

/// Redis-backed TTL store.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    endpoint: String,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl RedisStore {
    /// Connects to the server at `url` (`redis://[:password@]host[:port]/db`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let endpoint = redact(url);
        let conn = ConnectionManager::new(client).await?;
        tracing::info!(endpoint = %endpoint, "Connected to shared decision cache");
        Ok(Self { conn, endpoint })
    }
}

/// Hides the password part of a connection URL.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

#[async_trait]
impl DecisionStore for RedisStore {
    async fn get(&self, key: &str) -> Result<String> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        value.ok_or(StorageError::CacheMiss)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        if ttl.as_secs() == 0 {
            let _: () = conn.del(key).await?;
            return Ok(());
        }
        let _: () = conn.set_ex(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
