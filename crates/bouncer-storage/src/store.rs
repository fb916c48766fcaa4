//! The storage contract every cache backend implements.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// TTL key-value store backing the decision cache.
///
/// Expired entries must behave exactly like absent ones: `get` returns
/// [`StorageError::CacheMiss`](crate::StorageError::CacheMiss) for both.
#[async_trait]
pub trait DecisionStore: Send + Sync + fmt::Debug {
    /// Reads a value, or `CacheMiss` when absent or expired.
    async fn get(&self, key: &str) -> Result<String>;

    /// Writes a value that expires after `ttl`. A zero TTL removes the key.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Removes a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Drops expired entries and returns how many were removed.
    ///
    /// Backends with native expiry have nothing to do.
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}
