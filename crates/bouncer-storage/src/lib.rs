//! Bouncer Storage - Decision cache backends.
//!
//! The decision cache is a TTL key-value store holding one remediation per
//! IP. Two interchangeable backends implement [`DecisionStore`]:
//!
//! - [`MemoryStore`] - process-local, for a single bouncer instance
//! - [`RedisStore`] - shared between every instance pointed at the same server
//!
//! Callers never assume single-process visibility: a write made by one
//! instance may be read by another when the backend is shared.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use bouncer_core::Remediation;
//! use bouncer_storage::{DecisionCache, MemoryStore};
//!
//! # tokio_test::block_on(async {
//! let cache = DecisionCache::new(Arc::new(MemoryStore::new()));
//! cache.remember("1.2.3.4", Remediation::Banned, Duration::from_secs(60)).await.unwrap();
//! assert_eq!(cache.lookup("1.2.3.4").await.unwrap(), Some(Remediation::Banned));
//! assert_eq!(cache.lookup("5.6.7.8").await.unwrap(), None);
//! # });
//! ```

mod cache;
pub mod error;
mod lease;
mod memory;
mod redis_store;
mod store;

pub use cache::DecisionCache;
pub use error::{Result, StorageError};
pub use lease::{RefreshLease, REFRESH_LEASE_KEY};
pub use memory::{MemoryStore, SWEEP_INTERVAL};
pub use redis_store::RedisStore;
pub use store::DecisionStore;
