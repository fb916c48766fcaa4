//! Refresh lease: best-effort dedup of stream refreshes.
//!
//! The lease is a single reserved key in the decision store. Holding it
//! means "a refresh is in flight or finished less than one tick ago". It is
//! read and then written, not compare-and-set, so two callers racing between
//! the read and the write may both acquire it. The worst case is one
//! duplicate fetch. With a shared backend the lease also spans instances.

use std::sync::Arc;
use std::time::Duration;

use bouncer_core::Remediation;

use crate::error::Result;
use crate::store::DecisionStore;

/// Reserved key holding the lease.
pub const REFRESH_LEASE_KEY: &str = "updated";

/// Best-effort refresh lease.
#[derive(Debug, Clone)]
pub struct RefreshLease {
    store: Arc<dyn DecisionStore>,
}

impl RefreshLease {
    pub fn new(store: Arc<dyn DecisionStore>) -> Self {
        Self { store }
    }

    /// Takes the lease for `ttl` unless someone holds it.
    ///
    /// Returns `Ok(false)` when the lease is held. Store failures other than
    /// a miss are propagated.
    pub async fn try_acquire(&self, ttl: Duration) -> Result<bool> {
        match self.store.get(REFRESH_LEASE_KEY).await {
            Ok(_) => Ok(false),
            Err(e) if e.is_miss() => {
                self.store
                    .set(REFRESH_LEASE_KEY, Remediation::None.as_cache_value(), ttl)
                    .await?;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Returns true while the lease is held.
    pub async fn is_held(&self) -> Result<bool> {
        match self.store.get(REFRESH_LEASE_KEY).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_miss() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Drops the lease early.
    pub async fn release(&self) -> Result<()> {
        self.store.delete(REFRESH_LEASE_KEY).await
    }
}
