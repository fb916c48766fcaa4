//! Typed view of the decision store.

use std::sync::Arc;
use std::time::Duration;

use bouncer_core::Remediation;

use crate::error::Result;
use crate::lease::RefreshLease;
use crate::store::DecisionStore;

/// Remediation verdicts keyed by IP.
///
/// A miss (`Ok(None)`) means "no cached opinion"; `Ok(Some(Remediation::None))`
/// means "confirmed not banned until expiry". The two are never conflated.
#[derive(Debug, Clone)]
pub struct DecisionCache {
    store: Arc<dyn DecisionStore>,
}

impl DecisionCache {
    pub fn new(store: Arc<dyn DecisionStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn DecisionStore> {
        &self.store
    }

    /// Looks up the cached verdict for `ip`.
    ///
    /// Misses return `Ok(None)`; backend failures are propagated.
    pub async fn lookup(&self, ip: &str) -> Result<Option<Remediation>> {
        match self.store.get(ip).await {
            Ok(value) => Ok(Some(Remediation::from_cache_value(&value))),
            Err(e) if e.is_miss() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Caches a verdict for `ip`.
    pub async fn remember(&self, ip: &str, remediation: Remediation, ttl: Duration) -> Result<()> {
        self.store
            .set(ip, remediation.as_cache_value(), ttl)
            .await
    }

    /// Drops the cached verdict for `ip`.
    pub async fn forget(&self, ip: &str) -> Result<()> {
        self.store.delete(ip).await
    }

    /// Reclaims expired entries.
    pub async fn purge_expired(&self) -> Result<usize> {
        self.store.purge_expired().await
    }

    /// Refresh lease sharing this cache's store.
    pub fn refresh_lease(&self) -> RefreshLease {
        RefreshLease::new(self.store.clone())
    }
}
