//! Process-wide sync state shared by the request path and the ticker.

use std::sync::atomic::{AtomicBool, Ordering};

/// Flags describing the sync engine's view of the decision source.
///
/// Writes are single atomic stores. Readers tolerate stale values: the
/// health flag only biases the allow/deny default for unresolved requests.
#[derive(Debug)]
pub struct SyncContext {
    /// Last completed refresh cycle succeeded.
    healthy: AtomicBool,
    /// No refresh cycle has completed yet.
    startup: AtomicBool,
    /// The background ticker has been started for this engine.
    ticker_started: AtomicBool,
}

impl Default for SyncContext {
    fn default() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            startup: AtomicBool::new(true),
            ticker_started: AtomicBool::new(false),
        }
    }
}

impl SyncContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn set_healthy(&self, healthy: bool) {
        let old = self.healthy.swap(healthy, Ordering::SeqCst);
        if old != healthy {
            if healthy {
                tracing::info!("Decision source healthy again");
            } else {
                tracing::warn!("Decision source unhealthy, unresolved requests will be denied");
            }
        }
    }

    #[inline]
    pub fn is_startup(&self) -> bool {
        self.startup.load(Ordering::Relaxed)
    }

    /// Marks the first refresh cycle as completed.
    pub fn finish_startup(&self) {
        self.startup.store(false, Ordering::Relaxed);
    }

    /// The next stream request should ask for a full snapshot.
    pub fn wants_full_snapshot(&self) -> bool {
        self.is_startup() || !self.is_healthy()
    }

    /// Claims the right to start the ticker. Only the first caller wins.
    pub fn claim_ticker(&self) -> bool {
        self.ticker_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Gives the ticker claim back after a failed start.
    pub fn release_ticker(&self) {
        self.ticker_started.store(false, Ordering::Release);
    }

    pub fn ticker_started(&self) -> bool {
        self.ticker_started.load(Ordering::Acquire)
    }
}
