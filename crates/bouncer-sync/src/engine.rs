//! Sync engine: per-request lookups and background refresh cycles.

use std::sync::Arc;
use std::time::Duration;

use bouncer_core::{parse_decision_duration, Config, Decision, DecisionType, Remediation, SyncMode};
use bouncer_storage::{DecisionCache, RefreshLease};

use crate::client::HttpDecisionSource;
use crate::context::SyncContext;
use crate::error::Result;
use crate::source::DecisionSource;
use crate::ticker::{self, TickerHandle};

/// Answer of a per-request lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveVerdict {
    /// The source has no decision for the IP.
    Clear,
    /// The source has at least one decision; the current request is denied.
    Deny {
        decision: Decision,
        remediation: Remediation,
    },
}

/// Result of one refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The refresh lease was held; nothing fetched.
    Skipped,
    Applied {
        added: usize,
        deleted: usize,
        skipped: usize,
        purged: usize,
    },
}

/// Keeps the decision cache in sync with a [`DecisionSource`].
#[derive(Debug)]
pub struct SyncEngine {
    mode: SyncMode,
    source: Arc<dyn DecisionSource>,
    cache: DecisionCache,
    lease: RefreshLease,
    context: SyncContext,
    update_interval: Duration,
    default_decision_ttl: Duration,
}

impl SyncEngine {
    pub fn new(
        mode: SyncMode,
        source: Arc<dyn DecisionSource>,
        cache: DecisionCache,
        update_interval: Duration,
        default_decision_ttl: Duration,
    ) -> Self {
        let lease = cache.refresh_lease();
        Self {
            mode,
            source,
            cache,
            lease,
            context: SyncContext::new(),
            update_interval,
            default_decision_ttl,
        }
    }

    /// Builds an engine talking HTTP to the configured decision API.
    pub fn from_config(config: &Config, cache: DecisionCache) -> Result<Self> {
        let source = HttpDecisionSource::from_config(config)?;
        tracing::debug!(source = ?source, mode = config.sync_mode().as_str(), "Decision source configured");
        Ok(Self::new(
            config.sync_mode(),
            Arc::new(source),
            cache,
            config.update_interval(),
            config.default_decision_ttl(),
        ))
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn cache(&self) -> &DecisionCache {
        &self.cache
    }

    pub fn context(&self) -> &SyncContext {
        &self.context
    }

    #[inline]
    pub fn is_healthy(&self) -> bool {
        self.context.is_healthy()
    }

    /// Asks the decision source about `ip` for the current request.
    ///
    /// In live mode the answer is cached for later requests: an empty answer
    /// as [`Remediation::None`] for the default TTL, otherwise the chosen
    /// decision's remediation for its duration capped at the default TTL.
    /// Any decision denies the current request, whatever it caches.
    pub async fn live_lookup(&self, ip: &str) -> Result<LiveVerdict> {
        let decisions = self.source.decisions_for_ip(ip).await?;
        let caching = self.mode == SyncMode::LiveLookup;

        let Some(decision) = pick_decision(&decisions) else {
            if caching {
                self.cache
                    .remember(ip, Remediation::None, self.default_decision_ttl)
                    .await?;
            }
            tracing::debug!(ip = %ip, "No active decision");
            return Ok(LiveVerdict::Clear);
        };

        let remediation = decision.remediation();
        if caching {
            let duration = parse_decision_duration(&decision.duration)?;
            match duration.ttl_capped(self.default_decision_ttl) {
                Some(ttl) => self.cache.remember(ip, remediation, ttl).await?,
                None => tracing::debug!(ip = %ip, duration = %decision.duration, "Decision about to expire, not cached"),
            }
        }

        tracing::debug!(
            ip = %ip,
            remediation = %remediation,
            scenario = %decision.scenario,
            "Active decision found"
        );
        Ok(LiveVerdict::Deny {
            decision: decision.clone(),
            remediation,
        })
    }

    /// Runs one refresh cycle and folds its outcome into the health flag.
    ///
    /// A cycle skipped because the lease is held counts as healthy: the
    /// holder, possibly another instance sharing the store, is refreshing.
    pub async fn refresh(&self) -> Result<CycleOutcome> {
        let result = self.run_cycle().await;
        match &result {
            Ok(CycleOutcome::Skipped) => {
                self.context.set_healthy(true);
                tracing::debug!("Refresh lease held, cycle skipped");
            }
            Ok(CycleOutcome::Applied {
                added,
                deleted,
                skipped,
                purged,
            }) => {
                self.context.set_healthy(true);
                tracing::debug!(added, deleted, skipped, purged, "Refresh cycle applied");
            }
            Err(e) => {
                self.context.set_healthy(false);
                tracing::warn!(error = %e, kind = ?e.kind(), "Refresh cycle failed");
            }
        }
        result
    }

    async fn run_cycle(&self) -> Result<CycleOutcome> {
        if !self.lease.try_acquire(self.lease_ttl()).await? {
            return Ok(CycleOutcome::Skipped);
        }

        let startup = self.context.wants_full_snapshot();
        let update = self.source.stream(startup).await?;
        tracing::debug!(
            startup,
            new = update.new.len(),
            deleted = update.deleted.len(),
            "Decision stream received"
        );

        let mut added = 0;
        let mut skipped = 0;
        for decision in &update.new {
            let ttl = match parse_decision_duration(&decision.duration) {
                Ok(duration) => duration.ttl(),
                Err(e) => {
                    tracing::warn!(value = %decision.value, error = %e, "Skipping decision");
                    None
                }
            };
            let Some(ttl) = ttl else {
                skipped += 1;
                continue;
            };
            self.cache
                .remember(&decision.value, decision.remediation(), ttl)
                .await?;
            added += 1;
        }

        // Applied after `new` so a value in both lists ends up removed.
        for decision in &update.deleted {
            self.cache.forget(&decision.value).await?;
        }

        let purged = self.cache.purge_expired().await?;
        Ok(CycleOutcome::Applied {
            added,
            deleted: update.deleted.len(),
            skipped,
            purged,
        })
    }

    fn lease_ttl(&self) -> Duration {
        self.update_interval
            .saturating_sub(Duration::from_secs(1))
            .max(Duration::from_secs(1))
    }

    /// Starts background syncing for stream and central modes.
    ///
    /// Logs in when the source needs it (a failure is returned), runs the
    /// first cycle inline, then spawns the ticker. Only the first call on an
    /// engine does anything; later calls and per-request modes return
    /// `Ok(None)`.
    pub async fn start(self: &Arc<Self>) -> Result<Option<TickerHandle>> {
        if !self.mode.is_background() {
            return Ok(None);
        }
        if !self.context.claim_ticker() {
            tracing::debug!("Refresh ticker already running");
            return Ok(None);
        }

        if self.source.requires_login() {
            if let Err(e) = self.source.login().await {
                self.context.release_ticker();
                return Err(e);
            }
        }

        let _ = self.refresh().await;
        self.context.finish_startup();

        tracing::info!(
            mode = self.mode.as_str(),
            healthy = self.is_healthy(),
            "Initial decision sync finished"
        );
        Ok(Some(ticker::spawn(Arc::clone(self), self.update_interval)))
    }
}

/// First ban decision, else the first decision.
fn pick_decision(decisions: &[Decision]) -> Option<&Decision> {
    decisions
        .iter()
        .find(|d| d.decision_type() == DecisionType::Ban)
        .or_else(|| decisions.first())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{decision, FakeDecisionSource, StreamReply};
    use crate::SyncError;
    use bouncer_core::StreamUpdate;
    use bouncer_storage::MemoryStore;

    const INTERVAL: Duration = Duration::from_secs(60);
    const DEFAULT_TTL: Duration = Duration::from_secs(60);

    fn engine(mode: SyncMode, source: Arc<FakeDecisionSource>) -> Arc<SyncEngine> {
        let cache = DecisionCache::new(Arc::new(MemoryStore::new()));
        Arc::new(SyncEngine::new(mode, source, cache, INTERVAL, DEFAULT_TTL))
    }

    fn update(new: Vec<Decision>, deleted: Vec<Decision>) -> StreamReply {
        StreamReply::Update(StreamUpdate { new, deleted })
    }

    #[tokio::test(start_paused = true)]
    async fn live_empty_answer_caches_none() {
        let source = Arc::new(FakeDecisionSource::new());
        let engine = engine(SyncMode::LiveLookup, source.clone());

        assert_eq!(engine.live_lookup("1.1.1.1").await.unwrap(), LiveVerdict::Clear);
        assert_eq!(
            engine.cache().lookup("1.1.1.1").await.unwrap(),
            Some(Remediation::None)
        );

        tokio::time::advance(DEFAULT_TTL + Duration::from_millis(1)).await;
        assert_eq!(engine.cache().lookup("1.1.1.1").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn live_ban_is_capped_at_default_ttl() {
        let source = Arc::new(FakeDecisionSource::new());
        source.set_decisions("2.2.2.2", vec![decision("2.2.2.2", "ban", "4h")]);
        let engine = engine(SyncMode::LiveLookup, source.clone());

        let verdict = engine.live_lookup("2.2.2.2").await.unwrap();
        assert!(matches!(
            verdict,
            LiveVerdict::Deny {
                remediation: Remediation::Banned,
                ..
            }
        ));
        assert_eq!(
            engine.cache().lookup("2.2.2.2").await.unwrap(),
            Some(Remediation::Banned)
        );

        tokio::time::advance(DEFAULT_TTL - Duration::from_secs(1)).await;
        assert!(engine.cache().lookup("2.2.2.2").await.unwrap().is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(engine.cache().lookup("2.2.2.2").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn live_mode_cache_does_not_grow_with_expired_clients() {
        let source = Arc::new(FakeDecisionSource::new());
        let store = Arc::new(MemoryStore::new());
        let engine = SyncEngine::new(
            SyncMode::LiveLookup,
            source,
            DecisionCache::new(store.clone()),
            INTERVAL,
            DEFAULT_TTL,
        );

        for i in 0..500u32 {
            engine.live_lookup(&format!("2001:db8::{:x}", i)).await.unwrap();
        }
        assert_eq!(store.len(), 500);

        tokio::time::advance(Duration::from_secs(3600)).await;
        for i in 0..10u32 {
            engine.live_lookup(&format!("2001:db8:1::{:x}", i)).await.unwrap();
        }
        assert_eq!(store.len(), 10);
    }

    #[tokio::test]
    async fn live_prefers_ban_over_earlier_captcha() {
        let source = Arc::new(FakeDecisionSource::new());
        source.set_decisions(
            "3.3.3.3",
            vec![
                decision("3.3.3.3", "captcha", "10m"),
                decision("3.3.3.3", "ban", "10m"),
            ],
        );
        let engine = engine(SyncMode::LiveLookup, source);

        let LiveVerdict::Deny { remediation, .. } = engine.live_lookup("3.3.3.3").await.unwrap()
        else {
            panic!("expected deny");
        };
        assert_eq!(remediation, Remediation::Banned);
    }

    #[tokio::test]
    async fn live_captcha_only_still_denies_current_request() {
        let source = Arc::new(FakeDecisionSource::new());
        source.set_decisions("4.4.4.4", vec![decision("4.4.4.4", "captcha", "10m")]);
        let engine = engine(SyncMode::LiveLookup, source);

        let verdict = engine.live_lookup("4.4.4.4").await.unwrap();
        assert!(matches!(verdict, LiveVerdict::Deny { .. }));
        assert_eq!(
            engine.cache().lookup("4.4.4.4").await.unwrap(),
            Some(Remediation::Captcha)
        );
    }

    #[tokio::test]
    async fn live_bad_duration_is_an_error() {
        let source = Arc::new(FakeDecisionSource::new());
        source.set_decisions("5.5.5.5", vec![decision("5.5.5.5", "ban", "forever")]);
        let engine = engine(SyncMode::LiveLookup, source);

        let err = engine.live_lookup("5.5.5.5").await.unwrap_err();
        assert!(matches!(err, SyncError::Duration(_)));
        assert_eq!(engine.cache().lookup("5.5.5.5").await.unwrap(), None);
    }

    #[tokio::test]
    async fn no_cache_mode_never_writes() {
        let source = Arc::new(FakeDecisionSource::new());
        source.set_decisions("6.6.6.6", vec![decision("6.6.6.6", "ban", "1h")]);
        let engine = engine(SyncMode::NoCache, source.clone());

        assert!(matches!(
            engine.live_lookup("6.6.6.6").await.unwrap(),
            LiveVerdict::Deny { .. }
        ));
        assert_eq!(engine.live_lookup("7.7.7.7").await.unwrap(), LiveVerdict::Clear);
        assert_eq!(engine.cache().lookup("6.6.6.6").await.unwrap(), None);
        assert_eq!(engine.cache().lookup("7.7.7.7").await.unwrap(), None);
        assert_eq!(source.query_calls(), 2);
    }

    #[tokio::test]
    async fn cycle_applies_new_then_deleted() {
        let source = Arc::new(FakeDecisionSource::new());
        source.push_stream(update(
            vec![
                decision("10.0.0.1", "ban", "1h"),
                decision("10.0.0.2", "captcha", "1h"),
            ],
            vec![decision("10.0.0.1", "ban", "1h")],
        ));
        let engine = engine(SyncMode::Streaming, source);

        let outcome = engine.refresh().await.unwrap();
        assert!(matches!(
            outcome,
            CycleOutcome::Applied {
                added: 2,
                deleted: 1,
                ..
            }
        ));
        assert_eq!(engine.cache().lookup("10.0.0.1").await.unwrap(), None);
        assert_eq!(
            engine.cache().lookup("10.0.0.2").await.unwrap(),
            Some(Remediation::Captcha)
        );
    }

    #[tokio::test]
    async fn cycle_skips_unparseable_durations() {
        let source = Arc::new(FakeDecisionSource::new());
        source.push_stream(update(
            vec![
                decision("10.0.0.3", "ban", "soon"),
                decision("10.0.0.4", "ban", "-5s"),
                decision("10.0.0.5", "ban", "2h"),
            ],
            Vec::new(),
        ));
        let engine = engine(SyncMode::Streaming, source);

        let outcome = engine.refresh().await.unwrap();
        assert!(matches!(
            outcome,
            CycleOutcome::Applied {
                added: 1,
                skipped: 2,
                ..
            }
        ));
        assert!(engine.is_healthy());
        assert_eq!(
            engine.cache().lookup("10.0.0.5").await.unwrap(),
            Some(Remediation::Banned)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn lease_deduplicates_cycles_within_interval() {
        let source = Arc::new(FakeDecisionSource::new());
        let engine = engine(SyncMode::Streaming, source.clone());

        engine.refresh().await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(engine.refresh().await.unwrap(), CycleOutcome::Skipped);
        assert_eq!(source.stream_calls(), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        engine.refresh().await.unwrap();
        assert_eq!(source.stream_calls(), 2);
    }

    #[tokio::test]
    async fn failure_marks_unhealthy_and_requests_snapshot() {
        let source = Arc::new(FakeDecisionSource::new());
        source.push_stream(StreamReply::Unavailable);
        let engine = engine(SyncMode::Streaming, source.clone());
        engine.context().finish_startup();

        assert!(engine.refresh().await.is_err());
        assert!(!engine.is_healthy());

        engine.cache().refresh_lease().release().await.unwrap();
        engine.refresh().await.unwrap();
        assert!(engine.is_healthy());
        assert_eq!(source.startup_hints(), vec![false, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn losing_the_lease_to_a_peer_restores_health() {
        let store = Arc::new(MemoryStore::new());
        let shared = |source: Arc<FakeDecisionSource>| {
            SyncEngine::new(
                SyncMode::Streaming,
                source,
                DecisionCache::new(store.clone()),
                INTERVAL,
                DEFAULT_TTL,
            )
        };
        let source_a = Arc::new(FakeDecisionSource::new());
        let source_b = Arc::new(FakeDecisionSource::new());
        let a = shared(source_a.clone());
        let b = shared(source_b.clone());

        source_b.push_stream(StreamReply::Unavailable);
        assert!(b.refresh().await.is_err());
        assert!(!b.is_healthy());
        b.cache().refresh_lease().release().await.unwrap();

        for _ in 0..5 {
            a.refresh().await.unwrap();
            assert_eq!(b.refresh().await.unwrap(), CycleOutcome::Skipped);
            tokio::time::advance(INTERVAL).await;
        }
        assert!(a.is_healthy());
        assert!(b.is_healthy());
        assert_eq!(source_a.stream_calls(), 5);
        assert_eq!(source_b.stream_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_runs_first_cycle_then_ticks() {
        let source = Arc::new(FakeDecisionSource::new());
        let engine = engine(SyncMode::Streaming, source.clone());

        let handle = engine.start().await.unwrap().expect("ticker");
        assert_eq!(source.stream_calls(), 1);
        assert!(!engine.context().is_startup());

        // Second start is a no-op.
        assert!(engine.start().await.unwrap().is_none());

        tokio::time::sleep(INTERVAL + Duration::from_millis(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(source.stream_calls(), 2);
        assert_eq!(source.startup_hints(), vec![true, false]);

        handle.stop().await;
        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(source.stream_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_ticks_fetch_once() {
        // Cycles outlive the interval; the lease keeps ticks from piling up.
        let source = Arc::new(
            FakeDecisionSource::new().with_stream_delay(Duration::from_secs(90)),
        );
        let cache = DecisionCache::new(Arc::new(MemoryStore::new()));
        let engine = Arc::new(SyncEngine::new(
            SyncMode::Streaming,
            source.clone(),
            cache,
            Duration::from_secs(10),
            DEFAULT_TTL,
        ));

        let a = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.refresh().await }
        });
        let b = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                engine.refresh().await
            }
        });

        assert!(matches!(
            b.await.unwrap().unwrap(),
            CycleOutcome::Skipped
        ));
        a.await.unwrap().unwrap();
        assert_eq!(source.stream_calls(), 1);
    }

    #[tokio::test]
    async fn central_start_logs_in_first() {
        let source = Arc::new(FakeDecisionSource::central());
        let engine = engine(SyncMode::CentralPoll, source.clone());

        let handle = engine.start().await.unwrap().expect("ticker");
        assert_eq!(source.login_calls(), 1);
        assert_eq!(source.stream_calls(), 1);
        handle.stop().await;
    }

    #[tokio::test]
    async fn central_login_failure_is_fatal_to_start() {
        let source = Arc::new(FakeDecisionSource::central());
        source.fail_logins(true);
        let engine = engine(SyncMode::CentralPoll, source.clone());

        let err = engine.start().await.unwrap_err();
        assert!(matches!(err, SyncError::Auth(_)));
        assert_eq!(source.stream_calls(), 0);
        assert!(!engine.context().ticker_started());
    }

    #[tokio::test]
    async fn per_request_modes_do_not_start_a_ticker() {
        for mode in [SyncMode::LiveLookup, SyncMode::NoCache, SyncMode::Disabled] {
            let source = Arc::new(FakeDecisionSource::new());
            let engine = engine(mode, source.clone());
            assert!(engine.start().await.unwrap().is_none());
            assert_eq!(source.stream_calls(), 0);
        }
    }
}
