//! Shared request-path state and the per-request evaluator.

use std::net::IpAddr;
use std::sync::Arc;

use bouncer_core::{Config, FallbackRemediation, Remediation, SyncMode, TrustResolver};
use bouncer_sync::{LiveVerdict, SyncEngine};

use crate::challenge::ChallengeService;
use crate::error::Result;

/// Why a request is denied before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The decision source returned a decision for this request.
    ActiveDecision,
    /// Cache miss while the background sync is failing.
    SourceUnhealthy,
}

/// Outcome of evaluating a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// Skip remediation entirely (bouncer disabled or trusted client).
    Bypass,
    /// Dispatch the verdict for `ip`.
    Remediate { ip: IpAddr, remediation: Remediation },
    Deny { ip: IpAddr, reason: DenyReason },
}

/// State shared by every request.
#[derive(Debug, Clone)]
pub struct BouncerState {
    pub trust: Arc<TrustResolver>,
    pub engine: Arc<SyncEngine>,
    /// Present when a challenge provider is configured.
    pub challenge: Option<Arc<ChallengeService>>,
    pub fallback: FallbackRemediation,
}

impl BouncerState {
    pub fn new(
        trust: TrustResolver,
        engine: Arc<SyncEngine>,
        challenge: Option<ChallengeService>,
        fallback: FallbackRemediation,
    ) -> Self {
        Self {
            trust: Arc::new(trust),
            engine,
            challenge: challenge.map(Arc::new),
            fallback,
        }
    }

    /// Builds the request-path state for a prepared configuration.
    pub fn from_config(
        config: &Config,
        engine: Arc<SyncEngine>,
        challenge: Option<ChallengeService>,
    ) -> std::result::Result<Self, bouncer_core::ConfigError> {
        Ok(Self::new(
            config.trust_resolver()?,
            engine,
            challenge,
            config.captcha.fallback_remediation,
        ))
    }

    pub fn mode(&self) -> SyncMode {
        self.engine.mode()
    }

    /// Decides what to do with a request from `peer`.
    ///
    /// `forwarded` is the forwarding header, consulted only when the peer is
    /// a trusted forwarder. Errors mean the request could not be evaluated.
    pub async fn evaluate(&self, peer: IpAddr, forwarded: Option<&str>) -> Result<Evaluation> {
        let mode = self.mode();
        if mode == SyncMode::Disabled {
            return Ok(Evaluation::Bypass);
        }

        let identity = self.trust.resolve(peer, forwarded)?;
        if identity.trusted {
            tracing::debug!(ip = %identity.ip, "Trusted client, skipping remediation");
            return Ok(Evaluation::Bypass);
        }

        let ip = identity.ip;
        let key = ip.to_string();

        if mode != SyncMode::NoCache {
            if let Some(remediation) = self.engine.cache().lookup(&key).await? {
                tracing::debug!(ip = %key, remediation = %remediation, "Cached verdict");
                return Ok(Evaluation::Remediate { ip, remediation });
            }
        }

        let evaluation = match mode {
            SyncMode::LiveLookup | SyncMode::NoCache => {
                match self.engine.live_lookup(&key).await? {
                    LiveVerdict::Clear => Evaluation::Remediate {
                        ip,
                        remediation: Remediation::None,
                    },
                    LiveVerdict::Deny { .. } => Evaluation::Deny {
                        ip,
                        reason: DenyReason::ActiveDecision,
                    },
                }
            }
            SyncMode::Streaming | SyncMode::CentralPoll => {
                if self.engine.is_healthy() {
                    Evaluation::Remediate {
                        ip,
                        remediation: Remediation::None,
                    }
                } else {
                    Evaluation::Deny {
                        ip,
                        reason: DenyReason::SourceUnhealthy,
                    }
                }
            }
            SyncMode::Disabled => Evaluation::Bypass,
        };
        Ok(evaluation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bouncer_storage::{DecisionCache, MemoryStore};
    use bouncer_sync::testing::{decision, FakeDecisionSource};

    fn state(mode: SyncMode, source: Arc<FakeDecisionSource>) -> BouncerState {
        let engine = Arc::new(SyncEngine::new(
            mode,
            source,
            DecisionCache::new(Arc::new(MemoryStore::new())),
            Duration::from_secs(60),
            Duration::from_secs(60),
        ));
        let trust = TrustResolver::new(&["192.0.2.0/24"], &["198.51.100.10"], "").unwrap();
        BouncerState::new(trust, engine, None, FallbackRemediation::Ban)
    }

    fn ip(raw: &str) -> IpAddr {
        raw.parse().unwrap()
    }

    #[tokio::test]
    async fn live_decision_denies_with_reason() {
        let source = Arc::new(FakeDecisionSource::new());
        source.set_decisions("203.0.113.5", vec![decision("203.0.113.5", "captcha", "1h")]);
        let state = state(SyncMode::LiveLookup, source);

        assert_eq!(
            state.evaluate(ip("203.0.113.5"), None).await.unwrap(),
            Evaluation::Deny {
                ip: ip("203.0.113.5"),
                reason: DenyReason::ActiveDecision
            }
        );
        // Later requests dispatch the cached captcha verdict.
        assert_eq!(
            state.evaluate(ip("203.0.113.5"), None).await.unwrap(),
            Evaluation::Remediate {
                ip: ip("203.0.113.5"),
                remediation: Remediation::Captcha
            }
        );
    }

    #[tokio::test]
    async fn unhealthy_stream_denies_misses() {
        let state = state(SyncMode::Streaming, Arc::new(FakeDecisionSource::new()));
        state.engine.context().set_healthy(false);
        assert_eq!(
            state.evaluate(ip("203.0.113.6"), None).await.unwrap(),
            Evaluation::Deny {
                ip: ip("203.0.113.6"),
                reason: DenyReason::SourceUnhealthy
            }
        );
    }

    #[tokio::test]
    async fn trusted_client_behind_forwarder_bypasses() {
        let state = state(SyncMode::Streaming, Arc::new(FakeDecisionSource::new()));
        assert_eq!(
            state
                .evaluate(ip("192.0.2.1"), Some("198.51.100.10"))
                .await
                .unwrap(),
            Evaluation::Bypass
        );
    }

    #[tokio::test]
    async fn malformed_forwarding_header_is_an_error() {
        let state = state(SyncMode::Streaming, Arc::new(FakeDecisionSource::new()));
        let err = state
            .evaluate(ip("192.0.2.1"), Some("not-an-ip"))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::ProxyError::Trust(_)));
    }
}
