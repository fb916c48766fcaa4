//! The decision source seam.

use std::fmt;

use async_trait::async_trait;
use bouncer_core::{Decision, StreamUpdate};

use crate::error::Result;

/// Authority publishing ban and captcha decisions.
#[async_trait]
pub trait DecisionSource: Send + Sync + fmt::Debug {
    /// Active decisions for a single IP. An empty list means "not banned".
    async fn decisions_for_ip(&self, ip: &str) -> Result<Vec<Decision>>;

    /// Decision delta since the last call, or a full snapshot when `startup`.
    async fn stream(&self, startup: bool) -> Result<StreamUpdate>;

    /// Exchanges credentials for a fresh token.
    ///
    /// Sources authenticated by a static key have nothing to do.
    async fn login(&self) -> Result<()>;

    /// Whether [`DecisionSource::login`] must succeed before other calls.
    fn requires_login(&self) -> bool;
}
