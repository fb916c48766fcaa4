//! Bouncer Core - Decision model, trust resolution and configuration.
//!
//! This crate holds the pieces of the bouncer that do not touch the network:
//!
//! - [`decision`] - wire types published by the decision source and the
//!   remediation values kept in the decision cache
//! - [`duration`] - parser for the signed duration strings carried by decisions
//! - [`trust`] - resolution of the client address through forwarding proxies
//! - [`config`] - configuration file schema, secret resolution and validation
//!
//! ## Request flow
//!
//! ```text
//! Peer Address → TrustResolver → Trusted Client? ── Yes ──▶ Pass
//!                                      │
//!                                      No
//!                                      ▼
//!                         Decision Cache / Sync Engine
//!                                      │
//!                                      ▼
//!                         Remediation (none | ban | captcha)
//! ```

pub mod config;
pub mod decision;
pub mod duration;
pub mod trust;

pub use config::{
    CaptchaConfig, CaptchaProvider, CapiConfig, Config, ConfigError, FallbackRemediation,
    ForwardedHeadersConfig, LapiConfig, RedisConfig, ServerSettings, SyncMode,
};
pub use decision::{
    Decision, DecisionType, LoginRequest, LoginResponse, Remediation, StreamUpdate,
};
pub use duration::{parse_decision_duration, DecisionDuration, DurationError};
pub use trust::{ClientIdentity, IpChecker, TrustError, TrustResolver};
