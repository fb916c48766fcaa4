//! Bouncer Sync - Keeps the decision cache consistent with the decision source.
//!
//! Four strategies are selected once at startup and never switched:
//!
//! | Mode | Request path | Background |
//! |------|--------------|------------|
//! | `none` | query every request, no cache | - |
//! | `live` | query on cache miss, cache the answer | - |
//! | `stream` | cache only | local stream delta every tick |
//! | `alone` | cache only | central stream delta every tick, with login |
//!
//! ## Architecture
//!
//! ```text
//!   Ticker ──tick──▶ spawn(refresh) ──▶ RefreshLease held? ── yes ──▶ skip
//!                                              │ no
//!                                              ▼
//!                                   DecisionSource::stream(startup)
//!                                              │
//!                                  apply new, then deleted
//!                                              │
//!                                  SyncContext.healthy = ok?
//! ```
//!
//! The [`SyncEngine`] is shared (`Arc`) between the request path, which
//! reads its health flag and runs live lookups, and the background ticker.

mod client;
mod context;
mod engine;
pub mod error;
mod source;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
mod ticker;

pub use client::{Credentials, HttpDecisionSource};
pub use context::SyncContext;
pub use engine::{CycleOutcome, LiveVerdict, SyncEngine};
pub use error::{ErrorKind, Result, SyncError};
pub use source::DecisionSource;
pub use ticker::TickerHandle;
