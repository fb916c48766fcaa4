//! Bouncer Proxy - Admission control on the request path.
//!
//! Every inbound request is resolved to a client address, evaluated against
//! the decision cache and sync engine, and dispatched:
//!
//! ```text
//! Request → TrustResolver → Trusted? ── Yes ──▶ Forward
//!                              │ No
//!                              ▼
//!                     Cache / LiveLookup / Health
//!                              │
//!            ┌─────────────────┼─────────────────┐
//!            │ none            │ captcha         │ ban / deny / error
//!            ▼                 ▼                 ▼
//!         Forward      Verified cookie?         403
//!                       │ Yes      │ No
//!                       ▼          ▼
//!                    Forward   Challenge page
//! ```

pub mod challenge;
pub mod dispatcher;
mod error;
mod middleware;
mod response;
mod state;

pub use challenge::{ChallengeService, ChallengeState};
pub use dispatcher::{dispatch, Action};
pub use error::{ChallengeError, ProxyError, Result};
pub use middleware::bouncer_middleware;
pub use response::{forbidden, REMEDIATION_HEADER};
pub use state::{BouncerState, DenyReason, Evaluation};
