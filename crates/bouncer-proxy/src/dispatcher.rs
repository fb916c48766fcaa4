//! Remediation dispatcher: maps a verdict to what happens to the request.

use bouncer_core::{FallbackRemediation, Remediation};

use crate::challenge::ChallengeService;

/// What the middleware does with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Answer 403.
    Block,
    /// Challenge unless the client holds a verified cookie or hits an exempt path.
    Challenge,
    /// Hand the request to the protected service.
    Pass,
}

/// Paths never challenged.
const CHALLENGE_EXEMPT_PATHS: &[&str] = &["/favicon.ico"];

/// Returns true when `path` skips the challenge.
pub fn is_challenge_exempt(path: &str) -> bool {
    CHALLENGE_EXEMPT_PATHS.contains(&path)
}

/// Maps `remediation` to an [`Action`].
///
/// A captcha verdict becomes a block when the provider is unusable and the
/// fallback is `ban`. Without any challenge service the provider counts as
/// unusable, and a `none` fallback lets the request through.
pub fn dispatch(
    remediation: Remediation,
    challenge: Option<&ChallengeService>,
    fallback: FallbackRemediation,
) -> Action {
    match remediation {
        Remediation::Banned => Action::Block,
        Remediation::None => Action::Pass,
        Remediation::Captcha => {
            let valid = challenge.is_some_and(|c| c.is_valid());
            match (valid, fallback, challenge.is_some()) {
                (true, _, _) => Action::Challenge,
                (false, FallbackRemediation::Ban, _) => Action::Block,
                (false, FallbackRemediation::None, true) => Action::Challenge,
                (false, FallbackRemediation::None, false) => Action::Pass,
            }
        }
    }
}
