//! Signed challenge cookie.
//!
//! Value layout: `base64(status:issued_at).base64(hmac)`, where the HMAC is
//! keyed with the provider secret and covers the client IP and the payload.
//! A cookie replayed from another address fails verification.

use std::time::Duration;

use axum::http::header::COOKIE;
use axum::http::HeaderMap;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::ChallengeError;

type HmacSha256 = Hmac<Sha256>;

/// Name of the challenge cookie.
pub const COOKIE_NAME: &str = "bouncer_challenge";

/// Where a client stands in the challenge flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    /// No valid cookie.
    Unchallenged,
    /// Served a challenge, not yet solved.
    Challenged,
    /// Solved a challenge within the grace period.
    Verified,
}

/// Status recorded in a cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieStatus {
    Challenged,
    Verified,
}

impl CookieStatus {
    fn as_str(self) -> &'static str {
        match self {
            CookieStatus::Challenged => "challenged",
            CookieStatus::Verified => "verified",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "challenged" => Some(CookieStatus::Challenged),
            "verified" => Some(CookieStatus::Verified),
            _ => None,
        }
    }
}

/// Issues and checks challenge cookies.
#[derive(Clone)]
pub struct CookieSigner {
    mac: HmacSha256,
}

impl std::fmt::Debug for CookieSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieSigner").finish_non_exhaustive()
    }
}

impl CookieSigner {
    pub fn new(secret: &[u8]) -> Result<Self, ChallengeError> {
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| ChallengeError::Config(format!("invalid signing key: {}", e)))?;
        Ok(Self { mac })
    }

    fn signature(&self, ip: &str, payload: &str) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(ip.as_bytes());
        mac.update(b"|");
        mac.update(payload.as_bytes());
        mac
    }

    /// Cookie value for `ip` with `status`, issued at `issued_at` (unix seconds).
    pub fn issue(&self, ip: &str, status: CookieStatus, issued_at: i64) -> String {
        let payload = format!("{}:{}", status.as_str(), issued_at);
        let sig = self.signature(ip, &payload).finalize().into_bytes();
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload.as_bytes()),
            URL_SAFE_NO_PAD.encode(sig)
        )
    }

    /// Full `Set-Cookie` header value.
    pub fn set_cookie(&self, ip: &str, status: CookieStatus, issued_at: i64, max_age: Duration) -> String {
        format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            COOKIE_NAME,
            self.issue(ip, status, issued_at),
            max_age.as_secs()
        )
    }

    /// Classifies a cookie value presented by `ip` at `now`.
    ///
    /// Forged, foreign or malformed cookies count as absent. A verified
    /// cookie older than `grace` reverts to [`ChallengeState::Unchallenged`].
    pub fn inspect(&self, ip: &str, value: &str, now: i64, grace: Duration) -> ChallengeState {
        let Some((status, issued_at)) = self.verify(ip, value) else {
            return ChallengeState::Unchallenged;
        };
        let age = now.saturating_sub(issued_at);
        if age < 0 || age as u64 >= grace.as_secs() {
            return ChallengeState::Unchallenged;
        }
        match status {
            CookieStatus::Challenged => ChallengeState::Challenged,
            CookieStatus::Verified => ChallengeState::Verified,
        }
    }

    fn verify(&self, ip: &str, value: &str) -> Option<(CookieStatus, i64)> {
        let (payload_b64, sig_b64) = value.split_once('.')?;
        let payload = String::from_utf8(URL_SAFE_NO_PAD.decode(payload_b64).ok()?).ok()?;
        let sig = URL_SAFE_NO_PAD.decode(sig_b64).ok()?;
        self.signature(ip, &payload).verify_slice(&sig).ok()?;

        let (status, issued_at) = payload.split_once(':')?;
        Some((CookieStatus::parse(status)?, issued_at.parse().ok()?))
    }
}

/// Value of the challenge cookie in the request headers, if any.
pub fn find_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|line| line.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == COOKIE_NAME)
        .map(|(_, value)| value)
}
