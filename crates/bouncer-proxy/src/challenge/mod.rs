//! Challenge subsystem.
//!
//! Clients under a captcha verdict move through
//! `Unchallenged → Challenged → Verified`, tracked by a signed cookie. A
//! verified cookie lets the client through until the grace period ends.

mod cookie;
mod provider;
mod template;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bouncer_core::{CaptchaConfig, CaptchaProvider};

pub use cookie::{find_cookie, ChallengeState, CookieSigner, CookieStatus, COOKIE_NAME};
pub use provider::{ChallengeVerifier, SiteVerifier};
pub use template::ChallengeTemplate;

use crate::error::ChallengeError;

/// Largest challenge form body read.
const MAX_FORM_BYTES: usize = 64 * 1024;

/// Serves challenges and verifies their answers.
#[derive(Debug)]
pub struct ChallengeService {
    provider: CaptchaProvider,
    site_key: String,
    verifier: Arc<dyn ChallengeVerifier>,
    signer: CookieSigner,
    template: ChallengeTemplate,
    grace_period: Duration,
    /// Provider believed reachable.
    valid: AtomicBool,
}

impl ChallengeService {
    pub fn new(
        provider: CaptchaProvider,
        site_key: impl Into<String>,
        secret_key: &str,
        verifier: Arc<dyn ChallengeVerifier>,
        template: ChallengeTemplate,
        grace_period: Duration,
    ) -> Result<Self, ChallengeError> {
        let site_key = site_key.into();
        let valid = !site_key.is_empty() && !secret_key.is_empty();
        Ok(Self {
            provider,
            site_key,
            verifier,
            signer: CookieSigner::new(secret_key.as_bytes())?,
            template,
            grace_period,
            valid: AtomicBool::new(valid),
        })
    }

    /// Builds the service from configuration. `Ok(None)` when no provider is set.
    pub fn from_config(
        config: &CaptchaConfig,
        client: reqwest::Client,
    ) -> Result<Option<Self>, ChallengeError> {
        let Some(provider) = config.provider else {
            return Ok(None);
        };
        let site_key = config.site_key.clone().unwrap_or_default();
        let secret_key = config.secret_key.clone().unwrap_or_default();
        let template = match &config.template_file {
            Some(path) => ChallengeTemplate::from_file(path)?,
            None => ChallengeTemplate::default(),
        };
        let verifier = Arc::new(SiteVerifier::new(client, provider, secret_key.clone()));

        let service = Self::new(
            provider,
            site_key,
            &secret_key,
            verifier,
            template,
            config.grace_period(),
        )?;
        tracing::info!(
            provider = ?provider,
            grace_secs = config.grace_period_seconds,
            "Challenge provider configured"
        );
        Ok(Some(service))
    }

    pub fn provider(&self) -> CaptchaProvider {
        self.provider
    }

    /// Whether the provider is currently usable.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Relaxed)
    }

    fn set_valid(&self, valid: bool) {
        if self.valid.swap(valid, Ordering::Relaxed) != valid {
            if valid {
                tracing::info!(provider = ?self.provider, "Challenge provider reachable again");
            } else {
                tracing::warn!(provider = ?self.provider, "Challenge provider marked invalid");
            }
        }
    }

    /// State of the client `ip` according to its cookie.
    pub fn check_cookie(&self, headers: &HeaderMap, ip: &str) -> ChallengeState {
        match find_cookie(headers) {
            Some(value) => self.signer.inspect(ip, value, now(), self.grace_period),
            None => ChallengeState::Unchallenged,
        }
    }

    /// Answers a challenged request.
    ///
    /// A POST carrying the provider's response field is verified; success
    /// sets the verified cookie and redirects to the same URI. Everything
    /// else gets the challenge page.
    pub async fn respond(&self, request: Request, ip: &str) -> Response {
        if request.method() == Method::POST {
            let uri = request.uri().to_string();
            if let Some(proof) = self.read_proof(request).await {
                match self.verifier.verify(&proof, ip).await {
                    Ok(true) => {
                        self.set_valid(true);
                        tracing::info!(ip = %ip, "Challenge solved");
                        return self.redirect_verified(&uri, ip);
                    }
                    Ok(false) => {
                        self.set_valid(true);
                        tracing::debug!(ip = %ip, "Challenge answer rejected");
                    }
                    Err(e) => {
                        tracing::warn!(ip = %ip, error = %e, "Challenge verification failed");
                        if matches!(e, ChallengeError::Transport(_) | ChallengeError::Status(_)) {
                            self.set_valid(false);
                        }
                    }
                }
            }
        }
        self.challenge_page(ip)
    }

    async fn read_proof(&self, request: Request) -> Option<String> {
        let bytes = axum::body::to_bytes(request.into_body(), MAX_FORM_BYTES)
            .await
            .ok()?;
        let field = self.provider.response_field();
        url::form_urlencoded::parse(&bytes)
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
    }

    fn challenge_page(&self, ip: &str) -> Response {
        let html = self.template.render(self.provider, &self.site_key);
        let cookie = self
            .signer
            .set_cookie(ip, CookieStatus::Challenged, now(), self.grace_period);

        let mut response = (StatusCode::OK, Body::from(html)).into_response();
        let headers = response.headers_mut();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            headers.insert(SET_COOKIE, value);
        }
        response
    }

    fn redirect_verified(&self, uri: &str, ip: &str) -> Response {
        let cookie = self
            .signer
            .set_cookie(ip, CookieStatus::Verified, now(), self.grace_period);

        let mut response = StatusCode::FOUND.into_response();
        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(uri) {
            headers.insert(LOCATION, value);
        }
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            headers.insert(SET_COOKIE, value);
        }
        response
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http::header::COOKIE;
    use std::sync::atomic::AtomicUsize;

    /// Accepts the proof "good"; fails with a transport-like error when told to.
    #[derive(Debug, Default)]
    struct StubVerifier {
        calls: AtomicUsize,
        unreachable: AtomicBool,
    }

    #[async_trait]
    impl ChallengeVerifier for StubVerifier {
        async fn verify(&self, proof: &str, _remote_ip: &str) -> Result<bool, ChallengeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.unreachable.load(Ordering::SeqCst) {
                return Err(ChallengeError::Status(503));
            }
            Ok(proof == "good")
        }
    }

    fn service(verifier: Arc<StubVerifier>) -> ChallengeService {
        ChallengeService::new(
            CaptchaProvider::Hcaptcha,
            "site",
            "secret",
            verifier,
            ChallengeTemplate::default(),
            Duration::from_secs(1800),
        )
        .unwrap()
    }

    fn post(body: &str) -> Request {
        axum::http::Request::builder()
            .method("POST")
            .uri("/login?next=1")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn set_cookie_value(response: &Response) -> String {
        let header = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        header
            .split(';')
            .next()
            .unwrap()
            .trim_start_matches("bouncer_challenge=")
            .to_string()
    }

    #[tokio::test]
    async fn get_serves_page_and_challenged_cookie() {
        let service = service(Arc::new(StubVerifier::default()));
        let request = axum::http::Request::builder().uri("/").body(Body::empty()).unwrap();

        let response = service.respond(request, "1.2.3.4").await;
        assert_eq!(response.status(), StatusCode::OK);

        let mut headers = HeaderMap::new();
        let cookie = format!("{}={}", COOKIE_NAME, set_cookie_value(&response));
        headers.insert(COOKIE, HeaderValue::from_str(&cookie).unwrap());
        assert_eq!(
            service.check_cookie(&headers, "1.2.3.4"),
            ChallengeState::Challenged
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains(r#"data-sitekey="site""#));
    }

    #[tokio::test]
    async fn solved_challenge_redirects_with_verified_cookie() {
        let verifier = Arc::new(StubVerifier::default());
        let service = service(verifier.clone());

        let response = service
            .respond(post("h-captcha-response=good"), "1.2.3.4")
            .await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers().get(LOCATION).unwrap(), "/login?next=1");

        let mut headers = HeaderMap::new();
        let cookie = format!("{}={}", COOKIE_NAME, set_cookie_value(&response));
        headers.insert(COOKIE, HeaderValue::from_str(&cookie).unwrap());
        assert_eq!(
            service.check_cookie(&headers, "1.2.3.4"),
            ChallengeState::Verified
        );
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wrong_answer_serves_page_again() {
        let service = service(Arc::new(StubVerifier::default()));
        let response = service
            .respond(post("h-captcha-response=bad"), "1.2.3.4")
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(service.is_valid());
    }

    #[tokio::test]
    async fn post_without_proof_is_not_verified() {
        let verifier = Arc::new(StubVerifier::default());
        let service = service(verifier.clone());
        let response = service.respond(post("user=alice"), "1.2.3.4").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn provider_outage_marks_invalid_until_next_success() {
        let verifier = Arc::new(StubVerifier::default());
        let service = service(verifier.clone());
        assert!(service.is_valid());

        verifier.unreachable.store(true, Ordering::SeqCst);
        let response = service
            .respond(post("h-captcha-response=good"), "1.2.3.4")
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!service.is_valid());

        verifier.unreachable.store(false, Ordering::SeqCst);
        let response = service
            .respond(post("h-captcha-response=good"), "1.2.3.4")
            .await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(service.is_valid());
    }

    #[test]
    fn missing_keys_start_invalid() {
        let service = ChallengeService::new(
            CaptchaProvider::Recaptcha,
            "",
            "secret",
            Arc::new(StubVerifier::default()),
            ChallengeTemplate::default(),
            Duration::from_secs(60),
        )
        .unwrap();
        assert!(!service.is_valid());
    }

    #[test]
    fn no_provider_means_no_service() {
        let service =
            ChallengeService::from_config(&CaptchaConfig::default(), reqwest::Client::new())
                .unwrap();
        assert!(service.is_none());
    }
}
