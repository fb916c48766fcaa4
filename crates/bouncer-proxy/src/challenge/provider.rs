//! Verification of submitted proofs with the challenge provider.

use std::fmt;

use async_trait::async_trait;
use bouncer_core::CaptchaProvider;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;

use crate::error::ChallengeError;

/// Checks a proof submitted by a client.
#[async_trait]
pub trait ChallengeVerifier: Send + Sync + fmt::Debug {
    /// Returns whether `proof` solves the challenge for `remote_ip`.
    async fn verify(&self, proof: &str, remote_ip: &str) -> Result<bool, ChallengeError>;
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    success: bool,
}

/// Verifier calling the provider's `siteverify` endpoint.
pub struct SiteVerifier {
    client: reqwest::Client,
    url: String,
    secret: String,
}

impl fmt::Debug for SiteVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteVerifier")
            .field("url", &self.url)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl SiteVerifier {
    pub fn new(client: reqwest::Client, provider: CaptchaProvider, secret: impl Into<String>) -> Self {
        Self::with_url(client, provider.verify_url(), secret)
    }

    /// Verifier posting to an explicit endpoint.
    pub fn with_url(
        client: reqwest::Client,
        url: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            secret: secret.into(),
        }
    }
}

#[async_trait]
impl ChallengeVerifier for SiteVerifier {
    async fn verify(&self, proof: &str, remote_ip: &str) -> Result<bool, ChallengeError> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("secret", &self.secret)
            .append_pair("response", proof)
            .append_pair("remoteip", remote_ip)
            .finish();

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChallengeError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await?;
        let answer: VerifyResponse = serde_json::from_slice(&bytes)?;
        Ok(answer.success)
    }
}
