//! HTTP client for the local and central decision APIs.

use std::fs;
use std::path::Path;

use async_trait::async_trait;
use bouncer_core::{Config, Decision, LoginRequest, LoginResponse, StreamUpdate, SyncMode};
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{Result, SyncError};
use crate::source::DecisionSource;

const API_KEY_HEADER: &str = "X-Api-Key";
const AUTHORIZATION_HEADER: &str = "Authorization";

const DECISIONS_PATH: &str = "v1/decisions";
const LOCAL_STREAM_PATH: &str = "v1/decisions/stream";
const LOGIN_PATH: &str = "v2/watchers/login";
const CENTRAL_STREAM_PATH: &str = "v2/decisions/stream";

/// Token renewals allowed per call after an unauthorized answer.
const MAX_TOKEN_RENEWALS: u32 = 1;

/// How the client authenticates.
#[derive(Clone)]
pub enum Credentials {
    /// Local API key. `None` when a client certificate authenticates instead.
    ApiKey(Option<String>),
    /// Central machine credentials, exchanged for a token at login.
    Central {
        machine_id: String,
        password: String,
        scenarios: Vec<String>,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::ApiKey(key) => f
                .debug_tuple("ApiKey")
                .field(&key.as_ref().map(|_| "<redacted>"))
                .finish(),
            Credentials::Central {
                machine_id,
                scenarios,
                ..
            } => f
                .debug_struct("Central")
                .field("machine_id", machine_id)
                .field("password", &"<redacted>")
                .field("scenarios", scenarios)
                .finish(),
        }
    }
}

/// Decision source backed by the HTTP API.
pub struct HttpDecisionSource {
    client: Client,
    base: Url,
    credentials: Credentials,
    token: RwLock<Option<String>>,
}

impl std::fmt::Debug for HttpDecisionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDecisionSource")
            .field("base", &self.base.as_str())
            .field("credentials", &self.credentials)
            .field("has_token", &self.token.read().is_some())
            .finish()
    }
}

impl HttpDecisionSource {
    /// Creates a source for `base` using a prebuilt HTTP client.
    pub fn new(client: Client, base: &str, credentials: Credentials) -> Result<Self> {
        let mut base = Url::parse(base)
            .map_err(|e| SyncError::Setup(format!("invalid base url {}: {}", base, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            client,
            base,
            credentials,
            token: RwLock::new(None),
        })
    }

    /// Builds the source described by a prepared configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = build_client(config)?;
        let base = format!("{}://{}/", config.lapi.scheme, config.lapi.host);

        let credentials = if config.sync_mode() == SyncMode::CentralPoll {
            Credentials::Central {
                machine_id: config.capi.machine_id.clone().unwrap_or_default(),
                password: config.capi.password.clone().unwrap_or_default(),
                scenarios: config.capi.scenarios.clone(),
            }
        } else {
            Credentials::ApiKey(config.lapi.key.clone().filter(|k| !k.is_empty()))
        };

        Self::new(client, &base, credentials)
    }

    /// The base URL every path is resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| SyncError::Setup(format!("invalid endpoint {}: {}", path, e)))
    }

    fn stream_path(&self) -> &'static str {
        match self.credentials {
            Credentials::ApiKey(_) => LOCAL_STREAM_PATH,
            Credentials::Central { .. } => CENTRAL_STREAM_PATH,
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Credentials::ApiKey(Some(key)) => request.header(API_KEY_HEADER, key.as_str()),
            Credentials::ApiKey(None) => request,
            Credentials::Central { .. } => match self.token.read().as_deref() {
                Some(token) => request.header(AUTHORIZATION_HEADER, token),
                None => request,
            },
        }
    }

    /// Issues an authenticated GET and decodes the JSON body.
    ///
    /// An unauthorized answer from the central API triggers at most
    /// [`MAX_TOKEN_RENEWALS`] logins, each followed by one retry.
    async fn get_json<T: DeserializeOwned>(&self, url: Url, what: &'static str) -> Result<T> {
        let mut renewals = 0;
        loop {
            let response = self
                .authorize(self.client.get(url.clone()))
                .send()
                .await
                .map_err(|source| SyncError::Transport {
                    url: url.to_string(),
                    source,
                })?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && self.requires_login() {
                if renewals >= MAX_TOKEN_RENEWALS {
                    return Err(SyncError::Auth(format!(
                        "{} still unauthorized after token renewal",
                        url
                    )));
                }
                renewals += 1;
                tracing::warn!(url = %url, "Token rejected, logging in again");
                self.login().await?;
                continue;
            }
            if status != StatusCode::OK {
                return Err(SyncError::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }

            let body = response
                .bytes()
                .await
                .map_err(|source| SyncError::Transport {
                    url: url.to_string(),
                    source,
                })?;
            return serde_json::from_slice(&body)
                .map_err(|source| SyncError::Decode { what, source });
        }
    }
}

#[async_trait]
impl DecisionSource for HttpDecisionSource {
    async fn decisions_for_ip(&self, ip: &str) -> Result<Vec<Decision>> {
        let mut url = self.endpoint(DECISIONS_PATH)?;
        url.query_pairs_mut()
            .append_pair("ip", ip)
            .append_pair("banned", "true");

        // The API answers `null` when nothing matches.
        let decisions: Option<Vec<Decision>> = self.get_json(url, "decision list").await?;
        Ok(decisions.unwrap_or_default())
    }

    async fn stream(&self, startup: bool) -> Result<StreamUpdate> {
        let mut url = self.endpoint(self.stream_path())?;
        url.query_pairs_mut()
            .append_pair("startup", if startup { "true" } else { "false" });

        let update: Option<StreamUpdate> = self.get_json(url, "decision stream").await?;
        Ok(update.unwrap_or_default())
    }

    async fn login(&self) -> Result<()> {
        let Credentials::Central {
            machine_id,
            password,
            scenarios,
        } = &self.credentials
        else {
            return Ok(());
        };

        let url = self.endpoint(LOGIN_PATH)?;
        let body = LoginRequest {
            machine_id,
            password,
            scenarios,
        };
        let response = self
            .client
            .post(url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|source| SyncError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(SyncError::Auth(format!(
                "login returned status {}",
                status.as_u16()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| SyncError::Transport {
                url: url.to_string(),
                source,
            })?;
        let login: LoginResponse = serde_json::from_slice(&bytes).map_err(|source| {
            SyncError::Decode {
                what: "login response",
                source,
            }
        })?;
        if !login.is_success() {
            return Err(SyncError::Auth(format!(
                "login rejected with code {}",
                login.code
            )));
        }

        tracing::info!(machine_id = %machine_id, expire = %login.expire, "Logged in to central API");
        *self.token.write() = Some(login.token);
        Ok(())
    }

    fn requires_login(&self) -> bool {
        matches!(self.credentials, Credentials::Central { .. })
    }
}

/// Builds the HTTP client with the configured timeout and TLS material.
fn build_client(config: &Config) -> Result<Client> {
    let mut builder = Client::builder()
        .user_agent(format!("bouncer/{}", env!("CARGO_PKG_VERSION")))
        .timeout(config.http_timeout())
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(std::time::Duration::from_secs(30));

    let lapi = &config.lapi;
    if lapi.tls_insecure_verify {
        tracing::warn!("TLS certificate verification disabled for the decision API");
        builder = builder.danger_accept_invalid_certs(true);
    }
    if let Some(ca_file) = &lapi.tls_ca_file {
        let pem = read_pem(ca_file)?;
        let cert = reqwest::Certificate::from_pem(&pem)
            .map_err(|e| SyncError::Setup(format!("invalid CA bundle: {}", e)))?;
        builder = builder.add_root_certificate(cert);
    }
    if let (Some(cert_file), Some(key_file)) = (&lapi.tls_cert_file, &lapi.tls_key_file) {
        let mut pem = read_pem(cert_file)?;
        pem.push(b'\n');
        pem.extend(read_pem(key_file)?);
        let identity = reqwest::Identity::from_pem(&pem)
            .map_err(|e| SyncError::Setup(format!("invalid client certificate: {}", e)))?;
        builder = builder.identity(identity);
    }

    builder
        .build()
        .map_err(|e| SyncError::Setup(format!("failed to build HTTP client: {}", e)))
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| SyncError::Setup(format!("cannot read {}: {}", path.display(), e)))
}
