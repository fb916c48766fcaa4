//! Configuration file schema, loading and validation.
//!
//! Configuration is read once at startup from a TOML file. Loading runs in
//! three steps, any of which aborts with a [`ConfigError`]:
//!
//! 1. parse the file
//! 2. normalize mode-specific settings and resolve `*_file` secrets
//! 3. validate
//!
//! ```toml
//! mode = "stream"
//! update_interval_seconds = 60
//!
//! [lapi]
//! host = "crowdsec:8080"
//! key_file = "/run/secrets/lapi_key"
//!
//! [forwarded_headers]
//! trusted_ips = ["10.0.0.0/8"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::trust::{IpChecker, TrustResolver, DEFAULT_FORWARDED_HEADER};

/// Host of the central API used in `alone` mode.
pub const CENTRAL_API_HOST: &str = "api.crowdsec.net";

/// Scheme of the central API used in `alone` mode.
pub const CENTRAL_API_SCHEME: &str = "https";

/// Refresh interval used in `alone` mode.
pub const CENTRAL_UPDATE_INTERVAL_SECONDS: u64 = 7200;

/// Configuration errors. Any of these aborts startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read {field} from {path}: {source}")]
    Secret {
        field: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// How the decision cache is kept in sync with the decision source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncMode {
    /// Bouncing disabled; every request passes.
    #[serde(rename = "disabled")]
    Disabled,
    /// Query the decision source on every request, never cache.
    #[serde(rename = "none")]
    NoCache,
    /// Query the decision source on cache miss and cache the answer.
    #[default]
    #[serde(rename = "live")]
    LiveLookup,
    /// Mirror the local decision stream on a timer.
    #[serde(rename = "stream")]
    Streaming,
    /// Mirror the central decision stream on a timer, with login.
    #[serde(rename = "alone")]
    CentralPoll,
}

impl SyncMode {
    /// Modes driven by the background refresh ticker.
    pub fn is_background(self) -> bool {
        matches!(self, SyncMode::Streaming | SyncMode::CentralPoll)
    }

    /// Modes that query the decision source on the request path.
    pub fn is_per_request(self) -> bool {
        matches!(self, SyncMode::NoCache | SyncMode::LiveLookup)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncMode::Disabled => "disabled",
            SyncMode::NoCache => "none",
            SyncMode::LiveLookup => "live",
            SyncMode::Streaming => "stream",
            SyncMode::CentralPoll => "alone",
        }
    }
}

/// Local decision API connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LapiConfig {
    pub scheme: String,
    pub host: String,
    pub key: Option<String>,
    pub key_file: Option<PathBuf>,
    pub tls_insecure_verify: bool,
    pub tls_ca_file: Option<PathBuf>,
    pub tls_cert_file: Option<PathBuf>,
    pub tls_key_file: Option<PathBuf>,
}

impl Default for LapiConfig {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            host: "crowdsec:8080".to_string(),
            key: None,
            key_file: None,
            tls_insecure_verify: false,
            tls_ca_file: None,
            tls_cert_file: None,
            tls_key_file: None,
        }
    }
}

impl LapiConfig {
    /// Returns true when both halves of a client certificate are configured.
    pub fn has_client_certificate(&self) -> bool {
        self.tls_cert_file.is_some() && self.tls_key_file.is_some()
    }
}

/// Central API credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CapiConfig {
    pub machine_id: Option<String>,
    pub machine_id_file: Option<PathBuf>,
    pub password: Option<String>,
    pub password_file: Option<PathBuf>,
    pub scenarios: Vec<String>,
    /// Overrides the central API host.
    pub host: Option<String>,
    /// Overrides the central API scheme.
    pub scheme: Option<String>,
}

/// Trusted forwarding proxies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForwardedHeadersConfig {
    pub trusted_ips: Vec<String>,
    pub custom_name: String,
}

impl Default for ForwardedHeadersConfig {
    fn default() -> Self {
        Self {
            trusted_ips: Vec::new(),
            custom_name: DEFAULT_FORWARDED_HEADER.to_string(),
        }
    }
}

/// Shared decision cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedisConfig {
    pub enabled: bool,
    pub host: String,
    pub password: Option<String>,
    pub password_file: Option<PathBuf>,
    pub database: u32,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "redis:6379".to_string(),
            password: None,
            password_file: None,
            database: 0,
        }
    }
}

impl RedisConfig {
    /// Connection URL for the configured server, password percent-encoded.
    pub fn url(&self) -> Result<String> {
        let mut url = Url::parse(&format!("redis://{}/{}", self.host.trim(), self.database))
            .map_err(|e| ConfigError::Invalid(format!("redis.host {:?}: {}", self.host, e)))?;
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            url.set_password(Some(password))
                .map_err(|_| ConfigError::Invalid(format!("redis.host {:?} has no host", self.host)))?;
        }
        Ok(url.into())
    }
}

/// Interactive challenge provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptchaProvider {
    Hcaptcha,
    Recaptcha,
    Turnstile,
}

impl CaptchaProvider {
    /// Script loaded by the challenge page.
    pub fn script_url(self) -> &'static str {
        match self {
            CaptchaProvider::Hcaptcha => "https://hcaptcha.com/1/api.js",
            CaptchaProvider::Recaptcha => "https://www.google.com/recaptcha/api.js",
            CaptchaProvider::Turnstile => "https://challenges.cloudflare.com/turnstile/v0/api.js",
        }
    }

    /// Endpoint that verifies a submitted proof.
    pub fn verify_url(self) -> &'static str {
        match self {
            CaptchaProvider::Hcaptcha => "https://api.hcaptcha.com/siteverify",
            CaptchaProvider::Recaptcha => "https://www.google.com/recaptcha/api/siteverify",
            CaptchaProvider::Turnstile => {
                "https://challenges.cloudflare.com/turnstile/v0/siteverify"
            }
        }
    }

    /// Form field carrying the proof.
    pub fn response_field(self) -> &'static str {
        match self {
            CaptchaProvider::Hcaptcha => "h-captcha-response",
            CaptchaProvider::Recaptcha => "g-recaptcha-response",
            CaptchaProvider::Turnstile => "cf-turnstile-response",
        }
    }

    /// CSS class of the widget container.
    pub fn widget_class(self) -> &'static str {
        match self {
            CaptchaProvider::Hcaptcha => "h-captcha",
            CaptchaProvider::Recaptcha => "g-recaptcha",
            CaptchaProvider::Turnstile => "cf-turnstile",
        }
    }
}

/// Remediation applied to captcha verdicts when the provider is unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackRemediation {
    #[default]
    Ban,
    None,
}

/// Interactive challenge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptchaConfig {
    pub provider: Option<CaptchaProvider>,
    pub site_key: Option<String>,
    pub secret_key: Option<String>,
    pub secret_key_file: Option<PathBuf>,
    pub template_file: Option<PathBuf>,
    pub grace_period_seconds: u64,
    pub fallback_remediation: FallbackRemediation,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            provider: None,
            site_key: None,
            secret_key: None,
            secret_key_file: None,
            template_file: None,
            grace_period_seconds: 1800,
            fallback_remediation: FallbackRemediation::Ban,
        }
    }
}

impl CaptchaConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_seconds)
    }
}

/// Listener and upstream of the reverse proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    pub listen: String,
    pub upstream: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            upstream: "http://127.0.0.1:8081".to_string(),
        }
    }
}

/// Full bouncer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub enabled: bool,
    pub log_level: String,
    pub mode: SyncMode,
    pub update_interval_seconds: u64,
    pub default_decision_seconds: u64,
    pub http_timeout_seconds: u64,
    pub lapi: LapiConfig,
    pub capi: CapiConfig,
    pub forwarded_headers: ForwardedHeadersConfig,
    pub client_trusted_ips: Vec<String>,
    pub redis: RedisConfig,
    pub captcha: CaptchaConfig,
    pub server: ServerSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: "info".to_string(),
            mode: SyncMode::LiveLookup,
            update_interval_seconds: 60,
            default_decision_seconds: 60,
            http_timeout_seconds: 10,
            lapi: LapiConfig::default(),
            capi: CapiConfig::default(),
            forwarded_headers: ForwardedHeadersConfig::default(),
            client_trusted_ips: Vec::new(),
            redis: RedisConfig::default(),
            captcha: CaptchaConfig::default(),
            server: ServerSettings::default(),
        }
    }
}

impl Config {
    /// Loads, normalizes and validates a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    /// Loads, normalizes and validates configuration from TOML text.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(raw)?;
        config.prepare()?;
        Ok(config)
    }

    /// Normalizes mode settings, resolves secrets and validates.
    pub fn prepare(&mut self) -> Result<()> {
        self.normalize();
        self.resolve_secrets()?;
        self.validate()
    }

    /// Effective sync mode, taking the `enabled` switch into account.
    pub fn sync_mode(&self) -> SyncMode {
        if self.enabled {
            self.mode
        } else {
            SyncMode::Disabled
        }
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_seconds)
    }

    pub fn default_decision_ttl(&self) -> Duration {
        Duration::from_secs(self.default_decision_seconds)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    /// Builds the trust resolver from the configured lists.
    pub fn trust_resolver(&self) -> Result<TrustResolver> {
        TrustResolver::new(
            &self.forwarded_headers.trusted_ips,
            &self.client_trusted_ips,
            self.forwarded_headers.custom_name.clone(),
        )
        .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    fn normalize(&mut self) {
        if self.mode == SyncMode::CentralPoll {
            self.lapi.scheme = self
                .capi
                .scheme
                .clone()
                .unwrap_or_else(|| CENTRAL_API_SCHEME.to_string());
            self.lapi.host = self
                .capi
                .host
                .clone()
                .unwrap_or_else(|| CENTRAL_API_HOST.to_string());
            if self.capi.host.is_none() {
                self.update_interval_seconds = CENTRAL_UPDATE_INTERVAL_SECONDS;
            }
        }
    }

    fn resolve_secrets(&mut self) -> Result<()> {
        resolve_secret("lapi.key", &mut self.lapi.key, &self.lapi.key_file)?;
        resolve_secret(
            "capi.machine_id",
            &mut self.capi.machine_id,
            &self.capi.machine_id_file,
        )?;
        resolve_secret(
            "capi.password",
            &mut self.capi.password,
            &self.capi.password_file,
        )?;
        resolve_secret(
            "redis.password",
            &mut self.redis.password,
            &self.redis.password_file,
        )?;
        resolve_secret(
            "captcha.secret_key",
            &mut self.captcha.secret_key,
            &self.captcha.secret_key_file,
        )?;
        Ok(())
    }

    /// Checks the configuration for values that cannot work.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if !matches!(self.lapi.scheme.as_str(), "http" | "https") {
            return invalid(format!(
                "lapi.scheme must be http or https, got {:?}",
                self.lapi.scheme
            ));
        }
        if self.lapi.host.trim().is_empty() {
            return invalid("lapi.host must not be empty".to_string());
        }
        if self.update_interval_seconds < 1 {
            return invalid("update_interval_seconds must be at least 1".to_string());
        }
        if self.mode.is_background() && self.update_interval_seconds < 2 {
            return invalid(format!(
                "update_interval_seconds must be at least 2 in {} mode",
                self.mode.as_str()
            ));
        }
        if self.default_decision_seconds < 1 {
            return invalid("default_decision_seconds must be at least 1".to_string());
        }
        if self.http_timeout_seconds < 1 {
            return invalid("http_timeout_seconds must be at least 1".to_string());
        }

        IpChecker::new(&self.forwarded_headers.trusted_ips)
            .map_err(|e| ConfigError::Invalid(format!("forwarded_headers.trusted_ips: {}", e)))?;
        IpChecker::new(&self.client_trusted_ips)
            .map_err(|e| ConfigError::Invalid(format!("client_trusted_ips: {}", e)))?;

        match self.mode {
            SyncMode::CentralPoll => {
                if is_blank(&self.capi.machine_id) || is_blank(&self.capi.password) {
                    return invalid(
                        "alone mode requires capi.machine_id and capi.password".to_string(),
                    );
                }
            }
            SyncMode::NoCache | SyncMode::LiveLookup | SyncMode::Streaming => {
                if is_blank(&self.lapi.key) && !self.lapi.has_client_certificate() {
                    return invalid(
                        "lapi.key (or lapi.key_file) or a client certificate is required"
                            .to_string(),
                    );
                }
            }
            SyncMode::Disabled => {}
        }

        if self.lapi.tls_cert_file.is_some() != self.lapi.tls_key_file.is_some() {
            return invalid(
                "lapi.tls_cert_file and lapi.tls_key_file must be set together".to_string(),
            );
        }

        if self.redis.enabled {
            if self.redis.host.trim().is_empty() {
                return invalid("redis.host must not be empty when redis is enabled".to_string());
            }
            self.redis.url()?;
        }

        if self.captcha.provider.is_some() {
            if is_blank(&self.captcha.site_key) || is_blank(&self.captcha.secret_key) {
                return invalid(
                    "captcha.site_key and captcha.secret_key are required with a provider"
                        .to_string(),
                );
            }
            if self.captcha.grace_period_seconds < 1 {
                return invalid("captcha.grace_period_seconds must be at least 1".to_string());
            }
        }

        Ok(())
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).unwrap_or("").is_empty()
}

/// Fills `value` from `file` when the inline value is absent.
fn resolve_secret(
    field: &'static str,
    value: &mut Option<String>,
    file: &Option<PathBuf>,
) -> Result<()> {
    if !is_blank(value) {
        return Ok(());
    }
    let Some(path) = file else {
        return Ok(());
    };
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Secret {
        field,
        path: path.clone(),
        source,
    })?;
    *value = Some(contents.trim().to_string());
    Ok(())
}
