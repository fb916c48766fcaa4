//! Decision source wire types and cached remediation values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One verdict published by the decision source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub origin: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub scenario: String,
    #[serde(default)]
    pub simulated: bool,
}

impl Decision {
    /// Returns the typed decision kind.
    pub fn decision_type(&self) -> DecisionType {
        DecisionType::from(self.kind.as_str())
    }

    /// Returns the remediation this decision maps to in the cache.
    pub fn remediation(&self) -> Remediation {
        self.decision_type().remediation()
    }
}

/// Kind of a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionType {
    Ban,
    Captcha,
    Other(String),
}

impl DecisionType {
    /// Maps the decision type to the value stored in the cache.
    ///
    /// Unknown types are cached as [`Remediation::None`].
    pub fn remediation(&self) -> Remediation {
        match self {
            DecisionType::Ban => Remediation::Banned,
            DecisionType::Captcha => Remediation::Captcha,
            DecisionType::Other(kind) => {
                tracing::debug!(kind = %kind, "Unknown decision type, caching as none");
                Remediation::None
            }
        }
    }
}

impl From<&str> for DecisionType {
    fn from(kind: &str) -> Self {
        match kind {
            "ban" => DecisionType::Ban,
            "captcha" => DecisionType::Captcha,
            other => DecisionType::Other(other.to_string()),
        }
    }
}

/// Delta of decisions since the last successful sync.
///
/// Both lists may be `null` on the wire; they deserialize as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamUpdate {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub new: Vec<Decision>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub deleted: Vec<Decision>,
}

impl StreamUpdate {
    /// Returns true when the update carries no decisions.
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.deleted.is_empty()
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Decision>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<Decision>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Body of the central login exchange.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub machine_id: &'a str,
    pub password: &'a str,
    pub scenarios: &'a [String],
}

/// Response of the central login exchange.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub expire: String,
}

impl LoginResponse {
    /// A login is accepted only with code 200 and a non-empty token.
    pub fn is_success(&self) -> bool {
        self.code == 200 && !self.token.is_empty()
    }
}

/// Verdict cached per IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Remediation {
    /// Confirmed not banned until the entry expires.
    None,
    Banned,
    Captcha,
}

impl Remediation {
    const NONE_VALUE: &'static str = "f";
    const BANNED_VALUE: &'static str = "t";
    const CAPTCHA_VALUE: &'static str = "c";

    /// Encoded value written to the store.
    pub fn as_cache_value(self) -> &'static str {
        match self {
            Remediation::None => Self::NONE_VALUE,
            Remediation::Banned => Self::BANNED_VALUE,
            Remediation::Captcha => Self::CAPTCHA_VALUE,
        }
    }

    /// Decodes a stored value. Unknown values read as [`Remediation::None`].
    pub fn from_cache_value(value: &str) -> Self {
        match value {
            Self::BANNED_VALUE => Remediation::Banned,
            Self::CAPTCHA_VALUE => Remediation::Captcha,
            _ => Remediation::None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Remediation::None => "none",
            Remediation::Banned => "ban",
            Remediation::Captcha => "captcha",
        }
    }
}

impl fmt::Display for Remediation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
