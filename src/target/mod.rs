//! Monitored endpoints and their per-endpoint policy.

mod registry;

pub use registry::*;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_EXPECTED_STATUS: u16 = 200;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_INTERVAL_SECS: u64 = 300;

/// How the credential value is turned into a request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    /// `Authorization: Bearer <value>`
    Bearer,
    /// HTTP basic auth, value is `user:password`
    Basic,
    /// `Authorization: <value>` verbatim
    Header,
}

/// A pre-built credential attached to every request for a target.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credential {
    #[serde(rename = "type", alias = "kind")]
    pub kind: AuthKind,
    #[serde(alias = "token")]
    pub value: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("kind", &self.kind)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// A monitored endpoint. Immutable once the registry is built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckTarget {
    pub name: String,
    pub url: String,
    pub expected_status: u16,
    pub timeout_ms: u64,
    pub check_ssl: bool,
    #[serde(skip_serializing)]
    pub auth: Option<Credential>,
    pub max_response_time_ms: Option<u64>,
    pub interval_secs: u64,
    pub failure_threshold: u32,
    pub recovery_threshold: u32,
}

impl CheckTarget {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            expected_status: DEFAULT_EXPECTED_STATUS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            check_ssl: false,
            auth: None,
            max_response_time_ms: None,
            interval_secs: DEFAULT_INTERVAL_SECS,
            failure_threshold: 1,
            recovery_threshold: 1,
        }
    }

    pub fn with_expected_status(mut self, status: u16) -> Self {
        self.expected_status = status;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_ssl_check(mut self, check_ssl: bool) -> Self {
        self.check_ssl = check_ssl;
        self
    }

    pub fn with_auth(mut self, kind: AuthKind, value: impl Into<String>) -> Self {
        self.auth = Some(Credential { kind, value: value.into() });
        self
    }

    pub fn with_max_response_time_ms(mut self, max: u64) -> Self {
        self.max_response_time_ms = Some(max);
        self
    }

    pub fn with_interval_secs(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    pub fn with_thresholds(mut self, failure: u32, recovery: u32) -> Self {
        self.failure_threshold = failure;
        self.recovery_threshold = recovery;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// True when the URL uses the `https` scheme.
    pub fn is_https(&self) -> bool {
        Url::parse(&self.url)
            .map(|u| u.scheme() == "https")
            .unwrap_or(false)
    }
}
