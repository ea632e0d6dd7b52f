//! Target registry: loads, validates and freezes the monitored endpoints.

use super::*;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Load-time configuration errors. Fatal before the scheduler starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse target list: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("target name must not be empty")]
    EmptyName,
    #[error("duplicate target name: {0}")]
    DuplicateName(String),
    #[error("target {name}: malformed url {url}: {reason}")]
    InvalidUrl {
        name: String,
        url: String,
        reason: String,
    },
    #[error("target {name}: unsupported scheme {scheme}")]
    UnsupportedScheme { name: String, scheme: String },
    #[error("target {name}: {field} must be at least 1")]
    InvalidThreshold { name: String, field: &'static str },
}

/// Fallback values for fields a target entry leaves out.
#[derive(Debug, Clone, Copy)]
pub struct TargetDefaults {
    pub timeout_ms: u64,
    pub interval_secs: u64,
}

impl Default for TargetDefaults {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            interval_secs: DEFAULT_INTERVAL_SECS,
        }
    }
}

/// One entry of the target list file.
#[derive(Debug, Deserialize)]
struct TargetEntry {
    name: String,
    url: String,
    #[serde(default)]
    expected_status: Option<u16>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    check_ssl: bool,
    #[serde(default)]
    auth: Option<Credential>,
    #[serde(default, alias = "max_response_time")]
    max_response_time_ms: Option<u64>,
    #[serde(default)]
    interval_secs: Option<u64>,
    #[serde(default)]
    failure_threshold: Option<u32>,
    #[serde(default)]
    recovery_threshold: Option<u32>,
}

impl TargetEntry {
    fn into_target(self, defaults: &TargetDefaults) -> CheckTarget {
        CheckTarget {
            name: self.name,
            url: self.url,
            expected_status: self.expected_status.unwrap_or(DEFAULT_EXPECTED_STATUS),
            timeout_ms: self.timeout_ms.unwrap_or(defaults.timeout_ms),
            check_ssl: self.check_ssl,
            auth: self.auth,
            max_response_time_ms: self.max_response_time_ms,
            interval_secs: self.interval_secs.unwrap_or(defaults.interval_secs),
            failure_threshold: self.failure_threshold.unwrap_or(1),
            recovery_threshold: self.recovery_threshold.unwrap_or(1),
        }
    }
}

/// The immutable, ordered set of monitored targets.
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    targets: Vec<Arc<CheckTarget>>,
    index: HashMap<String, usize>,
}

impl TargetRegistry {
    /// Validate and freeze a list of targets, preserving order.
    pub fn from_targets(targets: Vec<CheckTarget>) -> Result<Self, ConfigError> {
        let mut index = HashMap::with_capacity(targets.len());
        let mut frozen = Vec::with_capacity(targets.len());

        for target in targets {
            validate_target(&target)?;
            if index.contains_key(&target.name) {
                return Err(ConfigError::DuplicateName(target.name));
            }
            index.insert(target.name.clone(), frozen.len());
            frozen.push(Arc::new(target));
        }

        Ok(Self {
            targets: frozen,
            index,
        })
    }

    /// Parse a JSON array of target entries.
    pub fn parse(json: &str, defaults: &TargetDefaults) -> Result<Self, ConfigError> {
        let entries: Vec<TargetEntry> = serde_json::from_str(json)?;
        Self::from_targets(entries.into_iter().map(|e| e.into_target(defaults)).collect())
    }

    /// Load the target list from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P, defaults: &TargetDefaults) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let registry = Self::parse(&raw, defaults)?;
        tracing::info!("Loaded {} targets from {}", registry.len(), path.display());
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<CheckTarget>> {
        self.index.get(name).map(|&i| &self.targets[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CheckTarget>> {
        self.targets.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.targets.iter().map(|t| t.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

fn validate_target(target: &CheckTarget) -> Result<(), ConfigError> {
    if target.name.trim().is_empty() {
        return Err(ConfigError::EmptyName);
    }

    let url = Url::parse(&target.url).map_err(|e| ConfigError::InvalidUrl {
        name: target.name.clone(),
        url: target.url.clone(),
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::UnsupportedScheme {
            name: target.name.clone(),
            scheme: url.scheme().to_string(),
        });
    }

    if target.failure_threshold == 0 {
        return Err(ConfigError::InvalidThreshold {
            name: target.name.clone(),
            field: "failure_threshold",
        });
    }
    if target.recovery_threshold == 0 {
        return Err(ConfigError::InvalidThreshold {
            name: target.name.clone(),
            field: "recovery_threshold",
        });
    }

    Ok(())
}
