//! Bridge configuration

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const LOCAL_CONFIG: &str = ".formbridge.yml";

/// How a mid-flight failure is broadcast to the still-pending producers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Reject every pending request, stopping at the first rejection that raises
    #[default]
    FailFast,
    /// Attempt every request id with the abort sentinel, whatever happens
    BestEffort,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FailFast => write!(f, "fail-fast"),
            Self::BestEffort => write!(f, "best-effort"),
        }
    }
}

/// Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Label attached to every log line of the bridge
    #[serde(default = "default_label")]
    pub label: String,

    /// Failure broadcast used by `Bridge::fail_pending`
    #[serde(rename = "failure-policy", default)]
    pub failure_policy: FailurePolicy,
}

fn default_label() -> String {
    debug!("default_label: called");
    "bridge".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            label: default_label(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl BridgeConfig {
    /// Config with the given failure policy and default label
    pub fn with_policy(failure_policy: FailurePolicy) -> Self {
        Self {
            failure_policy,
            ..Default::default()
        }
    }

    /// Parse a YAML config document
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load configuration for a bridge
    ///
    /// An explicit path must load. Otherwise the first readable candidate
    /// wins, `.formbridge.yml` before the user config directory; a broken
    /// candidate is skipped with a warning. Defaults apply when none is found.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::read(path);
        }

        let found = Self::candidates()
            .into_iter()
            .filter(|path| path.is_file())
            .find_map(|path| match Self::read(&path) {
                Ok(config) => Some(config),
                Err(err) => {
                    warn!(path = %path.display(), %err, "BridgeConfig::load: skipping candidate");
                    None
                }
            });

        Ok(found.unwrap_or_else(|| {
            debug!("BridgeConfig::load: no config file, using defaults");
            Self::default()
        }))
    }

    fn candidates() -> Vec<PathBuf> {
        let mut candidates = vec![PathBuf::from(LOCAL_CONFIG)];
        candidates.extend(dirs::config_dir().map(|dir| dir.join("formbridge").join("formbridge.yml")));
        candidates
    }

    fn read(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read bridge config {}", path.display()))?;
        let config =
            Self::from_yaml(&content).with_context(|| format!("Failed to parse bridge config {}", path.display()))?;
        debug!(path = %path.display(), label = %config.label, policy = %config.failure_policy, "BridgeConfig::load: loaded");
        Ok(config)
    }
}
