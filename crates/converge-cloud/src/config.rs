//! Engine configuration
//!
//! Looked up in this order:
//! 1. `CONVERGE_CONFIG_PATH` (direct path)
//! 2. `<config_dir>/converge/engine.yaml`
//! 3. built-in defaults
//!
//! `CONVERGE_*` environment variables override whatever was loaded.

use crate::action::LifecycleAction;
use crate::duration::parse_duration;
use crate::error::{ReconcileError, Result};
use crate::poll::PollOptions;
use crate::retry::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_PATH_VAR: &str = "CONVERGE_CONFIG_PATH";
const CONFIG_DIR: &str = "converge";
const CONFIG_FILE: &str = "engine.yaml";

/// Timeout for each kind of mutation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationTimeouts {
    #[serde(with = "crate::duration::serde_str")]
    pub create: Duration,
    #[serde(with = "crate::duration::serde_str")]
    pub update: Duration,
    #[serde(with = "crate::duration::serde_str")]
    pub delete: Duration,
    /// PRECHECK, UPGRADE, ROLLBACK and other kind-specific actions
    #[serde(with = "crate::duration::serde_str")]
    pub action: Duration,
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(20 * 60),
            update: Duration::from_secs(20 * 60),
            delete: Duration::from_secs(20 * 60),
            action: Duration::from_secs(60 * 60),
        }
    }
}

impl OperationTimeouts {
    pub fn for_action(&self, action: LifecycleAction) -> Duration {
        match action {
            LifecycleAction::Create => self.create,
            LifecycleAction::Update => self.update,
            LifecycleAction::Delete => self.delete,
            _ => self.action,
        }
    }
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pause between work request status reads
    #[serde(with = "crate::duration::serde_str")]
    pub poll_interval: Duration,

    pub timeouts: OperationTimeouts,

    /// Retry policy for every client call
    pub retry: BackoffPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            timeouts: OperationTimeouts::default(),
            retry: BackoffPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReconcileError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml(&content)?;
        tracing::debug!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    /// Load from the first configuration file found, then apply
    /// environment overrides
    pub fn discover() -> Result<Self> {
        let mut config = match find_config_file() {
            Some(path) => Self::load(path)?,
            None => {
                tracing::debug!("No engine config file found, using defaults");
                Self::default()
            }
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `CONVERGE_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        let durations: [(&str, &mut Duration); 5] = [
            ("CONVERGE_POLL_INTERVAL", &mut self.poll_interval),
            ("CONVERGE_CREATE_TIMEOUT", &mut self.timeouts.create),
            ("CONVERGE_UPDATE_TIMEOUT", &mut self.timeouts.update),
            ("CONVERGE_DELETE_TIMEOUT", &mut self.timeouts.delete),
            ("CONVERGE_ACTION_TIMEOUT", &mut self.timeouts.action),
        ];
        for (var, slot) in durations {
            if let Ok(value) = std::env::var(var) {
                *slot = parse_duration(&value)
                    .map_err(|e| ReconcileError::Config(format!("{}: {}", var, e)))?;
            }
        }

        if let Ok(value) = std::env::var("CONVERGE_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = value.trim().parse().map_err(|_| {
                ReconcileError::Config(format!(
                    "CONVERGE_RETRY_MAX_ATTEMPTS: expected a positive integer, got \"{}\"",
                    value
                ))
            })?;
        }

        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(ReconcileError::Config(
                "poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ReconcileError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ReconcileError::Config(
                "retry.multiplier must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }

    /// Poll settings for a mutation issued by `action`
    pub fn poll_options(&self, action: LifecycleAction) -> PollOptions {
        PollOptions::new(self.timeouts.for_action(action), self.poll_interval)
    }
}

/// Default location of the engine config file
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

fn find_config_file() -> Option<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_VAR) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Some(path);
        }
        tracing::warn!("{} points to a missing file: {}", CONFIG_PATH_VAR, path.display());
    }

    default_config_path().filter(|path| path.exists())
}
