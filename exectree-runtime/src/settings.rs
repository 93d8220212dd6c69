//! Runtime settings.
//!
//! Settings are loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML file (if specified via EXECTREE_CONFIG or --config)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Runtime settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Fan-out settings.
    pub dispatch: DispatchSettings,
    /// Simulated leaf work for the operator binary.
    pub demo: DemoSettings,
}

impl Settings {
    /// Loads settings from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, SettingsError> {
        let mut settings = Self::default();

        if let Ok(path) = std::env::var("EXECTREE_CONFIG") {
            settings = Self::from_file(&path)?;
        }

        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::Io(path.to_path_buf(), e))?;
        let settings: Settings = serde_yaml::from_str(&content)
            .map_err(|e| SettingsError::Parse(path.to_path_buf(), e.to_string()))?;
        Ok(settings)
    }

    /// Applies environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.dispatch.apply_env_overrides();
        self.demo.apply_env_overrides();
    }

    /// Rejects settings the runtime cannot work with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.dispatch.timeout_ms == 0 {
            return Err(SettingsError::Validation(
                "dispatch.timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves settings to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| SettingsError::Parse(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| SettingsError::Io(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// What a node does with a long transition whose children did not all succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stay in the in-progress state; `end_<trigger>` is not fired.
    #[default]
    Hold,
    /// Fire `end_<trigger>` anyway; the report still carries the failure.
    Complete,
}

impl FromStr for FailurePolicy {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hold" => Ok(FailurePolicy::Hold),
            "complete" => Ok(FailurePolicy::Complete),
            other => Err(SettingsError::Validation(format!(
                "unknown failure policy '{}' (expected 'hold' or 'complete')",
                other
            ))),
        }
    }
}

/// Fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// How long a node waits for its children's reports, in milliseconds.
    pub timeout_ms: u64,
    /// Handling of failed or timed-out long transitions.
    pub failure_policy: FailurePolicy,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            failure_policy: FailurePolicy::Hold,
        }
    }
}

impl DispatchSettings {
    fn apply_env_overrides(&mut self) {
        if let Ok(timeout) = std::env::var("EXECTREE_DISPATCH_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.timeout_ms = ms;
            }
        }

        if let Ok(policy) = std::env::var("EXECTREE_FAILURE_POLICY") {
            match policy.parse() {
                Ok(p) => self.failure_policy = p,
                Err(e) => tracing::warn!("ignoring EXECTREE_FAILURE_POLICY: {}", e),
            }
        }
    }

    /// Returns the fan-out timeout as Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

/// Simulated leaf work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
    /// How long each simulated leaf hook sleeps, in milliseconds.
    pub work_ms: u64,
    /// Leaves whose simulated hooks fail.
    pub fail_nodes: Vec<String>,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            work_ms: 500,
            fail_nodes: Vec::new(),
        }
    }
}

impl DemoSettings {
    fn apply_env_overrides(&mut self) {
        if let Ok(work) = std::env::var("EXECTREE_DEMO_WORK_MS") {
            if let Ok(ms) = work.parse() {
                self.work_ms = ms;
            }
        }

        if let Ok(nodes) = std::env::var("EXECTREE_DEMO_FAIL") {
            self.fail_nodes = nodes
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(String::from)
                .collect();
        }
    }

    pub fn work(&self) -> Duration {
        Duration::from_millis(self.work_ms)
    }
}

/// Settings error.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read config file '{}': {}", .0.display(), .1)]
    Io(PathBuf, std::io::Error),

    #[error("failed to parse config file '{}': {}", .0.display(), .1)]
    Parse(PathBuf, String),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}
