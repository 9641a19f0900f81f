//! Installer settings, stored as `settings.yaml` in the state directory.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::convergence::retry::{BackoffStrategy, RetryPolicy};
use crate::error::{InstallerError, Result};

/// The current settings version. Bump this when the settings format changes.
pub const SETTINGS_VERSION: &str = "0.2.0";

/// Tunables for the installer. Every field has a default, so partial files
/// load; unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerSettings {
    /// Settings format version.
    pub version: String,
    /// Registry file, relative to the state directory.
    pub registry_file: String,
    /// Staging directory, relative to the state directory.
    pub staging_dir: String,
    /// Timeline root, relative to the state directory.
    pub timeline_dir: String,
    /// Start level for modules that declare none.
    pub default_start_level: u32,
    /// Pause between cycles when only retries remain.
    pub retry_delay_ms: u64,
    /// How the pause grows over consecutive retry-only cycles.
    pub retry_backoff: BackoffStrategy,
    /// Upper bound for the pause.
    pub max_retry_delay_ms: u64,
    /// Background service wake interval.
    pub idle_poll_ms: u64,
    /// Schedule a refresh after module updates, as after removals.
    pub refresh_after_update: bool,
    /// How long to wait for the state directory lock.
    pub lock_timeout_ms: u64,
}

impl Default for InstallerSettings {
    fn default() -> Self {
        InstallerSettings {
            version: SETTINGS_VERSION.into(),
            registry_file: "registry.json".into(),
            staging_dir: "staging".into(),
            timeline_dir: "timeline".into(),
            default_start_level: 20,
            retry_delay_ms: 1000,
            retry_backoff: BackoffStrategy::Fixed,
            max_retry_delay_ms: 30_000,
            idle_poll_ms: 500,
            refresh_after_update: true,
            lock_timeout_ms: 2000,
        }
    }
}

impl InstallerSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_backoff, self.retry_delay_ms, self.max_retry_delay_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    /// Reject values the installer cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.registry_file.trim().is_empty() {
            return Err(InstallerError::Settings("registry_file is empty".into()));
        }
        if self.staging_dir.trim().is_empty() {
            return Err(InstallerError::Settings("staging_dir is empty".into()));
        }
        if self.idle_poll_ms == 0 {
            return Err(InstallerError::Settings("idle_poll_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Load settings from a YAML file.
pub fn load(path: &Path) -> Result<InstallerSettings> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        InstallerError::Settings(format!("cannot read {}: {}", path.display(), e))
    })?;
    parse(&content)
}

/// Parse settings from a YAML string. An empty document yields defaults.
pub fn parse(content: &str) -> Result<InstallerSettings> {
    if content.trim().is_empty() {
        return Ok(InstallerSettings::default());
    }
    let settings: InstallerSettings = serde_yaml::from_str(content)
        .map_err(|e| InstallerError::Settings(format!("invalid settings: {}", e)))?;
    settings.validate()?;
    Ok(settings)
}

/// Save settings to a YAML file.
pub fn save(path: &Path, settings: &InstallerSettings) -> Result<()> {
    let content = serde_yaml::to_string(settings)
        .map_err(|e| InstallerError::Settings(format!("cannot serialize settings: {}", e)))?;
    std::fs::write(path, content).map_err(|e| {
        InstallerError::Settings(format!("cannot write {}: {}", path.display(), e))
    })
}
