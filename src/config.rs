//! Configuration types for the capability gate.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{GateError, Result};
use crate::permissions::ApiLevel;

/// Top-level gate configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Permission policy settings.
    pub permissions: PermissionConfig,
    /// Remediation prompting behaviour.
    pub remediation: RemediationConfig,
    /// Stream delivery settings.
    pub stream: StreamConfig,
}

/// Permission policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    /// API level at or above which (for both platform and target) the
    /// fine-location permission replaces coarse location.
    pub modern_api_level: u32,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            modern_api_level: ApiLevel::Q.0,
        }
    }
}

/// Where a re-evaluation triggered by an auxiliary-service notification starts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecheckMode {
    /// Re-verify radio, permissions and auxiliary service on every trigger.
    #[default]
    Full,
    /// Resume at the auxiliary-service check, trusting earlier results.
    ResumeAtService,
}

/// Remediation prompting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemediationConfig {
    /// Consecutive radio-enable prompts before the gate stops asking.
    ///
    /// `0` retries indefinitely.
    pub max_radio_prompts: u32,
    /// Seconds to wait for a user decision before treating it as unavailable.
    ///
    /// `0` waits forever.
    pub prompt_timeout_secs: u64,
    /// Re-check scope for auxiliary-service notifications.
    pub recheck: RecheckMode,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            max_radio_prompts: 3,
            prompt_timeout_secs: 0,
            recheck: RecheckMode::Full,
        }
    }
}

impl RemediationConfig {
    /// Prompt timeout, or `None` when prompts wait indefinitely.
    #[must_use]
    pub fn prompt_timeout(&self) -> Option<Duration> {
        (self.prompt_timeout_secs > 0).then(|| Duration::from_secs(self.prompt_timeout_secs))
    }

    /// Whether another radio prompt is allowed after `attempts` prompts.
    #[must_use]
    pub fn allows_radio_prompt(&self, attempts: u32) -> bool {
        self.max_radio_prompts == 0 || attempts < self.max_radio_prompts
    }
}

/// Stream delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Capacity of the bounded queue feeding the delivery context.
    pub delivery_queue_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            delivery_queue_capacity: 256,
        }
    }
}

impl GateConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| GateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| GateError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the gate cannot operate with.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.permissions.modern_api_level == 0 {
            return Err(GateError::Config(
                "permissions.modern_api_level must be greater than zero".to_owned(),
            ));
        }
        if self.stream.delivery_queue_capacity == 0 {
            return Err(GateError::Config(
                "stream.delivery_queue_capacity must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path: `~/.config/sensor-gate/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("sensor-gate").join("config.toml")
        } else if let Some(config) = dirs::config_dir() {
            config.join("sensor-gate").join("config.toml")
        } else {
            std::env::temp_dir()
                .join("sensor-gate-config")
                .join("config.toml")
        }
    }
}
