use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CornerSquareConfig {
    pub toggle: bool,
    pub visible: bool,
    pub color: f64,
}

impl Default for CornerSquareConfig {
    fn default() -> Self {
        Self {
            toggle: true,
            visible: true,
            color: 0.0,
        }
    }
}

/// Settings of one screen process.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScreenConfig {
    pub name: String,
    pub id: u32,
    /// Where the controller delivers command batches.
    pub command_addr: String,
    /// UDP address of the closed-loop side channel; `None` disables it.
    pub offset_addr: Option<String>,
    pub target_fps: f64,
    pub idle_background: f64,
    pub corner_square: CornerSquareConfig,
    pub sync_trace_path: Option<PathBuf>,
    pub profile_max_samples: usize,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            name: "screen".to_string(),
            id: 0,
            command_addr: "127.0.0.1:60630".to_string(),
            offset_addr: Some("127.0.0.1:60640".to_string()),
            target_fps: 120.0,
            idle_background: 0.5,
            corner_square: CornerSquareConfig::default(),
            sync_trace_path: None,
            profile_max_samples: 100_000,
        }
    }
}

impl ScreenConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.target_fps.is_finite() && self.target_fps > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "target_fps must be positive, got {}",
                self.target_fps
            )));
        }
        if self.profile_max_samples == 0 {
            return Err(ConfigError::Invalid(
                "profile_max_samples must be at least 1".to_string(),
            ));
        }
        if self.command_addr.is_empty() {
            return Err(ConfigError::Invalid("command_addr is empty".to_string()));
        }
        Ok(())
    }

    pub fn frame_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.target_fps)
    }
}
