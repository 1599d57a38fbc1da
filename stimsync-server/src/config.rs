use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::tracker::TrackerLayout;

/// Where one screen process listens.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScreenEndpoint {
    pub name: String,
    pub command_addr: String,
    #[serde(default)]
    pub offset_addr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
    pub addr: String,
    pub max_attempts: usize,
    pub read_timeout_ms: u64,
    pub sync_trace_path: Option<PathBuf>,
    pub layout: TrackerLayout,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:33334".to_string(),
            max_attempts: 64,
            read_timeout_ms: 100,
            sync_trace_path: None,
            layout: TrackerLayout::default(),
        }
    }
}

/// Controller settings: control surface, screen roster, optional tracker.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub control_addr: String,
    pub screens: Vec<ScreenEndpoint>,
    pub send_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Commands that get the controller's wall-clock reading as `t`.
    pub time_stamp_commands: Vec<String>,
    pub tracker: Option<TrackerConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            control_addr: "127.0.0.1:60629".to_string(),
            screens: Vec::new(),
            send_timeout_ms: 500,
            connect_timeout_ms: 500,
            time_stamp_commands: ["start_stim", "pause_stim", "update_stim"]
                .map(String::from)
                .to_vec(),
            tracker: None,
        }
    }
}

impl ServerConfig {
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
        for (i, screen) in self.screens.iter().enumerate() {
            if self.screens[..i].iter().any(|s| s.name == screen.name) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate screen name `{}`",
                    screen.name
                )));
            }
        }
        if self.send_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "timeouts must be at least 1 ms".to_string(),
            ));
        }
        if let Some(tracker) = &self.tracker {
            if tracker.max_attempts == 0 {
                return Err(ConfigError::Invalid(
                    "tracker.max_attempts must be at least 1".to_string(),
                ));
            }
            tracker.layout.validate().map_err(ConfigError::Invalid)?;
        }
        Ok(())
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RIG: &str = r#"
control_addr = "0.0.0.0:7000"

[[screens]]
name = "left"
command_addr = "127.0.0.1:7001"
offset_addr = "127.0.0.1:7101"

[[screens]]
name = "right"
command_addr = "127.0.0.1:7002"

[tracker]
addr = "127.0.0.1:2000"

[tracker.layout]
heading_index = 15
"#;

    #[test]
    fn parses_rig_with_defaults() {
        let config = ServerConfig::from_toml_str(RIG).unwrap();
        assert_eq!(config.screens.len(), 2);
        assert_eq!(config.screens[1].offset_addr, None);
        assert_eq!(config.time_stamp_commands.len(), 3);
        assert_eq!(config.send_timeout(), Duration::from_millis(500));

        let tracker = config.tracker.unwrap();
        assert_eq!(tracker.max_attempts, 64);
        assert_eq!(tracker.layout.heading_index, 15);
        assert_eq!(tracker.layout.timestamp_index, 21);
    }

    #[test]
    fn rejects_duplicate_screens() {
        let text = "[[screens]]\nname = \"a\"\ncommand_addr = \"x:1\"\n\n[[screens]]\nname = \"a\"\ncommand_addr = \"x:2\"\n";
        assert!(matches!(
            ServerConfig::from_toml_str(text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        fs::write(&path, "send_timeout_ms = 50").unwrap();
        assert_eq!(ServerConfig::load(&path).unwrap().send_timeout_ms, 50);
        assert!(matches!(
            ServerConfig::load(dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
