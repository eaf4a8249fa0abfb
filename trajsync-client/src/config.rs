//! Client configuration loading
//!
//! Reads `config.toml` from the trajsync config directory. Every field has
//! a default, so an absent file or a partial one is fine.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use trajsync_utils::{config_file, Result, TrajsyncError};

use crate::connection::ChannelOptions;
use crate::poller::PollSettings;

/// Default schedule server address
pub const DEFAULT_ADDRESS: &str = "ws://localhost:8006";

/// Default lookahead window (1 min)
pub const DEFAULT_LOOKAHEAD_MS: u64 = 60_000;

/// Trajectory animation speed; also sets how often trajectories are polled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AnimationSpeed {
    Slow,
    #[default]
    Normal,
    Fast,
}

impl AnimationSpeed {
    /// Length of one animation pass, which is also the polling period
    pub fn duration(&self) -> Duration {
        match self {
            AnimationSpeed::Slow => Duration::from_millis(4000),
            AnimationSpeed::Normal => Duration::from_millis(2000),
            AnimationSpeed::Fast => Duration::from_millis(1000),
        }
    }
}

/// How the rendering side animates trajectories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TrajectoryAnimation {
    None,
    Fill,
    #[default]
    Follow,
    Outline,
}

/// Client configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server: ServerConfig,
    pub trajectory: TrajectoryConfig,
    /// Named server addresses, usable in place of `--addr`
    pub remotes: HashMap<String, String>,
}

/// Schedule server connection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address URL (ws://, wss://, tcp:// or unix://)
    pub address: String,
    pub connect_timeout_ms: u64,
    pub response_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.into(),
            connect_timeout_ms: 5000,
            response_timeout_ms: 10_000,
        }
    }
}

/// Trajectory polling and animation settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrajectoryConfig {
    pub lookahead_ms: u64,
    pub animation_speed: AnimationSpeed,
    pub animation: TrajectoryAnimation,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            lookahead_ms: DEFAULT_LOOKAHEAD_MS,
            animation_speed: AnimationSpeed::default(),
            animation: TrajectoryAnimation::default(),
        }
    }
}

impl TrajectoryConfig {
    /// Ratio of trajectory time to animation time
    pub fn animation_scale(&self) -> f64 {
        self.lookahead_ms as f64 / self.animation_speed.duration().as_millis() as f64
    }
}

impl ClientConfig {
    /// Load from an explicit path; a missing or malformed file is an error
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| TrajsyncError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&content).map_err(|e| TrajsyncError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load from the default location, falling back to defaults
    pub fn load_default() -> Self {
        let path = config_file();

        if !path.exists() {
            tracing::debug!("Config file not found, using defaults");
            return Self::default();
        }

        match Self::load_from_path(&path) {
            Ok(config) => {
                tracing::debug!(path = %path.display(), "Loaded config");
                config
            }
            Err(e) => {
                tracing::warn!("Failed to load config file: {}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Resolve the server address: an explicit address or remote alias
    /// wins over the configured one
    pub fn resolve_address(&self, requested: Option<&str>) -> String {
        match requested {
            Some(name) => self
                .remotes
                .get(name)
                .cloned()
                .unwrap_or_else(|| name.to_string()),
            None => self.server.address.clone(),
        }
    }

    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            connect_timeout: Duration::from_millis(self.server.connect_timeout_ms),
            response_timeout: Duration::from_millis(self.server.response_timeout_ms),
            ..ChannelOptions::default()
        }
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            period: self.trajectory.animation_speed.duration(),
            lookahead_ms: self.trajectory.lookahead_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_empty_config() {
        let config = ClientConfig::parse("").unwrap();
        assert_eq!(config.server.address, DEFAULT_ADDRESS);
        assert_eq!(config.trajectory.lookahead_ms, 60_000);
        assert_eq!(config.trajectory.animation_speed, AnimationSpeed::Normal);
        assert_eq!(config.trajectory.animation, TrajectoryAnimation::Follow);
        assert!(config.remotes.is_empty());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
            [server]
            address = "tcp://10.0.0.2:9000"

            [trajectory]
            animation_speed = "fast"
        "#;
        let config = ClientConfig::parse(toml).unwrap();
        assert_eq!(config.server.address, "tcp://10.0.0.2:9000");
        assert_eq!(config.server.response_timeout_ms, 10_000);
        assert_eq!(config.trajectory.animation_speed, AnimationSpeed::Fast);
        assert_eq!(config.poll_settings().period, Duration::from_millis(1000));
    }

    #[test]
    fn test_animation_speed_periods() {
        assert_eq!(AnimationSpeed::Slow.duration(), Duration::from_millis(4000));
        assert_eq!(AnimationSpeed::Normal.duration(), Duration::from_millis(2000));
        assert_eq!(AnimationSpeed::Fast.duration(), Duration::from_millis(1000));
    }

    #[test]
    fn test_animation_scale() {
        let config = TrajectoryConfig::default();
        assert_eq!(config.animation_scale(), 30.0);
    }

    #[test]
    fn test_resolve_address() {
        let toml = r#"
            [remotes]
            depot = "ws://192.168.1.5:8006"
        "#;
        let config = ClientConfig::parse(toml).unwrap();
        assert_eq!(config.resolve_address(Some("depot")), "ws://192.168.1.5:8006");
        assert_eq!(config.resolve_address(Some("tcp://h:1")), "tcp://h:1");
        assert_eq!(config.resolve_address(None), DEFAULT_ADDRESS);
    }

    #[test]
    fn test_channel_options_from_config() {
        let config = ClientConfig::parse("[server]\nconnect_timeout_ms = 250").unwrap();
        let options = config.channel_options();
        assert_eq!(options.connect_timeout, Duration::from_millis(250));
        assert_eq!(options.response_timeout, Duration::from_millis(10_000));
    }

    #[test]
    fn test_load_from_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[trajectory]\nlookahead_ms = 30000").unwrap();

        let config = ClientConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.trajectory.lookahead_ms, 30_000);
        assert_eq!(config.poll_settings().lookahead_ms, 30_000);
    }

    #[test]
    fn test_load_from_path_invalid() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[trajectory]\nanimation_speed = \"warp\"").unwrap();

        let err = ClientConfig::load_from_path(file.path()).unwrap_err();
        assert!(matches!(err, TrajsyncError::ConfigInvalid { .. }));
    }

    #[test]
    fn test_load_from_missing_path() {
        let err = ClientConfig::load_from_path(Path::new("/nonexistent/trajsync.toml")).unwrap_err();
        assert!(matches!(err, TrajsyncError::FileRead { .. }));
    }
}
