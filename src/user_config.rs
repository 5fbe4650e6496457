use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::video::ReconnectPolicy;

/// On-disk daemon configuration (`config.toml` in the config dir).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// v4l2loopback device number (/dev/video<N>)
    pub video_nr: u32,
    /// scrcpy quality preset: "low_latency", "balanced", "high_quality"
    pub preset: String,
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            video_nr: 10,
            preset: "balanced".to_string(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            backoff_ms: 1500,
        }
    }
}

impl UserConfig {
    pub fn load(path: &Path) -> Result<Self> {
        tracing::trace!(path = %path.display(), "Loading daemon config");

        if !path.exists() {
            tracing::trace!("Config file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;

        Ok(())
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: self.reconnect.enabled,
            max_attempts: self.reconnect.max_attempts,
            backoff_ms: self.reconnect.backoff_ms,
        }
        .normalized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = UserConfig::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.video_nr, 10);
        assert_eq!(config.preset, "balanced");
        assert!(config.reconnect.enabled);
        assert_eq!(config.reconnect.max_attempts, 3);
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = UserConfig::default();
        config.video_nr = 7;
        config.reconnect.backoff_ms = 500;
        config.save(&path).unwrap();

        let loaded = UserConfig::load(&path).unwrap();
        assert_eq!(loaded.video_nr, 7);
        assert_eq!(loaded.reconnect.backoff_ms, 500);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "video_nr = 3\n").unwrap();

        let config = UserConfig::load(&path).unwrap();
        assert_eq!(config.video_nr, 3);
        assert_eq!(config.preset, "balanced");
    }

    #[test]
    fn reconnect_policy_is_normalized() {
        let mut config = UserConfig::default();
        config.reconnect.max_attempts = 99;
        config.reconnect.backoff_ms = 1;
        let policy = config.reconnect_policy();
        assert_eq!(policy.max_attempts, 20);
        assert_eq!(policy.backoff_ms, 100);
    }
}
