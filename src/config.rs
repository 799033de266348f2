//! Configuration for stamp-engine

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::EngineError;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stamp-engine")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the SQLite database
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Database file name inside `storage_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Verification and reward tuning
    #[serde(default)]
    pub engine: EngineSettings,
}

/// Tunable constants for visit verification and rewards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Maximum distance between claimed GPS position and venue
    #[serde(default = "default_gps_threshold")]
    pub gps_threshold_meters: f64,

    /// Minimum time between two stamps at the same venue
    #[serde(default = "default_cooldown_hours")]
    pub cooldown_hours: u32,

    /// Visit requests allowed per user per rate limit window
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max_requests: u32,

    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_minutes: u32,

    /// Flat XP granted for every recorded visit
    #[serde(default = "default_base_visit_xp")]
    pub base_visit_xp: i64,

    /// Whether manual check-ins count toward challenge progress
    #[serde(default = "default_true")]
    pub count_manual_visits: bool,
}

fn default_database_file() -> String {
    "stamps.db".to_string()
}

fn default_gps_threshold() -> f64 {
    50.0
}

fn default_cooldown_hours() -> u32 {
    24
}

fn default_rate_limit_max() -> u32 {
    10
}

fn default_rate_limit_window() -> u32 {
    60
}

fn default_base_visit_xp() -> i64 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            gps_threshold_meters: default_gps_threshold(),
            cooldown_hours: default_cooldown_hours(),
            rate_limit_max_requests: default_rate_limit_max(),
            rate_limit_window_minutes: default_rate_limit_window(),
            base_visit_xp: default_base_visit_xp(),
            count_manual_visits: true,
        }
    }
}

impl EngineSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::hours(i64::from(self.cooldown_hours))
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::minutes(i64::from(self.rate_limit_window_minutes))
    }

    /// Reject settings that would disable a check by accident
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.gps_threshold_meters.is_finite() && self.gps_threshold_meters > 0.0) {
            return Err(EngineError::Config(format!(
                "gps_threshold_meters must be positive, got {}",
                self.gps_threshold_meters
            )));
        }
        if self.rate_limit_max_requests == 0 || self.rate_limit_window_minutes == 0 {
            return Err(EngineError::Config(
                "rate limit requests and window must be non-zero".into(),
            ));
        }
        if self.base_visit_xp < 0 {
            return Err(EngineError::Config("base_visit_xp must not be negative".into()));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            database_file: default_database_file(),
            engine: EngineSettings::default(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| EngineError::Config(e.to_string()))?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), EngineError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| EngineError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join(&self.database_file)
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_published_constants() {
        let settings = EngineSettings::default();
        assert_eq!(settings.gps_threshold_meters, 50.0);
        assert_eq!(settings.cooldown(), Duration::hours(24));
        assert_eq!(settings.rate_limit_max_requests, 10);
        assert_eq!(settings.rate_limit_window(), Duration::minutes(60));
        assert_eq!(settings.base_visit_xp, 10);
        assert!(settings.count_manual_visits);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            storage_dir = "/tmp/stamps"

            [engine]
            cooldown_hours = 12
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.cooldown_hours, 12);
        assert_eq!(config.engine.rate_limit_max_requests, 10);
        assert_eq!(config.database_path(), PathBuf::from("/tmp/stamps/stamps.db"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.engine.base_visit_xp = 25;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.engine, config.engine);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let mut settings = EngineSettings::default();
        settings.gps_threshold_meters = 0.0;
        assert!(settings.validate().is_err());

        let mut settings = EngineSettings::default();
        settings.rate_limit_max_requests = 0;
        assert!(settings.validate().is_err());
    }
}
