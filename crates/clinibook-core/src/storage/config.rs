//! TOML-based scheduling configuration.
//!
//! Carries the deployment-level booking policy and the store location.
//! Stored at `~/.config/clinibook/config.toml`; a missing file yields the
//! defaults, and every field is individually overridable.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::error::ConfigError;
use crate::rules::BookingPolicy;

/// Deployment configuration for the scheduling core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulingConfig {
    #[serde(default)]
    pub policy: BookingPolicy,
    /// Override for the appointment database location.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

impl SchedulingConfig {
    /// Load from the default location, falling back to defaults if the
    /// file does not exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        toml::from_str(&raw).map_err(|e| ConfigError::ParseFailed(e.to_string()))
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::default_path()?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let raw = toml::to_string_pretty(self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        std::fs::write(path, raw).map_err(|e| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    fn default_path() -> Result<PathBuf, ConfigError> {
        let dir = data_dir().map_err(|e| ConfigError::LoadFailed {
            path: PathBuf::from("~/.config/clinibook"),
            message: e.to_string(),
        })?;
        Ok(dir.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = SchedulingConfig::default();
        config.policy.min_lead_minutes = 60;
        config.save_to(&path).unwrap();

        let loaded = SchedulingConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[policy]\nmax_advance_days = 60\n").unwrap();

        let loaded = SchedulingConfig::load_from(&path).unwrap();
        assert_eq!(loaded.policy.max_advance_days, 60);
        assert_eq!(loaded.policy.min_lead_minutes, 120);
        assert!(loaded.database_path.is_none());
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "policy = 3").unwrap();
        assert!(matches!(
            SchedulingConfig::load_from(&path),
            Err(ConfigError::ParseFailed(_))
        ));
    }
}
