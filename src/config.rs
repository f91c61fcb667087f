//! Engine configuration with TOML support
//!
//! Configuration is constructed explicitly and passed into the engine;
//! nothing is read from ambient global state. Every field carries a
//! serde default, so a partial TOML file works.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// How long a downsample lease is held before it self-expires, in seconds
    #[serde(default = "default_lease_duration")]
    pub lease_duration_secs: u64,

    /// How far into the past a released lease is backdated, in seconds
    ///
    /// A freshly created metric starts with its leases backdated by this
    /// amount, meaning "not running".
    #[serde(default = "default_lease_backdate")]
    pub lease_backdate_secs: u64,
}

fn default_lease_duration() -> u64 {
    60
}

fn default_lease_backdate() -> u64 {
    3_600
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lease_duration_secs: default_lease_duration(),
            lease_backdate_secs: default_lease_backdate(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: EngineConfig =
            toml::from_str(&text).map_err(|e| Error::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.lease_duration_secs == 0 {
            return Err(Error::Configuration(
                "lease_duration_secs must be > 0".to_string(),
            ));
        }
        if self.lease_backdate_secs == 0 {
            return Err(Error::Configuration(
                "lease_backdate_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.lease_duration_secs, 60);
        assert_eq!(config.lease_backdate_secs, 3_600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str("lease_duration_secs = 5").unwrap();
        assert_eq!(config.lease_duration_secs, 5);
        assert_eq!(config.lease_backdate_secs, 3_600);
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(
            &path,
            "lease_duration_secs = 30\nlease_backdate_secs = 600\n",
        )
        .unwrap();

        let config = EngineConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.lease_duration_secs, 30);
        assert_eq!(config.lease_backdate_secs, 600);
    }

    #[test]
    fn test_from_toml_file_missing() {
        assert!(matches!(
            EngineConfig::from_toml_file("/nonexistent/datastream.toml"),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_lease() {
        let config = EngineConfig {
            lease_duration_secs: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::Configuration(_))
        ));
    }
}
