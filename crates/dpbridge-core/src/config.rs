//! Engine configuration.
//!
//! Defaults live here so the CLI and library agree on them. A TOML file may
//! override the defaults, and environment variables override both.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default catalog locations, relative to the working directory.
pub mod defaults {
    pub const FINGERPRINTS_PATH: &str = "data/fingerprints.json";
    pub const PROFILES_PATH: &str = "data/profiles.json";
    pub const EVENT_CAPACITY: usize = 256;
}

/// Environment variable names.
pub mod env_vars {
    pub const FINGERPRINTS: &str = "DPBRIDGE_FINGERPRINTS";
    pub const PROFILES: &str = "DPBRIDGE_PROFILES";
    pub const STRICT: &str = "DPBRIDGE_STRICT";
    pub const QUERY_ON_INSTALL: &str = "DPBRIDGE_QUERY_ON_INSTALL";
    pub const TIME_SYNC_ON_PAIR: &str = "DPBRIDGE_TIME_SYNC_ON_PAIR";
    pub const TIME_SYNC_INTERVAL: &str = "DPBRIDGE_TIME_SYNC_INTERVAL";
    pub const LOG_JSON: &str = "DPBRIDGE_LOG_JSON";

    /// Read a boolean flag, accepting `true/false/1/0/yes/no`.
    pub fn flag(name: &str) -> Option<bool> {
        std::env::var(name)
            .ok()
            .and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            })
    }

    /// Read a whole number of seconds.
    pub fn seconds(name: &str) -> Option<u64> {
        std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
    }

    pub fn path(name: &str) -> Option<std::path::PathBuf> {
        std::env::var_os(name)
            .filter(|v| !v.is_empty())
            .map(std::path::PathBuf::from)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path to `fingerprints.json`.
    pub fingerprints_path: PathBuf,
    /// Path to `profiles.json`.
    pub profiles_path: PathBuf,
    /// Reject profiles whose capabilities lack a trait when building the engine.
    pub strict_validation: bool,
    /// Send one datapoint query after pairing to seed capability state.
    pub query_on_install: bool,
    /// Push the host clock to the device right after pairing.
    pub time_sync_on_pair: bool,
    /// Re-send the host clock on this period; `None` or 0 disables it.
    pub time_sync_interval_secs: Option<u64>,
    /// Buffer size of the engine event bus.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fingerprints_path: PathBuf::from(defaults::FINGERPRINTS_PATH),
            profiles_path: PathBuf::from(defaults::PROFILES_PATH),
            strict_validation: true,
            query_on_install: true,
            time_sync_on_pair: false,
            time_sync_interval_secs: None,
            event_capacity: defaults::EVENT_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document; missing keys fall back to defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid config: {}", e),
            ))
        })
    }

    /// Load a TOML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(Self::from_toml_str(&content)?.with_env_overrides())
    }

    /// Load from an optional file; without one, start from defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default().with_env_overrides()),
        }
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(p) = env_vars::path(env_vars::FINGERPRINTS) {
            self.fingerprints_path = p;
        }
        if let Some(p) = env_vars::path(env_vars::PROFILES) {
            self.profiles_path = p;
        }
        if let Some(v) = env_vars::flag(env_vars::STRICT) {
            self.strict_validation = v;
        }
        if let Some(v) = env_vars::flag(env_vars::QUERY_ON_INSTALL) {
            self.query_on_install = v;
        }
        if let Some(v) = env_vars::flag(env_vars::TIME_SYNC_ON_PAIR) {
            self.time_sync_on_pair = v;
        }
        if let Some(v) = env_vars::seconds(env_vars::TIME_SYNC_INTERVAL) {
            self.time_sync_interval_secs = Some(v);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.strict_validation);
        assert!(config.query_on_install);
        assert!(!config.time_sync_on_pair);
        assert_eq!(config.time_sync_interval_secs, None);
        assert_eq!(config.fingerprints_path, PathBuf::from("data/fingerprints.json"));
    }

    #[test]
    fn test_partial_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            profiles_path = "/etc/dpbridge/profiles.json"
            query_on_install = false
            "#,
        )
        .unwrap();
        assert_eq!(config.profiles_path, PathBuf::from("/etc/dpbridge/profiles.json"));
        assert!(!config.query_on_install);
        assert!(config.strict_validation);
    }

    #[test]
    fn test_time_sync_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            time_sync_on_pair = true
            time_sync_interval_secs = 86400
            "#,
        )
        .unwrap();
        assert!(config.time_sync_on_pair);
        assert_eq!(config.time_sync_interval_secs, Some(86_400));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(EngineConfig::from_toml_str("strict_validation = \"maybe\"").is_err());
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "event_capacity = 16").unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.event_capacity, 16);
    }
}
