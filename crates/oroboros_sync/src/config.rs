//! # Sync Configuration
//!
//! Tunables for the locking subsystem, loaded once at startup.
//!
//! ```toml
//! enabled = true
//! default_priority = 50
//! max_arbiters = 256
//! wait_strategy = "park"
//! park_timeout_us = 250
//! stall_warn_iterations = 100000
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Priority given to every freshly registered arbiter.
pub const DEFAULT_PRIORITY: i32 = 50;

/// How a blocked `acquire` waits between rescans.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategy {
    /// Give up the time slice once per retry.
    #[default]
    Yield,
    /// Busy spin with a CPU pause hint once per retry.
    Spin,
    /// Sleep on the context condvar until an ownership change or timeout.
    Park,
}

/// Configuration for a [`SyncContext`](crate::SyncContext).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Whether acquire/release coordinate at all.
    ///
    /// `false` turns both into no-ops for single-threaded builds.
    pub enabled: bool,
    /// Starting priority of every arbiter.
    pub default_priority: i32,
    /// Maximum number of arbiters (one per worker thread).
    pub max_arbiters: usize,
    /// Wait behaviour of blocked acquires.
    pub wait_strategy: WaitStrategy,
    /// Upper bound on a single condvar sleep (microseconds).
    ///
    /// Only used with [`WaitStrategy::Park`].
    pub park_timeout_us: u64,
    /// Retry count after which a stalled acquire logs a warning.
    ///
    /// Zero disables the warning.
    pub stall_warn_iterations: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_priority: DEFAULT_PRIORITY,
            max_arbiters: 1024,
            wait_strategy: WaitStrategy::Yield,
            park_timeout_us: 500,
            stall_warn_iterations: 1_000_000,
        }
    }
}

impl SyncConfig {
    /// Config with coordination switched off.
    #[must_use]
    pub fn single_threaded() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Parses a config from TOML text. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidConfig` if the text is not valid TOML for
    /// this config or fails [`validate`](Self::validate).
    pub fn from_toml_str(text: &str) -> SyncResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| SyncError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a config from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::ConfigIo` if the file cannot be read, otherwise
    /// the same errors as [`from_toml_str`](Self::from_toml_str).
    pub fn from_toml_file(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SyncError::ConfigIo(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Checks the config for values the subsystem cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidConfig` if `max_arbiters` is zero or does
    /// not fit in a `u32`, or if `park_timeout_us` is zero.
    pub fn validate(&self) -> SyncResult<()> {
        if self.max_arbiters == 0 {
            return Err(SyncError::InvalidConfig(
                "max_arbiters must be greater than zero".into(),
            ));
        }
        if u32::try_from(self.max_arbiters).is_err() {
            return Err(SyncError::InvalidConfig(format!(
                "max_arbiters {} exceeds u32 range",
                self.max_arbiters
            )));
        }
        if self.park_timeout_us == 0 {
            return Err(SyncError::InvalidConfig(
                "park_timeout_us must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SyncConfig::default();
        assert!(config.enabled);
        assert_eq!(config.default_priority, DEFAULT_PRIORITY);
        assert_eq!(config.wait_strategy, WaitStrategy::Yield);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_single_threaded_disables_coordination() {
        let config = SyncConfig::single_threaded();
        assert!(!config.enabled);
        assert_eq!(config.max_arbiters, SyncConfig::default().max_arbiters);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = SyncConfig::from_toml_str(
            r#"
            wait_strategy = "park"
            max_arbiters = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.wait_strategy, WaitStrategy::Park);
        assert_eq!(config.max_arbiters, 8);
        assert_eq!(config.default_priority, DEFAULT_PRIORITY);
        assert!(config.enabled);
    }

    #[test]
    fn test_from_toml_rejects_zero_arbiters() {
        let err = SyncConfig::from_toml_str("max_arbiters = 0").unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfig(_)));
    }

    #[test]
    fn test_validate_rejects_zero_park_timeout() {
        let config = SyncConfig {
            park_timeout_us: 0,
            ..SyncConfig::default()
        };
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn test_from_toml_rejects_unknown_strategy() {
        let err = SyncConfig::from_toml_str(r#"wait_strategy = "sleep""#).unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfig(_)));
    }

    #[test]
    fn test_shipped_config_parses() {
        let config = SyncConfig::from_toml_str(include_str!("../config/sync.toml")).unwrap();
        assert_eq!(config.wait_strategy, WaitStrategy::Park);
        assert_eq!(config.max_arbiters, 64);
        assert_eq!(config.park_timeout_us, 250);
    }

    #[test]
    fn test_from_missing_file() {
        let path = std::env::temp_dir().join("oroboros_sync_missing_config.toml");
        let err = SyncConfig::from_toml_file(&path).unwrap_err();
        assert!(matches!(err, SyncError::ConfigIo(_)));
    }

    #[test]
    fn test_from_toml_file() {
        let id = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("oroboros_sync_config_{id}.toml"));
        std::fs::write(&path, "default_priority = 7\nenabled = false\n").unwrap();

        let config = SyncConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.default_priority, 7);
        assert!(!config.enabled);

        std::fs::remove_file(&path).ok();
    }
}
