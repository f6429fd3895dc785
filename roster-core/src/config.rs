//! Configuration for the session registry.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Registry tuning knobs.
///
/// Loaded from TOML; every field has a default so an empty file is valid.
///
/// ```toml
/// recycle_period = "30s"
/// session_timeout = "2m"
/// inbound_capacity = 64
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Interval between recycle sweep ticks.
    #[serde(default = "default_recycle_period", with = "humantime_serde")]
    pub recycle_period: Duration,

    /// Idle time after which a session is considered expired.
    #[serde(default = "default_session_timeout", with = "humantime_serde")]
    pub session_timeout: Duration,

    /// Capacity of each session's inbound channel. Zero disables inbound channels.
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,

    /// Where snapshots are dumped to and loaded from.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,

    /// Random bytes per session id when using [`crate::RandomTokenIds`].
    #[serde(default = "default_id_bytes")]
    pub id_bytes: usize,
}

fn default_recycle_period() -> Duration {
    Duration::from_secs(30)
}

fn default_session_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_inbound_capacity() -> usize {
    64
}

fn default_snapshot_path() -> PathBuf {
    roster_paths::snapshot_path()
}

fn default_id_bytes() -> usize {
    32
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            recycle_period: default_recycle_period(),
            session_timeout: default_session_timeout(),
            inbound_capacity: default_inbound_capacity(),
            snapshot_path: default_snapshot_path(),
            id_bytes: default_id_bytes(),
        }
    }
}

impl RegistryConfig {
    /// Parse a config from TOML text and validate it.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: RegistryConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Read the config from the default location, falling back to defaults
    /// when no file exists there.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = roster_paths::config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Reject values the sweeper or id generator cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recycle_period.is_zero() {
            return Err(ConfigError::Invalid(
                "recycle_period must be non-zero".to_string(),
            ));
        }
        if self.session_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "session_timeout must be non-zero".to_string(),
            ));
        }
        if self.id_bytes == 0 {
            return Err(ConfigError::Invalid("id_bytes must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Inbound channel capacity, or `None` when inbound channels are disabled.
    pub fn inbound(&self) -> Option<usize> {
        (self.inbound_capacity > 0).then_some(self.inbound_capacity)
    }

    #[must_use]
    pub fn with_recycle_period(mut self, period: Duration) -> Self {
        self.recycle_period = period;
        self
    }

    #[must_use]
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Set the inbound channel capacity; zero disables inbound channels.
    #[must_use]
    pub fn with_inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = path.into();
        self
    }

    #[must_use]
    pub fn with_id_bytes(mut self, bytes: usize) -> Self {
        self.id_bytes = bytes;
        self
    }
}
