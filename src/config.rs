//! Helper configuration.
//!
//! Loaded from `config.toml` in the tunlink config directory. Every field has
//! a default, so a missing file or a partial one is fine.
//!
//! ```toml
//! [ipc]
//! addr = "127.0.0.1:54321"
//!
//! [session]
//! max_attempts = 3
//! handshake_timeout_secs = 15
//!
//! [geo]
//! enabled = true
//!
//! [logging]
//! verbosity = 1
//! format = "json"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::ConfigError;
use crate::logging::LogFormat;
use crate::session::RetryPolicy;

/// Control socket settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Loopback address the helper listens on.
    pub addr: String,
    /// Shared secret file. Defaults to `ipc.secret` in the config directory.
    pub secret_file: Option<PathBuf>,
    /// Reject requests without the shared secret.
    pub require_secret: bool,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            addr: constants::DEFAULT_IPC_ADDR.to_string(),
            secret_file: None,
            require_secret: true,
        }
    }
}

/// Handshake retry and timeout settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub handshake_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_attempts: constants::DEFAULT_MAX_ATTEMPTS,
            initial_backoff_ms: constants::DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: constants::DEFAULT_MAX_BACKOFF_MS,
            backoff_multiplier: constants::DEFAULT_BACKOFF_MULTIPLIER,
            handshake_timeout_secs: constants::DEFAULT_HANDSHAKE_TIMEOUT.as_secs(),
        }
    }
}

impl SessionConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .max_attempts(self.max_attempts)
            .initial_delay(Duration::from_millis(self.initial_backoff_ms))
            .max_delay(Duration::from_millis(self.max_backoff_ms))
            .multiplier(self.backoff_multiplier)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// Geolocation lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    pub enabled: bool,
    pub primary_url: String,
    /// Empty string disables the fallback.
    pub fallback_url: String,
    pub timeout_secs: u64,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            primary_url: constants::GEO_API_PRIMARY.to_string(),
            fallback_url: constants::GEO_API_FALLBACK.to_string(),
            timeout_secs: constants::GEO_TIMEOUT_SECS,
        }
    }
}

/// Log output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base verbosity, raised by each `-v` on the command line.
    pub verbosity: u8,
    pub format: LogFormat,
    /// Log file of `serve`. Defaults to `helper.log` in the config directory.
    pub file: Option<PathBuf>,
    /// Log to stderr instead of a file when serving.
    pub stderr: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            verbosity: 1,
            format: LogFormat::Text,
            file: None,
            stderr: false,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ipc: IpcConfig,
    pub session: SessionConfig,
    pub geo: GeoConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Loads `path`, falling back to defaults if the file does not exist.
    ///
    /// # Errors
    ///
    /// Unreadable or unparseable files and out-of-range values.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        Self::from_toml(&raw)
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] or [`ConfigError::Invalid`].
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values serde cannot.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let addr: SocketAddr = self
            .ipc
            .addr
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("ipc.addr `{}` is not a socket address", self.ipc.addr)))?;
        if !addr.ip().is_loopback() {
            tracing::warn!(%addr, "IPC socket is not bound to loopback");
        }
        if self.session.max_attempts == 0 {
            return Err(ConfigError::Invalid("session.max_attempts must be at least 1".into()));
        }
        if self.session.handshake_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "session.handshake_timeout_secs must be at least 1".into(),
            ));
        }
        if self.session.initial_backoff_ms > self.session.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "session.initial_backoff_ms must be <= session.max_backoff_ms".into(),
            ));
        }
        if !self.session.backoff_multiplier.is_finite() || self.session.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid("session.backoff_multiplier must be >= 1.0".into()));
        }
        Ok(())
    }

    /// Default config directory (`<config_dir>/tunlink`).
    ///
    /// # Errors
    ///
    /// [`ConfigError::NoConfigDir`] on platforms without one.
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(constants::APP_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Path of the config file: `explicit` if given, otherwise the default.
    ///
    /// # Errors
    ///
    /// See [`Config::default_dir`].
    pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
        match explicit {
            Some(path) => Ok(path.to_path_buf()),
            None => Ok(Self::default_dir()?.join(constants::CONFIG_FILE_NAME)),
        }
    }

    /// Secret file, relative to the directory of the loaded config.
    pub fn secret_path(&self, config_dir: &Path) -> PathBuf {
        self.ipc
            .secret_file
            .clone()
            .unwrap_or_else(|| config_dir.join(constants::SECRET_FILE_NAME))
    }

    /// Helper log file, or `None` when logging to stderr.
    pub fn log_path(&self, config_dir: &Path) -> Option<PathBuf> {
        if self.logging.stderr {
            return None;
        }
        Some(
            self.logging
                .file
                .clone()
                .unwrap_or_else(|| config_dir.join(constants::LOG_FILE_NAME)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.ipc.addr, "127.0.0.1:54321");
        assert_eq!(config.session.retry_policy(), RetryPolicy::default());
        assert_eq!(config.session.handshake_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [session]
            max_attempts = 5

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.session.max_attempts, 5);
        assert_eq!(config.session.initial_backoff_ms, 500);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.geo.enabled);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = Config::from_toml("[session]\nmax_attempts = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = Config::from_toml("[ipc]\naddr = \"localhost\"").unwrap_err();
        assert!(err.to_string().contains("ipc.addr"));

        let err = Config::from_toml("[session]\nmax_attempts = \"three\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let path = std::env::temp_dir().join(format!("tunlink-missing-{}.toml", std::process::id()));
        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_derived_paths() {
        let dir = Path::new("/etc/tunlink");
        let mut config = Config::default();
        assert_eq!(config.secret_path(dir), dir.join("ipc.secret"));
        assert_eq!(config.log_path(dir), Some(dir.join("helper.log")));

        config.logging.stderr = true;
        assert_eq!(config.log_path(dir), None);
    }
}
