//! Tracing integration for structured logging.
//!
//! Provides logging setup for the helper and the CLI with:
//! - Configurable verbosity levels
//! - Optional file output (served back to controllers by `get_logs`)
//! - JSON or text format

use std::fs::OpenOptions;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::ConfigError;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

/// Maps a verbosity count to a level name (0=warn, 1=info, 2=debug, 3+=trace).
pub fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Initialize the logging system.
///
/// `RUST_LOG` takes precedence over `verbosity` when set.
///
/// # Errors
///
/// Fails if the log file cannot be opened or a global subscriber is
/// already installed.
///
/// # Example
///
/// ```ignore
/// use tunlink::logging::{init_logging, LogFormat};
///
/// init_logging(1, None, LogFormat::Text)?;
/// init_logging(2, Some(Path::new("/var/log/tunlink/helper.log")), LogFormat::Json)?;
/// ```
pub fn init_logging(
    verbosity: u8,
    log_file: Option<&Path>,
    format: LogFormat,
) -> Result<(), ConfigError> {
    let level = level_for(verbosity);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tunlink={level}")));

    let installed = match (log_file, format) {
        (None, LogFormat::Text) => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(verbosity >= 2)
                    .with_line_number(verbosity >= 2),
            )
            .try_init(),
        (None, LogFormat::Json) => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        (Some(path), LogFormat::Text) => {
            let file = open_log_file(path)?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(file)
                        .with_ansi(false)
                        .with_target(true)
                        .with_thread_names(true),
                )
                .try_init()
        }
        (Some(path), LogFormat::Json) => {
            let file = open_log_file(path)?;
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(file))
                .try_init()
        }
    };

    installed.map_err(|e| ConfigError::Logging(e.to_string()))
}

fn open_log_file(path: &Path) -> Result<std::fs::File, ConfigError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })
}

/// Initialize logging with defaults for testing.
///
/// Silently ignores errors (logging may already be initialized).
pub fn init_test_logging() {
    let _ = init_logging(1, None, LogFormat::Text);
}
