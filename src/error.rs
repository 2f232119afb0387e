//! Error types for tunlink.

use std::fmt;

use thiserror::Error;

use crate::state::StateKind;

/// Required field of an [`InitialConfig`](crate::state::InitialConfig).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigField {
    /// Control-server address.
    Server,
    /// Bootstrap token.
    Token,
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigField::Server => write!(f, "server"),
            ConfigField::Token => write!(f, "token"),
        }
    }
}

/// Rejections of a connect request.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// A required field is missing. Never retried.
    #[error("invalid config: {0} must not be empty")]
    InvalidConfig(ConfigField),

    /// A session is already active or being torn down.
    #[error("already {state}")]
    AlreadyConnected { state: StateKind },

    /// The handshake worker could not be started.
    #[error("failed to start handshake worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Rejections of a disconnect request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DisconnectError {
    /// Nothing to disconnect.
    #[error("not connected (state: {state})")]
    NotConnected { state: StateKind },
}

/// Failures of a single handshake with the control server.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandshakeError {
    /// Token failed local format validation; no network call was made.
    #[error("invalid token format")]
    InvalidToken,

    /// The exchange did not finish within the caller's timeout.
    #[error("handshake timed out")]
    Timeout,

    /// The server could not be reached.
    #[error("server unreachable: {0}")]
    Unreachable(String),

    /// The server rejected the token.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The server answered with something that is not a login response.
    #[error("malformed handshake response: {0}")]
    Malformed(String),

    /// Helper and server versions are too far apart.
    #[error("incompatible versions: helper {helper}, server {server}")]
    IncompatibleVersion { helper: String, server: String },

    /// Superseded by a disconnect.
    #[error("handshake cancelled")]
    Cancelled,
}

impl HandshakeError {
    /// Returns true if another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HandshakeError::Timeout | HandshakeError::Unreachable(_) | HandshakeError::AuthFailed(_)
        )
    }
}

/// A state-machine callback arrived in a state that does not accept it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("protocol violation: {operation} not valid in state {state}")]
pub struct ProtocolViolation {
    /// Callback that was rejected.
    pub operation: &'static str,
    /// State at the time of the call.
    pub state: StateKind,
}

/// Tunnel transport failures.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The transport refused to start.
    #[error("tunnel start failed: {0}")]
    Start(String),

    /// The monitor thread could not be spawned.
    #[error("tunnel monitor: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything a connect attempt can end with.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error(transparent)]
    Violation(#[from] ProtocolViolation),

    /// The worker thread panicked.
    #[error("handshake worker panicked")]
    WorkerPanicked,
}

/// Geolocation lookup failures. Swallowed by the session manager.
#[derive(Debug, Error)]
pub enum GeoError {
    #[error("geolocation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid geolocation endpoint: {0}")]
    Url(#[from] url::ParseError),

    #[error("geolocation service returned no usable data")]
    Empty,
}

/// Helper control protocol failures.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("cannot reach helper: {0}")]
    Unreachable(std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The helper answered with an error status.
    #[error("{0}")]
    Remote(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no config directory available on this platform")]
    NoConfigDir,

    #[error("invalid config value: {0}")]
    Invalid(String),

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
