//! Application-wide constants and configuration values.
//!
//! This module defines all static configuration values used throughout tunlink,
//! including timing intervals, retry defaults, endpoints, file names and
//! user-facing messages.

use std::time::Duration;

// === Application Metadata ===

/// Application name (from Cargo.toml).
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
/// Current application version (from Cargo.toml). Announced to servers as the helper version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// === Session Defaults ===

/// Handshake attempts per connect before the session moves to Error.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Delay before the first handshake retry in milliseconds.
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;
/// Upper bound for a single backoff delay in milliseconds.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 8_000;
/// Backoff growth factor between attempts.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
/// Timeout applied to each handshake attempt.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);
/// Poll interval of the tunnel monitor while waiting for traffic events.
pub const TUNNEL_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Status updates queued per subscriber before newer ones are dropped.
pub const STATUS_FEED_CAPACITY: usize = 64;

// === Handshake Wire Format ===

/// Message type tag of a login request.
pub const LOGIN_REQUEST_TYPE: &str = "login_request";
/// Message type tag of a login response.
pub const LOGIN_RESPONSE_TYPE: &str = "login_response";
/// Status value of an accepted login.
pub const LOGIN_STATUS_SUCCESS: &str = "success";
/// Longest bootstrap token accepted before any network call.
pub const MAX_TOKEN_LEN: usize = 512;
/// Upper bound on the size of a login response line.
pub const MAX_LOGIN_RESPONSE_BYTES: u64 = 16 * 1024;

// === IPC ===

/// Default local address of the helper control socket.
pub const DEFAULT_IPC_ADDR: &str = "127.0.0.1:54321";
/// Connect attempts made by the IPC client.
pub const IPC_DIAL_ATTEMPTS: u32 = 3;
/// Pause between IPC dial attempts.
pub const IPC_DIAL_RETRY_DELAY: Duration = Duration::from_millis(200);
/// Connect timeout of a single IPC dial.
pub const IPC_DIAL_TIMEOUT: Duration = Duration::from_secs(2);
/// Read/write deadline for one IPC exchange.
pub const IPC_IO_TIMEOUT: Duration = Duration::from_secs(5);
/// Control connections served at once; further ones are turned away.
pub const IPC_MAX_CONNECTIONS: usize = 16;
/// Number of random bytes in a generated IPC secret.
pub const IPC_SECRET_BYTES: usize = 32;
/// Lines returned by the `get_logs` command.
pub const LOG_TAIL_LINES: usize = 200;

// === Path Configuration ===

/// Name of the configuration file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";
/// Name of the IPC secret file inside the config directory.
pub const SECRET_FILE_NAME: &str = "ipc.secret";
/// Name of the helper log file inside the config directory.
pub const LOG_FILE_NAME: &str = "helper.log";

// === Geolocation API Endpoints ===

/// Primary geolocation endpoint (IP, city, country and ISP).
pub const GEO_API_PRIMARY: &str = "http://ip-api.com/json/";
/// Fallback geolocation endpoint.
pub const GEO_API_FALLBACK: &str = "https://ipinfo.io/";
/// Timeout for geolocation calls in seconds.
pub const GEO_TIMEOUT_SECS: u64 = 10;

// === Messages ===

/// IPC response status for accepted commands.
pub const IPC_STATUS_SUCCESS: &str = "success";
/// IPC response status for rejected commands.
pub const IPC_STATUS_ERROR: &str = "error";
/// Returned to requests carrying a wrong secret.
pub const MSG_UNAUTHORIZED: &str = "unauthorized: invalid IPC secret";
/// Returned after a connect command was accepted.
pub const MSG_CONNECTING: &str = "Connecting...";
/// Returned after a disconnect command completed.
pub const MSG_DISCONNECTED: &str = "Disconnected";
/// Reported when the tunnel transport ends on its own.
pub const MSG_TUNNEL_CLOSED: &str = "tunnel transport closed";
/// Placeholder for fields without data.
pub const MSG_NO_DATA: &str = "---";
