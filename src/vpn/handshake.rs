//! Login handshake with the control server.
//!
//! The exchange is a single newline-delimited JSON request/response pair:
//! the helper sends its bootstrap token and version, the server answers with
//! the session identity (assigned VIP, server VIP, server version) or an error.
//! Channel security belongs to the transport below this module.
//!
//! A handshake never retries on its own; the session manager owns the retry
//! policy so that it stays observable.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::HandshakeError;
use crate::session::CancelToken;
use crate::state::InitialConfig;

/// Identity returned by a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    pub server_vip: String,
    pub assigned_vip: String,
    pub helper_version: String,
    pub server_version: String,
}

/// Performs the network exchange that turns a token into a session identity.
pub trait Handshaker: Send + Sync {
    /// Negotiates a session with `config.server`.
    ///
    /// Implementations must give up with [`HandshakeError::Timeout`] once
    /// `timeout` has elapsed and with [`HandshakeError::Cancelled`] soon after
    /// `cancel` fires.
    ///
    /// # Errors
    ///
    /// See [`HandshakeError`] for the failure taxonomy.
    fn negotiate(
        &self,
        config: &InitialConfig,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<HandshakeResult, HandshakeError>;
}

/// Login request sent by the helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub token: String,
    pub client_version: String,
    pub os: String,
}

/// Login response sent by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub assigned_vip: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subnet_mask: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_vip: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Checks the token format before any network call.
///
/// # Errors
///
/// Returns [`HandshakeError::InvalidToken`] for empty, oversized, or
/// whitespace/control-character tokens.
pub fn validate_token(token: &str) -> Result<(), HandshakeError> {
    let well_formed = !token.is_empty()
        && token.len() <= constants::MAX_TOKEN_LEN
        && !token.chars().any(|c| c.is_whitespace() || c.is_control());
    if well_formed {
        Ok(())
    } else {
        Err(HandshakeError::InvalidToken)
    }
}

/// Interprets a login response.
///
/// # Errors
///
/// [`HandshakeError::AuthFailed`] when the server rejected the token,
/// [`HandshakeError::Malformed`] when required fields are missing.
pub fn interpret_response(
    resp: LoginResponse,
    helper_version: &str,
) -> Result<HandshakeResult, HandshakeError> {
    if resp.kind != constants::LOGIN_RESPONSE_TYPE {
        return Err(HandshakeError::Malformed(format!(
            "unexpected message type {:?}",
            resp.kind
        )));
    }
    if resp.status != constants::LOGIN_STATUS_SUCCESS {
        let message = if resp.message.is_empty() {
            "login rejected".to_string()
        } else {
            resp.message
        };
        return Err(HandshakeError::AuthFailed(message));
    }
    if resp.assigned_vip.is_empty() {
        return Err(HandshakeError::Malformed("missing assigned_vip".to_string()));
    }

    Ok(HandshakeResult {
        server_vip: resp.server_vip,
        assigned_vip: resp.assigned_vip,
        helper_version: helper_version.to_string(),
        server_version: resp.server_version,
    })
}

/// Handshake over a plain TCP connection.
#[derive(Debug, Clone)]
pub struct TcpHandshaker {
    client_version: String,
}

impl Default for TcpHandshaker {
    fn default() -> Self {
        Self::new(constants::APP_VERSION)
    }
}

impl TcpHandshaker {
    pub fn new(client_version: impl Into<String>) -> Self {
        Self {
            client_version: client_version.into(),
        }
    }

    fn dial(server: &str, deadline: Instant) -> Result<TcpStream, HandshakeError> {
        let addrs: Vec<SocketAddr> = server
            .to_socket_addrs()
            .map_err(|e| HandshakeError::Unreachable(format!("{server}: {e}")))?
            .collect();

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, remaining(deadline)?) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "handshake dial failed");
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) => io_error(&e),
            None => HandshakeError::Unreachable(format!("{server}: no addresses")),
        })
    }

    fn exchange(
        &self,
        stream: &TcpStream,
        token: &str,
        deadline: Instant,
    ) -> Result<HandshakeResult, HandshakeError> {
        let request = LoginRequest {
            kind: constants::LOGIN_REQUEST_TYPE.to_string(),
            token: token.to_string(),
            client_version: self.client_version.clone(),
            os: std::env::consts::OS.to_string(),
        };
        let mut payload = serde_json::to_vec(&request)
            .map_err(|e| HandshakeError::Malformed(e.to_string()))?;
        payload.push(b'\n');

        stream
            .set_write_timeout(Some(remaining(deadline)?))
            .map_err(|e| io_error(&e))?;
        let mut writer = stream;
        writer.write_all(&payload).map_err(|e| io_error(&e))?;
        writer.flush().map_err(|e| io_error(&e))?;

        stream
            .set_read_timeout(Some(remaining(deadline)?))
            .map_err(|e| io_error(&e))?;
        let mut line = String::new();
        BufReader::new(stream.take(constants::MAX_LOGIN_RESPONSE_BYTES))
            .read_line(&mut line)
            .map_err(|e| io_error(&e))?;
        if line.trim().is_empty() {
            return Err(HandshakeError::Malformed(
                "connection closed before login response".to_string(),
            ));
        }

        let resp: LoginResponse =
            serde_json::from_str(line.trim()).map_err(|e| HandshakeError::Malformed(e.to_string()))?;
        interpret_response(resp, &self.client_version)
    }
}

impl Handshaker for TcpHandshaker {
    fn negotiate(
        &self,
        config: &InitialConfig,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<HandshakeResult, HandshakeError> {
        validate_token(&config.token)?;
        if cancel.is_cancelled() {
            return Err(HandshakeError::Cancelled);
        }

        let deadline = Instant::now() + timeout;
        let stream = Self::dial(&config.server, deadline)?;

        // Cancellation unblocks the pending read/write by closing the socket.
        if let Ok(handle) = stream.try_clone() {
            cancel.on_cancel(move || {
                let _ = handle.shutdown(Shutdown::Both);
            });
        }

        let result = self.exchange(&stream, &config.token, deadline);
        let _ = stream.shutdown(Shutdown::Both);

        if cancel.is_cancelled() {
            return Err(HandshakeError::Cancelled);
        }
        result
    }
}

fn remaining(deadline: Instant) -> Result<Duration, HandshakeError> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        Err(HandshakeError::Timeout)
    } else {
        Ok(left)
    }
}

fn io_error(err: &io::Error) -> HandshakeError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => HandshakeError::Timeout,
        _ => HandshakeError::Unreachable(err.to_string()),
    }
}
