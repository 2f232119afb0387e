//! Local control protocol between controllers and the helper.
//!
//! One newline-terminated JSON [`Request`] per TCP connection, answered by one
//! [`Response`]. Requests must carry the shared secret unless the helper was
//! started without one.

pub mod client;
pub mod server;

use std::fmt;
use std::path::Path;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::constants::{IPC_SECRET_BYTES, IPC_STATUS_ERROR, IPC_STATUS_SUCCESS};
use crate::error::IpcError;

pub use client::IpcClient;
pub use server::IpcServer;

/// Control commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Connect,
    Disconnect,
    GetStatus,
    GetStats,
    GetLogs,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::GetStatus => "get_status",
            Self::GetStats => "get_stats",
            Self::GetLogs => "get_logs",
        };
        f.write_str(name)
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub command: Command,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipc_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Request {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            ipc_secret: None,
            server_addr: None,
            token: None,
        }
    }

    pub fn connect(server_addr: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            server_addr: Some(server_addr.into()),
            token: Some(token.into()),
            ..Self::new(Command::Connect)
        }
    }

    #[must_use]
    pub fn with_secret(mut self, secret: Option<String>) -> Self {
        self.ipc_secret = secret;
        self
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("command", &self.command)
            .field("ipc_secret", &self.ipc_secret.as_ref().map(|_| "<redacted>"))
            .field("server_addr", &self.server_addr)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Response {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: IPC_STATUS_SUCCESS.to_string(),
            message: Some(message.into()),
            data: None,
        }
    }

    /// Success carrying `data`.
    ///
    /// # Errors
    ///
    /// If `data` cannot be represented as JSON.
    pub fn with_data<T: Serialize>(data: &T) -> Result<Self, IpcError> {
        Ok(Self {
            status: IPC_STATUS_SUCCESS.to_string(),
            message: None,
            data: Some(serde_json::to_value(data)?),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: IPC_STATUS_ERROR.to_string(),
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == IPC_STATUS_SUCCESS
    }

    /// Turns an error response into [`IpcError::Remote`].
    ///
    /// # Errors
    ///
    /// [`IpcError::Remote`] with the helper's message.
    pub fn into_result(self) -> Result<Self, IpcError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(IpcError::Remote(self.message.unwrap_or_else(|| self.status.clone())))
        }
    }

    /// Decodes the `data` payload.
    ///
    /// # Errors
    ///
    /// [`IpcError::UnexpectedResponse`] if there is none, or a codec error.
    pub fn data_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T, IpcError> {
        let data = self
            .data
            .clone()
            .ok_or_else(|| IpcError::UnexpectedResponse("missing data".into()))?;
        Ok(serde_json::from_value(data)?)
    }
}

/// Generates a fresh hex secret.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; IPC_SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Reads the secret at `path`, creating it if missing or empty.
///
/// # Errors
///
/// I/O errors reading or writing the file.
pub fn load_or_create_secret(path: &Path) -> Result<String, IpcError> {
    match std::fs::read_to_string(path) {
        Ok(raw) if !raw.trim().is_empty() => return Ok(raw.trim().to_string()),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let secret = generate_secret();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, &secret)?;
    restrict_permissions(path)?;
    tracing::info!(path = %path.display(), "generated new IPC secret");
    Ok(secret)
}

/// Reads an existing secret without creating one.
///
/// # Errors
///
/// I/O errors other than a missing file.
pub fn read_secret(path: &Path) -> Result<Option<String>, IpcError> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw.trim().to_string()).filter(|s| !s.is_empty())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Compares secrets without short-circuiting on the first mismatch.
pub(crate) fn secrets_match(expected: &str, given: &str) -> bool {
    let (a, b) = (expected.as_bytes(), given.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Stats;

    #[test]
    fn test_request_wire_format() {
        let req = Request::connect("vpn.example:443", "abc123").with_secret(Some("s3".into()));
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "command": "connect",
                "ipc_secret": "s3",
                "server_addr": "vpn.example:443",
                "token": "abc123"
            })
        );

        let parsed: Request = serde_json::from_str(r#"{"command":"get_stats"}"#).unwrap();
        assert_eq!(parsed, Request::new(Command::GetStats));
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"command":"reboot"}"#).is_err());
    }

    #[test]
    fn test_request_debug_redacts_credentials() {
        let req = Request::connect("vpn.example:443", "abc123").with_secret(Some("s3cr3t".into()));
        let debug = format!("{req:?}");
        assert!(!debug.contains("abc123"));
        assert!(!debug.contains("s3cr3t"));
    }

    #[test]
    fn test_error_response_becomes_remote_error() {
        let err = Response::error("already connected").into_result().unwrap_err();
        assert!(matches!(err, IpcError::Remote(ref m) if m == "already connected"));
    }

    #[test]
    fn test_data_payload() {
        let stats = Stats {
            bytes_sent: 100,
            bytes_recv: 250,
            uptime_seconds: 5,
        };
        let resp = Response::with_data(&stats).unwrap();
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("message"));
        assert_eq!(resp.data_as::<Stats>().unwrap(), stats);
        assert!(Response::success("ok").data_as::<Stats>().is_err());
    }

    #[test]
    fn test_secret_file_is_created_once() {
        let dir = std::env::temp_dir().join(format!("tunlink-secret-{}", std::process::id()));
        let path = dir.join("ipc.secret");
        let _ = std::fs::remove_file(&path);

        let first = load_or_create_secret(&path).unwrap();
        assert_eq!(first.len(), IPC_SECRET_BYTES * 2);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(load_or_create_secret(&path).unwrap(), first);
        assert_eq!(read_secret(&path).unwrap(), Some(first));

        let _ = std::fs::remove_dir_all(&dir);
        assert_eq!(read_secret(&path).unwrap(), None);
    }

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match("abcd", "abcd"));
        assert!(!secrets_match("abcd", "abce"));
        assert!(!secrets_match("abcd", "abc"));
    }
}
