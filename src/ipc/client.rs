//! Controller side of the control protocol.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;

use crate::constants::{
    IPC_DIAL_ATTEMPTS, IPC_DIAL_RETRY_DELAY, IPC_DIAL_TIMEOUT, IPC_IO_TIMEOUT,
};
use crate::error::IpcError;
use crate::ipc::{Command, Request, Response};
use crate::state::{Stats, Status};

/// Longest response line accepted.
const MAX_RESPONSE_BYTES: u64 = 1024 * 1024;

/// Talks to a running helper.
#[derive(Debug, Clone)]
pub struct IpcClient {
    addr: String,
    secret: Option<String>,
}

impl IpcClient {
    pub fn new(addr: impl Into<String>, secret: Option<String>) -> Self {
        Self {
            addr: addr.into(),
            secret,
        }
    }

    /// Sends one request and returns the helper's response.
    ///
    /// # Errors
    ///
    /// [`IpcError::Unreachable`] if no dial succeeds, I/O or codec errors, and
    /// [`IpcError::Remote`] for error responses.
    pub fn send(&self, request: Request) -> Result<Response, IpcError> {
        let request = request.with_secret(self.secret.clone());
        let stream = self.dial()?;
        stream.set_read_timeout(Some(IPC_IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IPC_IO_TIMEOUT))?;

        let mut payload = serde_json::to_vec(&request)?;
        payload.push(b'\n');
        (&stream).write_all(&payload)?;

        let mut line = String::new();
        BufReader::new((&stream).take(MAX_RESPONSE_BYTES)).read_line(&mut line)?;
        if line.trim().is_empty() {
            return Err(IpcError::UnexpectedResponse("helper closed the connection".into()));
        }
        let response: Response = serde_json::from_str(&line)?;
        response.into_result()
    }

    fn dial(&self) -> Result<TcpStream, IpcError> {
        let addrs: Vec<SocketAddr> = self
            .addr
            .to_socket_addrs()
            .map_err(IpcError::Unreachable)?
            .collect();

        let mut last_err = std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("no address for {}", self.addr),
        );
        for attempt in 1..=IPC_DIAL_ATTEMPTS {
            for addr in &addrs {
                match TcpStream::connect_timeout(addr, IPC_DIAL_TIMEOUT) {
                    Ok(stream) => return Ok(stream),
                    Err(e) => last_err = e,
                }
            }
            tracing::debug!(attempt, addr = %self.addr, error = %last_err, "IPC dial failed");
            if attempt < IPC_DIAL_ATTEMPTS {
                thread::sleep(IPC_DIAL_RETRY_DELAY);
            }
        }
        Err(IpcError::Unreachable(last_err))
    }

    /// # Errors
    ///
    /// See [`IpcClient::send`].
    pub fn connect(&self, server_addr: &str, token: &str) -> Result<String, IpcError> {
        let response = self.send(Request::connect(server_addr, token))?;
        Ok(response.message.unwrap_or_default())
    }

    /// # Errors
    ///
    /// See [`IpcClient::send`].
    pub fn disconnect(&self) -> Result<String, IpcError> {
        let response = self.send(Request::new(Command::Disconnect))?;
        Ok(response.message.unwrap_or_default())
    }

    /// # Errors
    ///
    /// See [`IpcClient::send`].
    pub fn status(&self) -> Result<Status, IpcError> {
        self.send(Request::new(Command::GetStatus))?.data_as()
    }

    /// # Errors
    ///
    /// See [`IpcClient::send`].
    pub fn stats(&self) -> Result<Stats, IpcError> {
        self.send(Request::new(Command::GetStats))?.data_as()
    }

    /// # Errors
    ///
    /// See [`IpcClient::send`].
    pub fn logs(&self) -> Result<String, IpcError> {
        let response = self.send(Request::new(Command::GetLogs))?;
        Ok(response.message.unwrap_or_default())
    }
}
