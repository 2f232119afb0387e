//! Helper side of the control protocol.
//!
//! Accepts connections on a loopback socket and serves each on its own
//! thread, one request and one response per connection. At most
//! [`IPC_MAX_CONNECTIONS`] are served at once; connections beyond that are
//! closed unanswered.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::constants::{
    IPC_IO_TIMEOUT, IPC_MAX_CONNECTIONS, LOG_TAIL_LINES, MSG_CONNECTING, MSG_DISCONNECTED,
    MSG_UNAUTHORIZED,
};
use crate::error::IpcError;
use crate::ipc::{secrets_match, Command, Request, Response};
use crate::session::SessionManager;
use crate::state::InitialConfig;

/// Longest request line accepted.
const MAX_REQUEST_BYTES: u64 = 64 * 1024;

struct Shared {
    manager: Arc<SessionManager>,
    secret: Option<String>,
    log_file: Option<PathBuf>,
}

/// Live connection handlers, counted against a fixed limit.
#[derive(Debug)]
struct ConnectionSlots {
    active: Arc<AtomicUsize>,
    limit: usize,
}

/// Held by a handler thread; frees its slot when dropped.
#[derive(Debug)]
struct Slot {
    active: Arc<AtomicUsize>,
}

impl ConnectionSlots {
    fn new(limit: usize) -> Self {
        Self {
            active: Arc::default(),
            limit,
        }
    }

    fn try_acquire(&self) -> Option<Slot> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.limit).then_some(n + 1)
            })
            .ok()?;
        Some(Slot {
            active: Arc::clone(&self.active),
        })
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Control socket in front of a [`SessionManager`].
pub struct IpcServer {
    listener: TcpListener,
    shared: Shared,
    max_connections: usize,
}

impl IpcServer {
    /// Binds the control socket.
    ///
    /// With `secret` set, requests must carry the same value.
    ///
    /// # Errors
    ///
    /// [`IpcError::Io`] if the address cannot be bound.
    pub fn bind(
        addr: &str,
        manager: Arc<SessionManager>,
        secret: Option<String>,
    ) -> Result<Self, IpcError> {
        let listener = TcpListener::bind(addr)?;
        if secret.is_none() {
            tracing::warn!("IPC server running without a shared secret");
        }
        Ok(Self {
            listener,
            shared: Shared {
                manager,
                secret,
                log_file: None,
            },
            max_connections: IPC_MAX_CONNECTIONS,
        })
    }

    /// Builder method to set the file served by `get_logs`.
    #[must_use]
    pub fn with_log_file(mut self, path: Option<PathBuf>) -> Self {
        self.shared.log_file = path;
        self
    }

    /// Builder method to change how many connections are served at once.
    #[must_use]
    pub fn with_max_connections(mut self, limit: usize) -> Self {
        self.max_connections = limit.max(1);
        self
    }

    /// Address actually bound (useful with port 0).
    ///
    /// # Errors
    ///
    /// Propagates the socket error.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the listener fails.
    ///
    /// # Errors
    ///
    /// Only if the listener itself breaks; per-connection errors are logged.
    pub fn serve(self) -> Result<(), IpcError> {
        tracing::info!(addr = %self.local_addr()?, "IPC server listening");
        let shared = Arc::new(self.shared);
        let slots = ConnectionSlots::new(self.max_connections);
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to accept IPC connection");
                    continue;
                }
            };
            let Some(slot) = slots.try_acquire() else {
                tracing::warn!(limit = slots.limit, "too many IPC connections, closing new one");
                continue;
            };
            let shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name("ipc-conn".into())
                .spawn(move || {
                    let _slot = slot;
                    shared.handle(stream);
                });
            if let Err(e) = spawned {
                tracing::error!(error = %e, "failed to spawn IPC handler");
            }
        }
        Ok(())
    }

    /// Runs [`IpcServer::serve`] on a background thread.
    ///
    /// # Errors
    ///
    /// If the thread cannot be spawned.
    pub fn spawn(self) -> std::io::Result<JoinHandle<Result<(), IpcError>>> {
        thread::Builder::new()
            .name("ipc-server".into())
            .spawn(move || self.serve())
    }
}

impl Shared {
    fn handle(&self, stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map_or_else(|_| "unknown".to_string(), |a| a.to_string());
        if let Err(e) = self.exchange(stream, &peer) {
            tracing::debug!(%peer, error = %e, "IPC exchange failed");
        }
    }

    fn exchange(&self, stream: TcpStream, peer: &str) -> Result<(), IpcError> {
        stream.set_read_timeout(Some(IPC_IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IPC_IO_TIMEOUT))?;

        let mut line = String::new();
        BufReader::new((&stream).take(MAX_REQUEST_BYTES)).read_line(&mut line)?;

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => self.dispatch(request, peer),
            Err(e) => {
                tracing::debug!(%peer, error = %e, "malformed IPC request");
                Response::error(format!("invalid request: {e}"))
            }
        };

        let mut payload = serde_json::to_vec(&response)?;
        payload.push(b'\n');
        (&stream).write_all(&payload)?;
        Ok(())
    }

    fn dispatch(&self, request: Request, peer: &str) -> Response {
        if let Some(expected) = &self.secret {
            let given = request.ipc_secret.as_deref().unwrap_or_default();
            if !secrets_match(expected, given) {
                tracing::warn!(%peer, command = %request.command, "blocked unauthenticated IPC request");
                return Response::error(MSG_UNAUTHORIZED);
            }
        }

        match request.command {
            Command::Connect => {
                let config = InitialConfig::new(
                    request.server_addr.unwrap_or_default(),
                    request.token.unwrap_or_default(),
                );
                tracing::info!(server = %config.server, "IPC connect");
                match self.manager.connect(config) {
                    Ok(_attempt) => Response::success(MSG_CONNECTING),
                    Err(e) => Response::error(e.to_string()),
                }
            }
            Command::Disconnect => {
                tracing::info!("IPC disconnect");
                match self.manager.disconnect() {
                    Ok(()) => Response::success(MSG_DISCONNECTED),
                    Err(e) => Response::error(e.to_string()),
                }
            }
            Command::GetStatus => data_response(&self.manager.status()),
            Command::GetStats => data_response(&self.manager.stats()),
            Command::GetLogs => match &self.log_file {
                Some(path) => match tail_lines(path, LOG_TAIL_LINES) {
                    Ok(lines) => Response::success(lines),
                    Err(e) => Response::error(format!("failed to read logs: {e}")),
                },
                None => Response::error("helper is not logging to a file"),
            },
        }
    }
}

fn data_response<T: serde::Serialize>(data: &T) -> Response {
    Response::with_data(data).unwrap_or_else(|e| Response::error(e.to_string()))
}

/// Last `count` lines of the file at `path`, newline-joined.
///
/// # Errors
///
/// I/O errors opening or reading the file.
pub fn tail_lines(path: &Path, count: usize) -> std::io::Result<String> {
    let content = std::fs::read_to_string(path)?;
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(count);
    Ok(lines[start..].join("\n"))
}
