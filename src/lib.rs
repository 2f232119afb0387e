//! tunlink: connection session manager of a privileged VPN helper.
//!
//! The helper accepts connect and disconnect commands from a local
//! controller, authenticates against a control server with a bootstrap token,
//! keeps one tunnel session alive and reports its status and traffic.
//!
//! - [`session`]: state machine, retries and the [`session::SessionManager`] façade
//! - [`vpn`]: login handshake, tunnel transport boundary, version policy
//! - [`core`]: traffic counters and geolocation
//! - [`ipc`]: local control protocol
//! - [`cli`]: the `tunlink` binary

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod event;
pub mod ipc;
pub mod logging;
pub mod session;
pub mod state;
pub mod utils;
pub mod vpn;

pub use config::Config;
pub use error::{ConnectError, DisconnectError, HandshakeError, SessionError};
pub use session::{ConnectOutcome, SessionManager};
pub use state::{InitialConfig, Stats, Status};
