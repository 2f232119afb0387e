//! Plain data types shared between the session core, the IPC layer and the CLI.

mod connection;

pub use connection::{InitialConfig, IpInfo, ServerIdentity, StateKind, Stats, Status};
