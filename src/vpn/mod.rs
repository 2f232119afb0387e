//! The connection path: login handshake, tunnel transport boundary and
//! version policy.

pub mod handshake;
pub mod tunnel;
pub mod version;

pub use handshake::{HandshakeResult, Handshaker, TcpHandshaker};
pub use tunnel::{ChannelTunnel, SessionInfo, TrafficEvent, TrafficFeed, TunnelMonitor, TunnelTransport};
