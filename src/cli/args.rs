//! Command-line argument definitions.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

/// tunlink - VPN helper session manager
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to config.toml (defaults to the user config directory)
    #[arg(long, global = true, env = "TUNLINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the helper: control socket in front of the session manager
    Serve,
    /// Ask the helper to connect to a control server
    Connect {
        /// Control server address (host:port)
        #[arg(long)]
        server: String,
        /// Bootstrap token
        #[arg(long, env = "TUNLINK_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// Ask the helper to tear the session down
    Disconnect,
    /// Show the current session status
    Status,
    /// Show traffic counters of the current session
    Stats,
    /// Print the last helper log lines
    Logs,
    /// Look up the geolocation of an address (or of our public address)
    IpInfo {
        /// Address to look up
        ip: Option<IpAddr>,
    },
}
