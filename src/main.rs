//! tunlink - privileged VPN helper and its control CLI.

use clap::Parser;
use color_eyre::Result;

use tunlink::cli::{args::Args, commands};

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    commands::run(args)
}
