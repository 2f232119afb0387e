//! CLI command handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;

use crate::cli::args::{Args, Commands};
use crate::cli::report;
use crate::config::Config;
use crate::core::{GeoLookup, IpApiLookup};
use crate::ipc::{self, IpcClient, IpcServer};
use crate::logging::{self, LogFormat};
use crate::session::SessionManager;
use crate::utils;
use crate::vpn::{ChannelTunnel, TcpHandshaker};

/// Loaded configuration plus the directory it lives in.
struct Context {
    config: Config,
    dir: PathBuf,
}

impl Context {
    fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = Config::resolve_path(explicit)?;
        let config = Config::load(&path).wrap_err_with(|| format!("loading {}", path.display()))?;
        let dir = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Ok(Self { config, dir })
    }

    fn client(&self) -> IpcClient {
        let secret = match ipc::read_secret(&self.config.secret_path(&self.dir)) {
            Ok(secret) => secret,
            Err(e) => {
                tracing::debug!(error = %e, "cannot read IPC secret, sending without one");
                None
            }
        };
        IpcClient::new(self.config.ipc.addr.clone(), secret)
    }

    fn geo(&self) -> Result<Option<Arc<dyn GeoLookup>>> {
        let geo = &self.config.geo;
        if !geo.enabled {
            return Ok(None);
        }
        let fallback = Some(geo.fallback_url.as_str()).filter(|u| !u.is_empty());
        let lookup: Arc<dyn GeoLookup> = Arc::new(IpApiLookup::with_endpoints(
            &geo.primary_url,
            fallback,
            Duration::from_secs(geo.timeout_secs),
        )?);
        Ok(Some(lookup))
    }
}

/// Runs the parsed command line.
///
/// # Errors
///
/// Any failure is reported to the user by `main`.
pub fn run(args: Args) -> Result<()> {
    let ctx = Context::load(args.config.as_deref())?;

    match args.command {
        Commands::Serve => serve(&ctx, args.verbose),
        command => {
            // Client commands log to stderr only, quiet unless asked.
            logging::init_logging(args.verbose, None, LogFormat::Text)?;
            run_client(&ctx, command)
        }
    }
}

fn run_client(ctx: &Context, command: Commands) -> Result<()> {
    match command {
        Commands::Serve => return Err(eyre!("serve is not a client command")),
        Commands::Connect { server, token } => {
            println!("{}", ctx.client().connect(&server, &token)?);
        }
        Commands::Disconnect => println!("{}", ctx.client().disconnect()?),
        Commands::Status => print!("{}", report::format_status(&ctx.client().status()?)),
        Commands::Stats => print!("{}", report::format_stats(&ctx.client().stats()?)),
        Commands::Logs => println!("{}", ctx.client().logs()?),
        Commands::IpInfo { ip } => {
            let geo = ctx
                .geo()?
                .ok_or_else(|| eyre!("geolocation is disabled in the config"))?;
            let info = geo.lookup(ip).wrap_err("geolocation lookup failed")?;
            print!("{}", report::format_ip_info(&info));
        }
    }
    Ok(())
}

fn serve(ctx: &Context, verbose: u8) -> Result<()> {
    let config = &ctx.config;
    let log_path = config.log_path(&ctx.dir);
    logging::init_logging(
        config.logging.verbosity.saturating_add(verbose),
        log_path.as_deref(),
        config.logging.format,
    )?;

    tracing::info!(version = crate::constants::APP_VERSION, "helper starting");
    if !utils::is_root() {
        tracing::warn!("not running as root, tunnel setup will likely fail");
        eprintln!("warning: tunlink serve should run with root privileges");
    }

    let secret = if config.ipc.require_secret {
        Some(ipc::load_or_create_secret(&config.secret_path(&ctx.dir))?)
    } else {
        None
    };

    // Device I/O pushes byte counts through the feed; it must outlive the server.
    let (tunnel, _feed) = ChannelTunnel::new();
    let mut manager = SessionManager::new(Arc::new(TcpHandshaker::default()), Arc::new(tunnel))
        .with_retry_policy(config.session.retry_policy())
        .with_handshake_timeout(config.session.handshake_timeout());
    if let Some(geo) = ctx.geo()? {
        manager = manager.with_geo(geo);
    }
    let manager = Arc::new(manager);

    let server = IpcServer::bind(&config.ipc.addr, Arc::clone(&manager), secret)
        .wrap_err_with(|| format!("binding {}", config.ipc.addr))?
        .with_log_file(log_path);

    let public = manager.ip_info(None);
    if !public.is_empty() {
        tracing::info!(ip = %public.query, isp = %public.isp, "public address before connect");
    }

    server.serve()?;
    manager.shutdown();
    Ok(())
}
