//! pubd SSH daemon
//!
//! Serves subsystems such as SFTP to any SSH client. Shell access is refused.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::{filter_fn, EnvFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pubd_core::config::{load_config, LogConfig, SshConfig};
use pubd_core::listen_and_serve;
use pubd_core::signal::shutdown_token;
use pubd_ssh::keys::{fingerprint, load_host_key};
use pubd_ssh::{ServerConfig, SshServer, Subsystems};

#[derive(Parser, Debug)]
#[command(name = "pubd-ssh")]
#[command(about = "pubd SSH daemon")]
#[command(version)]
struct Args {
    /// Load a TOML config file; flags override its values
    #[arg(short = 'C', long)]
    config: Option<PathBuf>,

    /// Address to listen on, eg. "localhost:2222", "unix/path.sock" or "systemd/"
    #[arg(short, long)]
    addr: Option<String>,

    /// Path to the host private key
    #[arg(short = 'K', long)]
    host_key_file: Option<PathBuf>,

    /// Decline a subsystem without logging a warning (repeatable)
    #[arg(long = "disable-subsystem", value_name = "NAME")]
    disabled_subsystems: Vec<String>,

    /// Disable info (-q), warn (-qq) and error (-qqq) logging
    #[arg(short, long, action = ArgAction::Count)]
    quiet: u8,

    /// Enable debug (-v) and trace (-vv) logging
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Args {
    /// Resolve the effective configuration: defaults, then the config file, then flags
    fn config(&self) -> Result<SshConfig> {
        let mut config = match &self.config {
            Some(path) => load_config::<SshConfig>(path)
                .with_context(|| format!("Failed to load config from {:?}", path))?,
            None => SshConfig::default(),
        };

        if let Some(addr) = &self.addr {
            config.addr = addr.clone();
        }
        if let Some(path) = &self.host_key_file {
            config.host_key_file = Some(path.clone());
        }
        config
            .disabled_subsystems
            .extend(self.disabled_subsystems.iter().cloned());
        config.log.quiet = config.log.quiet.saturating_add(self.quiet);
        config.log.verbose = config.log.verbose.saturating_add(self.verbose);
        Ok(config)
    }
}

/// Log to stderr; RUST_LOG, if set, replaces the -q/-v levels
fn init_logging(log: LogConfig) {
    let env_filter = std::env::var("RUST_LOG").ok().map(EnvFilter::new);
    let level_filter = match env_filter {
        Some(_) => None,
        None => Some(filter_fn(move |meta| log.enabled(meta.level()))),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(level_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.config()?;
    init_logging(config.log);

    let Some(host_key_file) = &config.host_key_file else {
        bail!("-K/--host-key-file is required, and can be generated with: `ssh-keygen -t ed25519`");
    };
    let host_key = load_host_key(host_key_file)?;
    if let Some(fingerprint) = fingerprint(&host_key) {
        tracing::info!("Host key fingerprint: {}", fingerprint);
    }

    let mut subsystems = Subsystems::new();
    for name in &config.disabled_subsystems {
        subsystems.disable(name.as_str());
    }
    tracing::debug!("Subsystems: {:?}", subsystems);

    let server = Arc::new(SshServer::new(ServerConfig::new(host_key), subsystems));
    let cancel = shutdown_token(&CancellationToken::new());

    listen_and_serve(&cancel, &config.addr, server).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
