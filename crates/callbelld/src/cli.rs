//! `callbelld` command line entry point.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! callbelld --directory /etc/callbell/devices.csv
//!
//! # Print the devices a directory resolves to
//! callbelld --directory devices.csv check
//!
//! # Enable debug logging
//! RUST_LOG=callbelld=debug callbelld start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown, every connection is closed

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use callbell_core::DeviceDirectory;

use crate::config::{DaemonConfig, FileConfig, Overrides};
use crate::registry::spawn_registry;
use crate::sink::LogSink;
use crate::supervisor::Supervisor;

/// callbell daemon - keeps call-button devices connected
#[derive(Parser, Debug)]
#[command(name = "callbelld", version, about)]
pub struct Args {
    /// Config file (defaults to <config dir>/callbell/config.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Device directory CSV
    #[arg(short, long, global = true)]
    pub directory: Option<PathBuf>,

    /// TCP port of the devices
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Connect to every device in the directory and keep the links alive
    Start,
    /// Load the directory and print the devices it resolves to
    Check,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            port: self.port,
            directory: self.directory.clone(),
        }
    }
}

/// Parses the command line and runs the selected command.
pub fn run() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("callbelld=info".parse()?)
                .add_directive("callbell_core=info".parse()?),
        )
        .init();

    let config = load_config(&args, Overrides::from_env()?)?;

    match args.command.unwrap_or(Command::Start) {
        Command::Start => run_daemon(config),
        Command::Check => check(&config),
    }
}

/// Resolves the daemon config from flags, environment and config file.
fn load_config(args: &Args, env: Overrides) -> Result<DaemonConfig> {
    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => match FileConfig::default_path() {
            Some(path) if path.exists() => FileConfig::load(&path)?,
            _ => FileConfig::default(),
        },
    };

    DaemonConfig::resolve(file, args.overrides().or(env)).context("Invalid configuration")
}

fn load_directory(config: &DaemonConfig) -> DeviceDirectory {
    match &config.directory {
        Some(path) => DeviceDirectory::load_or_empty(path),
        None => {
            warn!("No device directory configured, starting without devices");
            DeviceDirectory::new()
        }
    }
}

fn check(config: &DaemonConfig) -> Result<()> {
    let directory = match &config.directory {
        Some(path) => DeviceDirectory::load(path)?,
        None => anyhow::bail!("No device directory configured (use --directory)"),
    };

    let devices = directory.device_addresses(config.supervisor.port);
    println!("{} rows, {} devices", directory.len(), devices.len());
    for device in devices {
        let bed = directory
            .bed_for_ip(device.host())
            .map(|bed| bed.to_string())
            .unwrap_or_default();
        println!("  {device}  {bed}");
    }
    Ok(())
}

fn run_daemon(config: DaemonConfig) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .thread_name("callbelld-worker")
        .enable_all()
        .build()
        .context("Failed to build runtime")?;

    runtime.block_on(serve(config))
}

async fn serve(config: DaemonConfig) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        port = config.supervisor.port,
        workers = config.worker_threads,
        "callbell daemon starting"
    );

    let directory = load_directory(&config);
    let devices = directory.device_addresses(config.supervisor.port);
    info!(devices = devices.len(), "Device directory loaded");

    let registry = spawn_registry();
    let supervisor = Supervisor::new(
        config.supervisor,
        registry,
        Arc::new(LogSink::new()),
        CancellationToken::new(),
    );

    let launched = supervisor.start_all(devices).await;
    info!(launched, "Device tasks started");

    wait_for_shutdown_signal().await?;
    info!("Shutdown signal received");

    supervisor.shutdown().await;
    info!("callbell daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
