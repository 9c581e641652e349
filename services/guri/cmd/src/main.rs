//! guri: bridge a TinyMesh radio module to the network.
//!
//! The module is reached over a serial port; traffic is relayed to a TCP or
//! TLS peer, or to this process's stdin/stdout.

use anyhow::Context;
use clap::Parser;
use guri_wire::Address;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[macro_use]
mod logging;
mod config;
mod ports;

use config::Settings;
use logging::GuriLogFormatter;

/// Crates whose logs follow `--log-level`
const LOG_TARGETS: &[&str] = &["guri", "guri_wire", "guri_transport", "guri_tinymesh", "guri_bridge"];

/// Serial-to-network gateway for TinyMesh radio modules
#[derive(Parser, Debug)]
#[command(name = "guri", version, about = "Serial-to-network gateway for TinyMesh radio modules")]
struct Args {
    /// Serial device of the radio module, e.g. /dev/ttyUSB0
    device: Option<String>,

    /// List serial ports and exit
    #[arg(long)]
    list: bool,

    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Check the module's NID/SID/UID before bridging [default: true]
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    verify: Option<bool>,

    /// Enable gateway mode and write NID/SID/UID before bridging [default: false]
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    auto_configure: Option<bool>,

    /// Desired network ID, e.g. 01:02:03:04 [default: ::]
    #[arg(long)]
    nid: Option<Address>,

    /// Desired system ID [default: ::]
    #[arg(long)]
    sid: Option<Address>,

    /// Desired unique ID [default: ::]
    #[arg(long)]
    uid: Option<Address>,

    /// Relay over stdin/stdout instead of the network [default: false]
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    stdio: Option<bool>,

    /// Upstream host:port [default: tcp.cloud.tiny-mesh.com:7002]
    #[arg(long)]
    remote: Option<String>,

    /// Use TLS for the upstream connection [default: true]
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    tls: Option<bool>,

    /// CA bundle (PEM) to trust for TLS
    #[arg(long)]
    tls_ca: Option<PathBuf>,

    /// Reconnect lost links instead of exiting [default: true]
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    reconnect: Option<bool>,

    /// First reconnect delay, e.g. 1s [default: 1s]
    #[arg(long)]
    backoff_initial: Option<humantime::Duration>,

    /// Longest reconnect delay [default: 5m]
    #[arg(long)]
    backoff_max: Option<humantime::Duration>,

    /// Reconnect delay growth factor [default: 2.0]
    #[arg(long)]
    backoff_factor: Option<f64>,

    /// Reconnect attempts: negative retries forever, 0 never
    #[arg(long, allow_negative_numbers = true)]
    max_retries: Option<i64>,

    /// How long to wait for the configuration prompt [default: 60s]
    #[arg(long)]
    entry_timeout: Option<humantime::Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// The command-line layer of settings
    fn settings(&self) -> Settings {
        Settings {
            device: self.device.clone(),
            remote: self.remote.clone(),
            nid: self.nid,
            sid: self.sid,
            uid: self.uid,
            verify: self.verify,
            auto_configure: self.auto_configure,
            stdio: self.stdio,
            tls: self.tls,
            tls_ca: self.tls_ca.clone(),
            reconnect: self.reconnect,
            backoff_initial: self.backoff_initial.as_deref().copied(),
            backoff_max: self.backoff_max.as_deref().copied(),
            backoff_factor: self.backoff_factor,
            max_retries: self.max_retries,
            entry_timeout: self.entry_timeout.as_deref().copied(),
        }
    }
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let mut env_filter = EnvFilter::new("warn");
    for target in LOG_TARGETS {
        env_filter = env_filter.add_directive(format!("{}={}", target, level).parse()?);
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .event_format(GuriLogFormatter::new("guri"))
        .init();
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => component_info!("signal", "Received SIGINT"),
                    _ = sigterm.recv() => component_info!("signal", "Received SIGTERM"),
                }
                return;
            }
            Err(err) => component_warn!("signal", "Cannot listen for SIGTERM: {}", err),
        }
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        component_warn!("signal", "Cannot listen for ctrl-c: {}", err);
        std::future::pending::<()>().await;
    }
    component_info!("signal", "Received SIGINT");
}

async fn run(args: Args) -> anyhow::Result<()> {
    if args.list {
        return ports::print_ports();
    }

    let mut settings = Settings::default();
    if let Some(path) = &args.config {
        settings = settings.merge(Settings::from_file(path)?);
    }
    let settings = settings
        .merge(Settings::from_env().context("reading GURI_* environment")?)
        .merge(args.settings());
    let config = settings.build()?;

    component_info!(
        "bridge",
        "Bridging {} <-> {} ({}, verify={}, auto-configure={}, reconnect={})",
        config.device,
        config.upstream,
        config.identity,
        config.verify,
        config.auto_configure,
        config.reconnect
    );

    guri_bridge::run(&config, shutdown_signal()).await?;
    Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    if !args.list {
        component_info!("main", "Starting guri v{}", env!("CARGO_PKG_VERSION"));
    }

    if let Err(err) = run(args).await {
        component_error!("main", "{:#}", err);
        return Err(err);
    }

    component_info!("main", "Stopped");
    Ok(())
}
