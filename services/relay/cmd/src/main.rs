//! Relay server binary.
//!
//! Listens on the given port and forwards mark-addressed frames between up
//! to `max_connections` clients until SIGINT or SIGTERM.

use anyhow::Context;
use clap::Parser;
use relay_server::RelayServer;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

#[macro_use]
mod logging;
mod config;

use config::{ConfigSource, RelayConfig};
use logging::RelayLogFormatter;

/// Mark-addressed TCP relay server
#[derive(Parser, Debug)]
#[command(name = "relay", version, about = "Mark-addressed TCP relay server")]
struct Args {
    /// Port to listen on (1-65535)
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,

    /// Configuration file path
    #[arg(long, default_value = "relay.yaml")]
    config: PathBuf,

    /// Maximum simultaneous clients
    #[arg(long)]
    max_connections: Option<usize>,

    /// Largest accepted frame in bytes
    #[arg(long)]
    max_packet_size: Option<u32>,

    /// Statistics log interval, e.g. 1s
    #[arg(long)]
    stats_interval: Option<humantime::Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn apply_to(&self, config: &mut RelayConfig) {
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }
        if let Some(size) = self.max_packet_size {
            config.max_packet_size = size;
        }
        if let Some(interval) = &self.stats_interval {
            config.stats_interval_ms = interval.as_millis() as u64;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
    }
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::new("info")
        .add_directive(format!("relay={}", level).parse()?)
        .add_directive(format!("relay_server={}", level).parse()?)
        .add_directive(format!("relay_session={}", level).parse()?)
        .add_directive(format!("relay_wire={}", level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .event_format(RelayLogFormatter::new("relay"))
        .init();
    Ok(())
}

async fn shutdown_signal() {
    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            component_error!("signal", "Failed to install signal handlers: {}", e);
            std::future::pending::<()>().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => component_info!("signal", "Received SIGTERM, shutting down"),
        _ = sigint.recv() => component_info!("signal", "Received SIGINT, shutting down"),
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let (mut relay_config, source, overrides) = RelayConfig::load(&args.config)?;
    args.apply_to(&mut relay_config);

    init_logging(&relay_config.log_level).context("invalid log level")?;

    component_info!("main", "Starting relay v{}", env!("CARGO_PKG_VERSION"));
    match &source {
        ConfigSource::File(path) => {
            component_info!("config", "Loaded configuration from {}", path.display())
        }
        ConfigSource::Defaults(path) => {
            component_warn!("config", "Config file {} not found, using defaults", path.display())
        }
    }
    for (name, value) in &overrides {
        component_info!("config", "{} overridden by environment: {}", name, value);
    }

    let server_config = relay_config.to_server_config(args.port);
    let server = RelayServer::bind(server_config)?;

    server.run(shutdown_signal()).await?;
    component_info!("main", "Relay exited cleanly");
    Ok(())
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            component_error!("main", "{:#}", e);
            eprintln!("relay: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
