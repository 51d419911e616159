use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use log::info;

use fleet_rs::{broadcaster, config, fleet, server};

/// Simulated device fleet pushing telemetry to WebSocket clients.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to the TOML config file; missing file means defaults
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Number of simulated devices
    #[arg(long)]
    devices: Option<usize>,

    /// Seconds between telemetry updates
    #[arg(long)]
    interval: Option<u64>,

    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::formatted_builder()
        .parse_filters(&std::env::var("RUST_LOG").unwrap_or("info".to_string()))
        .init();

    let cli = Cli::parse();
    let config = config::AppConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let device_count = cli.devices.unwrap_or(config.device_count());
    let mut broadcast = config.broadcast();
    if let Some(seconds) = cli.interval {
        broadcast.tick_interval = Duration::from_secs(seconds);
    }
    anyhow::ensure!(
        !broadcast.tick_interval.is_zero(),
        "tick interval must be at least one second"
    );

    let store = Arc::new(fleet::FleetStore::seed(device_count));
    info!("Fleet: {} devices", store.len());

    let broadcaster = Arc::new(broadcaster::Broadcaster::new(store, broadcast));
    tokio::spawn(broadcaster.clone().run());

    let state = server::AppState {
        broadcaster,
        send_timeout: config.send_timeout(),
    };
    let router = server::build_router(state, &config.allowed_origins());

    let host = config.host();
    let port = cli.port.unwrap_or(config.port());
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))?;

    server::serve(addr, router).await
}
