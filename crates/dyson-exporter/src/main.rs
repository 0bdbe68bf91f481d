//! Dyson exporter - Prometheus metrics for Dyson Link devices.
//!
//! Run with: `cargo run -p dyson-exporter -- --config config.toml`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use dyson_core::{DeviceClient, LinkClient};
use dyson_exporter::{
    AppState, Collector, CollectorOptions, CollectorState, Config, MetricRegistry, api, schema,
};

/// Dyson exporter - Prometheus metrics for Dyson Link fans and purifiers.
#[derive(Parser, Debug)]
#[command(name = "dyson-exporter")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// HTTP port (overrides the port of the bind address).
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level for the exporter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also monitor devices marked inactive.
    #[arg(long)]
    include_inactive_devices: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("dyson_exporter={}", args.log_level).parse()?)
                .add_directive(format!("dyson_core={}", args.log_level).parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(port) = args.port {
        config.server.set_port(port);
    }
    if args.include_inactive_devices {
        config.collector.include_inactive_devices = true;
    }

    config.validate()?;
    if config.devices.is_empty() {
        bail!("No devices configured; add [[devices]] entries to the configuration file");
    }

    let registry = Arc::new(MetricRegistry::new());
    schema::register_all(&registry).context("Failed to register metrics")?;

    let client: Arc<dyn DeviceClient> = Arc::new(LinkClient::new(
        config.link_devices()?,
        config.hosts.clone().into_iter().collect(),
        config.link_options(),
    )?);

    let collector_state = Arc::new(CollectorState::new());
    let collector = Collector::new(
        Arc::clone(&client),
        Arc::clone(&registry),
        Arc::clone(&collector_state),
        CollectorOptions::from(&config.collector),
    );
    let monitored = collector.start().await?;
    if monitored == 0 {
        warn!("All configured devices are inactive; use --include-inactive-devices to monitor them");
    }

    let addr: SocketAddr = config.server.bind.parse()?;
    let state = AppState::new(registry, collector_state, config);

    let app = Router::new()
        .merge(api::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    info!("Serving metrics on http://{}/metrics", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    collector.shutdown().await;
    client.disconnect_all().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
