//! Room audio bridge - service binary.
//!
//! Serves the HTTP control API, joins rooms over RTP on request, and plays
//! remote MP3/WAV files into them.

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use audio_bridge::{control, BridgeConfig, BridgeService};
use bridge_common::{init_tracing, ColorWhen, MetricsContext, MetricsServerConfig};

/// Room Audio Bridge - inject remote audio files into live media rooms
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    // ---
    /// Control API listen address
    #[arg(short, long, env = "BRIDGE_LISTEN", default_value = "127.0.0.1:9090")]
    listen: SocketAddr,

    /// Prometheus metrics bind address (serves `GET /metrics`).
    #[arg(long, env = "BRIDGE_METRICS_BIND", default_value = "127.0.0.1:9100")]
    metrics_bind: SocketAddr,

    /// Duration of one delivered frame in milliseconds
    #[arg(long, env = "BRIDGE_FRAME_MS", default_value = "10")]
    frame_ms: u32,

    /// Bytes read from a source per decode iteration
    #[arg(long, env = "BRIDGE_READ_CHUNK_BYTES", default_value = "4096")]
    read_chunk_bytes: usize,

    /// Room audio payloads buffered per session before dropping
    #[arg(long, env = "BRIDGE_ROOM_AUDIO_CAPACITY", default_value = "200")]
    room_audio_capacity: usize,

    /// Connect timeout for fetching audio sources, in milliseconds
    #[arg(long, env = "BRIDGE_CONNECT_TIMEOUT_MS", default_value = "5000")]
    connect_timeout_ms: u64,

    /// Coloring
    #[arg(long, env = "BRIDGE_COLOR", default_value = "auto")]
    color: ColorWhen,
}

impl Args {
    // ---
    fn bridge_config(&self) -> BridgeConfig {
        // ---
        BridgeConfig {
            frame_ms: self.frame_ms,
            read_chunk_bytes: self.read_chunk_bytes,
            room_audio_capacity: self.room_audio_capacity,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            realtime_pacing: true,
        }
    }
}

/// Capture version number from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    let args = Args::parse();

    init_tracing(args.color)?;

    info!("Starting room audio bridge v{VERSION}");
    info!("Control API: {}", args.listen);
    info!("Metrics bind: {}", args.metrics_bind);
    info!(
        "Frames: {}ms, read chunk: {} bytes, room audio queue: {}",
        args.frame_ms, args.read_chunk_bytes, args.room_audio_capacity
    );

    let metrics = MetricsContext::new("audio-bridge")?;
    let _metrics_task = metrics.spawn_metrics_server(MetricsServerConfig::new(args.metrics_bind));

    let service = Arc::new(
        BridgeService::new(args.bridge_config(), metrics).context("failed to build bridge")?,
    );

    let listener = TcpListener::bind(args.listen)
        .with_context(|| format!("failed to bind control API to {}", args.listen))?;

    let shutdown_service = Arc::clone(&service);
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutting down");
        shutdown_service.shutdown();
    };

    control::serve(service, listener, shutdown).await?;

    info!("Bridge stopped");
    Ok(())
}
