//! Prometheus metrics (Rust `prometheus` crate).
//!
//! One `MetricsContext` is intended per process. The bridge service clones it
//! into every session and playback task; clones share the same registry.

use anyhow::Result;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Configuration for the built-in Prometheus scrape endpoint.
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    // ---
    /// Address to bind, e.g. `127.0.0.1:9100`.
    pub bind: SocketAddr,
}

impl MetricsServerConfig {
    // ---
    pub fn new(bind: SocketAddr) -> Self {
        // ---
        Self { bind }
    }
}

/// Prometheus metrics registry + handles.
///
/// This is a thin, explicit wrapper around the `prometheus` crate so hot-path
/// instrumentation is just counter increments / histogram observations.
#[derive(Clone)]
pub struct MetricsContext {
    // ---
    registry: Registry,

    // Playback lifecycle
    pub playbacks_started_total: IntCounter,
    pub playbacks_completed_total: IntCounter,
    pub playbacks_cancelled_total: IntCounter,
    pub playbacks_failed_total: IntCounter,

    // Outbound audio
    pub samples_delivered_total: IntCounter,
    pub frames_delivered_total: IntCounter,

    // Room audio return path
    pub room_audio_received_total: IntCounter,
    pub room_audio_dropped_total: IntCounter,

    // Session gauge
    pub active_sessions: IntGauge,

    // Latency histograms (seconds)
    pub fetch_seconds: Histogram,
    pub playback_seconds: Histogram,
}

impl MetricsContext {
    // ---
    /// Create a new registry and register the bridge metrics.
    ///
    /// `process_name` is applied as a constant label (`process=<name>`).
    pub fn new(process_name: &str) -> Result<Self> {
        // ---
        let registry = Registry::new_custom(
            Some("audio_bridge".into()),
            Some(prometheus::labels! { "process".to_string() => process_name.to_string() }),
        )?;

        let playbacks_started_total = IntCounter::with_opts(Opts::new(
            "playbacks_started_total",
            "Playback requests accepted",
        ))?;
        let playbacks_completed_total = IntCounter::with_opts(Opts::new(
            "playbacks_completed_total",
            "Playbacks that reached the end of their source",
        ))?;
        let playbacks_cancelled_total = IntCounter::with_opts(Opts::new(
            "playbacks_cancelled_total",
            "Playbacks stopped or preempted before the end of their source",
        ))?;
        let playbacks_failed_total = IntCounter::with_opts(Opts::new(
            "playbacks_failed_total",
            "Playbacks aborted by a transport, format, decode or delivery error",
        ))?;

        let samples_delivered_total = IntCounter::with_opts(Opts::new(
            "samples_delivered_total",
            "Mono PCM16 samples written to published tracks",
        ))?;
        let frames_delivered_total = IntCounter::with_opts(Opts::new(
            "frames_delivered_total",
            "Frames written to published tracks",
        ))?;

        let room_audio_received_total = IntCounter::with_opts(Opts::new(
            "room_audio_received_total",
            "Room audio payloads queued for the control plane",
        ))?;
        let room_audio_dropped_total = IntCounter::with_opts(Opts::new(
            "room_audio_dropped_total",
            "Room audio payloads dropped because the control plane fell behind",
        ))?;

        let active_sessions = IntGauge::with_opts(Opts::new(
            "active_sessions",
            "Room sessions currently registered",
        ))?;

        let fetch_seconds = Histogram::with_opts(HistogramOpts::new(
            "fetch_seconds",
            "Time from request to response headers when fetching a source (seconds)",
        ))?;
        let playback_seconds = Histogram::with_opts(
            HistogramOpts::new("playback_seconds", "Wall-clock playback duration (seconds)")
                .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        )?;

        // Register all metrics
        registry.register(Box::new(playbacks_started_total.clone()))?;
        registry.register(Box::new(playbacks_completed_total.clone()))?;
        registry.register(Box::new(playbacks_cancelled_total.clone()))?;
        registry.register(Box::new(playbacks_failed_total.clone()))?;
        registry.register(Box::new(samples_delivered_total.clone()))?;
        registry.register(Box::new(frames_delivered_total.clone()))?;
        registry.register(Box::new(room_audio_received_total.clone()))?;
        registry.register(Box::new(room_audio_dropped_total.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;
        registry.register(Box::new(fetch_seconds.clone()))?;
        registry.register(Box::new(playback_seconds.clone()))?;

        Ok(Self {
            registry,
            playbacks_started_total,
            playbacks_completed_total,
            playbacks_cancelled_total,
            playbacks_failed_total,
            samples_delivered_total,
            frames_delivered_total,
            room_audio_received_total,
            room_audio_dropped_total,
            active_sessions,
            fetch_seconds,
            playback_seconds,
        })
    }

    /// Gather metric families from this registry.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        // ---
        self.registry.gather()
    }

    /// Spawns a minimal HTTP server that serves `GET /metrics`.
    ///
    /// Callers decide whether to run it; tests usually don't.
    pub fn spawn_metrics_server(&self, cfg: MetricsServerConfig) -> JoinHandle<Result<()>> {
        // ---
        let registry = Arc::new(self.registry.clone());
        tokio::spawn(async move {
            // ---
            let make_svc = make_service_fn(move |_conn| {
                let registry = Arc::clone(&registry);
                async move {
                    Ok::<_, hyper::Error>(service_fn(move |req| {
                        let registry = Arc::clone(&registry);
                        async move { handle_metrics_request(req, registry).await }
                    }))
                }
            });

            let server = Server::try_bind(&cfg.bind)?.serve(make_svc);
            server.await.map_err(|e| anyhow::anyhow!(e))?;
            Ok(())
        })
    }
}

async fn handle_metrics_request(
    req: Request<Body>,
    registry: Arc<Registry>,
) -> Result<Response<Body>, hyper::Error> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let encoder = TextEncoder::new();
            let metric_families = registry.gather();
            let mut buffer = Vec::new();

            if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
                let mut resp = Response::new(Body::from(format!("encode error: {e}")));
                *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                return Ok(resp);
            }

            let mut resp = Response::new(Body::from(buffer));
            resp.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            Ok(resp)
        }
        _ => {
            let mut resp = Response::new(Body::from("not found"));
            *resp.status_mut() = StatusCode::NOT_FOUND;
            Ok(resp)
        }
    }
}
