//! One playback, end to end.
//!
//! ```text
//! HTTP body ──pump──▶ ChannelReader ──decoder (blocking pool)──▶ events
//!                                                                  │
//!   track ◀── pacer ◀── frame assembly ◀── Conditioner ◀───────────┘
//! ```
//!
//! The decoder runs on the blocking pool and reads the body as it arrives,
//! so playback starts before the download finishes. Everything after the
//! decoder runs on the playback task and observes the playback's
//! cancellation token at every await.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use bridge_common::MetricsContext;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::conditioner::Conditioner;
use crate::config::BridgeConfig;
use crate::decoder::{AudioFormat, ByteSource, ChannelReader, StreamSpec};
use crate::error::{DeliveryError, PlaybackError};
use crate::pacer::Pacer;
use crate::session::{PlaybackSlot, RoomSession};
use crate::track::{normalize_track_name, AudioTrack};
use crate::CANONICAL_SAMPLE_RATE;

/// Body chunks buffered between the HTTP client and the decoder.
const BODY_QUEUE_DEPTH: usize = 16;

/// Decoded units buffered between the decoder and the playback task.
const DECODE_QUEUE_DEPTH: usize = 4;

/// What to play and where.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackRequest {
    // ---
    /// `http` or `https` URL of an MP3 or WAV file.
    pub source_url: String,

    /// Linear gain. 1.0 leaves samples untouched, 0.0 mutes.
    pub volume: f32,

    /// Target track; empty means the default track.
    pub track_name: String,
}

impl PlaybackRequest {
    // ---
    pub fn new(source_url: impl Into<String>) -> Self {
        // ---
        Self {
            source_url: source_url.into(),
            volume: 1.0,
            track_name: String::new(),
        }
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        // ---
        self.volume = volume;
        self
    }

    pub fn with_track(mut self, track_name: impl Into<String>) -> Self {
        // ---
        self.track_name = track_name.into();
        self
    }

    /// Parses and checks the request before any I/O happens.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::InvalidRequest`] for a malformed or non-HTTP URL, or a
    /// negative or non-finite volume.
    pub fn validate(&self) -> Result<Url, PlaybackError> {
        // ---
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(PlaybackError::InvalidRequest(format!(
                "volume must be a finite number >= 0, got {}",
                self.volume
            )));
        }

        let url = Url::parse(&self.source_url).map_err(|e| {
            PlaybackError::InvalidRequest(format!("bad source URL '{}': {e}", self.source_url))
        })?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(PlaybackError::InvalidRequest(format!(
                "unsupported URL scheme '{other}'"
            ))),
        }
    }
}

/// Summary of a playback that ran, fully or in part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackResult {
    // ---
    /// Wall-clock time from acceptance to the last delivered frame.
    pub elapsed_millis: i64,

    /// Mono samples delivered at the canonical rate.
    pub samples: u64,
}

/// How a playback ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The source played to its end.
    Completed(PlaybackResult),

    /// Stopped, preempted, or the session closed.
    Cancelled(PlaybackResult),
}

impl PlaybackOutcome {
    // ---
    pub fn result(&self) -> &PlaybackResult {
        // ---
        match self {
            PlaybackOutcome::Completed(r) | PlaybackOutcome::Cancelled(r) => r,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        // ---
        matches!(self, PlaybackOutcome::Cancelled(_))
    }
}

/// Shared by every playback of a bridge instance.
pub struct PlaybackEnv {
    // ---
    pub client: reqwest::Client,
    pub config: BridgeConfig,
    pub metrics: MetricsContext,
}

/// Why the stream loop stopped early.
enum Interrupt {
    Cancelled,
    Failed(PlaybackError),
}

impl From<PlaybackError> for Interrupt {
    fn from(e: PlaybackError) -> Self {
        Interrupt::Failed(e)
    }
}

impl From<DeliveryError> for Interrupt {
    fn from(e: DeliveryError) -> Self {
        Interrupt::Failed(e.into())
    }
}

enum DecodeEvent {
    Spec(StreamSpec),
    Samples(Vec<i16>),
    Failed(PlaybackError),
}

/// Runs one playback in the slot it was admitted to.
///
/// Waits for the previous playback of the session to release its tracks,
/// then streams the source. The target track is closed afterwards whatever
/// the outcome, and the slot is released on return.
///
/// # Errors
///
/// Any transport, format, decode or delivery failure. Cancellation is
/// reported as [`PlaybackOutcome::Cancelled`].
pub async fn run(
    env: &PlaybackEnv,
    slot: PlaybackSlot,
    request: PlaybackRequest,
) -> Result<PlaybackOutcome, PlaybackError> {
    // ---
    let started = Instant::now();
    let url = request.validate()?;
    let token = slot.token().clone();
    let session = Arc::clone(slot.session());
    let track_name = normalize_track_name(&request.track_name).to_string();

    let lease = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        lease = session.acquire_track_lease() => Some(lease),
    };
    if lease.is_none() {
        debug!("cancelled before it started");
        return Ok(PlaybackOutcome::Cancelled(PlaybackResult {
            elapsed_millis: elapsed_millis(started),
            samples: 0,
        }));
    }

    let mut sink = FrameSink::new(&session, &track_name, &env.config, &env.metrics);
    let streamed = stream(env, &token, url, request.volume, &mut sink).await;
    let samples = sink.delivered;
    drop(sink);

    session.close_track(&track_name);
    drop(lease);

    let result = PlaybackResult {
        elapsed_millis: elapsed_millis(started),
        samples,
    };

    match streamed {
        Ok(()) => Ok(PlaybackOutcome::Completed(result)),
        Err(Interrupt::Cancelled) => Ok(PlaybackOutcome::Cancelled(result)),
        Err(Interrupt::Failed(e)) => Err(e),
    }
}

async fn stream(
    env: &PlaybackEnv,
    token: &CancellationToken,
    url: Url,
    gain: f32,
    sink: &mut FrameSink<'_>,
) -> Result<(), Interrupt> {
    // ---
    let fetch_timer = env.metrics.fetch_seconds.start_timer();
    let response = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(Interrupt::Cancelled),
        response = env.client.get(url.clone()).send() => {
            response.map_err(|e| PlaybackError::Transport(e.to_string()))?
        }
    };
    fetch_timer.observe_duration();

    let status = response.status();
    if !status.is_success() {
        return Err(PlaybackError::HttpStatus {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
        }
        .into());
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let format = AudioFormat::detect(&content_type, &url)
        .ok_or_else(|| PlaybackError::UnsupportedFormat(content_type.clone()))?;
    info!("Streaming {} as {:?} ({})", url, format, content_type);

    let (body_tx, body_rx) = mpsc::channel(BODY_QUEUE_DEPTH);
    let _pump = AbortOnDrop(tokio::spawn(pump_body(response, body_tx)));

    let (events_tx, mut events_rx) = mpsc::channel(DECODE_QUEUE_DEPTH);
    let source: ByteSource = Box::new(ChannelReader::new(body_rx));
    let read_chunk_bytes = env.config.read_chunk_bytes;
    let worker = tokio::task::spawn_blocking(move || {
        decode_worker(format, source, read_chunk_bytes, events_tx)
    });

    let mut conditioner: Option<Conditioner> = None;
    loop {
        let event = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Interrupt::Cancelled),
            event = events_rx.recv() => event,
        };

        match event {
            Some(DecodeEvent::Spec(spec)) => {
                let tail = Conditioner::new(spec, CANONICAL_SAMPLE_RATE, gain);
                info!(
                    "Source {}Hz, {} channel(s), resampling: {}",
                    spec.sample_rate,
                    spec.channels,
                    tail.resamples()
                );
                conditioner = Some(tail);
            }
            Some(DecodeEvent::Samples(samples)) => {
                let tail = conditioner.as_mut().ok_or_else(|| {
                    PlaybackError::Internal("decoded audio before stream parameters".into())
                })?;
                let mono = tail.process(&samples);
                sink.push(&mono, token).await?;
            }
            Some(DecodeEvent::Failed(e)) => return Err(e.into()),
            None => break,
        }
    }

    // The worker dropped its sender: either a clean end of stream or a panic
    if let Err(e) = worker.await {
        return Err(PlaybackError::Internal(format!("decoder task failed: {e}")).into());
    }

    sink.flush(token).await
}

/// Forwards body chunks to the decoder until the body ends, fails, or the
/// decoder goes away.
async fn pump_body(response: reqwest::Response, tx: mpsc::Sender<io::Result<Bytes>>) {
    // ---
    let mut body = response.bytes_stream();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(io::Error::other);
        let failed = chunk.is_err();

        if tx.send(chunk).await.is_err() || failed {
            break;
        }
    }
}

fn decode_worker(
    format: AudioFormat,
    source: ByteSource,
    read_chunk_bytes: usize,
    events: mpsc::Sender<DecodeEvent>,
) {
    // ---
    let mut decoder = match format.open(source, read_chunk_bytes) {
        Ok(decoder) => decoder,
        Err(e) => {
            let _ = events.blocking_send(DecodeEvent::Failed(e));
            return;
        }
    };

    if events
        .blocking_send(DecodeEvent::Spec(decoder.spec()))
        .is_err()
    {
        return;
    }

    // A closed channel means the playback was cancelled
    while !events.is_closed() {
        let event = match decoder.read() {
            Ok(Some(samples)) => DecodeEvent::Samples(samples),
            Ok(None) => return,
            Err(e) => DecodeEvent::Failed(e),
        };
        let last = matches!(event, DecodeEvent::Failed(_));

        if events.blocking_send(event).is_err() || last {
            return;
        }
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Cuts conditioned audio into fixed frames and delivers them in real time.
struct FrameSink<'a> {
    // ---
    session: &'a RoomSession,
    track_name: &'a str,
    track: Option<Arc<dyn AudioTrack>>,
    frame_samples: usize,
    pending: Vec<i16>,
    pacer: Option<Pacer>,
    metrics: &'a MetricsContext,
    frames: u64,
    delivered: u64,
}

impl<'a> FrameSink<'a> {
    // ---
    fn new(
        session: &'a RoomSession,
        track_name: &'a str,
        config: &BridgeConfig,
        metrics: &'a MetricsContext,
    ) -> Self {
        // ---
        let frame_samples = session.frame_samples();

        Self {
            session,
            track_name,
            track: None,
            frame_samples,
            pending: Vec::with_capacity(frame_samples * 2),
            pacer: config
                .realtime_pacing
                .then(|| Pacer::new(CANONICAL_SAMPLE_RATE)),
            metrics,
            frames: 0,
            delivered: 0,
        }
    }

    /// Queues samples and delivers every complete frame.
    async fn push(&mut self, samples: &[i16], token: &CancellationToken) -> Result<(), Interrupt> {
        // ---
        let mut pending = std::mem::take(&mut self.pending);
        pending.extend_from_slice(samples);

        let whole = pending.len() / self.frame_samples * self.frame_samples;
        for frame in pending[..whole].chunks_exact(self.frame_samples) {
            self.deliver(frame, token).await?;
        }

        pending.drain(..whole);
        self.pending = pending;
        Ok(())
    }

    /// Delivers the final, possibly short, frame.
    async fn flush(&mut self, token: &CancellationToken) -> Result<(), Interrupt> {
        // ---
        let rest = std::mem::take(&mut self.pending);
        if rest.is_empty() {
            return Ok(());
        }
        self.deliver(&rest, token).await
    }

    async fn deliver(&mut self, frame: &[i16], token: &CancellationToken) -> Result<(), Interrupt> {
        // ---
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Interrupt::Cancelled),
            written = self.write(frame) => written,
        }
    }

    async fn write(&mut self, frame: &[i16]) -> Result<(), Interrupt> {
        // ---
        let track = match &self.track {
            Some(track) => Arc::clone(track),
            None => {
                let track = self.session.track(self.track_name).await?;
                self.track = Some(Arc::clone(&track));
                track
            }
        };

        if let Some(pacer) = self.pacer.as_mut() {
            pacer.wait(frame.len()).await;
        }

        track.write_frame(frame).await?;

        self.frames += 1;
        self.delivered += frame.len() as u64;
        self.metrics.frames_delivered_total.inc();
        self.metrics.samples_delivered_total.inc_by(frame.len() as u64);

        if self.frames.is_multiple_of(100) {
            debug!(
                "Delivered {} frames ({} samples) to '{}'",
                self.frames,
                self.delivered,
                track.name()
            );
        }
        Ok(())
    }
}

fn elapsed_millis(started: Instant) -> i64 {
    // ---
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}
