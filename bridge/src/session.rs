//! Per-room session state.
//!
//! A [`RoomSession`] owns the published tracks of one room, the handle of the
//! playback currently in flight, and the bounded queue carrying room audio
//! back to the control plane. All state sits behind one lock that is never
//! held across an await.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bridge_common::MetricsContext;
use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::DeliveryError;
use crate::pcm::bytes_to_samples;
use crate::track::{normalize_track_name, AudioTrack, Room};

/// Warn about room audio drops once per this many.
const DROP_WARN_INTERVAL: u64 = 50;

/// Handle of the playback currently owning the session.
struct ActivePlayback {
    // ---
    id: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct SessionState {
    // ---
    active: Option<ActivePlayback>,
    tracks: HashMap<String, Arc<dyn AudioTrack>>,
    next_playback_id: u64,
}

/// One joined media room.
pub struct RoomSession {
    // ---
    id: String,
    room: Arc<dyn Room>,

    /// Cancelled when the session closes; every playback token descends from it.
    token: CancellationToken,

    state: Mutex<SessionState>,

    /// Held by a playback task for as long as it writes to tracks.
    track_lease: Arc<tokio::sync::Mutex<()>>,

    room_audio: RoomAudioSender,
    room_audio_rx: Mutex<Option<mpsc::Receiver<Bytes>>>,

    frame_samples: usize,
    metrics: MetricsContext,
    closed: AtomicBool,
}

impl RoomSession {
    // ---
    pub fn new(
        id: impl Into<String>,
        room: Arc<dyn Room>,
        config: &BridgeConfig,
        metrics: MetricsContext,
    ) -> Self {
        // ---
        let id = id.into();
        let (tx, rx) = mpsc::channel(config.room_audio_capacity.max(1));

        Self {
            room_audio: RoomAudioSender::new(tx, &id, metrics.clone()),
            room_audio_rx: Mutex::new(Some(rx)),
            id,
            room,
            token: CancellationToken::new(),
            state: Mutex::new(SessionState::default()),
            track_lease: Arc::new(tokio::sync::Mutex::new(())),
            frame_samples: config.frame_samples(),
            metrics,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        // ---
        &self.id
    }

    /// Samples per delivered frame.
    pub fn frame_samples(&self) -> usize {
        // ---
        self.frame_samples
    }

    pub fn is_closed(&self) -> bool {
        // ---
        self.closed.load(Ordering::Acquire)
    }

    /// True while a playback handle is installed.
    ///
    /// A stopped playback may still be draining and closing its track after
    /// this turns false; it reports the handle, not the task.
    pub fn is_playing(&self) -> bool {
        // ---
        self.lock_state().active.is_some()
    }

    /// Installs a new playback handle, cancelling the one it replaces.
    ///
    /// The returned slot carries the new playback's cancellation token and
    /// clears the handle when dropped, unless a later playback has replaced
    /// it in the meantime.
    pub fn begin_playback(self: &Arc<Self>) -> PlaybackSlot {
        // ---
        let token = self.token.child_token();
        let mut state = self.lock_state();

        if let Some(previous) = state.active.take() {
            debug!(
                "session {}: playback {} preempted",
                self.id, previous.id
            );
            previous.cancel.cancel();
        }

        state.next_playback_id += 1;
        let id = state.next_playback_id;
        state.active = Some(ActivePlayback {
            id,
            cancel: token.clone(),
        });

        PlaybackSlot {
            session: Arc::clone(self),
            id,
            token,
        }
    }

    /// Cancels the playback in flight, if any. Returns whether one was.
    pub fn stop_playback(&self) -> bool {
        // ---
        match self.lock_state().active.take() {
            Some(active) => {
                active.cancel.cancel();
                info!("session {}: playback {} stopped", self.id, active.id);
                true
            }
            None => false,
        }
    }

    fn finish_playback(&self, id: u64) {
        // ---
        let mut state = self.lock_state();
        if state.active.as_ref().is_some_and(|a| a.id == id) {
            state.active = None;
        }
    }

    /// Waits until no other playback is writing to this session's tracks.
    pub async fn acquire_track_lease(&self) -> OwnedMutexGuard<()> {
        // ---
        Arc::clone(&self.track_lease).lock_owned().await
    }

    /// Returns the named track, publishing it on first use.
    ///
    /// # Errors
    ///
    /// Fails with [`DeliveryError::RoomClosed`] once the session is closed,
    /// or with whatever the room reports when publishing.
    pub async fn track(&self, name: &str) -> Result<Arc<dyn AudioTrack>, DeliveryError> {
        // ---
        let name = normalize_track_name(name);

        let existing = self.lock_state().tracks.get(name).cloned();
        if let Some(track) = existing {
            return Ok(track);
        }
        if self.is_closed() {
            return Err(DeliveryError::RoomClosed);
        }

        let published = self.room.publish_track(name).await?;

        let mut state = self.lock_state();
        if self.is_closed() {
            published.close();
            return Err(DeliveryError::RoomClosed);
        }

        match state.tracks.entry(name.to_string()) {
            Entry::Occupied(entry) => {
                // Lost a publish race; keep the first one
                published.close();
                Ok(Arc::clone(entry.get()))
            }
            Entry::Vacant(entry) => {
                info!("session {}: published track '{}'", self.id, name);
                entry.insert(Arc::clone(&published));
                Ok(published)
            }
        }
    }

    /// Unpublishes the named track. A later write publishes it again.
    pub fn close_track(&self, name: &str) {
        // ---
        let name = normalize_track_name(name);
        let removed = self.lock_state().tracks.remove(name);

        if let Some(track) = removed {
            track.close();
            debug!("session {}: closed track '{}'", self.id, name);
        }
    }

    /// Names of the currently published tracks.
    pub fn track_names(&self) -> Vec<String> {
        // ---
        let mut names: Vec<String> = self.lock_state().tracks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Writes raw little-endian PCM16 (mono, canonical rate) to a track.
    ///
    /// The payload is split into frames and written as fast as the track
    /// accepts them; the caller is expected to stream in real time. Returns
    /// the number of samples written.
    pub async fn write_audio(&self, track_name: &str, pcm: &[u8]) -> Result<usize, DeliveryError> {
        // ---
        let samples = bytes_to_samples(pcm);
        if samples.is_empty() {
            return Ok(0);
        }

        let track = self.track(track_name).await?;
        for frame in samples.chunks(self.frame_samples) {
            track.write_frame(frame).await?;
            self.metrics.frames_delivered_total.inc();
        }
        self.metrics
            .samples_delivered_total
            .inc_by(samples.len() as u64);

        Ok(samples.len())
    }

    /// Handle the room transport uses to queue inbound audio.
    pub fn room_audio(&self) -> RoomAudioSender {
        // ---
        self.room_audio.clone()
    }

    /// Takes the receiving end of the room audio queue. Only the first
    /// caller gets it.
    pub fn take_room_audio(&self) -> Option<mpsc::Receiver<Bytes>> {
        // ---
        self.room_audio_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Cancels playback, closes every track and leaves the room. Idempotent.
    pub fn close(&self) {
        // ---
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.token.cancel();

        let tracks: Vec<Arc<dyn AudioTrack>> = {
            let mut state = self.lock_state();
            state.active = None;
            state.tracks.drain().map(|(_, track)| track).collect()
        };
        for track in tracks {
            track.close();
        }

        self.room.disconnect();
        self.room_audio_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        info!(
            "session {} closed ({} room audio payloads dropped)",
            self.id,
            self.room_audio.dropped()
        );
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        // ---
        // State stays consistent across every critical section, so a
        // panic elsewhere does not invalidate it.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Ownership of the session's playback handle for one playback task.
pub struct PlaybackSlot {
    // ---
    session: Arc<RoomSession>,
    id: u64,
    token: CancellationToken,
}

impl PlaybackSlot {
    // ---
    pub fn id(&self) -> u64 {
        // ---
        self.id
    }

    pub fn session(&self) -> &Arc<RoomSession> {
        // ---
        &self.session
    }

    /// Cancelled by stop, preemption or session close.
    pub fn token(&self) -> &CancellationToken {
        // ---
        &self.token
    }
}

impl Drop for PlaybackSlot {
    fn drop(&mut self) {
        // ---
        self.session.finish_playback(self.id);
    }
}

struct RoomAudioCounters {
    // ---
    received: AtomicU64,
    dropped: AtomicU64,
}

/// Producer side of a session's room audio queue.
///
/// Never blocks: when the control plane falls behind, new payloads are
/// dropped and counted.
#[derive(Clone)]
pub struct RoomAudioSender {
    // ---
    tx: mpsc::Sender<Bytes>,
    session_id: Arc<str>,
    metrics: MetricsContext,
    counters: Arc<RoomAudioCounters>,
}

impl RoomAudioSender {
    // ---
    fn new(tx: mpsc::Sender<Bytes>, session_id: &str, metrics: MetricsContext) -> Self {
        // ---
        Self {
            tx,
            session_id: Arc::from(session_id),
            metrics,
            counters: Arc::new(RoomAudioCounters {
                received: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Queues one payload of little-endian PCM16.
    ///
    /// A payload of odd length loses its leading byte. Returns whether the
    /// payload was queued.
    pub fn offer(&self, payload: &[u8]) -> bool {
        // ---
        let payload = if payload.len() % 2 == 1 {
            &payload[1..]
        } else {
            payload
        };
        if payload.is_empty() {
            return false;
        }

        match self.tx.try_send(Bytes::copy_from_slice(payload)) {
            Ok(()) => {
                self.counters.received.fetch_add(1, Ordering::Relaxed);
                self.metrics.room_audio_received_total.inc();
                true
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                self.metrics.room_audio_dropped_total.inc();
                if dropped % DROP_WARN_INTERVAL == 1 {
                    warn!(
                        "session {}: room audio queue full, {} payloads dropped so far",
                        self.session_id, dropped
                    );
                }
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Payloads queued so far.
    pub fn received(&self) -> u64 {
        // ---
        self.counters.received.load(Ordering::Relaxed)
    }

    /// Payloads dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        // ---
        self.counters.dropped.load(Ordering::Relaxed)
    }
}
