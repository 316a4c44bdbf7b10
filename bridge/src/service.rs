//! Session registry and the control operations on it.
//!
//! [`BridgeService`] is what the control transport talks to. It maps session
//! ids to [`RoomSession`]s and runs every playback as its own task.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bridge_common::MetricsContext;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, PlaybackError};
use crate::pipeline::{self, PlaybackEnv, PlaybackOutcome, PlaybackRequest};
use crate::session::RoomSession;
use crate::track::{normalize_track_name, Room};

/// Snapshot reported by [`BridgeService::health`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct HealthStatus {
    // ---
    pub active_sessions: usize,
    pub playing_sessions: usize,
}

/// Pending result of a started playback.
pub struct PlaybackTicket {
    // ---
    id: u64,
    cancel: CancellationToken,
    rx: oneshot::Receiver<Result<PlaybackOutcome, PlaybackError>>,
}

impl PlaybackTicket {
    // ---
    /// Per-session sequence number of this playback.
    pub fn id(&self) -> u64 {
        // ---
        self.id
    }

    /// Token that cancels this playback, the same one a stop would trigger.
    pub fn cancel_token(&self) -> CancellationToken {
        // ---
        self.cancel.clone()
    }

    /// Waits for the playback to end.
    pub async fn outcome(self) -> Result<PlaybackOutcome, PlaybackError> {
        // ---
        self.rx.await.unwrap_or_else(|_| {
            Err(PlaybackError::Internal(
                "playback task ended without a result".into(),
            ))
        })
    }
}

/// The bridge: a registry of room sessions plus the shared playback stack.
pub struct BridgeService {
    // ---
    sessions: RwLock<HashMap<String, Arc<RoomSession>>>,
    env: Arc<PlaybackEnv>,
}

impl BridgeService {
    // ---
    /// Builds the service and its HTTP client.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be constructed (e.g. TLS backend
    /// initialization).
    pub fn new(config: BridgeConfig, metrics: MetricsContext) -> Result<Self, BridgeError> {
        // ---
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            sessions: RwLock::new(HashMap::new()),
            env: Arc::new(PlaybackEnv {
                client,
                config,
                metrics,
            }),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        // ---
        &self.env.config
    }

    /// Registers a joined room under `session_id`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::SessionExists`] if the id is taken; the room is left
    /// for the caller to disconnect.
    pub fn open_session(
        &self,
        session_id: &str,
        room: Arc<dyn Room>,
    ) -> Result<Arc<RoomSession>, BridgeError> {
        // ---
        let mut sessions = self.write_sessions();
        if sessions.contains_key(session_id) {
            return Err(BridgeError::SessionExists(session_id.to_string()));
        }

        let session = Arc::new(RoomSession::new(
            session_id,
            room,
            &self.env.config,
            self.env.metrics.clone(),
        ));
        sessions.insert(session_id.to_string(), Arc::clone(&session));
        self.env.metrics.active_sessions.set(sessions.len() as i64);

        info!("Session {} opened", session_id);
        Ok(session)
    }

    /// Looks up a session.
    pub fn session(&self, session_id: &str) -> Result<Arc<RoomSession>, BridgeError> {
        // ---
        self.read_sessions()
            .get(session_id)
            .cloned()
            .ok_or_else(|| BridgeError::SessionNotFound(session_id.to_string()))
    }

    /// Removes a session, cancels its playback and leaves its room.
    pub fn close_session(&self, session_id: &str) -> Result<(), BridgeError> {
        // ---
        let session = {
            let mut sessions = self.write_sessions();
            let removed = sessions.remove(session_id);
            self.env.metrics.active_sessions.set(sessions.len() as i64);
            removed
        }
        .ok_or_else(|| BridgeError::SessionNotFound(session_id.to_string()))?;

        session.close();
        Ok(())
    }

    /// Starts a playback and returns without waiting for it.
    ///
    /// A playback already running in the session is cancelled; the new one
    /// starts fetching once the old one has released its tracks.
    pub fn start_playback(
        &self,
        session_id: &str,
        request: PlaybackRequest,
    ) -> Result<PlaybackTicket, BridgeError> {
        // ---
        let session = self.session(session_id)?;
        request.validate()?;

        let slot = session.begin_playback();
        let id = slot.id();
        let cancel = slot.token().clone();
        let (tx, rx) = oneshot::channel();
        let env = Arc::clone(&self.env);

        let span = info_span!(
            "playback",
            session = %session_id,
            id,
            track = %normalize_track_name(&request.track_name),
        );

        env.metrics.playbacks_started_total.inc();
        tokio::spawn(
            async move {
                // ---
                info!("Started: {}", request.source_url);
                let timer = env.metrics.playback_seconds.start_timer();
                let outcome = pipeline::run(&env, slot, request).await;
                timer.observe_duration();

                match &outcome {
                    Ok(PlaybackOutcome::Completed(r)) => {
                        env.metrics.playbacks_completed_total.inc();
                        info!("Completed: {} samples in {}ms", r.samples, r.elapsed_millis);
                    }
                    Ok(PlaybackOutcome::Cancelled(r)) => {
                        env.metrics.playbacks_cancelled_total.inc();
                        info!("Cancelled after {} samples", r.samples);
                    }
                    Err(e) => {
                        env.metrics.playbacks_failed_total.inc();
                        warn!(kind = e.kind(), "Failed: {}", e);
                    }
                }

                // Nobody waiting is fine
                let _ = tx.send(outcome);
            }
            .instrument(span),
        );

        Ok(PlaybackTicket { id, cancel, rx })
    }

    /// Starts a playback and waits for its outcome.
    ///
    /// The playback belongs to the caller: dropping this future before the
    /// outcome arrives (a disconnected HTTP client) cancels it.
    pub async fn play(
        &self,
        session_id: &str,
        request: PlaybackRequest,
    ) -> Result<PlaybackOutcome, BridgeError> {
        // ---
        let ticket = self.start_playback(session_id, request)?;
        let guard = ticket.cancel_token().drop_guard();
        let outcome = ticket.outcome().await;
        guard.disarm();
        Ok(outcome?)
    }

    /// Cancels the session's playback. Returns whether one was running.
    pub fn stop_playback(&self, session_id: &str) -> Result<bool, BridgeError> {
        // ---
        Ok(self.session(session_id)?.stop_playback())
    }

    /// Writes raw PCM16 from the control plane to a session track.
    pub async fn push_audio(
        &self,
        session_id: &str,
        track_name: &str,
        pcm: &[u8],
    ) -> Result<usize, BridgeError> {
        // ---
        let session = self.session(session_id)?;
        Ok(session.write_audio(track_name, pcm).await?)
    }

    /// Takes the session's room audio stream. `None` if already taken.
    pub fn take_room_audio(
        &self,
        session_id: &str,
    ) -> Result<Option<mpsc::Receiver<Bytes>>, BridgeError> {
        // ---
        Ok(self.session(session_id)?.take_room_audio())
    }

    pub fn health(&self) -> HealthStatus {
        // ---
        let sessions = self.read_sessions();

        HealthStatus {
            active_sessions: sessions.len(),
            playing_sessions: sessions.values().filter(|s| s.is_playing()).count(),
        }
    }

    /// Closes every session.
    pub fn shutdown(&self) {
        // ---
        let sessions: Vec<Arc<RoomSession>> = {
            let mut sessions = self.write_sessions();
            sessions.drain().map(|(_, s)| s).collect()
        };
        self.env.metrics.active_sessions.set(0);

        for session in &sessions {
            session.close();
        }
        info!("Closed {} session(s)", sessions.len());
    }

    fn read_sessions(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<RoomSession>>> {
        // ---
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_sessions(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<RoomSession>>> {
        // ---
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
