//! Media-room abstractions the bridge publishes audio into.
//!
//! A [`Room`] is a connected media session; an [`AudioTrack`] is one named
//! mono 16kHz outbound track inside it. The RTP transport in
//! [`crate::network`] is the production implementation; tests supply
//! in-memory ones.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DeliveryError;

/// Track used when a request does not name one.
pub const DEFAULT_TRACK: &str = "speaker";

/// A published outbound audio track.
#[async_trait]
pub trait AudioTrack: Send + Sync {
    // ---
    fn name(&self) -> &str;

    /// Writes one frame of mono PCM16 at the canonical rate.
    ///
    /// # Errors
    ///
    /// Fails when the track or its room has been closed, or the transport
    /// rejects the write.
    async fn write_frame(&self, frame: &[i16]) -> Result<(), DeliveryError>;

    /// Unpublishes the track. Later writes fail with [`DeliveryError::TrackClosed`].
    fn close(&self);
}

/// A connected media room.
#[async_trait]
pub trait Room: Send + Sync {
    // ---
    /// Publishes a new outbound audio track called `name`.
    async fn publish_track(&self, name: &str) -> Result<Arc<dyn AudioTrack>, DeliveryError>;

    /// Leaves the room. Idempotent.
    fn disconnect(&self);
}

/// Maps a numeric track id from the control plane to a track name.
pub fn track_name_for_id(id: i32) -> String {
    // ---
    match id {
        0 => DEFAULT_TRACK.to_string(),
        1 => "app_audio".to_string(),
        2 => "tts".to_string(),
        n => format!("track_{n}"),
    }
}

/// Substitutes the default track for an empty name.
pub fn normalize_track_name(name: &str) -> &str {
    // ---
    if name.is_empty() {
        DEFAULT_TRACK
    } else {
        name
    }
}
