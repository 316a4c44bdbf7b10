//! Bridge tunables.

use std::time::Duration;

use crate::CANONICAL_SAMPLE_RATE;

/// Runtime configuration shared by every session of a bridge instance.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    // ---
    /// Duration of one delivered frame in milliseconds.
    pub frame_ms: u32,

    /// Upper bound on bytes pulled from a source per decode iteration.
    pub read_chunk_bytes: usize,

    /// Room audio payloads buffered per session before new ones are dropped.
    pub room_audio_capacity: usize,

    /// TCP connect timeout for fetching sources.
    pub connect_timeout: Duration,

    /// Hold each frame until its real-time slot before writing it.
    pub realtime_pacing: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        // ---
        Self {
            frame_ms: 10,
            read_chunk_bytes: 4096,
            room_audio_capacity: 200,
            connect_timeout: Duration::from_secs(5),
            realtime_pacing: true,
        }
    }
}

impl BridgeConfig {
    // ---
    /// Samples per delivered frame at the canonical rate (160 for 10ms).
    pub fn frame_samples(&self) -> usize {
        // ---
        ((CANONICAL_SAMPLE_RATE as usize * self.frame_ms as usize) / 1000).max(1)
    }
}
