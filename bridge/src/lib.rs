//! Room Audio Bridge Library
//!
//! Injects server-chosen audio (remote MP3/WAV files) into live media-room
//! sessions and hands room audio back to the control plane.
//!
//! Each playback runs as its own task: fetch → decode → downmix → resample →
//! gain → pace → deliver. Every decoded stream is converted to mono PCM16 at
//! [`CANONICAL_SAMPLE_RATE`] before it reaches a published track.

pub mod conditioner;
pub mod config;
pub mod control;
pub mod decoder;
pub mod error;
pub mod network;
pub mod pacer;
pub mod pcm;
pub mod pipeline;
pub mod resampler;
pub mod rtp;
pub mod service;
pub mod session;
pub mod track;

pub use conditioner::Conditioner;
pub use config::BridgeConfig;
pub use decoder::{AudioFormat, PcmDecoder, StreamSpec};
pub use error::{BridgeError, DeliveryError, FormatError, PlaybackError};
pub use network::{RtpRoom, RtpTrack};
pub use pacer::Pacer;
pub use pipeline::{PlaybackOutcome, PlaybackRequest, PlaybackResult};
pub use resampler::Resampler;
pub use rtp::RtpPacket;
pub use service::{BridgeService, HealthStatus, PlaybackTicket};
pub use session::{RoomAudioSender, RoomSession};
pub use track::{AudioTrack, Room, DEFAULT_TRACK};

/// Sample rate of every frame delivered to a room (16kHz wideband).
pub const CANONICAL_SAMPLE_RATE: u32 = 16000;

/// Channel count of every frame delivered to a room (mono).
pub const CANONICAL_CHANNELS: u16 = 1;
