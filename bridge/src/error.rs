//! Error taxonomy for the bridge.
//!
//! Cancellation is deliberately absent: a stopped playback resolves to
//! [`crate::PlaybackOutcome::Cancelled`], never to an error.

use thiserror::Error;

/// Why a source could not be interpreted as audio we can play.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("not a RIFF container")]
    NotRiff,

    #[error("RIFF container is not WAVE")]
    NotWave,

    #[error("fmt chunk too short: {0} bytes (need at least 16)")]
    FmtChunkTooShort(u32),

    #[error("unsupported WAV encoding {0:#06x} (only integer PCM is supported)")]
    UnsupportedEncoding(u16),

    #[error("unsupported bit depth: {0}-bit (only 16-bit is supported)")]
    UnsupportedBitDepth(u16),

    #[error("unsupported channel count: {0} (only mono or stereo is supported)")]
    UnsupportedChannels(u16),

    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("missing {0} chunk")]
    MissingChunk(&'static str),

    #[error("container truncated while reading {0}")]
    Truncated(&'static str),

    #[error("compressed stream probe failed: {0}")]
    Probe(String),
}

/// Failures writing to a published track.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("room is disconnected")]
    RoomClosed,

    #[error("track '{0}' is closed")]
    TrackClosed(String),

    #[error("track write failed: {0}")]
    Io(String),
}

/// Errors that abort a single playback attempt.
///
/// None of these affect the session: it stays usable for the next request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to fetch audio: {0}")]
    Transport(String),

    #[error("HTTP error: {status} {reason}")]
    HttpStatus { status: u16, reason: String },

    #[error("unsupported audio format: content-type '{0}'")]
    UnsupportedFormat(String),

    #[error("malformed audio: {0}")]
    Format(#[from] FormatError),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("failed to write audio: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    /// Short machine-readable category, used in logs and control replies.
    pub fn kind(&self) -> &'static str {
        match self {
            PlaybackError::InvalidRequest(_) => "invalid_request",
            PlaybackError::Transport(_) | PlaybackError::HttpStatus { .. } => "transport",
            PlaybackError::UnsupportedFormat(_) | PlaybackError::Format(_) => "format",
            PlaybackError::Decode(_) => "decode",
            PlaybackError::Delivery(_) => "delivery",
            PlaybackError::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for PlaybackError {
    fn from(e: std::io::Error) -> Self {
        PlaybackError::Transport(e.to_string())
    }
}

/// Errors returned by the control surface.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session already exists: {0}")]
    SessionExists(String),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn format_errors_name_the_failed_constraint() {
        // ---
        let err = PlaybackError::from(FormatError::UnsupportedBitDepth(24));
        assert_eq!(err.kind(), "format");
        assert!(err.to_string().contains("24-bit"));

        let err = PlaybackError::from(FormatError::UnsupportedChannels(3));
        assert!(err.to_string().contains("channel count: 3"));
    }

    #[test]
    fn http_status_is_a_transport_error() {
        // ---
        let err = PlaybackError::HttpStatus {
            status: 404,
            reason: "Not Found".into(),
        };
        assert_eq!(err.kind(), "transport");
        assert_eq!(err.to_string(), "HTTP error: 404 Not Found");
    }

    #[test]
    fn io_errors_map_to_transport() {
        // ---
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = PlaybackError::from(io);
        assert_eq!(err.kind(), "transport");
    }
}
