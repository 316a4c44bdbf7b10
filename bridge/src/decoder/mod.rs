//! Container decoders and format dispatch.
//!
//! Decoders are synchronous and pull from a blocking [`ByteSource`]; the
//! playback pipeline runs them on the blocking pool and feeds the source
//! from the HTTP body as it arrives.

mod mp3;
mod source;
mod wav;

pub use mp3::Mp3Decoder;
pub use source::ChannelReader;
pub use wav::{WavDecoder, WavFormat};

use std::io::Read;

use reqwest::Url;

use crate::error::PlaybackError;

/// Blocking byte stream a decoder reads from.
pub type ByteSource = Box<dyn Read + Send + Sync>;

/// Source sample rate and channel count, known before the first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    // ---
    pub sample_rate: u32,
    pub channels: u16,
}

/// Progressive decoder producing interleaved PCM16 at the source rate.
pub trait PcmDecoder: Send {
    // ---
    /// Stream parameters, available as soon as the decoder is constructed.
    fn spec(&self) -> StreamSpec;

    /// Decodes the next unit of audio.
    ///
    /// Returns `Ok(None)` at the clean end of the stream. Any error is fatal
    /// to the playback.
    fn read(&mut self) -> Result<Option<Vec<i16>>, PlaybackError>;
}

/// Source container families the bridge can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// MPEG audio, decoded one compressed frame at a time.
    Mp3,

    /// RIFF/WAVE with 16-bit integer PCM.
    Wav,
}

const MP3_MIME_TOKENS: &[&str] = &["audio/mpeg"];
const WAV_MIME_TOKENS: &[&str] = &["audio/wav", "audio/x-wav", "audio/wave"];

impl AudioFormat {
    // ---
    /// Picks a decoder family from the response content type and URL path.
    ///
    /// MPEG wins when both families match. Returns `None` when neither does.
    pub fn detect(content_type: &str, url: &Url) -> Option<Self> {
        // ---
        let content_type = content_type.to_ascii_lowercase();
        let path = url.path().to_ascii_lowercase();

        if MP3_MIME_TOKENS.iter().any(|t| content_type.contains(t)) || path.ends_with(".mp3") {
            return Some(AudioFormat::Mp3);
        }

        if WAV_MIME_TOKENS.iter().any(|t| content_type.contains(t)) || path.ends_with(".wav") {
            return Some(AudioFormat::Wav);
        }

        None
    }

    /// Builds the decoder for this family, parsing headers from `source`.
    pub fn open(
        self,
        source: ByteSource,
        read_chunk_bytes: usize,
    ) -> Result<Box<dyn PcmDecoder>, PlaybackError> {
        // ---
        match self {
            AudioFormat::Mp3 => Ok(Box::new(Mp3Decoder::new(source)?)),
            AudioFormat::Wav => Ok(Box::new(WavDecoder::new(source, read_chunk_bytes)?)),
        }
    }
}
