//! MPEG audio decoding (symphonia), one compressed frame per read.

use std::io;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use super::{ByteSource, PcmDecoder, StreamSpec};
use crate::error::{FormatError, PlaybackError};

/// Streaming MP3 decoder over a non-seekable source.
///
/// The container is probed on construction, which reads just enough of the
/// stream to learn the sample rate and channel layout.
pub struct Mp3Decoder {
    // ---
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    spec: StreamSpec,
}

impl Mp3Decoder {
    // ---
    /// Probes `source` and prepares the frame decoder.
    ///
    /// # Errors
    ///
    /// Returns a format error if no MPEG audio stream is found, or if the
    /// stream does not advertise a positive sample rate.
    pub fn new(source: ByteSource) -> Result<Self, PlaybackError> {
        // ---
        let mss = MediaSourceStream::new(Box::new(ReadOnlySource::new(source)), Default::default());

        let mut hint = Hint::new();
        hint.with_extension("mp3").mime_type("audio/mpeg");

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| probe_error(e, "no MPEG audio stream"))?;

        let format = probed.format;
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| FormatError::Probe("no audio track found".into()))?;

        let sample_rate = track.codec_params.sample_rate.unwrap_or(0);
        if sample_rate == 0 {
            return Err(FormatError::InvalidSampleRate(sample_rate).into());
        }

        let channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(0);
        if channels == 0 {
            return Err(FormatError::UnsupportedChannels(channels).into());
        }

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| probe_error(e, "no decoder for stream"))?;
        let track_id = track.id;

        debug!("MP3 stream: {}Hz, {} channels", sample_rate, channels);

        Ok(Self {
            format,
            decoder,
            track_id,
            spec: StreamSpec {
                sample_rate,
                channels,
            },
        })
    }
}

impl PcmDecoder for Mp3Decoder {
    fn spec(&self) -> StreamSpec {
        // ---
        self.spec
    }

    fn read(&mut self) -> Result<Option<Vec<i16>>, PlaybackError> {
        // ---
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(e) => return Err(stream_error(e)),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = self.decoder.decode(&packet).map_err(stream_error)?;
            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            if spec.channels.count() != self.spec.channels as usize {
                return Err(PlaybackError::Decode(format!(
                    "channel count changed mid-stream: {} -> {}",
                    self.spec.channels,
                    spec.channels.count()
                )));
            }

            let mut samples = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
            samples.copy_interleaved_ref(decoded);
            return Ok(Some(samples.samples().to_vec()));
        }
    }
}

fn probe_error(e: SymphoniaError, fallback: &str) -> PlaybackError {
    // ---
    match e {
        SymphoniaError::IoError(io) if io.kind() != io::ErrorKind::UnexpectedEof => {
            PlaybackError::Transport(io.to_string())
        }
        SymphoniaError::IoError(_) => FormatError::Truncated("MPEG header").into(),
        other => FormatError::Probe(format!("{fallback}: {other}")).into(),
    }
}

/// Mid-stream failures: network errors stay transport errors, anything the
/// codec rejects is a decode error.
fn stream_error(e: SymphoniaError) -> PlaybackError {
    // ---
    match e {
        SymphoniaError::IoError(io) => PlaybackError::Transport(io.to_string()),
        other => PlaybackError::Decode(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::io::Cursor;

    /// MPEG-1 Layer III, 128 kbps, 44.1kHz, mono, no CRC. With an all-zero
    /// side info and main data, every frame decodes to silence.
    fn silent_frames(count: usize) -> Vec<u8> {
        // ---
        const FRAME_LEN: usize = 417;
        let mut frame = vec![0u8; FRAME_LEN];
        frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0xC0]);
        frame.repeat(count)
    }

    #[test]
    fn test_decodes_silent_stream() {
        // ---
        let source: ByteSource = Box::new(Cursor::new(silent_frames(20)));
        let mut decoder = Mp3Decoder::new(source).expect("valid MPEG stream");

        assert_eq!(
            decoder.spec(),
            StreamSpec {
                sample_rate: 44100,
                channels: 1
            }
        );

        let mut total = 0;
        while let Some(samples) = decoder.read().expect("frames decode") {
            assert!(samples.iter().all(|&s| s == 0));
            total += samples.len();
        }
        assert!(total >= 1152);
    }

    #[test]
    fn test_rejects_non_mpeg_bytes() {
        // ---
        let source: ByteSource = Box::new(Cursor::new(b"<html>not audio</html>".repeat(64)));
        let err = Mp3Decoder::new(source).err().expect("probe must fail");
        assert_eq!(err.kind(), "format");
    }
}
