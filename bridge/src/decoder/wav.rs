//! Progressive RIFF/WAVE parser.
//!
//! Only the chunk headers are read up front: parsing stops at the `data`
//! chunk and its payload is streamed afterwards in buffers aligned to whole
//! sample frames.

use std::io::{self, BufReader, Read};

use tracing::debug;

use super::{PcmDecoder, StreamSpec};
use crate::error::{FormatError, PlaybackError};

/// WAVE format tag for integer PCM.
const WAVE_FORMAT_PCM: u16 = 1;

/// Minimum `fmt ` payload carrying every field we read.
const FMT_MIN_LEN: u32 = 16;

/// Stream parameters captured from the `fmt ` and `data` chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    // ---
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,

    /// Declared length of the `data` chunk in bytes.
    pub data_bytes: u32,
}

impl WavFormat {
    // ---
    /// Bytes per interleaved sample frame.
    pub fn frame_bytes(&self) -> usize {
        // ---
        (self.bits_per_sample as usize / 8) * self.channels as usize
    }
}

/// Streaming decoder for 16-bit PCM WAV.
pub struct WavDecoder<R: Read> {
    // ---
    reader: BufReader<R>,
    format: WavFormat,
    remaining: u64,
    buf: Vec<u8>,
}

impl<R: Read> WavDecoder<R> {
    // ---
    /// Parses the container headers and positions the reader at the first
    /// byte of audio data.
    ///
    /// Each read returns at most `read_chunk_bytes` rounded down to whole
    /// sample frames (never less than one frame).
    ///
    /// # Errors
    ///
    /// Fails closed with a [`FormatError`] naming the violated constraint when
    /// the header is not RIFF/WAVE, the `fmt ` chunk is not 16-bit mono or
    /// stereo integer PCM, or either required chunk is absent.
    pub fn new(reader: R, read_chunk_bytes: usize) -> Result<Self, PlaybackError> {
        // ---
        let mut reader = BufReader::new(reader);
        let format = parse_header(&mut reader)?;

        debug!(
            "WAV format: {}Hz, {} channels, {} bits, {} data bytes",
            format.sample_rate, format.channels, format.bits_per_sample, format.data_bytes
        );

        let frame_bytes = format.frame_bytes();
        let buf_len = (read_chunk_bytes - read_chunk_bytes % frame_bytes).max(frame_bytes);

        Ok(Self {
            reader,
            format,
            remaining: format.data_bytes as u64,
            buf: vec![0u8; buf_len],
        })
    }

    /// Parsed stream parameters.
    pub fn format(&self) -> &WavFormat {
        // ---
        &self.format
    }
}

impl<R: Read + Send> PcmDecoder for WavDecoder<R> {
    fn spec(&self) -> StreamSpec {
        // ---
        StreamSpec {
            sample_rate: self.format.sample_rate,
            channels: self.format.channels,
        }
    }

    fn read(&mut self) -> Result<Option<Vec<i16>>, PlaybackError> {
        // ---
        if self.remaining == 0 {
            return Ok(None);
        }

        let to_read = (self.buf.len() as u64).min(self.remaining) as usize;
        let n = read_full(&mut self.reader, &mut self.buf[..to_read])?;
        if n == 0 {
            // Data chunk shorter than declared: treat as end of stream.
            self.remaining = 0;
            return Ok(None);
        }
        self.remaining -= n as u64;

        // A short final read may end mid-frame; keep whole frames only.
        let frame_bytes = self.format.frame_bytes();
        let whole = n - n % frame_bytes;
        Ok(Some(crate::pcm::bytes_to_samples(&self.buf[..whole])))
    }
}

fn parse_header<R: Read>(reader: &mut R) -> Result<WavFormat, PlaybackError> {
    // ---
    let mut riff = [0u8; 12];
    read_exact_or(reader, &mut riff, "RIFF header")?;

    if &riff[0..4] != b"RIFF" {
        return Err(FormatError::NotRiff.into());
    }
    if &riff[8..12] != b"WAVE" {
        return Err(FormatError::NotWave.into());
    }

    let mut fmt: Option<(u16, u32, u16)> = None;

    loop {
        let mut header = [0u8; 8];
        match read_full(reader, &mut header)? {
            8 => {}
            _ => {
                let missing = if fmt.is_none() { "fmt" } else { "data" };
                return Err(FormatError::MissingChunk(missing).into());
            }
        }

        let id = [header[0], header[1], header[2], header[3]];
        let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        match &id {
            b"fmt " => {
                fmt = Some(parse_fmt(reader, size)?);
                skip_padding(reader, size)?;
            }
            b"data" => {
                let (channels, sample_rate, bits_per_sample) =
                    fmt.ok_or(FormatError::MissingChunk("fmt"))?;
                return Ok(WavFormat {
                    channels,
                    sample_rate,
                    bits_per_sample,
                    data_bytes: size,
                });
            }
            _ => {
                debug!(
                    "Skipping WAV chunk '{}' ({} bytes)",
                    String::from_utf8_lossy(&id),
                    size
                );
                skip(reader, size as u64, "unknown chunk")?;
                skip_padding(reader, size)?;
            }
        }
    }
}

/// Reads and validates a `fmt ` chunk body of `size` bytes.
fn parse_fmt<R: Read>(reader: &mut R, size: u32) -> Result<(u16, u32, u16), PlaybackError> {
    // ---
    if size < FMT_MIN_LEN {
        return Err(FormatError::FmtChunkTooShort(size).into());
    }

    let mut body = [0u8; FMT_MIN_LEN as usize];
    read_exact_or(reader, &mut body, "fmt chunk")?;
    skip(reader, (size - FMT_MIN_LEN) as u64, "fmt chunk")?;

    let encoding = u16::from_le_bytes([body[0], body[1]]);
    let channels = u16::from_le_bytes([body[2], body[3]]);
    let sample_rate = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
    let bits_per_sample = u16::from_le_bytes([body[14], body[15]]);

    if encoding != WAVE_FORMAT_PCM {
        return Err(FormatError::UnsupportedEncoding(encoding).into());
    }
    if bits_per_sample != 16 {
        return Err(FormatError::UnsupportedBitDepth(bits_per_sample).into());
    }
    if channels != 1 && channels != 2 {
        return Err(FormatError::UnsupportedChannels(channels).into());
    }
    if sample_rate == 0 {
        return Err(FormatError::InvalidSampleRate(sample_rate).into());
    }

    Ok((channels, sample_rate, bits_per_sample))
}

/// Odd-sized chunks are followed by one pad byte.
fn skip_padding<R: Read>(reader: &mut R, size: u32) -> Result<(), PlaybackError> {
    // ---
    if size % 2 == 1 {
        skip(reader, 1, "chunk padding")?;
    }
    Ok(())
}

fn skip<R: Read>(reader: &mut R, len: u64, what: &'static str) -> Result<(), PlaybackError> {
    // ---
    let skipped = io::copy(&mut reader.by_ref().take(len), &mut io::sink())?;
    if skipped < len {
        return Err(FormatError::Truncated(what).into());
    }
    Ok(())
}

fn read_exact_or<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    what: &'static str,
) -> Result<(), PlaybackError> {
    // ---
    if read_full(reader, buf)? < buf.len() {
        return Err(FormatError::Truncated(what).into());
    }
    Ok(())
}

/// Fills `buf` unless EOF comes first; returns the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    // ---
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::io::Cursor;

    fn chunk(id: &[u8; 4], body: &[u8]) -> Vec<u8> {
        // ---
        let mut out = Vec::new();
        out.extend_from_slice(id);
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(body);
        if body.len() % 2 == 1 {
            out.push(0);
        }
        out
    }

    fn fmt_body(encoding: u16, channels: u16, rate: u32, bits: u16) -> Vec<u8> {
        // ---
        let block_align = channels * bits / 8;
        let mut body = Vec::new();
        body.extend_from_slice(&encoding.to_le_bytes());
        body.extend_from_slice(&channels.to_le_bytes());
        body.extend_from_slice(&rate.to_le_bytes());
        body.extend_from_slice(&(rate * block_align as u32).to_le_bytes());
        body.extend_from_slice(&block_align.to_le_bytes());
        body.extend_from_slice(&bits.to_le_bytes());
        body
    }

    fn riff(chunks: &[Vec<u8>]) -> Vec<u8> {
        // ---
        let body: Vec<u8> = chunks.concat();
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&((body.len() + 4) as u32).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(&body);
        out
    }

    fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
        crate::pcm::samples_to_bytes(samples)
    }

    fn open(bytes: Vec<u8>, chunk: usize) -> Result<WavDecoder<Cursor<Vec<u8>>>, PlaybackError> {
        WavDecoder::new(Cursor::new(bytes), chunk)
    }

    fn drain(decoder: &mut WavDecoder<Cursor<Vec<u8>>>) -> Vec<Vec<i16>> {
        // ---
        let mut reads = Vec::new();
        while let Some(samples) = decoder.read().expect("read succeeds") {
            reads.push(samples);
        }
        reads
    }

    #[test]
    fn test_parses_mono_pcm() {
        // ---
        let bytes = riff(&[
            chunk(b"fmt ", &fmt_body(1, 1, 22050, 16)),
            chunk(b"data", &pcm_bytes(&[1, -2, 3])),
        ]);
        let mut decoder = open(bytes, 4096).expect("valid WAV");

        assert_eq!(
            decoder.spec(),
            StreamSpec {
                sample_rate: 22050,
                channels: 1
            }
        );
        assert_eq!(decoder.format().data_bytes, 6);
        assert_eq!(drain(&mut decoder), vec![vec![1, -2, 3]]);
    }

    #[test]
    fn test_skips_odd_sized_unknown_chunk_and_padding() {
        // ---
        let bytes = riff(&[
            chunk(b"LIST", b"odd"),
            chunk(b"fmt ", &fmt_body(1, 2, 48000, 16)),
            chunk(b"junk", &[0xAA; 5]),
            chunk(b"data", &pcm_bytes(&[10, 20, 30, 40])),
        ]);
        let mut decoder = open(bytes, 4096).expect("valid WAV");

        assert_eq!(decoder.spec().channels, 2);
        assert_eq!(drain(&mut decoder).concat(), vec![10, 20, 30, 40]);
    }

    #[test]
    fn test_reads_are_frame_aligned() {
        // ---
        let samples: Vec<i16> = (0..20).collect();
        let bytes = riff(&[
            chunk(b"fmt ", &fmt_body(1, 2, 44100, 16)),
            chunk(b"data", &pcm_bytes(&samples)),
        ]);
        // 10 bytes rounds down to 8 (two stereo frames)
        let mut decoder = open(bytes, 10).expect("valid WAV");

        let reads = drain(&mut decoder);
        assert!(reads.iter().all(|r| r.len() % 2 == 0 && r.len() <= 4));
        assert_eq!(reads.concat(), samples);
    }

    #[test]
    fn test_tiny_read_chunk_still_reads_one_frame() {
        // ---
        let bytes = riff(&[
            chunk(b"fmt ", &fmt_body(1, 2, 44100, 16)),
            chunk(b"data", &pcm_bytes(&[1, 2, 3, 4])),
        ]);
        let mut decoder = open(bytes, 1).expect("valid WAV");
        assert_eq!(drain(&mut decoder), vec![vec![1, 2], vec![3, 4]]);
    }

    #[test]
    fn test_short_data_chunk_ends_cleanly_on_frame_boundary() {
        // ---
        let mut bytes = riff(&[chunk(b"fmt ", &fmt_body(1, 2, 44100, 16))]);
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&1000u32.to_le_bytes());
        bytes.extend_from_slice(&pcm_bytes(&[5, 6, 7])); // 1.5 frames

        let mut decoder = open(bytes, 4096).expect("valid WAV");
        assert_eq!(drain(&mut decoder).concat(), vec![5, 6]);
    }

    #[test]
    fn test_rejects_24_bit() {
        // ---
        let bytes = riff(&[
            chunk(b"fmt ", &fmt_body(1, 1, 48000, 24)),
            chunk(b"data", &[0; 6]),
        ]);
        let err = open(bytes, 4096).err().expect("must fail");
        assert_eq!(err, PlaybackError::from(FormatError::UnsupportedBitDepth(24)));
    }

    #[test]
    fn test_rejects_three_channels() {
        // ---
        let bytes = riff(&[
            chunk(b"fmt ", &fmt_body(1, 3, 48000, 16)),
            chunk(b"data", &[0; 6]),
        ]);
        let err = open(bytes, 4096).err().expect("must fail");
        assert_eq!(err, PlaybackError::from(FormatError::UnsupportedChannels(3)));
    }

    #[test]
    fn test_rejects_float_encoding() {
        // ---
        let bytes = riff(&[
            chunk(b"fmt ", &fmt_body(3, 1, 48000, 16)),
            chunk(b"data", &[0; 4]),
        ]);
        let err = open(bytes, 4096).err().expect("must fail");
        assert_eq!(err, PlaybackError::from(FormatError::UnsupportedEncoding(3)));
    }

    #[test]
    fn test_rejects_short_fmt_chunk() {
        // ---
        let bytes = riff(&[chunk(b"fmt ", &[1, 0, 1, 0]), chunk(b"data", &[0; 4])]);
        let err = open(bytes, 4096).err().expect("must fail");
        assert_eq!(err, PlaybackError::from(FormatError::FmtChunkTooShort(4)));
    }

    #[test]
    fn test_rejects_zero_sample_rate() {
        // ---
        let bytes = riff(&[
            chunk(b"fmt ", &fmt_body(1, 1, 0, 16)),
            chunk(b"data", &[0; 4]),
        ]);
        let err = open(bytes, 4096).err().expect("must fail");
        assert_eq!(err, PlaybackError::from(FormatError::InvalidSampleRate(0)));
    }

    #[test]
    fn test_missing_chunks() {
        // ---
        let no_data = riff(&[chunk(b"fmt ", &fmt_body(1, 1, 16000, 16))]);
        let err = open(no_data, 4096).err().expect("must fail");
        assert_eq!(err, PlaybackError::from(FormatError::MissingChunk("data")));

        let data_first = riff(&[
            chunk(b"data", &[0; 4]),
            chunk(b"fmt ", &fmt_body(1, 1, 16000, 16)),
        ]);
        let err = open(data_first, 4096).err().expect("must fail");
        assert_eq!(err, PlaybackError::from(FormatError::MissingChunk("fmt")));
    }

    #[test]
    fn test_rejects_non_riff() {
        // ---
        let err = open(b"RIFX\0\0\0\0WAVE".to_vec(), 4096).err().expect("must fail");
        assert_eq!(err, PlaybackError::from(FormatError::NotRiff));

        let err = open(b"RIFF\0\0\0\0AVI ".to_vec(), 4096).err().expect("must fail");
        assert_eq!(err, PlaybackError::from(FormatError::NotWave));

        let err = open(b"RIFF".to_vec(), 4096).err().expect("must fail");
        assert_eq!(err, PlaybackError::from(FormatError::Truncated("RIFF header")));
    }

    #[test]
    fn test_accepts_extended_fmt_chunk() {
        // ---
        let mut body = fmt_body(1, 1, 8000, 16);
        body.extend_from_slice(&[0, 0]); // cbSize
        let bytes = riff(&[chunk(b"fmt ", &body), chunk(b"data", &pcm_bytes(&[7, 8]))]);

        let mut decoder = open(bytes, 4096).expect("valid WAV");
        assert_eq!(drain(&mut decoder).concat(), vec![7, 8]);
    }
}
