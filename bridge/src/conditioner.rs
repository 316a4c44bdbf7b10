//! Shared tail of every playback: downmix → resample → gain.
//!
//! Both container decoders hand their interleaved source-rate samples to a
//! [`Conditioner`], which is the only place audio is converted to the
//! canonical mono rate.

use crate::decoder::StreamSpec;
use crate::pcm;
use crate::resampler::Resampler;

/// Converts decoded frames of one stream to mono PCM16 at the target rate.
#[derive(Debug)]
pub struct Conditioner {
    // ---
    channels: u16,
    resampler: Option<Resampler>,
    gain: f32,
}

impl Conditioner {
    // ---
    /// Creates the tail for a stream described by `spec`.
    ///
    /// When the source already runs at `target_rate` no resampler is built
    /// and samples pass through unchanged.
    pub fn new(spec: StreamSpec, target_rate: u32, gain: f32) -> Self {
        // ---
        let resampler =
            (spec.sample_rate != target_rate).then(|| Resampler::new(spec.sample_rate, target_rate));

        Self {
            channels: spec.channels,
            resampler,
            gain,
        }
    }

    /// Whether this stream needs rate conversion.
    pub fn resamples(&self) -> bool {
        // ---
        self.resampler.is_some()
    }

    /// Runs one decoded frame through the tail.
    pub fn process(&mut self, interleaved: &[i16]) -> Vec<i16> {
        // ---
        let mono = pcm::downmix(interleaved, self.channels);

        let mut out = match self.resampler.as_mut() {
            Some(resampler) => resampler.push(&mono),
            None => mono,
        };

        pcm::apply_gain(&mut out, self.gain);
        out
    }
}
