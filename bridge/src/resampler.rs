//! Streaming linear-interpolation resampler.
//!
//! Unlike a one-shot resampler, [`Resampler`] is fed successive chunks and
//! carries its read position and unconsumed input across calls, so chunk
//! edges never show up in the output.

/// Stateful mono resampler from an arbitrary source rate to a fixed target.
///
/// Between calls `position` normally lies in `[0, 1)`. When one step is
/// larger than the buffered input (downsampling a very short chunk) it may
/// be left at 1 or more over an empty buffer; that overshoot is skipped from
/// the next chunk so output timing does not depend on chunk size.
#[derive(Debug, Clone)]
pub struct Resampler {
    // ---
    /// Input not yet fully consumed; index 0 is where `position` is measured.
    pending: Vec<i16>,

    /// Read position into `pending`, in source samples.
    position: f64,

    /// Source samples advanced per output sample (`source / target`).
    step: f64,
}

impl Resampler {
    // ---
    /// Creates a resampler for `source_rate` → `target_rate`.
    ///
    /// Both rates must be positive; decoders reject zero rates before a
    /// resampler is ever built.
    pub fn new(source_rate: u32, target_rate: u32) -> Self {
        // ---
        debug_assert!(source_rate > 0 && target_rate > 0);
        Self {
            pending: Vec::new(),
            position: 0.0,
            step: source_rate as f64 / target_rate.max(1) as f64,
        }
    }

    /// Source samples consumed per output sample.
    pub fn step(&self) -> f64 {
        // ---
        self.step
    }

    /// Number of buffered input samples waiting for a right-hand neighbour.
    pub fn pending_len(&self) -> usize {
        // ---
        self.pending.len()
    }

    /// Feeds a chunk of input and returns every output sample it completes.
    ///
    /// An output sample at position `p` needs input samples `floor(p)` and
    /// `floor(p) + 1`; until both are buffered nothing is emitted.
    pub fn push(&mut self, input: &[i16]) -> Vec<i16> {
        // ---
        self.pending.extend_from_slice(input);
        if self.pending.len() < 2 {
            return Vec::new();
        }

        let mut out = Vec::with_capacity((input.len() as f64 / self.step) as usize + 1);
        loop {
            let index = self.position as usize;
            if index + 1 >= self.pending.len() {
                break;
            }

            // Linear interpolation between adjacent samples
            let frac = self.position - index as f64;
            let s0 = self.pending[index] as f64;
            let s1 = self.pending[index + 1] as f64;
            let value = (s0 + (s1 - s0) * frac).clamp(i16::MIN as f64, i16::MAX as f64);

            out.push(value as i16);
            self.position += self.step;
        }

        // Drop whole samples behind the read position. When the position ran
        // past the buffer, the overshoot stays in `position` and is skipped
        // from the next chunk.
        let consumed = (self.position as usize).min(self.pending.len());
        if consumed > 0 {
            self.pending.drain(..consumed);
            self.position -= consumed as f64;
        }

        out
    }
}
