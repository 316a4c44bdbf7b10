//! PCM16 helpers: byte conversion, channel downmix and gain.
//!
//! All byte-level PCM in the bridge is little-endian signed 16-bit.

/// Converts little-endian bytes to samples. A trailing odd byte is ignored.
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    // ---
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Converts samples to little-endian bytes.
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    // ---
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Reduces interleaved audio to mono by averaging each sample frame.
///
/// Sums are taken in `i32` and divided with truncation toward zero. Mono input
/// is returned unchanged; an incomplete trailing frame is dropped.
pub fn downmix(samples: &[i16], channels: u16) -> Vec<i16> {
    // ---
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return samples.to_vec();
    }

    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Scales samples in place by a linear factor, saturating at the i16 range.
///
/// A gain of exactly `1.0` leaves the buffer untouched.
pub fn apply_gain(samples: &mut [i16], gain: f32) {
    // ---
    if gain == 1.0 {
        return;
    }

    let gain = gain as f64;
    for sample in samples.iter_mut() {
        let scaled = (*sample as f64 * gain).clamp(i16::MIN as f64, i16::MAX as f64);
        *sample = scaled as i16;
    }
}
