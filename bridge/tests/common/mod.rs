//! Shared fixtures for the bridge integration tests.
#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use audio_bridge::{AudioTrack, BridgeConfig, BridgeService, DeliveryError, Room};
use bridge_common::MetricsContext;

/// Track that records every frame written to it.
pub struct MemoryTrack {
    // ---
    name: String,
    frames: Mutex<Vec<Vec<i16>>>,
    closed: AtomicBool,
    fail_after: Option<usize>,
}

impl MemoryTrack {
    // ---
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frames(&self) -> Vec<Vec<i16>> {
        self.frames.lock().unwrap().clone()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn samples(&self) -> Vec<i16> {
        self.frames.lock().unwrap().concat()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl AudioTrack for MemoryTrack {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write_frame(&self, frame: &[i16]) -> Result<(), DeliveryError> {
        // ---
        if self.is_closed() {
            return Err(DeliveryError::TrackClosed(self.name.clone()));
        }

        let mut frames = self.frames.lock().unwrap();
        if self.fail_after.is_some_and(|n| frames.len() >= n) {
            return Err(DeliveryError::Io("simulated write failure".into()));
        }
        frames.push(frame.to_vec());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Room keeping every track it ever published, in publish order.
#[derive(Default)]
pub struct MemoryRoom {
    // ---
    tracks: Mutex<Vec<Arc<MemoryTrack>>>,
    fail_first_track_after: Option<usize>,
    disconnects: AtomicUsize,
}

impl MemoryRoom {
    // ---
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The first published track fails every write after `frames` frames.
    pub fn failing_first_track_after(frames: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_first_track_after: Some(frames),
            ..Default::default()
        })
    }

    pub fn tracks(&self) -> Vec<Arc<MemoryTrack>> {
        self.tracks.lock().unwrap().clone()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.lock().unwrap().len()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnects.load(Ordering::SeqCst) > 0
    }

    /// Waits until the latest published track holds at least `frames` frames.
    pub async fn wait_for_frames(&self, frames: usize) -> Arc<MemoryTrack> {
        // ---
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let Some(track) = self.tracks().last() {
                    if track.frame_count() >= frames {
                        return Arc::clone(track);
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("frames delivered in time")
    }
}

#[async_trait]
impl Room for MemoryRoom {
    async fn publish_track(&self, name: &str) -> Result<Arc<dyn AudioTrack>, DeliveryError> {
        // ---
        if self.is_disconnected() {
            return Err(DeliveryError::RoomClosed);
        }

        let mut tracks = self.tracks.lock().unwrap();
        let fail_after = if tracks.is_empty() {
            self.fail_first_track_after
        } else {
            None
        };

        let track = Arc::new(MemoryTrack {
            name: name.to_string(),
            frames: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            fail_after,
        });
        tracks.push(Arc::clone(&track));
        Ok(track)
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Service with real-time pacing switched on or off.
pub fn service(realtime_pacing: bool) -> BridgeService {
    // ---
    let config = BridgeConfig {
        realtime_pacing,
        ..Default::default()
    };
    let metrics = MetricsContext::new("integration-test").expect("metrics registry");
    BridgeService::new(config, metrics).expect("bridge service")
}

/// Sine wave at `amplitude`, `len` samples long.
pub fn sine(rate: u32, freq: f64, amplitude: f64, len: usize) -> Vec<i16> {
    // ---
    (0..len)
        .map(|i| {
            let t = i as f64 / rate as f64;
            (amplitude * (2.0 * std::f64::consts::PI * freq * t).sin()) as i16
        })
        .collect()
}

/// Encodes interleaved 16-bit samples as a WAV file.
pub fn wav_bytes(sample_rate: u32, channels: u16, interleaved: &[i16]) -> Vec<u8> {
    // ---
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("WAV writer");
        for &s in interleaved {
            writer.write_sample(s).expect("write sample");
        }
        writer.finalize().expect("finalize WAV");
    }
    cursor.into_inner()
}

/// Hand-built RIFF/WAVE file with an arbitrary `fmt ` chunk.
pub fn raw_wav(encoding: u16, channels: u16, sample_rate: u32, bits: u16, data: &[u8]) -> Vec<u8> {
    // ---
    let block_align = channels * bits / 8;
    let byte_rate = sample_rate * block_align as u32;

    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data.len() as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&encoding.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    out
}

/// Silent MPEG-1 Layer III stream: 128 kbps, 44.1kHz, mono.
pub fn silent_mp3(frames: usize) -> Vec<u8> {
    // ---
    let mut frame = vec![0u8; 417];
    frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0xC0]);
    frame.repeat(frames)
}
