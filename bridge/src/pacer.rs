//! Real-time pacing for frame delivery.

use std::time::Duration;

use tokio::time::Instant;

/// Holds frames back so delivery tracks wall-clock time.
///
/// The schedule is anchored at the first frame: frame `n` may be written no
/// earlier than `start + samples_before_n / sample_rate`. Lateness of up to
/// one frame is absorbed. A longer stall re-anchors the schedule at the
/// current frame, so delivery never runs more than one frame ahead of the
/// wall clock.
#[derive(Debug)]
pub struct Pacer {
    // ---
    sample_rate: u32,
    started: Option<Instant>,
    scheduled_samples: u64,
}

impl Pacer {
    // ---
    pub fn new(sample_rate: u32) -> Self {
        // ---
        Self {
            sample_rate: sample_rate.max(1),
            started: None,
            scheduled_samples: 0,
        }
    }

    /// Waits until a frame of `samples` samples is due, then books its slot.
    pub async fn wait(&mut self, samples: usize) {
        // ---
        let now = Instant::now();
        let booked = self.offset(self.scheduled_samples);
        let start = *self.started.get_or_insert(now);
        let mut due = start + booked;

        if now > due + self.offset(samples as u64) {
            // Stalled: overdue slots are dropped, not replayed as a burst
            self.started = Some(now - booked);
            due = now;
        }

        tokio::time::sleep_until(due).await;
        self.scheduled_samples += samples as u64;
    }

    /// Audio time booked so far.
    pub fn scheduled(&self) -> Duration {
        // ---
        self.offset(self.scheduled_samples)
    }

    fn offset(&self, samples: u64) -> Duration {
        // ---
        Duration::from_micros(samples * 1_000_000 / self.sample_rate as u64)
    }
}
