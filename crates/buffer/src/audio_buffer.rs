//! Append-only PCM accumulator with derived duration/silence metadata.
//!
//! Unlike a continuously-streamed sliding window, this buffer is swapped out
//! wholesale at cut time (see `SmartBuffer::cut`), so it never needs to trim
//! or compact mid-life: `reset` is the only way its contents shrink.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct AudioBuffer {
    samples: Vec<u8>,
    sample_rate: u32,
    channels: u16,
    first_write_at: Option<Instant>,
    last_write_at: Option<Instant>,
    last_speech_at: Option<Instant>,
}

impl AudioBuffer {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate,
            channels,
            first_write_at: None,
            last_write_at: None,
            last_speech_at: None,
        }
    }

    fn frame_bytes(&self) -> usize {
        self.channels as usize * 2
    }

    /// Append PCM bytes. `is_speech` false for comfort noise (the payload is
    /// typically empty in that case, but the write still advances
    /// `last_write_at` so silence timing keeps moving).
    pub fn push(&mut self, payload: &[u8], is_speech: bool, now: Instant) {
        if self.first_write_at.is_none() {
            self.first_write_at = Some(now);
        }
        self.last_write_at = Some(now);
        if is_speech {
            self.last_speech_at = Some(now);
        }
        if !payload.is_empty() {
            self.samples.extend_from_slice(payload);
        }
    }

    /// Duration derived purely from accumulated speech samples: comfort
    /// noise never grows this, regardless of how much silence elapses.
    pub fn duration(&self) -> Duration {
        let frame_bytes = self.frame_bytes();
        if frame_bytes == 0 || self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() / frame_bytes;
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }

    /// Wall-clock time since the last speech sample, or zero if no speech
    /// has ever been observed.
    pub fn silence_duration(&self, now: Instant) -> Duration {
        match self.last_speech_at {
            Some(t) => now.saturating_duration_since(t),
            None => Duration::ZERO,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.samples
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.first_write_at = None;
        self.last_write_at = None;
        self.last_speech_at = None;
    }
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::new(48_000, 2)
    }
}
