//! Per-stream-id owner of the dual active/processing buffers, the VAD, and
//! the short-term conversational context slot.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use uuid::Uuid;

use polyphony_channel::BoundedSender;
use polyphony_vad::{Decision, IntelligentVad, Priority, VadConfig};

use crate::audio_buffer::AudioBuffer;
use crate::segment::{
    AudioSegment, CompleteCallback, ErrorCallback, SegmentFailure, StartCallback, TranscriptResult,
};

const ULTRA_RESPONSIVE_WINDOW: Duration = Duration::from_secs(5);
const MAX_PROMPT_CHARS: usize = 224;

#[derive(Debug, Clone, Copy)]
pub struct SmartBufferConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub context_expiration: Duration,
}

impl Default for SmartBufferConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            context_expiration: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Default)]
struct ContextSlot {
    text: String,
    last_transcript_time: Option<Instant>,
}

#[derive(Debug, Default)]
struct Shared {
    is_processing: bool,
    context: ContextSlot,
    segments_created: u64,
    dropped_segments: u64,
}

#[derive(Debug, Clone)]
pub struct SmartBufferStatus {
    pub user_id: String,
    pub display_name: String,
    pub current_duration: Duration,
    pub is_processing: bool,
    pub has_context: bool,
    pub context_age: Option<Duration>,
    pub segments_created: u64,
    pub dropped_segments: u64,
}

/// Owns exactly one stream-id's worth of buffering state. Never shared by
/// reference outside the component; `get_status` is the only read path for
/// external observers and it always returns a snapshot.
pub struct SmartBuffer {
    user_id: String,
    display_name: String,
    stream_id: u32,
    session_id: Uuid,
    active: AudioBuffer,
    vad: IntelligentVad,
    sender: BoundedSender<AudioSegment>,
    shared: Arc<Mutex<Shared>>,
    config: SmartBufferConfig,
}

impl SmartBuffer {
    pub fn new(
        session_id: Uuid,
        stream_id: u32,
        user_id: String,
        display_name: String,
        sender: BoundedSender<AudioSegment>,
        vad_config: VadConfig,
        config: SmartBufferConfig,
    ) -> Self {
        Self {
            active: AudioBuffer::new(config.sample_rate, config.channels),
            vad: IntelligentVad::new(vad_config),
            user_id,
            display_name,
            stream_id,
            session_id,
            sender,
            shared: Arc::new(Mutex::new(Shared::default())),
            config,
        }
    }

    /// Append audio to the active buffer and consult the VAD (plus the
    /// ultra-responsive overrides) for whether to cut an utterance now.
    /// Comfort-noise frames carry an empty payload but still advance
    /// silence timing and can still trigger a cut.
    pub fn process_audio(&mut self, payload: &[u8], is_speech: bool, now: Instant) {
        self.active.push(payload, is_speech, now);

        let duration = self.active.duration();
        let silence = self.active.silence_duration(now);

        let decision = self
            .ultra_responsive_override(duration, silence, now)
            .unwrap_or_else(|| self.vad.decide(duration, silence));

        if let Decision::Cut { priority, reason } = decision {
            self.cut(priority, reason, now);
        }
    }

    fn ultra_responsive_override(
        &self,
        duration: Duration,
        silence: Duration,
        now: Instant,
    ) -> Option<Decision> {
        let recently_transcribed = {
            let shared = self.shared.lock().unwrap();
            shared
                .context
                .last_transcript_time
                .map(|t| now.saturating_duration_since(t) <= ULTRA_RESPONSIVE_WINDOW)
                .unwrap_or(false)
        };
        if !recently_transcribed {
            return None;
        }
        if duration > Duration::from_millis(500) && silence > Duration::from_millis(300) {
            return Some(Decision::Cut {
                priority: Priority::High,
                reason: "conversational response",
            });
        }
        if duration > Duration::from_millis(800) && silence > Duration::from_millis(200) {
            return Some(Decision::Cut {
                priority: Priority::Normal,
                reason: "ultra-short segment",
            });
        }
        None
    }

    /// The five-step atomic cut protocol from the component design: guard,
    /// swap, read context, build segment, try-send.
    fn cut(&mut self, priority: Priority, reason: &'static str, now: Instant) {
        // Step 1: guard.
        if self.active.duration() < self.vad.config().min_speech_duration {
            return;
        }
        {
            let shared = self.shared.lock().unwrap();
            if shared.is_processing {
                return;
            }
        }

        // Step 2: atomic swap, mark processing.
        let processing = std::mem::replace(
            &mut self.active,
            AudioBuffer::new(self.config.sample_rate, self.config.channels),
        );
        {
            let mut shared = self.shared.lock().unwrap();
            shared.is_processing = true;
        }

        let duration = processing.duration();
        let pcm_bytes = processing.into_bytes();

        // Step 3: read context, respecting expiration.
        let prior_context = {
            let shared = self.shared.lock().unwrap();
            match shared.context.last_transcript_time {
                Some(t) if now.saturating_duration_since(t) <= self.config.context_expiration => {
                    truncate_tail(&shared.context.text, MAX_PROMPT_CHARS)
                }
                _ => String::new(),
            }
        };

        // Step 4: build the segment with completion callbacks.
        let segment_id = Uuid::new_v4();
        let shared_for_complete = self.shared.clone();
        let shared_for_error = self.shared.clone();

        let on_start: StartCallback = Box::new(|| {});
        let on_complete: CompleteCallback = Box::new(move |result: TranscriptResult| {
            let mut shared = shared_for_complete.lock().unwrap();
            if !result.text.is_empty() {
                shared.context.text = result.text;
                shared.context.last_transcript_time = Some(Instant::now());
            }
            shared.is_processing = false;
        });
        let on_error: ErrorCallback = Box::new(move |_failure: SegmentFailure| {
            let mut shared = shared_for_error.lock().unwrap();
            shared.is_processing = false;
        });

        let segment = AudioSegment::new(
            segment_id,
            self.session_id,
            self.user_id.clone(),
            self.display_name.clone(),
            self.stream_id,
            pcm_bytes,
            duration,
            prior_context,
            priority,
            reason,
            now,
            on_start,
            on_complete,
            on_error,
        );

        // Step 5: try-send, handling queue-full by clearing is_processing.
        match self.sender.try_send(segment) {
            Ok(()) => {
                let mut shared = self.shared.lock().unwrap();
                shared.segments_created += 1;
            }
            Err(_) => {
                let mut shared = self.shared.lock().unwrap();
                shared.is_processing = false;
                shared.dropped_segments += 1;
                tracing::warn!(
                    stream_id = self.stream_id,
                    user_id = %self.user_id,
                    "segment channel full, dropping segment"
                );
            }
        }
    }

    pub fn get_status(&self, now: Instant) -> SmartBufferStatus {
        let shared = self.shared.lock().unwrap();
        SmartBufferStatus {
            user_id: self.user_id.clone(),
            display_name: self.display_name.clone(),
            current_duration: self.active.duration(),
            is_processing: shared.is_processing,
            has_context: !shared.context.text.is_empty(),
            context_age: shared
                .context
                .last_transcript_time
                .map(|t| now.saturating_duration_since(t)),
            segments_created: shared.segments_created,
            dropped_segments: shared.dropped_segments,
        }
    }

    pub fn reset(&mut self) {
        self.active.reset();
        self.vad.reset();
        let mut shared = self.shared.lock().unwrap();
        *shared = Shared::default();
    }
}

fn truncate_tail(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    chars[chars.len() - max_chars..].iter().collect()
}
