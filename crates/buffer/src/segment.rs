//! The immutable record handed from a `SmartBuffer` to the dispatcher.

use std::time::{Duration, Instant};

use uuid::Uuid;

use polyphony_vad::Priority;

/// Result returned by a transcription backend for a completed segment.
/// Empty `text` means "no speech detected" and must not update context.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptResult {
    pub text: String,
    pub confidence: f32,
    pub language: String,
    pub duration: Duration,
}

/// Why a segment did not complete successfully, as surfaced to its
/// `on_error` callback. Mirrors the subset of the error taxonomy that can
/// reach a single segment (the rest — ConfigInvalid, IngressClosed,
/// VadInternal — are pipeline-level, not segment-level).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    QueueFull,
    SpeakerCapReached,
    BackendUnavailable,
    BackendTimeout,
    BackendInvalidInput,
    DecoderFailure,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct SegmentFailure {
    pub kind: FailureKind,
    pub message: String,
}

pub type StartCallback = Box<dyn FnOnce() + Send>;
pub type CompleteCallback = Box<dyn FnOnce(TranscriptResult) + Send>;
pub type ErrorCallback = Box<dyn FnOnce(SegmentFailure) + Send>;

pub struct AudioSegment {
    pub segment_id: Uuid,
    pub session_id: Uuid,
    pub user_id: String,
    pub display_name: String,
    pub stream_id: u32,
    pub pcm_bytes: Vec<u8>,
    pub duration: Duration,
    pub prior_context: String,
    /// Always empty by default; see the Open Question on overlap audio.
    pub overlap_audio: Vec<u8>,
    pub priority: Priority,
    pub reason: &'static str,
    pub submitted_at: Instant,
    on_start: Option<StartCallback>,
    on_complete: Option<CompleteCallback>,
    on_error: Option<ErrorCallback>,
}

impl std::fmt::Debug for AudioSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSegment")
            .field("segment_id", &self.segment_id)
            .field("session_id", &self.session_id)
            .field("user_id", &self.user_id)
            .field("stream_id", &self.stream_id)
            .field("priority", &self.priority)
            .field("reason", &self.reason)
            .field("duration", &self.duration)
            .finish()
    }
}

impl AudioSegment {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        segment_id: Uuid,
        session_id: Uuid,
        user_id: String,
        display_name: String,
        stream_id: u32,
        pcm_bytes: Vec<u8>,
        duration: Duration,
        prior_context: String,
        priority: Priority,
        reason: &'static str,
        submitted_at: Instant,
        on_start: StartCallback,
        on_complete: CompleteCallback,
        on_error: ErrorCallback,
    ) -> Self {
        Self {
            segment_id,
            session_id,
            user_id,
            display_name,
            stream_id,
            pcm_bytes,
            duration,
            prior_context,
            overlap_audio: Vec::new(),
            priority,
            reason,
            submitted_at,
            on_start: Some(on_start),
            on_complete: Some(on_complete),
            on_error: Some(on_error),
        }
    }

    pub fn fire_start(&mut self) {
        if let Some(cb) = self.on_start.take() {
            cb();
        }
    }

    /// Consumes the segment, firing exactly one of the two terminal
    /// callbacks — the type system (by-value `self`) makes firing both
    /// or neither impossible from outside this module.
    pub fn complete(mut self, result: TranscriptResult) {
        self.on_start.take();
        if let Some(cb) = self.on_complete.take() {
            cb(result);
        }
    }

    pub fn fail(mut self, failure: SegmentFailure) {
        self.on_start.take();
        if let Some(cb) = self.on_error.take() {
            cb(failure);
        }
    }

    /// Chains additional callbacks after the existing ones, so a higher
    /// layer (session store, event bus) can observe start/completion
    /// without disturbing the buffer's own bookkeeping callbacks. The
    /// original callback always runs first.
    pub fn with_extra_callbacks(
        mut self,
        extra_start: StartCallback,
        extra_complete: CompleteCallback,
        extra_error: ErrorCallback,
    ) -> Self {
        let prev_start = self.on_start.take();
        let prev_complete = self.on_complete.take();
        let prev_error = self.on_error.take();
        self.on_start = Some(Box::new(move || {
            if let Some(cb) = prev_start {
                cb();
            }
            extra_start();
        }));
        self.on_complete = Some(Box::new(move |result: TranscriptResult| {
            if let Some(cb) = prev_complete {
                cb(result.clone());
            }
            extra_complete(result);
        }));
        self.on_error = Some(Box::new(move |failure: SegmentFailure| {
            if let Some(cb) = prev_error {
                cb(failure.clone());
            }
            extra_error(failure);
        }));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn make_segment(
        on_start: StartCallback,
        on_complete: CompleteCallback,
        on_error: ErrorCallback,
    ) -> AudioSegment {
        AudioSegment::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "user-1".into(),
            "User One".into(),
            101,
            vec![0u8; 10],
            Duration::from_millis(300),
            String::new(),
            Priority::Normal,
            "sentence end",
            Instant::now(),
            on_start,
            on_complete,
            on_error,
        )
    }

    #[test]
    fn complete_fires_only_complete_callback() {
        let completed = Arc::new(AtomicBool::new(false));
        let errored = Arc::new(AtomicBool::new(false));
        let c1 = completed.clone();
        let e1 = errored.clone();
        let segment = make_segment(
            Box::new(|| {}),
            Box::new(move |_| c1.store(true, Ordering::SeqCst)),
            Box::new(move |_| e1.store(true, Ordering::SeqCst)),
        );
        segment.complete(TranscriptResult {
            text: "hello".into(),
            confidence: 0.9,
            language: "en".into(),
            duration: Duration::from_millis(300),
        });
        assert!(completed.load(Ordering::SeqCst));
        assert!(!errored.load(Ordering::SeqCst));
    }

    #[test]
    fn fail_fires_only_error_callback() {
        let completed = Arc::new(AtomicBool::new(false));
        let errored = Arc::new(AtomicBool::new(false));
        let c1 = completed.clone();
        let e1 = errored.clone();
        let segment = make_segment(
            Box::new(|| {}),
            Box::new(move |_| c1.store(true, Ordering::SeqCst)),
            Box::new(move |_| e1.store(true, Ordering::SeqCst)),
        );
        segment.fail(SegmentFailure {
            kind: FailureKind::QueueFull,
            message: "full".into(),
        });
        assert!(!completed.load(Ordering::SeqCst));
        assert!(errored.load(Ordering::SeqCst));
    }

    #[test]
    fn extra_callbacks_run_alongside_original() {
        let original_ran = Arc::new(AtomicBool::new(false));
        let extra_ran = Arc::new(AtomicBool::new(false));
        let o1 = original_ran.clone();
        let e1 = extra_ran.clone();
        let segment = make_segment(
            Box::new(|| {}),
            Box::new(move |_| o1.store(true, Ordering::SeqCst)),
            Box::new(|_| {}),
        )
        .with_extra_callbacks(
            Box::new(|| {}),
            Box::new(move |_| e1.store(true, Ordering::SeqCst)),
            Box::new(|_| {}),
        );

        segment.complete(TranscriptResult {
            text: "hi".into(),
            confidence: 0.5,
            language: "en".into(),
            duration: Duration::from_millis(100),
        });
        assert!(original_ran.load(Ordering::SeqCst));
        assert!(extra_ran.load(Ordering::SeqCst));
    }
}
