//! The async transcription backend contract the pipeline drives, plus a
//! `MockTranscriber` reference adapter for tests and worked scenarios.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct TranscribeOptions {
    /// Max ~224 chars recommended; callers should trim before calling.
    pub prior_context: String,
    /// "auto" or a BCP-47 tag.
    pub language: String,
    /// Typically empty; see the overlap-audio Open Question.
    pub overlap_audio: Vec<u8>,
}

impl Default for TranscribeOptions {
    fn default() -> Self {
        Self {
            prior_context: String::new(),
            language: "auto".to_string(),
            overlap_audio: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub text: String,
    pub confidence: f32,
    pub language: String,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BackendUnavailable,
    InvalidInput,
    Timeout,
    DecoderFailure,
}

impl ErrorKind {
    pub fn retryable(self) -> bool {
        matches!(self, ErrorKind::BackendUnavailable | ErrorKind::Timeout)
    }
}

#[derive(Debug, Error, Clone)]
#[error("{kind:?}: {message}")]
pub struct TranscriberError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TranscriberError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }
}

/// A transcription backend. Implementations MUST be safe to call from
/// multiple workers concurrently, or declare their concurrency limit via
/// `max_concurrency` so the dispatcher can size its worker pool accordingly.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe_with_context(
        &self,
        audio: &[u8],
        opts: &TranscribeOptions,
    ) -> Result<Transcription, TranscriberError>;

    async fn is_ready(&self) -> bool;

    /// `None` means "no declared limit, safe for unbounded concurrent calls".
    fn max_concurrency(&self) -> Option<usize> {
        None
    }
}

/// Scripted or fixed-latency mock backend for tests and the worked S1-S6
/// scenarios. Each call consumes the next scripted response if one remains,
/// else falls back to `default_text`.
pub struct MockTranscriber {
    ready: bool,
    default_text: String,
    default_confidence: f32,
    script: Mutex<Vec<Result<Transcription, TranscriberError>>>,
    call_count: AtomicUsize,
}

impl MockTranscriber {
    pub fn new(default_text: impl Into<String>) -> Self {
        Self {
            ready: true,
            default_text: default_text.into(),
            default_confidence: 0.95,
            script: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn not_ready() -> Self {
        let mut m = Self::new("");
        m.ready = false;
        m
    }

    /// Queue responses to return in order before falling back to the
    /// default. Useful for S6 (retryable failure then success).
    pub fn push_script(&self, result: Result<Transcription, TranscriberError>) {
        self.script.lock().unwrap().push(result);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe_with_context(
        &self,
        audio: &[u8],
        _opts: &TranscribeOptions,
    ) -> Result<Transcription, TranscriberError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);

        let scripted = {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                None
            } else {
                Some(script.remove(0))
            }
        };
        if let Some(result) = scripted {
            return result;
        }

        if audio.is_empty() {
            return Ok(Transcription {
                text: String::new(),
                confidence: 0.0,
                language: "en".to_string(),
                duration: Duration::ZERO,
            });
        }

        Ok(Transcription {
            text: self.default_text.clone(),
            confidence: self.default_confidence,
            language: "en".to_string(),
            duration: Duration::from_millis(audio.len() as u64 / 4 * 1000 / 48_000),
        })
    }

    async fn is_ready(&self) -> bool {
        self.ready
    }
}
