//! `SpeakerDispatcher`: routes segments into per-speaker FIFOs and drives a
//! fixed worker pool with round-robin, at-most-one-worker-per-speaker
//! scheduling.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use polyphony_buffer::{AudioSegment, FailureKind, SegmentFailure, TranscriptResult};
use polyphony_transcriber::{ErrorKind, TranscribeOptions, Transcriber, TranscriberError, Transcription};

use crate::metrics::{Metrics, MetricsSnapshot};
use crate::speaker_queue::SpeakerQueue;

#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    pub worker_count: usize,
    pub per_speaker_max_queue_size: usize,
    pub max_active_speakers: usize,
    pub idle_eviction: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            per_speaker_max_queue_size: 25,
            max_active_speakers: 32,
            idle_eviction: Duration::from_secs(60),
            max_retries: 0,
            retry_delay: Duration::from_millis(200),
        }
    }
}

struct DispatcherState {
    queues: HashMap<String, SpeakerQueue>,
    round_robin: Vec<String>,
    busy: HashSet<String>,
    cursor: usize,
}

impl DispatcherState {
    fn new() -> Self {
        Self {
            queues: HashMap::new(),
            round_robin: Vec::new(),
            busy: HashSet::new(),
            cursor: 0,
        }
    }
}

fn pick_next_ready(state: &mut DispatcherState) -> Option<(String, AudioSegment)> {
    let n = state.round_robin.len();
    if n == 0 {
        return None;
    }
    for i in 0..n {
        let idx = (state.cursor + i) % n;
        let user_id = state.round_robin[idx].clone();
        if state.busy.contains(&user_id) {
            continue;
        }
        if let Some(queue) = state.queues.get_mut(&user_id) {
            if let Some(segment) = queue.pop_next() {
                state.busy.insert(user_id.clone());
                state.cursor = (idx + 1) % n;
                queue.mark_idle_if_empty();
                return Some((user_id, segment));
            }
        }
    }
    None
}

pub struct SpeakerDispatcher {
    state: Arc<Mutex<DispatcherState>>,
    notify: Arc<Notify>,
    metrics: Arc<Metrics>,
    config: DispatcherConfig,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl SpeakerDispatcher {
    pub fn new(config: DispatcherConfig, transcriber: Arc<dyn Transcriber>) -> Arc<Self> {
        let dispatcher = Arc::new(Self {
            state: Arc::new(Mutex::new(DispatcherState::new())),
            notify: Arc::new(Notify::new()),
            metrics: Arc::new(Metrics::default()),
            config,
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        });

        let mut handles = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let state = dispatcher.state.clone();
            let notify = dispatcher.notify.clone();
            let metrics = dispatcher.metrics.clone();
            let shutdown = dispatcher.shutdown.clone();
            let transcriber = transcriber.clone();
            handles.push(tokio::spawn(worker_loop(
                worker_id, state, notify, transcriber, config, metrics, shutdown,
            )));
        }
        *dispatcher.workers.lock().unwrap() = handles;
        dispatcher
    }

    /// Route a segment to its speaker's queue, creating the queue (and
    /// evicting an idle one if at capacity) as needed.
    pub fn route_segment(&self, segment: AudioSegment) {
        self.route_segment_at(segment, Instant::now());
    }

    /// Same as `route_segment` with an explicit timestamp, so tests can
    /// exercise idle-eviction deterministically without a real 60s wait.
    pub fn route_segment_at(&self, mut segment: AudioSegment, now: Instant) {
        let mut guard = self.state.lock().unwrap();

        if !guard.queues.contains_key(&segment.user_id) {
            if guard.queues.len() >= self.config.max_active_speakers {
                let idle_eviction = self.config.idle_eviction;
                let candidate = guard
                    .queues
                    .iter()
                    .filter(|(_, q)| {
                        q.is_empty() && now.duration_since(q.last_active()) >= idle_eviction
                    })
                    .min_by_key(|(_, q)| q.last_active())
                    .map(|(id, _)| id.clone());

                match candidate {
                    Some(id) => {
                        guard.queues.remove(&id);
                        guard.round_robin.retain(|x| x != &id);
                        self.metrics.record_eviction();
                    }
                    None => {
                        drop(guard);
                        self.metrics.record_dropped();
                        tracing::warn!(user_id = %segment.user_id, "max active speakers reached, rejecting segment");
                        segment.fail(SegmentFailure {
                            kind: FailureKind::SpeakerCapReached,
                            message: "max active speakers reached".to_string(),
                        });
                        return;
                    }
                }
            }
            guard.queues.insert(
                segment.user_id.clone(),
                SpeakerQueue::new(
                    segment.user_id.clone(),
                    self.config.per_speaker_max_queue_size,
                    now,
                ),
            );
            guard.round_robin.push(segment.user_id.clone());
        }

        let user_id = segment.user_id.clone();
        let queue = guard.queues.get_mut(&user_id).expect("queue just inserted");
        match queue.push(segment, now) {
            Ok(()) => {
                drop(guard);
                self.metrics.record_routed();
                self.notify.notify_waiters();
            }
            Err(rejected) => {
                drop(guard);
                self.metrics.record_dropped();
                tracing::warn!(user_id = %user_id, "per-speaker queue full, dropping segment");
                rejected.fail(SegmentFailure {
                    kind: FailureKind::QueueFull,
                    message: "per-speaker queue full".to_string(),
                });
            }
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn active_speaker_count(&self) -> usize {
        self.state.lock().unwrap().queues.len()
    }

    pub fn queue_depth(&self, user_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(user_id)
            .map(SpeakerQueue::len)
            .unwrap_or(0)
    }

    /// Cancel worker loops and wait up to `grace` for in-flight segments to
    /// finish. Any segment still in flight past the grace period is left to
    /// the caller's own timeout handling; its eventual completion still
    /// fires exactly one callback. Segments still sitting in a per-speaker
    /// queue (never picked up by a worker) are failed with
    /// `FailureKind::Cancelled` so every enqueued segment still fires
    /// exactly one terminal callback.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutdown.cancel();
        let handles = std::mem::take(&mut *self.workers.lock().unwrap());
        let _ = tokio::time::timeout(grace, futures::future::join_all(handles)).await;

        let stranded: Vec<AudioSegment> = {
            let mut guard = self.state.lock().unwrap();
            let drained: Vec<AudioSegment> = guard
                .queues
                .values_mut()
                .flat_map(|queue| queue.drain_all())
                .collect();
            guard.round_robin.clear();
            guard.busy.clear();
            drained
        };

        for segment in stranded {
            segment.fail(SegmentFailure {
                kind: FailureKind::Cancelled,
                message: "dispatcher shut down before the segment was processed".to_string(),
            });
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    worker_id: usize,
    state: Arc<Mutex<DispatcherState>>,
    notify: Arc<Notify>,
    transcriber: Arc<dyn Transcriber>,
    config: DispatcherConfig,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
) {
    loop {
        let picked = {
            let mut guard = state.lock().unwrap();
            pick_next_ready(&mut guard)
        };

        let (user_id, segment) = match picked {
            Some(v) => v,
            None => {
                tokio::select! {
                    _ = notify.notified() => continue,
                    _ = shutdown.cancelled() => break,
                }
            }
        };

        tracing::debug!(worker_id, user_id = %user_id, "worker picked up segment");
        process_segment(segment, &transcriber, &config, &metrics).await;

        {
            let mut guard = state.lock().unwrap();
            guard.busy.remove(&user_id);
        }
        notify.notify_waiters();
    }
}

async fn process_segment(
    mut segment: AudioSegment,
    transcriber: &Arc<dyn Transcriber>,
    config: &DispatcherConfig,
    metrics: &Metrics,
) {
    segment.fire_start();

    let process_timeout = std::cmp::max(segment.duration * 10, Duration::from_secs(5));
    let opts = TranscribeOptions {
        prior_context: segment.prior_context.clone(),
        language: "auto".to_string(),
        overlap_audio: segment.overlap_audio.clone(),
    };

    let mut attempt = 0u32;
    loop {
        let pcm = segment.pcm_bytes.clone();
        let call = AssertUnwindSafe(tokio::time::timeout(
            process_timeout,
            transcriber.transcribe_with_context(&pcm, &opts),
        ))
        .catch_unwind()
        .await;

        let result: Result<Transcription, TranscriberError> = match call {
            Ok(Ok(inner)) => inner,
            Ok(Err(_elapsed)) => Err(TranscriberError::new(
                ErrorKind::Timeout,
                "process_timeout exceeded",
            )),
            Err(_panic) => Err(TranscriberError::new(
                ErrorKind::DecoderFailure,
                "transcriber backend panicked",
            )),
        };

        match result {
            Ok(transcription) => {
                metrics.record_processed();
                segment.complete(TranscriptResult {
                    text: transcription.text,
                    confidence: transcription.confidence,
                    language: transcription.language,
                    duration: transcription.duration,
                });
                return;
            }
            Err(err) => {
                if attempt < config.max_retries && err.retryable() {
                    attempt += 1;
                    metrics.record_retry();
                    tokio::time::sleep(config.retry_delay).await;
                    continue;
                }
                metrics.record_failed();
                segment.fail(SegmentFailure {
                    kind: translate_kind(err.kind),
                    message: err.message,
                });
                return;
            }
        }
    }
}

fn translate_kind(kind: ErrorKind) -> FailureKind {
    match kind {
        ErrorKind::BackendUnavailable => FailureKind::BackendUnavailable,
        ErrorKind::InvalidInput => FailureKind::BackendInvalidInput,
        ErrorKind::Timeout => FailureKind::BackendTimeout,
        ErrorKind::DecoderFailure => FailureKind::DecoderFailure,
    }
}
