//! Top-level orchestrator: owns the per-stream-id `SmartBuffer` map, the
//! single bounded segment channel all buffers feed, and the glue that
//! drives the session store and event bus off dispatcher completions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use polyphony_buffer::{AudioSegment, SmartBuffer};
use polyphony_channel::{BoundedReceiver, BoundedSender};
use polyphony_dispatcher::{MetricsSnapshot, SpeakerDispatcher};
use polyphony_events::{Event, EventBus, EventBusConfig, EventPayload};
use polyphony_session::SessionStore;
use polyphony_transcriber::Transcriber;

use crate::config::Config;
use crate::error::PipelineError;
use crate::frame::PcmFrame;

/// Owns exactly one transcription session: the frame ingress map, the
/// dispatcher and worker pool behind it, and the event/session-store
/// plumbing. Dropping the `Arc` without calling `shutdown` first leaves the
/// worker tasks running until the process exits.
pub struct Pipeline {
    session_id: Uuid,
    config: Config,
    buffers: Mutex<HashMap<u32, SmartBuffer>>,
    segment_tx: BoundedSender<AudioSegment>,
    dispatcher: Arc<SpeakerDispatcher>,
    event_bus: Arc<EventBus>,
    shutdown: CancellationToken,
    relay: Mutex<Option<JoinHandle<()>>>,
}

impl Pipeline {
    pub fn new(
        config: Config,
        transcriber: Arc<dyn Transcriber>,
        session_store: Arc<dyn SessionStore>,
    ) -> Result<Arc<Self>, PipelineError> {
        config.validate()?;

        let session_id = Uuid::new_v4();
        let event_bus = Arc::new(EventBus::new(EventBusConfig {
            capacity: config.pipeline.event_buffer_size,
        }));
        let (segment_tx, segment_rx) =
            polyphony_channel::bounded(config.pipeline.queue_size, "segment");
        let dispatcher = SpeakerDispatcher::new(config.dispatcher_config(), transcriber);
        let shutdown = CancellationToken::new();

        let pipeline = Arc::new(Self {
            session_id,
            config,
            buffers: Mutex::new(HashMap::new()),
            segment_tx,
            dispatcher: dispatcher.clone(),
            event_bus: event_bus.clone(),
            shutdown: shutdown.clone(),
            relay: Mutex::new(None),
        });

        pipeline
            .event_bus
            .publish(Event::new(session_id, Utc::now(), EventPayload::SessionCreated));

        let handle = tokio::spawn(relay_loop(
            segment_rx,
            dispatcher,
            event_bus,
            session_store,
            session_id,
            shutdown,
        ));
        *pipeline.relay.lock().unwrap() = Some(handle);

        Ok(pipeline)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.dispatcher.metrics()
    }

    pub fn active_speaker_count(&self) -> usize {
        self.dispatcher.active_speaker_count()
    }

    pub fn queue_depth(&self, user_id: &str) -> usize {
        self.dispatcher.queue_depth(user_id)
    }

    /// Feed one decoded PCM frame (or comfort-noise marker) into its
    /// stream-id's `SmartBuffer`, creating the buffer lazily on first sight
    /// of a new stream id.
    pub fn ingest_frame(&self, frame: PcmFrame) -> Result<(), PipelineError> {
        self.ingest_frame_at(frame, Instant::now())
    }

    /// Same as `ingest_frame` with an explicit timestamp, so callers
    /// (notably tests replaying a frame stream deterministically) can drive
    /// cutting decisions without depending on real wall-clock timing.
    pub fn ingest_frame_at(&self, frame: PcmFrame, now: Instant) -> Result<(), PipelineError> {
        if self.shutdown.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if self.segment_tx.is_closed() {
            return Err(PipelineError::IngressClosed);
        }

        let mut buffers = self.buffers.lock().unwrap();
        let stream_id = frame.stream_id;
        let is_new = !buffers.contains_key(&stream_id);
        let vad_config = self.config.effective_vad_config();
        let buffer_config = self.config.smart_buffer_config();
        let segment_tx = self.segment_tx.clone();
        let session_id = self.session_id;

        let buffer = buffers.entry(stream_id).or_insert_with(|| {
            SmartBuffer::new(
                session_id,
                stream_id,
                frame.user_id.clone(),
                frame.display_name.clone(),
                segment_tx,
                vad_config,
                buffer_config,
            )
        });

        if is_new {
            self.event_bus.publish(Event::new(
                session_id,
                Utc::now(),
                EventPayload::SpeakerStarted {
                    user_id: frame.user_id.clone(),
                    display_name: frame.display_name.clone(),
                    stream_id,
                },
            ));
        }

        buffer.process_audio(&frame.payload, frame.is_speech, now);

        if frame.is_speech {
            let status = buffer.get_status(now);
            self.event_bus.publish(Event::new(
                session_id,
                Utc::now(),
                EventPayload::AudioBuffering {
                    user_id: frame.user_id,
                    stream_id,
                    duration_ms: status.current_duration.as_millis() as u64,
                },
            ));
        }

        Ok(())
    }

    /// Tear down a stream's buffer (e.g. the speaker left the channel).
    pub fn end_stream(&self, stream_id: u32, user_id: &str) {
        let mut buffers = self.buffers.lock().unwrap();
        if buffers.remove(&stream_id).is_some() {
            self.event_bus.publish(Event::new(
                self.session_id,
                Utc::now(),
                EventPayload::SpeakerEnded {
                    user_id: user_id.to_string(),
                    stream_id,
                },
            ));
        }
    }

    /// Cancel the relay loop and dispatcher workers, waiting up to
    /// `shutdown_grace_sec` for in-flight segments to drain (spec §5).
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let grace = self.config.shutdown_grace();

        if let Some(handle) = self.relay.lock().unwrap().take() {
            let _ = tokio::time::timeout(grace, handle).await;
        }
        self.dispatcher.shutdown(grace).await;

        self.event_bus.publish(Event::new(
            self.session_id,
            Utc::now(),
            EventPayload::SessionEnded,
        ));
        self.event_bus.stop();
    }
}

/// Drains the shared segment channel, attaches session-store and event-bus
/// side effects to each segment's terminal callbacks, then routes it into
/// the dispatcher. Runs until the channel closes or shutdown is signalled.
async fn relay_loop(
    mut segment_rx: BoundedReceiver<AudioSegment>,
    dispatcher: Arc<SpeakerDispatcher>,
    event_bus: Arc<EventBus>,
    session_store: Arc<dyn SessionStore>,
    session_id: Uuid,
    shutdown: CancellationToken,
) {
    loop {
        let segment = tokio::select! {
            seg = segment_rx.recv() => seg,
            _ = shutdown.cancelled() => None,
        };
        let Some(segment) = segment else {
            break;
        };

        let segment_id = segment.segment_id;
        let user_id = segment.user_id.clone();
        let display_name = segment.display_name.clone();
        let duration_secs = segment.duration.as_secs_f64();

        let store_for_pending = session_store.clone();
        let pending_user_id = user_id.clone();
        let pending_display_name = display_name.clone();
        tokio::spawn(async move {
            if let Err(err) = store_for_pending
                .add_pending(session_id, &pending_user_id, &pending_display_name, duration_secs)
                .await
            {
                tracing::warn!(error = %err, "failed to record pending transcription");
            }
        });

        let bus_for_start = event_bus.clone();
        let user_for_start = user_id.clone();

        let store_for_complete = session_store.clone();
        let bus_for_complete = event_bus.clone();
        let user_for_complete = user_id.clone();
        let display_for_complete = display_name.clone();

        let store_for_error = session_store.clone();
        let bus_for_error = event_bus.clone();
        let user_for_error = user_id.clone();

        let wrapped = segment.with_extra_callbacks(
            Box::new(move || {
                bus_for_start.publish(Event::new(
                    session_id,
                    Utc::now(),
                    EventPayload::TranscriptionStarted {
                        segment_id,
                        user_id: user_for_start.clone(),
                    },
                ));
            }),
            Box::new(move |result| {
                let store = store_for_complete.clone();
                let bus = bus_for_complete.clone();
                let user_id = user_for_complete.clone();
                let display_name = display_for_complete.clone();
                tokio::spawn(async move {
                    let text = result.text.clone();
                    let outcome = if text.is_empty() {
                        store.remove_pending(session_id, &user_id).await
                    } else {
                        store
                            .add_transcript(session_id, &user_id, &display_name, &text)
                            .await
                    };
                    if let Err(err) = outcome {
                        tracing::warn!(error = %err, "failed to update session store on completion");
                    }
                    bus.publish(Event::new(
                        session_id,
                        Utc::now(),
                        EventPayload::TranscriptionCompleted {
                            segment_id,
                            user_id,
                            text,
                            confidence: result.confidence,
                        },
                    ));
                });
            }),
            Box::new(move |failure| {
                let store = store_for_error.clone();
                let bus = bus_for_error.clone();
                let user_id = user_for_error.clone();
                tokio::spawn(async move {
                    if let Err(err) = store.remove_pending(session_id, &user_id).await {
                        tracing::warn!(error = %err, "failed to clear pending entry after failure");
                    }
                    bus.publish(Event::new(
                        session_id,
                        Utc::now(),
                        EventPayload::TranscriptionFailed {
                            segment_id,
                            user_id,
                            kind: format!("{:?}", failure.kind),
                            message: failure.message,
                        },
                    ));
                });
            }),
        );

        dispatcher.route_segment(wrapped);

        let depth = dispatcher.queue_depth(&user_id);
        event_bus.publish(Event::new(
            session_id,
            Utc::now(),
            EventPayload::QueueDepthChanged {
                user_id: Some(user_id),
                depth,
            },
        ));
    }
}
