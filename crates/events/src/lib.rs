//! Non-blocking, bounded, per-kind fan-out of pipeline lifecycle events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use polyphony_channel::{bounded, BoundedReceiver, BoundedSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SessionCreated,
    SessionEnded,
    SpeakerStarted,
    SpeakerEnded,
    AudioBuffering,
    TranscriptionStarted,
    TranscriptionCompleted,
    TranscriptionFailed,
    QueueDepthChanged,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum EventPayload {
    SessionCreated,
    SessionEnded,
    SpeakerStarted {
        user_id: String,
        display_name: String,
        stream_id: u32,
    },
    SpeakerEnded {
        user_id: String,
        stream_id: u32,
    },
    AudioBuffering {
        user_id: String,
        stream_id: u32,
        duration_ms: u64,
    },
    TranscriptionStarted {
        segment_id: Uuid,
        user_id: String,
    },
    TranscriptionCompleted {
        segment_id: Uuid,
        user_id: String,
        text: String,
        confidence: f32,
    },
    TranscriptionFailed {
        segment_id: Uuid,
        user_id: String,
        kind: String,
        message: String,
    },
    QueueDepthChanged {
        user_id: Option<String>,
        depth: usize,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::SessionCreated => EventKind::SessionCreated,
            EventPayload::SessionEnded => EventKind::SessionEnded,
            EventPayload::SpeakerStarted { .. } => EventKind::SpeakerStarted,
            EventPayload::SpeakerEnded { .. } => EventKind::SpeakerEnded,
            EventPayload::AudioBuffering { .. } => EventKind::AudioBuffering,
            EventPayload::TranscriptionStarted { .. } => EventKind::TranscriptionStarted,
            EventPayload::TranscriptionCompleted { .. } => EventKind::TranscriptionCompleted,
            EventPayload::TranscriptionFailed { .. } => EventKind::TranscriptionFailed,
            EventPayload::QueueDepthChanged { .. } => EventKind::QueueDepthChanged,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub session_id: Uuid,
    pub at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(session_id: Uuid, at: DateTime<Utc>, payload: EventPayload) -> Self {
        Self {
            session_id,
            at,
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EventBusConfig {
    pub capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

struct Subscription {
    id: u64,
    kind: EventKind,
    sender: BoundedSender<Event>,
}

/// Multi-producer/multi-consumer fan-out with internal synchronization.
/// Publish is lossy per-subscriber: a slow subscriber drops its own
/// overflow without affecting others.
pub struct EventBus {
    config: EventBusConfig,
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        Self {
            config,
            subscriptions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, kind: EventKind) -> Subscriber {
        let (sender, receiver) = bounded(self.config.capacity, "event");
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.lock().unwrap().push(Subscription {
            id,
            kind,
            sender,
        });
        Subscriber { id, receiver }
    }

    /// Idempotent: unsubscribing an id that is not (or no longer)
    /// registered is a no-op.
    pub fn unsubscribe(&self, id: u64) {
        self.subscriptions.lock().unwrap().retain(|s| s.id != id);
    }

    /// Fan out to every subscriber registered for this event's kind. Never
    /// blocks; a full subscriber channel drops the event and advances that
    /// subscriber's counter, it never blocks delivery to other subscribers.
    pub fn publish(&self, event: Event) {
        let subs = self.subscriptions.lock().unwrap();
        let kind = event.kind();
        for sub in subs.iter().filter(|s| s.kind == kind) {
            let _ = sub.sender.try_send(event.clone());
        }
    }

    pub fn total_dropped(&self) -> u64 {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.sender.dropped_count())
            .sum()
    }

    /// Drops every subscriber sender, closing their channels. Subscribers
    /// can still drain whatever was already buffered before `recv` returns
    /// `None`.
    pub fn stop(&self) {
        self.subscriptions.lock().unwrap().clear();
    }
}

pub struct Subscriber {
    id: u64,
    receiver: BoundedReceiver<Event>,
}

impl Subscriber {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    pub fn dropped_count(&self) -> u64 {
        self.receiver.dropped_count()
    }
}
