mod dispatcher;
mod metrics;
mod speaker_queue;

pub use dispatcher::{DispatcherConfig, SpeakerDispatcher};
pub use metrics::{Metrics, MetricsSnapshot};
pub use speaker_queue::SpeakerQueue;
