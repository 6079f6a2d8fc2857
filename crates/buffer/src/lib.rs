mod audio_buffer;
mod segment;
mod smart_buffer;

pub use audio_buffer::AudioBuffer;
pub use polyphony_vad::Priority;
pub use segment::{
    AudioSegment, CompleteCallback, ErrorCallback, FailureKind, SegmentFailure, StartCallback,
    TranscriptResult,
};
pub use smart_buffer::{SmartBuffer, SmartBufferConfig, SmartBufferStatus};
