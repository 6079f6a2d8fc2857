//! Example: drive the pipeline with synthetic PCM frames against a mock
//! transcriber and print transcripts as they land.
//!
//! Run with: cargo run -p polyphony-pipeline --example transcribe_demo

use std::sync::Arc;
use std::time::{Duration, Instant};

use polyphony_pipeline::{init_tracing, Config, PcmFrame, Pipeline};
use polyphony_session::{InMemorySessionStore, SessionStore};
use polyphony_transcriber::{MockTranscriber, Transcriber};

fn speech_payload(ms: u32) -> Vec<u8> {
    vec![0u8; 48_000 * ms as usize / 1000 * 4]
}

#[tokio::main]
async fn main() {
    init_tracing();

    let transcriber: Arc<dyn Transcriber> = Arc::new(MockTranscriber::new("the quick brown fox"));
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let pipeline = Pipeline::new(Config::default(), transcriber, store.clone()).unwrap();
    let session_id = pipeline.session_id();

    println!("=== Pipeline Demo ===");
    println!("Feeding 600ms of speech then 500ms of silence on stream 101...\n");

    let mut now = Instant::now();
    for _ in 0..30 {
        pipeline.ingest_frame_at(PcmFrame::speech(101, "u1", "Demo Speaker", speech_payload(20)), now).unwrap();
        now += Duration::from_millis(20);
    }
    for _ in 0..25 {
        pipeline.ingest_frame_at(PcmFrame::comfort_noise(101, "u1", "Demo Speaker"), now).unwrap();
        now += Duration::from_millis(20);
    }

    tokio::time::sleep(Duration::from_millis(200)).await;

    for transcript in store.transcripts(session_id).await.unwrap() {
        println!("[{}] {}: {}", transcript.recorded_at, transcript.display_name, transcript.text);
    }

    println!("\nMetrics: {:?}", pipeline.metrics());
    pipeline.shutdown().await;
}
