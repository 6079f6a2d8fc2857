//! End-to-end scenarios S1-S6 (spec §8), driven against a `MockTranscriber`
//! and `InMemorySessionStore` with explicit timestamps for determinism.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use polyphony_pipeline::{Config, PcmFrame, Pipeline, PipelineError};
use polyphony_session::{InMemorySessionStore, SessionStore};
use polyphony_transcriber::{MockTranscriber, Transcriber, TranscriberError, ErrorKind};

fn speech_payload(ms: u32) -> Vec<u8> {
    vec![0u8; 48_000 * ms as usize / 1000 * 4]
}

async fn wait_until<F, Fut>(mut check: F, timeout: Duration)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    loop {
        if check().await {
            return;
        }
        if start.elapsed() > timeout {
            panic!("condition not met within timeout");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn s1_single_utterance_cut_by_sentence_end_silence() {
    let transcriber: Arc<dyn Transcriber> = Arc::new(MockTranscriber::new("hello there"));
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let pipeline = Pipeline::new(Config::default(), transcriber, store.clone()).unwrap();
    let session_id = pipeline.session_id();

    let mut now = Instant::now();
    for _ in 0..30 {
        pipeline.ingest_frame_at(PcmFrame::speech(101, "u1", "U1", speech_payload(20)), now).unwrap();
        now += Duration::from_millis(20);
    }
    for _ in 0..25 {
        pipeline.ingest_frame_at(PcmFrame::comfort_noise(101, "u1", "U1"), now).unwrap();
        now += Duration::from_millis(20);
    }

    wait_until(
        || async { !store.transcripts(session_id).await.unwrap().is_empty() },
        Duration::from_secs(2),
    )
    .await;

    let transcripts = store.transcripts(session_id).await.unwrap();
    assert_eq!(transcripts.len(), 1);
    assert_eq!(transcripts[0].text, "hello there");
    assert!(store.pending(session_id).await.unwrap().is_empty());

    pipeline.shutdown().await;
}

#[tokio::test]
async fn s2_hard_cap_continues_accumulating_without_loss() {
    let transcriber: Arc<dyn Transcriber> = Arc::new(MockTranscriber::new("chunk"));
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let pipeline = Pipeline::new(Config::default(), transcriber, store.clone()).unwrap();
    let session_id = pipeline.session_id();

    let mut now = Instant::now();
    for _ in 0..160 {
        pipeline.ingest_frame_at(PcmFrame::speech(102, "u2", "U2", speech_payload(20)), now).unwrap();
        now += Duration::from_millis(20);
    }

    wait_until(
        || async { !store.transcripts(session_id).await.unwrap().is_empty() },
        Duration::from_secs(2),
    )
    .await;

    let transcripts = store.transcripts(session_id).await.unwrap();
    assert_eq!(transcripts.len(), 1);
    assert_eq!(transcripts[0].text, "chunk");

    pipeline.shutdown().await;
}

#[tokio::test]
async fn s3_two_concurrent_speakers_do_not_starve_each_other() {
    let transcriber: Arc<dyn Transcriber> = Arc::new(MockTranscriber::new("said something"));
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let pipeline = Pipeline::new(Config::default(), transcriber, store.clone()).unwrap();
    let session_id = pipeline.session_id();

    let mut now = Instant::now();
    // A's first utterance.
    for _ in 0..30 {
        pipeline.ingest_frame_at(PcmFrame::speech(201, "a", "A", speech_payload(20)), now).unwrap();
        now += Duration::from_millis(20);
    }
    // B's utterance mid-way through A's silence tail.
    for _ in 0..20 {
        pipeline.ingest_frame_at(PcmFrame::speech(202, "b", "B", speech_payload(20)), now).unwrap();
        now += Duration::from_millis(20);
    }
    for _ in 0..25 {
        pipeline.ingest_frame_at(PcmFrame::comfort_noise(202, "b", "B"), now).unwrap();
        now += Duration::from_millis(20);
    }
    // A's tail silence, cutting A's first utterance.
    for _ in 0..25 {
        pipeline.ingest_frame_at(PcmFrame::comfort_noise(201, "a", "A"), now).unwrap();
        now += Duration::from_millis(20);
    }
    // A's second utterance.
    for _ in 0..30 {
        pipeline.ingest_frame_at(PcmFrame::speech(201, "a", "A", speech_payload(20)), now).unwrap();
        now += Duration::from_millis(20);
    }
    for _ in 0..25 {
        pipeline.ingest_frame_at(PcmFrame::comfort_noise(201, "a", "A"), now).unwrap();
        now += Duration::from_millis(20);
    }

    wait_until(
        || async {
            store.transcripts(session_id).await.unwrap().len() >= 3
        },
        Duration::from_secs(2),
    )
    .await;

    let transcripts = store.transcripts(session_id).await.unwrap();
    let a_transcripts: Vec<_> = transcripts.iter().filter(|t| t.user_id == "a").collect();
    let b_transcripts: Vec<_> = transcripts.iter().filter(|t| t.user_id == "b").collect();
    assert_eq!(a_transcripts.len(), 2);
    assert_eq!(b_transcripts.len(), 1);
    assert!(a_transcripts[0].recorded_at <= a_transcripts[1].recorded_at);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn s4_queue_overflow_rejects_sixth_urgent_segment() {
    let transcriber: Arc<dyn Transcriber> = Arc::new(MockTranscriber::new("ok"));
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());

    let mut config = Config::default();
    config.pipeline.worker_count = 1;
    config.pipeline.per_speaker_queue_size = 4;
    let pipeline = Pipeline::new(config, transcriber, store).unwrap();

    // Each call crosses the hard cap (3000ms) immediately, producing an
    // Urgent segment back-to-back on the same stream.
    let mut now = Instant::now();
    for _ in 0..6 {
        for _ in 0..160 {
            pipeline.ingest_frame_at(PcmFrame::speech(301, "u3", "U3", speech_payload(20)), now).unwrap();
            now += Duration::from_millis(20);
        }
    }

    wait_until(
        || async { pipeline.metrics().segments_dropped >= 1 },
        Duration::from_secs(2),
    )
    .await;

    assert!(pipeline.metrics().segments_dropped >= 1);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn s5_context_expires_after_silence_window() {
    let transcriber: Arc<dyn Transcriber> = Arc::new(MockTranscriber::new("context check"));
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let mut config = Config::default();
    config.audio.context_expiration_sec = 15.0;
    let pipeline = Pipeline::new(config, transcriber, store.clone()).unwrap();
    let session_id = pipeline.session_id();

    let mut now = Instant::now();
    for _ in 0..30 {
        pipeline.ingest_frame_at(PcmFrame::speech(401, "u4", "U4", speech_payload(20)), now).unwrap();
        now += Duration::from_millis(20);
    }
    for _ in 0..25 {
        pipeline.ingest_frame_at(PcmFrame::comfort_noise(401, "u4", "U4"), now).unwrap();
        now += Duration::from_millis(20);
    }

    wait_until(
        || async { !store.transcripts(session_id).await.unwrap().is_empty() },
        Duration::from_secs(2),
    )
    .await;

    // 20s of silence exceeds the 15s default context expiration.
    now += Duration::from_secs(20);
    for _ in 0..30 {
        pipeline.ingest_frame_at(PcmFrame::speech(401, "u4", "U4", speech_payload(20)), now).unwrap();
        now += Duration::from_millis(20);
    }
    for _ in 0..25 {
        pipeline.ingest_frame_at(PcmFrame::comfort_noise(401, "u4", "U4"), now).unwrap();
        now += Duration::from_millis(20);
    }

    wait_until(
        || async { store.transcripts(session_id).await.unwrap().len() >= 2 },
        Duration::from_secs(2),
    )
    .await;

    let transcripts = store.transcripts(session_id).await.unwrap();
    assert_eq!(transcripts.len(), 2);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn s6_retryable_backend_failure_recovers() {
    let mock = MockTranscriber::new("recovered");
    mock.push_script(Err(TranscriberError::new(
        ErrorKind::BackendUnavailable,
        "overloaded",
    )));
    let transcriber: Arc<dyn Transcriber> = Arc::new(mock);
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());

    let mut config = Config::default();
    config.pipeline.max_retries = 1;
    config.pipeline.retry_delay_ms = 50;
    let pipeline = Pipeline::new(config, transcriber, store.clone()).unwrap();
    let session_id = pipeline.session_id();

    let mut now = Instant::now();
    for _ in 0..30 {
        pipeline.ingest_frame_at(PcmFrame::speech(501, "u5", "U5", speech_payload(20)), now).unwrap();
        now += Duration::from_millis(20);
    }
    for _ in 0..25 {
        pipeline.ingest_frame_at(PcmFrame::comfort_noise(501, "u5", "U5"), now).unwrap();
        now += Duration::from_millis(20);
    }

    wait_until(
        || async { !store.transcripts(session_id).await.unwrap().is_empty() },
        Duration::from_secs(2),
    )
    .await;

    let transcripts = store.transcripts(session_id).await.unwrap();
    assert_eq!(transcripts.len(), 1);
    assert_eq!(transcripts[0].text, "recovered");
    assert_eq!(pipeline.metrics().retries_attempted, 1);
    assert_eq!(pipeline.metrics().segments_dropped, 0);
    assert!(store.pending(session_id).await.unwrap().is_empty());

    pipeline.shutdown().await;
}

#[tokio::test]
async fn invalid_config_is_rejected_before_anything_is_spawned() {
    let transcriber: Arc<dyn Transcriber> = Arc::new(MockTranscriber::new("hi"));
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());

    let mut config = Config::default();
    config.pipeline.queue_size = 0;

    let result = Pipeline::new(config, transcriber, store);
    assert!(matches!(result, Err(PipelineError::ConfigInvalid(_))));
}

#[tokio::test]
async fn ingest_after_shutdown_is_rejected_as_cancelled() {
    let transcriber: Arc<dyn Transcriber> = Arc::new(MockTranscriber::new("hi"));
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let pipeline = Pipeline::new(Config::default(), transcriber, store).unwrap();

    pipeline.shutdown().await;

    let result = pipeline.ingest_frame_at(
        PcmFrame::speech(601, "u6", "U6", speech_payload(20)),
        Instant::now(),
    );
    assert!(matches!(result, Err(PipelineError::Cancelled)));
}
