use thiserror::Error;

/// Pipeline-level error taxonomy (spec §7). Per-segment failures never
/// reach this type — they surface through `AudioSegment::fail` instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("frame ingress closed unexpectedly")]
    IngressClosed,

    #[error("pipeline cancelled during shutdown")]
    Cancelled,

    #[error("session store error: {0}")]
    SessionStore(#[from] polyphony_session::SessionStoreError),

    #[error("invalid configuration json: {0}")]
    ConfigJson(#[from] serde_json::Error),
}
