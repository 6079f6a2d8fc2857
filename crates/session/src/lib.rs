//! Session store contract: pending-utterance bookkeeping and the
//! append-only transcript list it feeds. The pipeline core only depends on
//! the `SessionStore` trait; `InMemorySessionStore` and `SqliteSessionStore`
//! are reference implementations.

mod memory;
mod sqlite;

pub use memory::InMemorySessionStore;
pub use sqlite::SqliteSessionStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub session_id: Uuid,
    pub user_id: String,
    pub display_name: String,
    pub audio_duration_seconds: f64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub session_id: Uuid,
    pub user_id: String,
    pub display_name: String,
    pub text: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("unknown session: {0}")]
    UnknownSession(Uuid),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// The only surface the pipeline core depends on (§6.2). Implementations
/// MUST be safe to call from multiple tasks concurrently.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn add_pending(
        &self,
        session_id: Uuid,
        user_id: &str,
        display_name: &str,
        audio_duration_seconds: f64,
    ) -> Result<(), SessionStoreError>;

    /// Idempotent: removing an entry that is not (or no longer) pending is a
    /// no-op, not an error.
    async fn remove_pending(&self, session_id: Uuid, user_id: &str) -> Result<(), SessionStoreError>;

    /// Appends a transcript and MUST also clear the matching pending entry.
    async fn add_transcript(
        &self,
        session_id: Uuid,
        user_id: &str,
        display_name: &str,
        text: &str,
    ) -> Result<(), SessionStoreError>;

    async fn pending(&self, session_id: Uuid) -> Result<Vec<PendingEntry>, SessionStoreError>;

    async fn transcripts(&self, session_id: Uuid) -> Result<Vec<TranscriptEntry>, SessionStoreError>;
}
