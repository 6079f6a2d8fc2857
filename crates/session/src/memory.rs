use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::{PendingEntry, SessionStore, SessionStoreError, TranscriptEntry};

#[derive(Default)]
struct Inner {
    pending: Vec<PendingEntry>,
    transcripts: Vec<TranscriptEntry>,
}

/// Reference `SessionStore` for tests and the worked scenarios; not durable
/// across process restarts.
pub struct InMemorySessionStore {
    inner: Mutex<Inner>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn add_pending(
        &self,
        session_id: Uuid,
        user_id: &str,
        display_name: &str,
        audio_duration_seconds: f64,
    ) -> Result<(), SessionStoreError> {
        let mut inner = self.inner.lock().expect("session store mutex poisoned");
        inner.pending.push(PendingEntry {
            session_id,
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            audio_duration_seconds,
            started_at: Utc::now(),
        });
        Ok(())
    }

    async fn remove_pending(&self, session_id: Uuid, user_id: &str) -> Result<(), SessionStoreError> {
        let mut inner = self.inner.lock().expect("session store mutex poisoned");
        inner
            .pending
            .retain(|p| !(p.session_id == session_id && p.user_id == user_id));
        Ok(())
    }

    async fn add_transcript(
        &self,
        session_id: Uuid,
        user_id: &str,
        display_name: &str,
        text: &str,
    ) -> Result<(), SessionStoreError> {
        let mut inner = self.inner.lock().expect("session store mutex poisoned");
        inner
            .pending
            .retain(|p| !(p.session_id == session_id && p.user_id == user_id));
        inner.transcripts.push(TranscriptEntry {
            session_id,
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            text: text.to_string(),
            recorded_at: Utc::now(),
        });
        Ok(())
    }

    async fn pending(&self, session_id: Uuid) -> Result<Vec<PendingEntry>, SessionStoreError> {
        let inner = self.inner.lock().expect("session store mutex poisoned");
        Ok(inner
            .pending
            .iter()
            .filter(|p| p.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn transcripts(&self, session_id: Uuid) -> Result<Vec<TranscriptEntry>, SessionStoreError> {
        let inner = self.inner.lock().expect("session store mutex poisoned");
        Ok(inner
            .transcripts
            .iter()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect())
    }
}
