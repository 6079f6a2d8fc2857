use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use crate::{PendingEntry, SessionStore, SessionStoreError, TranscriptEntry};

/// Durable `SessionStore` backed by SQLite. Follows the teacher's
/// lock-a-single-connection pattern rather than a pool, since the pipeline's
/// call volume per segment completion is low relative to SQLite's own
/// serialization.
pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
}

impl SqliteSessionStore {
    pub fn open(path: &Path) -> Result<Self, SessionStoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, SessionStoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), SessionStoreError> {
        let conn = self.conn.lock().expect("session store mutex poisoned");
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pending (
                session_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                display_name TEXT NOT NULL,
                audio_duration_seconds REAL NOT NULL,
                started_at INTEGER NOT NULL,
                PRIMARY KEY (session_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS transcripts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                display_name TEXT NOT NULL,
                text TEXT NOT NULL,
                recorded_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_transcripts_session
                ON transcripts(session_id, recorded_at);
            "#,
        )?;
        Ok(())
    }

    fn to_timestamp(at: DateTime<Utc>) -> i64 {
        at.timestamp()
    }

    fn from_timestamp(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn add_pending(
        &self,
        session_id: Uuid,
        user_id: &str,
        display_name: &str,
        audio_duration_seconds: f64,
    ) -> Result<(), SessionStoreError> {
        let conn = self.conn.lock().expect("session store mutex poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO pending (session_id, user_id, display_name, audio_duration_seconds, started_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            (
                session_id.to_string(),
                user_id,
                display_name,
                audio_duration_seconds,
                Self::to_timestamp(Utc::now()),
            ),
        )?;
        Ok(())
    }

    async fn remove_pending(&self, session_id: Uuid, user_id: &str) -> Result<(), SessionStoreError> {
        let conn = self.conn.lock().expect("session store mutex poisoned");
        conn.execute(
            "DELETE FROM pending WHERE session_id = ?1 AND user_id = ?2",
            (session_id.to_string(), user_id),
        )?;
        Ok(())
    }

    async fn add_transcript(
        &self,
        session_id: Uuid,
        user_id: &str,
        display_name: &str,
        text: &str,
    ) -> Result<(), SessionStoreError> {
        let conn = self.conn.lock().expect("session store mutex poisoned");
        conn.execute(
            "DELETE FROM pending WHERE session_id = ?1 AND user_id = ?2",
            (session_id.to_string(), user_id),
        )?;
        conn.execute(
            "INSERT INTO transcripts (session_id, user_id, display_name, text, recorded_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            (
                session_id.to_string(),
                user_id,
                display_name,
                text,
                Self::to_timestamp(Utc::now()),
            ),
        )?;
        Ok(())
    }

    async fn pending(&self, session_id: Uuid) -> Result<Vec<PendingEntry>, SessionStoreError> {
        let conn = self.conn.lock().expect("session store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT user_id, display_name, audio_duration_seconds, started_at FROM pending WHERE session_id = ?1",
        )?;
        let rows = stmt.query_map([session_id.to_string()], |row| {
            Ok(PendingEntry {
                session_id,
                user_id: row.get(0)?,
                display_name: row.get(1)?,
                audio_duration_seconds: row.get(2)?,
                started_at: Self::from_timestamp(row.get(3)?),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    async fn transcripts(&self, session_id: Uuid) -> Result<Vec<TranscriptEntry>, SessionStoreError> {
        let conn = self.conn.lock().expect("session store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT user_id, display_name, text, recorded_at FROM transcripts WHERE session_id = ?1 ORDER BY recorded_at ASC, id ASC",
        )?;
        let rows = stmt.query_map([session_id.to_string()], |row| {
            Ok(TranscriptEntry {
                session_id,
                user_id: row.get(0)?,
                display_name: row.get(1)?,
                text: row.get(2)?,
                recorded_at: Self::from_timestamp(row.get(3)?),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_transcript_clears_matching_pending() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        let session_id = Uuid::new_v4();
        store.add_pending(session_id, "u1", "U1", 0.6).await.unwrap();
        store
            .add_transcript(session_id, "u1", "U1", "hello world")
            .await
            .unwrap();
        assert!(store.pending(session_id).await.unwrap().is_empty());
        let transcripts = store.transcripts(session_id).await.unwrap();
        assert_eq!(transcripts.len(), 1);
        assert_eq!(transcripts[0].text, "hello world");
    }

    #[tokio::test]
    async fn transcripts_preserve_insertion_order() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        let session_id = Uuid::new_v4();
        store.add_transcript(session_id, "u1", "U1", "first").await.unwrap();
        store.add_transcript(session_id, "u1", "U1", "second").await.unwrap();
        let transcripts = store.transcripts(session_id).await.unwrap();
        assert_eq!(transcripts[0].text, "first");
        assert_eq!(transcripts[1].text, "second");
    }

    #[tokio::test]
    async fn remove_pending_is_idempotent() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        let session_id = Uuid::new_v4();
        store.remove_pending(session_id, "u1").await.unwrap();
        store.remove_pending(session_id, "u1").await.unwrap();
    }
}
