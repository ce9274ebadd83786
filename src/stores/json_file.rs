//! Session store backed by a single JSON document.

use super::{
    CompactionRecord, Entry, NewEntry, Session, SessionData, SessionSnapshot, SessionStatus,
    SessionStore,
};
use crate::types::SessionId;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Default location, relative to the working directory.
pub const DEFAULT_STORAGE_PATH: &str = ".veloca/storage/veloca-storage.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StorageDocument {
    #[serde(default)]
    sessions: Vec<SessionData>,
}

impl StorageDocument {
    fn find(&self, session_id: &SessionId) -> Option<&SessionData> {
        self.sessions.iter().find(|s| s.session.id == *session_id)
    }

    fn find_or_create(&mut self, session_id: &SessionId) -> Result<&mut SessionData> {
        let index = match self.sessions.iter().position(|s| s.session.id == *session_id) {
            Some(index) => index,
            None => {
                self.sessions.push(SessionData::new(session_id.clone()));
                self.sessions.len() - 1
            }
        };
        let data = &mut self.sessions[index];
        data.ensure_writable()?;
        Ok(data)
    }
}

/// [`SessionStore`] that keeps all sessions in one pretty-printed JSON file.
///
/// Every write is a full read-modify-write of the document, serialized within this
/// process by a mutex and published with a rename. Across processes the last writer
/// wins.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store at [`DEFAULT_STORAGE_PATH`] under `root`.
    #[must_use]
    pub fn in_dir(root: impl AsRef<Path>) -> Self {
        Self::new(root.as_ref().join(DEFAULT_STORAGE_PATH))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<StorageDocument> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(StorageDocument::default());
        }
        let raw = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Failed to read storage file: {}", self.path.display()))?;
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(StorageDocument::default());
        }
        serde_json::from_slice(&raw)
            .with_context(|| format!("Failed to parse storage file: {}", self.path.display()))
    }

    async fn save(&self, document: &StorageDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create storage directory: {}", parent.display())
            })?;
        }
        let json = serde_json::to_vec_pretty(document).context("Failed to serialize sessions")?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write storage file: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace storage file: {}", self.path.display()))
    }

    async fn update<T>(&self, f: impl FnOnce(&mut StorageDocument) -> Result<T> + Send) -> Result<T> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.load().await?;
        let out = f(&mut document)?;
        self.save(&document).await?;
        Ok(out)
    }
}

#[async_trait]
impl SessionStore for JsonFileStore {
    async fn create_session(&self) -> Result<SessionId> {
        let id = SessionId::new();
        self.update(|doc| doc.find_or_create(&id).map(|_| ())).await?;
        log::debug!("Created session {id} in {}", self.path.display());
        Ok(id)
    }

    async fn read_session(&self, session_id: &SessionId) -> Result<SessionSnapshot> {
        let document = self.load().await?;
        Ok(document
            .find(session_id)
            .map(SessionData::snapshot)
            .unwrap_or_default())
    }

    async fn append_entry(&self, session_id: &SessionId, entry: NewEntry) -> Result<Entry> {
        let entry = entry.into_entry();
        let stored = entry.clone();
        self.update(move |doc| {
            doc.find_or_create(session_id)?.entries.push(stored);
            Ok(())
        })
        .await?;
        Ok(entry)
    }

    async fn append_compaction_record(
        &self,
        session_id: &SessionId,
        summary: String,
        trigger_entry_id: String,
    ) -> Result<CompactionRecord> {
        let record = CompactionRecord::new(summary, trigger_entry_id);
        let stored = record.clone();
        self.update(move |doc| {
            doc.find_or_create(session_id)?
                .compaction_records
                .push(stored);
            Ok(())
        })
        .await?;
        Ok(record)
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let document = self.load().await?;
        Ok(document
            .sessions
            .into_iter()
            .map(|s| s.session)
            .filter(Session::is_active)
            .collect())
    }

    async fn delete_session(&self, session_id: &SessionId) -> Result<()> {
        self.update(|doc| {
            if let Some(data) = doc
                .sessions
                .iter_mut()
                .find(|s| s.session.id == *session_id)
            {
                data.session.status = SessionStatus::Deleted;
            }
            Ok(())
        })
        .await
    }
}
