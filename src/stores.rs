//! Session storage.
//!
//! A session is an append-only log of [`Entry`] values plus the
//! [`CompactionRecord`]s that summarize prefixes of it. The loop only reads a
//! session and appends to it through [`SessionStore`].
//!
//! # Built-in Implementations
//!
//! - [`InMemoryStore`] keeps everything in process memory; suitable for tests and as
//!   the `Database` backend of single-process deployments.
//! - [`JsonFileStore`] keeps every session in one JSON document on disk.
//!
//! Neither serializes concurrent invocations against the same session; callers that
//! share a session across tasks must hold an external lock.

mod json_file;

pub use json_file::{DEFAULT_STORAGE_PATH, JsonFileStore};

use crate::llm::{Role, ToolCall};
use crate::types::SessionId;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Deleted,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub status: SessionStatus,
}

impl Session {
    #[must_use]
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            created_at: OffsetDateTime::now_utc(),
            status: SessionStatus::Active,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

/// Outcome of one tool call as persisted on a `tool` entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub call_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ToolCallResult {
    #[must_use]
    pub fn success(call_id: impl Into<String>, name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            result: Some(output.into()),
            error: None,
            duration_ms: None,
        }
    }

    #[must_use]
    pub fn failure(call_id: impl Into<String>, name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            result: None,
            error: Some(error.into()),
            duration_ms: None,
        }
    }

    #[must_use]
    pub const fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Text fed back to the model for this call.
    #[must_use]
    pub fn content(&self) -> String {
        match (&self.error, &self.result) {
            (Some(err), _) => format!("Error: {err}"),
            (None, Some(out)) => out.clone(),
            (None, None) => String::new(),
        }
    }
}

/// Structured tool data attached to an entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolPayload {
    /// Calls requested by an `assistant` entry, in model order.
    Calls { calls: Vec<ToolCall> },
    /// The answer carried by a `tool` entry.
    Result(ToolCallResult),
}

/// One persisted conversational turn. Immutable once written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub role: Role,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_payload: Option<ToolPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_consumption: Option<u64>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Entry {
    /// Tool calls of an assistant entry, empty otherwise.
    #[must_use]
    pub fn tool_calls(&self) -> &[ToolCall] {
        match &self.tool_payload {
            Some(ToolPayload::Calls { calls }) => calls,
            _ => &[],
        }
    }

    /// The tool result of a tool entry.
    #[must_use]
    pub const fn tool_result(&self) -> Option<&ToolCallResult> {
        match &self.tool_payload {
            Some(ToolPayload::Result(result)) => Some(result),
            _ => None,
        }
    }
}

/// Fields of an entry to append; id and timestamp are assigned by the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewEntry {
    pub role: Role,
    pub content: Option<String>,
    pub tool_payload: Option<ToolPayload>,
    pub token_consumption: Option<u64>,
}

impl NewEntry {
    #[must_use]
    pub fn new(role: Role, content: Option<String>) -> Self {
        Self {
            role,
            content,
            tool_payload: None,
            token_consumption: None,
        }
    }

    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, Some(text.into()))
    }

    #[must_use]
    pub fn assistant(
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
        token_consumption: Option<u64>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_payload: (!tool_calls.is_empty()).then_some(ToolPayload::Calls { calls: tool_calls }),
            token_consumption,
        }
    }

    #[must_use]
    pub fn tool(result: ToolCallResult) -> Self {
        Self {
            role: Role::Tool,
            content: Some(result.content()),
            tool_payload: Some(ToolPayload::Result(result)),
            token_consumption: None,
        }
    }

    fn into_entry(self) -> Entry {
        Entry {
            id: Uuid::new_v4().to_string(),
            role: self.role,
            content: self.content,
            tool_payload: self.tool_payload,
            token_consumption: self.token_consumption,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// A stored summary standing in for a prefix of a session's entries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionRecord {
    pub id: String,
    pub summary: String,
    /// Entry id, or id of an earlier record, this summary makes obsolete.
    pub trigger_entry_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl CompactionRecord {
    #[must_use]
    pub fn new(summary: impl Into<String>, trigger_entry_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            summary: summary.into(),
            trigger_entry_id: trigger_entry_id.into(),
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Everything stored for one session, oldest first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session: Option<Session>,
    pub entries: Vec<Entry>,
    pub compaction_records: Vec<CompactionRecord>,
}

/// Trait for session persistence.
/// Implement this trait to persist sessions to your storage backend.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a new, empty, active session.
    ///
    /// # Errors
    /// Returns an error if the session cannot be stored.
    async fn create_session(&self) -> Result<SessionId>;

    /// Read a session with all its entries and compaction records.
    ///
    /// A session that does not exist, or has been deleted, yields an empty snapshot.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be read.
    async fn read_session(&self, session_id: &SessionId) -> Result<SessionSnapshot>;

    /// Append an entry, creating the session if needed.
    ///
    /// # Errors
    /// Returns an error if the session has been deleted or the entry cannot be stored.
    async fn append_entry(&self, session_id: &SessionId, entry: NewEntry) -> Result<Entry>;

    /// Append a compaction record, creating the session if needed.
    ///
    /// # Errors
    /// Returns an error if the session has been deleted or the record cannot be stored.
    async fn append_compaction_record(
        &self,
        session_id: &SessionId,
        summary: String,
        trigger_entry_id: String,
    ) -> Result<CompactionRecord>;

    /// List active sessions ordered by creation.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be read.
    async fn list_sessions(&self) -> Result<Vec<Session>>;

    /// Mark a session deleted. Deleting a missing session is a no-op.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be written.
    async fn delete_session(&self, session_id: &SessionId) -> Result<()>;
}

/// Entries and records held for one session.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct SessionData {
    #[serde(flatten)]
    session: Session,
    #[serde(default)]
    entries: Vec<Entry>,
    #[serde(default)]
    compaction_records: Vec<CompactionRecord>,
}

impl SessionData {
    fn new(id: SessionId) -> Self {
        Self {
            session: Session::new(id),
            entries: Vec::new(),
            compaction_records: Vec::new(),
        }
    }

    /// Deleted sessions accept no further writes.
    fn ensure_writable(&self) -> Result<()> {
        anyhow::ensure!(
            self.session.is_active(),
            "session {} has been deleted",
            self.session.id
        );
        Ok(())
    }

    fn snapshot(&self) -> SessionSnapshot {
        if !self.session.is_active() {
            return SessionSnapshot::default();
        }
        SessionSnapshot {
            session: Some(self.session.clone()),
            entries: self.entries.clone(),
            compaction_records: self.compaction_records.clone(),
        }
    }
}

/// In-memory implementation of [`SessionStore`].
/// Useful for testing and simple use cases.
#[derive(Default)]
pub struct InMemoryStore {
    sessions: RwLock<HashMap<String, SessionData>>,
    /// Creation order, for listing.
    order: RwLock<Vec<String>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_session<T>(&self, session_id: &SessionId, f: impl FnOnce(&mut SessionData) -> T) -> Result<T> {
        let mut sessions = self.sessions.write().ok().context("lock poisoned")?;
        let data = match sessions.entry(session_id.0.clone()) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                self.order
                    .write()
                    .ok()
                    .context("lock poisoned")?
                    .push(session_id.0.clone());
                e.insert(SessionData::new(session_id.clone()))
            }
        };
        data.ensure_writable()?;
        Ok(f(data))
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn create_session(&self) -> Result<SessionId> {
        let id = SessionId::new();
        self.with_session(&id, |_| ())?;
        Ok(id)
    }

    async fn read_session(&self, session_id: &SessionId) -> Result<SessionSnapshot> {
        let sessions = self.sessions.read().ok().context("lock poisoned")?;
        Ok(sessions
            .get(&session_id.0)
            .map(SessionData::snapshot)
            .unwrap_or_default())
    }

    async fn append_entry(&self, session_id: &SessionId, entry: NewEntry) -> Result<Entry> {
        let entry = entry.into_entry();
        self.with_session(session_id, |data| data.entries.push(entry.clone()))?;
        Ok(entry)
    }

    async fn append_compaction_record(
        &self,
        session_id: &SessionId,
        summary: String,
        trigger_entry_id: String,
    ) -> Result<CompactionRecord> {
        let record = CompactionRecord::new(summary, trigger_entry_id);
        self.with_session(session_id, |data| {
            data.compaction_records.push(record.clone());
        })?;
        Ok(record)
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        // Same acquisition order as `with_session`.
        let sessions = self.sessions.read().ok().context("lock poisoned")?;
        let order = self.order.read().ok().context("lock poisoned")?;
        Ok(order
            .iter()
            .filter_map(|id| sessions.get(id))
            .filter(|data| data.session.is_active())
            .map(|data| data.session.clone())
            .collect())
    }

    async fn delete_session(&self, session_id: &SessionId) -> Result<()> {
        let mut sessions = self.sessions.write().ok().context("lock poisoned")?;
        if let Some(data) = sessions.get_mut(&session_id.0) {
            data.session.status = SessionStatus::Deleted;
        }
        Ok(())
    }
}
