use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use assess_core::model::{CandidateEmail, ModuleKind, Session, SessionId, VerticalId};

/// Errors surfaced by session-store adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Persisted shape of a sitting.
///
/// Mirrors the domain `Session` so stores can serialize without leaking
/// storage concerns into the domain layer. Completion state lives in the
/// per-module rows, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub candidate_email: CandidateEmail,
    pub vertical: VerticalId,
    pub aborted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    #[must_use]
    pub fn from_session(session: &Session, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session.id(),
            candidate_email: session.candidate_email().clone(),
            vertical: session.vertical(),
            aborted: session.integrity_violated(),
            created_at: session.started_at(),
            updated_at: now,
        }
    }
}

/// Persisted completion state and grading outcome for one module.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleRecord {
    pub kind: ModuleKind,
    pub completed: bool,
    pub score: Option<f64>,
    pub feedback_report: Option<String>,
    pub cefr_level: Option<String>,
}

impl ModuleRecord {
    /// A completed module with its grading outcome.
    #[must_use]
    pub fn completed(
        kind: ModuleKind,
        score: f64,
        feedback_report: Option<String>,
        cefr_level: Option<String>,
    ) -> Self {
        Self {
            kind,
            completed: true,
            score: Some(score),
            feedback_report,
            cefr_level,
        }
    }
}

/// Contract for the persisted session store.
///
/// Last-writer-wins, no transactions: exactly one writer is expected at a
/// time under normal operation, and the abort-path wipe racing an in-flight
/// submission write is accepted as best-effort.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch the session row, if the sitting was ever persisted.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on connection or decoding failures.
    async fn load(&self, id: SessionId) -> Result<Option<SessionRecord>, StorageError>;

    /// Insert or update the session row.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be stored.
    async fn save(&self, record: &SessionRecord) -> Result<(), StorageError>;

    /// All persisted module rows for the sitting, in module order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on connection or decoding failures.
    async fn load_modules(&self, id: SessionId) -> Result<Vec<ModuleRecord>, StorageError>;

    /// Insert or update one module row.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the row cannot be stored.
    async fn save_module(&self, id: SessionId, module: &ModuleRecord)
    -> Result<(), StorageError>;

    /// Cache the raw in-progress answers for a module as a JSON blob.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the blob cannot be stored.
    async fn cache_answers(
        &self,
        id: SessionId,
        kind: ModuleKind,
        answers: &JsonValue,
    ) -> Result<(), StorageError>;

    /// Load the cached raw answers for a module, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on connection or decoding failures.
    async fn load_answers(
        &self,
        id: SessionId,
        kind: ModuleKind,
    ) -> Result<Option<JsonValue>, StorageError>;

    /// Set the aborted flag on the session row.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the sitting was never persisted.
    async fn mark_aborted(&self, id: SessionId) -> Result<(), StorageError>;

    /// Delete all module rows and cached answers for the sitting. The
    /// session row itself survives so the aborted flag remains readable.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the wipe cannot be performed.
    async fn clear(&self, id: SessionId) -> Result<(), StorageError>;
}

//
// ─── IN-MEMORY STORE ───────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Default)]
struct StoredSession {
    record: Option<SessionRecord>,
    modules: BTreeMap<ModuleKind, ModuleRecord>,
    answers: BTreeMap<ModuleKind, JsonValue>,
}

/// Simple in-memory store implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<Mutex<HashMap<SessionId, StoredSession>>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entry<T>(
        &self,
        id: SessionId,
        f: impl FnOnce(&mut StoredSession) -> T,
    ) -> Result<T, StorageError> {
        let mut guard = self
            .sessions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(f(guard.entry(id).or_default()))
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, id: SessionId) -> Result<Option<SessionRecord>, StorageError> {
        let guard = self
            .sessions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&id).and_then(|s| s.record.clone()))
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), StorageError> {
        self.with_entry(record.session_id, |entry| {
            entry.record = Some(record.clone());
        })
    }

    async fn load_modules(&self, id: SessionId) -> Result<Vec<ModuleRecord>, StorageError> {
        let guard = self
            .sessions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard
            .get(&id)
            .map(|s| s.modules.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn save_module(
        &self,
        id: SessionId,
        module: &ModuleRecord,
    ) -> Result<(), StorageError> {
        self.with_entry(id, |entry| {
            entry.modules.insert(module.kind, module.clone());
        })
    }

    async fn cache_answers(
        &self,
        id: SessionId,
        kind: ModuleKind,
        answers: &JsonValue,
    ) -> Result<(), StorageError> {
        self.with_entry(id, |entry| {
            entry.answers.insert(kind, answers.clone());
        })
    }

    async fn load_answers(
        &self,
        id: SessionId,
        kind: ModuleKind,
    ) -> Result<Option<JsonValue>, StorageError> {
        let guard = self
            .sessions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&id).and_then(|s| s.answers.get(&kind).cloned()))
    }

    async fn mark_aborted(&self, id: SessionId) -> Result<(), StorageError> {
        let mut guard = self
            .sessions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let entry = guard.get_mut(&id).ok_or(StorageError::NotFound)?;
        let record = entry.record.as_mut().ok_or(StorageError::NotFound)?;
        record.aborted = true;
        Ok(())
    }

    async fn clear(&self, id: SessionId) -> Result<(), StorageError> {
        self.with_entry(id, |entry| {
            entry.modules.clear();
            entry.answers.clear();
        })
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
