// crates/task-helm-core/src/runtime/working.rs
// ============================================================================
// Module: Task Helm Working State Store
// Description: Per-task working-state documents with atomic persistence.
// Purpose: Keep ephemeral task state durable across turns without torn reads.
// Dependencies: crate::{core, interfaces}, serde_json, tempfile
// ============================================================================

//! ## Overview
//! One JSON document per task, stored under a root directory. Saves write to
//! a temporary file in the destination directory and rename over the target,
//! so concurrent readers always observe a fully written document. Transcript
//! appends are ring-capped: oldest messages drop first past the cap.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use crate::core::identifiers::TaskId;
use crate::core::task::DEFAULT_TRANSCRIPT_CAP;
use crate::core::task::Role;
use crate::core::task::TranscriptMessage;
use crate::core::task::WorkingState;
use crate::core::time::Timestamp;
use crate::interfaces::WorkingStateError;
use crate::interfaces::WorkingStateStore;

// ============================================================================
// SECTION: Filesystem Store
// ============================================================================

/// Filesystem-backed working state store.
///
/// # Invariants
/// - Documents live at `<root>/<task_id>.json`.
/// - Saves are atomic: write to temp file, then rename over the target.
/// - Task ids containing path separators or traversal components are
///   rejected rather than resolved.
pub struct FsWorkingStateStore {
    /// Root directory holding one document per task.
    root: PathBuf,
    /// Transcript ring cap applied on append.
    transcript_cap: usize,
}

impl FsWorkingStateStore {
    /// Creates a store rooted at `root` with the default transcript cap.
    ///
    /// # Errors
    ///
    /// Returns [`WorkingStateError::Store`] when the root cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, WorkingStateError> {
        Self::with_cap(root, DEFAULT_TRANSCRIPT_CAP)
    }

    /// Creates a store with an explicit transcript cap.
    ///
    /// # Errors
    ///
    /// Returns [`WorkingStateError::Store`] when the root cannot be created.
    pub fn with_cap(root: impl Into<PathBuf>, cap: usize) -> Result<Self, WorkingStateError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| WorkingStateError::Store(err.to_string()))?;
        Ok(Self {
            root,
            transcript_cap: cap,
        })
    }

    /// Resolves the document path for a task, rejecting unsafe components.
    fn document_path(&self, task_id: &TaskId) -> Result<PathBuf, WorkingStateError> {
        let raw = task_id.as_str();
        if raw.is_empty()
            || raw.contains(['/', '\\'])
            || raw == "."
            || raw == ".."
            || raw.contains('\0')
        {
            return Err(WorkingStateError::Store(format!("unsafe task id: {raw}")));
        }
        Ok(self.root.join(format!("{raw}.json")))
    }

    /// Writes a document atomically (temp file + rename).
    fn write_atomic(&self, path: &Path, state: &WorkingState) -> Result<(), WorkingStateError> {
        let encoded = serde_json::to_vec_pretty(state)
            .map_err(|err| WorkingStateError::Store(err.to_string()))?;
        let mut temp = NamedTempFile::new_in(&self.root)
            .map_err(|err| WorkingStateError::Store(err.to_string()))?;
        temp.write_all(&encoded).map_err(|err| WorkingStateError::Store(err.to_string()))?;
        temp.persist(path).map_err(|err| WorkingStateError::Store(err.to_string()))?;
        Ok(())
    }
}

impl WorkingStateStore for FsWorkingStateStore {
    fn load(&self, task_id: &TaskId) -> Result<Option<WorkingState>, WorkingStateError> {
        let path = self.document_path(task_id)?;
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(WorkingStateError::Store(err.to_string())),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|err| WorkingStateError::Corrupt(err.to_string()))
    }

    fn save(&self, state: &WorkingState) -> Result<(), WorkingStateError> {
        let path = self.document_path(&state.task_id)?;
        self.write_atomic(&path, state)
    }

    fn append_message(
        &self,
        task_id: &TaskId,
        role: Role,
        content: &str,
        now: Timestamp,
    ) -> Result<(), WorkingStateError> {
        let mut state = self.load(task_id)?.ok_or_else(|| {
            WorkingStateError::Store(format!("no working state for task {task_id}"))
        })?;
        state.push_message(role, content, self.transcript_cap);
        state.updated_at = now;
        self.save(&state)
    }

    fn list_recent_messages(
        &self,
        task_id: &TaskId,
        n: usize,
    ) -> Result<Vec<TranscriptMessage>, WorkingStateError> {
        let state = self.load(task_id)?;
        Ok(state.map_or_else(Vec::new, |state| {
            let skip = state.messages.len().saturating_sub(n);
            state.messages.into_iter().skip(skip).collect()
        }))
    }
}

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// In-memory working state store for hermetic tests.
#[derive(Default)]
pub struct InMemoryWorkingStateStore {
    /// Documents keyed by task id.
    documents: Mutex<BTreeMap<TaskId, WorkingState>>,
    /// Transcript ring cap applied on append.
    transcript_cap: usize,
}

impl InMemoryWorkingStateStore {
    /// Creates an empty store with the default transcript cap.
    #[must_use]
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(BTreeMap::new()),
            transcript_cap: DEFAULT_TRANSCRIPT_CAP,
        }
    }

    /// Creates an empty store with an explicit transcript cap.
    #[must_use]
    pub fn with_cap(cap: usize) -> Self {
        Self {
            documents: Mutex::new(BTreeMap::new()),
            transcript_cap: cap,
        }
    }
}

impl WorkingStateStore for InMemoryWorkingStateStore {
    fn load(&self, task_id: &TaskId) -> Result<Option<WorkingState>, WorkingStateError> {
        let documents = self
            .documents
            .lock()
            .map_err(|_| WorkingStateError::Store("lock poisoned".to_string()))?;
        Ok(documents.get(task_id).cloned())
    }

    fn save(&self, state: &WorkingState) -> Result<(), WorkingStateError> {
        let mut documents = self
            .documents
            .lock()
            .map_err(|_| WorkingStateError::Store("lock poisoned".to_string()))?;
        documents.insert(state.task_id.clone(), state.clone());
        Ok(())
    }

    fn append_message(
        &self,
        task_id: &TaskId,
        role: Role,
        content: &str,
        now: Timestamp,
    ) -> Result<(), WorkingStateError> {
        let mut documents = self
            .documents
            .lock()
            .map_err(|_| WorkingStateError::Store("lock poisoned".to_string()))?;
        let state = documents.get_mut(task_id).ok_or_else(|| {
            WorkingStateError::Store(format!("no working state for task {task_id}"))
        })?;
        state.push_message(role, content, self.transcript_cap);
        state.updated_at = now;
        Ok(())
    }

    fn list_recent_messages(
        &self,
        task_id: &TaskId,
        n: usize,
    ) -> Result<Vec<TranscriptMessage>, WorkingStateError> {
        let documents = self
            .documents
            .lock()
            .map_err(|_| WorkingStateError::Store("lock poisoned".to_string()))?;
        Ok(documents.get(task_id).map_or_else(Vec::new, |state| {
            let skip = state.messages.len().saturating_sub(n);
            state.messages.iter().skip(skip).cloned().collect()
        }))
    }
}
