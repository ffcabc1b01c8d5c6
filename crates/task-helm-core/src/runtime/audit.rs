// crates/task-helm-core/src/runtime/audit.rs
// ============================================================================
// Module: Task Helm Security Audit Log
// Description: JSONL audit sinks for privacy and permission events.
// Purpose: Record security-relevant events without blocking primary work.
// Dependencies: crate::{core, interfaces}, serde_json
// ============================================================================

//! ## Overview
//! The security audit log is an append-only JSONL file: one UTF-8 event per
//! line, flushed after each write. Emission is an optimization; callers
//! swallow sink failures and the primary computation always completes.
//! Event context carries only summaries (PII types, counts, truncated
//! snippets that already passed the redactor), never raw PII.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use serde_json::Value;

use crate::core::identifiers::TaskId;
use crate::core::time::Timestamp;
use crate::interfaces::AuditError;
use crate::interfaces::AuditEvent;
use crate::interfaces::AuditEventType;
use crate::interfaces::AuditSink;
use crate::interfaces::Severity;

// ============================================================================
// SECTION: Event Construction
// ============================================================================

/// Builds an audit event with an RFC 3339 timestamp.
#[must_use]
pub fn build_event(
    event_type: AuditEventType,
    severity: Severity,
    task_id: Option<TaskId>,
    context: Value,
    now: Timestamp,
) -> AuditEvent {
    AuditEvent {
        event_type,
        timestamp: now.to_rfc3339().unwrap_or_default(),
        severity,
        task_id,
        context,
    }
}

// ============================================================================
// SECTION: File Sink
// ============================================================================

/// JSONL file audit sink.
///
/// # Invariants
/// - One event per line, UTF-8, flushed after each write.
/// - The file is append-only; existing lines are never rewritten.
pub struct FileAuditLog {
    /// Destination path.
    path: PathBuf,
    /// Append handle serialized behind a mutex.
    file: Mutex<File>,
}

impl FileAuditLog {
    /// Opens (creating parents as needed) an append-mode audit log.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Write`] when the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self, AuditError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AuditError::Write(err.to_string()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| AuditError::Write(err.to_string()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Returns the log path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditLog {
    fn emit(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let line =
            serde_json::to_string(event).map_err(|err| AuditError::Write(err.to_string()))?;
        let mut file =
            self.file.lock().map_err(|_| AuditError::Write("lock poisoned".to_string()))?;
        file.write_all(line.as_bytes()).map_err(|err| AuditError::Write(err.to_string()))?;
        file.write_all(b"\n").map_err(|err| AuditError::Write(err.to_string()))?;
        file.flush().map_err(|err| AuditError::Write(err.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Memory Sink
// ============================================================================

/// In-memory audit sink for tests.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    /// Collected events.
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots the collected events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Counts events of one type.
    #[must_use]
    pub fn count_of(&self, event_type: AuditEventType) -> usize {
        self.events().iter().filter(|event| event.event_type == event_type).count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn emit(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut events =
            self.events.lock().map_err(|_| AuditError::Write("lock poisoned".to_string()))?;
        events.push(event.clone());
        Ok(())
    }
}
