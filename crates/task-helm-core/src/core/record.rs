// crates/task-helm-core/src/core/record.rs
// ============================================================================
// Module: Task Helm Records
// Description: Append-only decision, tool-call, validation, and archive records.
// Purpose: Define the durable record shapes shared by stores and the controller.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Records are the durable audit trail of the controller: one decision row
//! per FSM transition or node event, one tool-call row per tool invocation,
//! one validation row per VALIDATE gate, and one archive snapshot per
//! archived turn. Records are append-only; no store exposes update or delete
//! for them, and previously written archive snapshots are never rewritten.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::hashing::HashDigest;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::ToolName;
use crate::core::task::TranscriptMessage;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Classification
// ============================================================================

/// Classification of a decision row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Plan compilation.
    Plan,
    /// Workflow node event.
    Node,
    /// Tool invocation.
    Tool,
    /// Validation gate.
    Validate,
    /// Task archival.
    Archive,
    /// Failure record.
    Error,
}

impl ActionType {
    /// Returns the wire label for this action type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Node => "node",
            Self::Tool => "tool",
            Self::Validate => "validate",
            Self::Archive => "archive",
            Self::Error => "error",
        }
    }

    /// Parses a wire label back into an action type.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "plan" => Some(Self::Plan),
            "node" => Some(Self::Node),
            "tool" => Some(Self::Tool),
            "validate" => Some(Self::Validate),
            "archive" => Some(Self::Archive),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Outcome status of a decision row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// The recorded step succeeded.
    Ok,
    /// The recorded step failed.
    Err,
}

impl RecordStatus {
    /// Returns the wire label for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Err => "err",
        }
    }

    /// Parses a wire label back into a status.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "ok" => Some(Self::Ok),
            "err" => Some(Self::Err),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Episodic Records
// ============================================================================

/// One append-only decision row.
///
/// # Invariants
/// - `id` is store-assigned, monotone increasing, and equals temporal order
///   within a task.
/// - Rows are never edited or deleted after append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Store-assigned row identifier.
    pub id: i64,
    /// Owning task.
    pub task_id: TaskId,
    /// Row classification.
    pub action_type: ActionType,
    /// Free-form UTF-8 content.
    pub content: String,
    /// Outcome status.
    pub status: RecordStatus,
    /// Append timestamp.
    pub timestamp: Timestamp,
}

/// One append-only tool-call row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Store-assigned row identifier.
    pub id: i64,
    /// Owning decision row.
    pub decision_id: i64,
    /// Invoked tool.
    pub tool_name: ToolName,
    /// Canonical JSON of the validated request payload.
    pub params: String,
    /// Canonical JSON of the result, or a stable error code.
    pub result: String,
    /// Append timestamp.
    pub timestamp: Timestamp,
}

/// One append-only validation row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRecord {
    /// Store-assigned row identifier.
    pub id: i64,
    /// Owning task.
    pub task_id: TaskId,
    /// Validator node, when the validation ran inside a workflow.
    pub node_id: Option<NodeId>,
    /// Whether the gate passed.
    pub passed: bool,
    /// Human-readable detail (failure reason or `ok`).
    pub detail: String,
    /// Append timestamp.
    pub timestamp: Timestamp,
}

// ============================================================================
// SECTION: Archive Records
// ============================================================================

/// Snapshot of one archived turn.
///
/// # Invariants
/// - Written once at ARCHIVE and never modified afterwards.
/// - `state_hash` covers the canonical JSON of the snapshot with the hash
///   field itself absent, so replays can verify integrity offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSnapshot {
    /// Turn number this snapshot closes.
    pub turn: u32,
    /// Archival timestamp.
    pub archived_at: Timestamp,
    /// Task goal text.
    pub goal: String,
    /// Final FSM state label.
    pub final_state: String,
    /// Final model output for the turn.
    pub llm_output: String,
    /// Transcript at archival time.
    pub transcript: Vec<TranscriptMessage>,
    /// Canonical workflow graph executed this turn.
    pub canonical_graph: Value,
    /// Canonical trace-event sequence for this turn.
    pub canonical_trace: Value,
    /// Integrity hash over the snapshot body.
    pub state_hash: Option<HashDigest>,
}

/// Per-task archive document: an append-only list of turn snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveDocument {
    /// Task identifier.
    pub task_id: TaskId,
    /// Turn snapshots in archival order.
    pub snapshots: Vec<ArchiveSnapshot>,
}

impl ArchiveDocument {
    /// Creates an empty archive document for a task.
    #[must_use]
    pub const fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            snapshots: Vec::new(),
        }
    }
}
