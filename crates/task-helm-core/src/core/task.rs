// crates/task-helm-core/src/core/task.rs
// ============================================================================
// Module: Task Helm Task Model
// Description: Task lifecycle state machine, transcript, and trace events.
// Purpose: Define the FSM contract and the canonical trace representation.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! A task is one conversational or computational request advanced through a
//! fixed lifecycle once per `run` call. The state machine is small and
//! closed: terminal states admit no successor, and every transition attempt
//! outside the table is a programmer error surfaced as `invalid_transition`.
//! Trace events record node execution; their canonical form strips volatile
//! fields so two runs of the same input compare byte-identical.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::graph::NodeType;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::TaskId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default transcript ring cap (oldest messages drop first past this bound).
pub const DEFAULT_TRANSCRIPT_CAP: usize = 50;

// ============================================================================
// SECTION: Task State Machine
// ============================================================================

/// Lifecycle states for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Task created; nothing planned yet.
    Init,
    /// Intent compiled into a workflow graph.
    Plan,
    /// Workflow graph executing node-by-node.
    Execute,
    /// Output checked against the validator contract.
    Validate,
    /// Working state and records persisted.
    Commit,
    /// Terminal: task archived successfully.
    Archive,
    /// Terminal: task failed.
    Failed,
}

impl TaskState {
    /// Returns the wire label for this state (`INIT`, `PLAN`, ...).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Plan => "PLAN",
            Self::Execute => "EXECUTE",
            Self::Validate => "VALIDATE",
            Self::Commit => "COMMIT",
            Self::Archive => "ARCHIVE",
            Self::Failed => "FAILED",
        }
    }

    /// Returns `true` when the state admits no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Archive | Self::Failed)
    }

    /// Returns `true` when `self → to` is a legal transition.
    ///
    /// Legal transitions: `INIT→PLAN`, `PLAN→EXECUTE`, `EXECUTE→VALIDATE`,
    /// `VALIDATE→COMMIT`, `COMMIT→ARCHIVE`, and any non-terminal state to
    /// `FAILED`.
    #[must_use]
    pub const fn can_transition(self, to: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(to, Self::Failed) {
            return true;
        }
        matches!(
            (self, to),
            (Self::Init, Self::Plan)
                | (Self::Plan, Self::Execute)
                | (Self::Execute, Self::Validate)
                | (Self::Validate, Self::Commit)
                | (Self::Commit, Self::Archive)
        )
    }
}

/// Errors raised by illegal state transitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    /// The requested transition is not in the legal transition table.
    #[error("invalid transition: {from} -> {to}")]
    Invalid {
        /// State the task was in.
        from: &'static str,
        /// State the caller requested.
        to: &'static str,
    },
}

impl TransitionError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Invalid { .. } => "invalid_transition",
        }
    }
}

// ============================================================================
// SECTION: Transcript
// ============================================================================

/// Speaker role for a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// End-user input.
    User,
    /// Model output.
    Assistant,
    /// Injected system context.
    System,
}

impl Role {
    /// Returns the wire label for this role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// One transcript message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    /// Speaker role.
    pub role: Role,
    /// Message content.
    pub content: String,
}

// ============================================================================
// SECTION: Task
// ============================================================================

/// In-process working copy of a task.
///
/// # Invariants
/// - `transcript` ordering equals the wall-clock ordering of turns.
/// - `transcript` never exceeds `transcript_cap`; oldest entries drop first.
/// - `state` only changes through [`Task::transition`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task identifier.
    pub task_id: TaskId,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Goal text (the first user utterance).
    pub goal: String,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Turn counter, 1-based.
    pub turn: u32,
    /// Bounded conversation transcript.
    pub transcript: Vec<TranscriptMessage>,
    /// Final output of the most recent turn.
    pub final_output: Option<String>,
    /// Transcript ring cap.
    pub transcript_cap: usize,
}

impl Task {
    /// Creates a new task in `INIT` at turn 1.
    #[must_use]
    pub fn new(task_id: TaskId, goal: impl Into<String>, created_at: Timestamp) -> Self {
        Self {
            task_id,
            created_at,
            goal: goal.into(),
            state: TaskState::Init,
            turn: 1,
            transcript: Vec::new(),
            final_output: None,
            transcript_cap: DEFAULT_TRANSCRIPT_CAP,
        }
    }

    /// Moves the task to `to`, enforcing the legal transition table.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::Invalid`] when the transition is illegal.
    pub fn transition(&mut self, to: TaskState) -> Result<(), TransitionError> {
        if !self.state.can_transition(to) {
            return Err(TransitionError::Invalid {
                from: self.state.as_str(),
                to: to.as_str(),
            });
        }
        self.state = to;
        Ok(())
    }

    /// Starts a fresh turn on a terminal task: state resets to `INIT`, the
    /// turn counter advances, and the transcript is kept.
    pub fn begin_next_turn(&mut self) {
        if self.state.is_terminal() {
            self.state = TaskState::Init;
            self.turn = self.turn.saturating_add(1);
            self.final_output = None;
        }
    }

    /// Appends a transcript message, dropping the oldest entry past the cap.
    pub fn push_message(&mut self, role: Role, content: impl Into<String>) {
        self.transcript.push(TranscriptMessage {
            role,
            content: content.into(),
        });
        while self.transcript.len() > self.transcript_cap {
            self.transcript.remove(0);
        }
    }
}

// ============================================================================
// SECTION: Working State Document
// ============================================================================

/// Per-task working-state document persisted between turns.
///
/// # Invariants
/// - `messages` never exceeds the store's transcript cap; oldest drop first.
/// - Saves are atomic (write-to-temp, rename); readers always observe a
///   fully written document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingState {
    /// Task identifier.
    pub task_id: TaskId,
    /// Goal text (the first user utterance).
    pub goal: String,
    /// Current FSM state label.
    pub status: String,
    /// Node currently executing, when mid-run.
    pub current_step: Option<String>,
    /// Node identifiers that completed this turn.
    pub completed_steps: Vec<String>,
    /// Node identifiers still pending this turn.
    pub next_steps: Vec<String>,
    /// Bounded conversation transcript.
    pub messages: Vec<TranscriptMessage>,
    /// Last modification timestamp.
    pub updated_at: Timestamp,
}

impl WorkingState {
    /// Creates a fresh document for a new task.
    #[must_use]
    pub fn new(task_id: TaskId, goal: impl Into<String>, now: Timestamp) -> Self {
        Self {
            task_id,
            goal: goal.into(),
            status: TaskState::Init.as_str().to_string(),
            current_step: None,
            completed_steps: Vec::new(),
            next_steps: Vec::new(),
            messages: Vec::new(),
            updated_at: now,
        }
    }

    /// Appends a message, dropping the oldest entry past `cap`.
    pub fn push_message(&mut self, role: Role, content: impl Into<String>, cap: usize) {
        self.messages.push(TranscriptMessage {
            role,
            content: content.into(),
        });
        while self.messages.len() > cap {
            self.messages.remove(0);
        }
    }
}

// ============================================================================
// SECTION: Trace Events
// ============================================================================

/// Trace event classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEventType {
    /// A workflow node began executing.
    NodeStart,
    /// A workflow node finished successfully.
    NodeEnd,
    /// A workflow node failed.
    NodeError,
    /// Whole-run latency baseline, emitted once as the last trace entry.
    LatencyBaseline,
}

/// One trace event, recorded per node entry/exit plus a final latency entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Task this event belongs to (volatile; dropped from the canonical form).
    pub task_id: TaskId,
    /// Controller state at emission time.
    pub controller_state: TaskState,
    /// Event classification.
    pub event_type: TraceEventType,
    /// Workflow node identifier, when the event concerns a node.
    pub node_id: Option<NodeId>,
    /// Workflow node type, when the event concerns a node.
    pub node_type: Option<NodeType>,
    /// Whether the step succeeded.
    pub success: bool,
    /// Elapsed nanoseconds (volatile; dropped from the canonical form).
    pub elapsed_ns: u64,
    /// Offset from run start in nanoseconds (volatile; dropped as well).
    pub start_offset_ns: u64,
    /// Stable error code when the step failed.
    pub error_code: Option<String>,
}

impl TraceEvent {
    /// Returns the canonical, determinism-comparable form of this event.
    #[must_use]
    pub fn canonical(&self) -> CanonicalTraceEvent {
        CanonicalTraceEvent {
            controller_state: self.controller_state,
            event_type: self.event_type,
            node_id: self.node_id.clone(),
            node_type: self.node_type,
            success: self.success,
            error_present: self.error_code.is_some(),
            error_code: self.error_code.clone(),
        }
    }
}

/// Canonical trace event with volatile fields stripped.
///
/// # Invariants
/// - Two runs with identical inputs and identical stubbed capabilities
///   produce byte-identical canonical event sequences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalTraceEvent {
    /// Controller state at emission time.
    pub controller_state: TaskState,
    /// Event classification.
    pub event_type: TraceEventType,
    /// Workflow node identifier, when the event concerns a node.
    pub node_id: Option<NodeId>,
    /// Workflow node type, when the event concerns a node.
    pub node_type: Option<NodeType>,
    /// Whether the step succeeded.
    pub success: bool,
    /// Whether an error code is present.
    pub error_present: bool,
    /// Stable error code when the step failed.
    pub error_code: Option<String>,
}

/// Projects a trace into its canonical event sequence.
#[must_use]
pub fn canonical_trace(events: &[TraceEvent]) -> Vec<CanonicalTraceEvent> {
    events.iter().map(TraceEvent::canonical).collect()
}
