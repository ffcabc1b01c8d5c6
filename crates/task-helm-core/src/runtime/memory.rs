// crates/task-helm-core/src/runtime/memory.rs
// ============================================================================
// Module: Task Helm Memory Manager
// Description: Facade unifying the episodic, working, and semantic stores.
// Purpose: Give every caller one consistent view of layered memory.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! The memory manager owns the handles to the three stores and exposes thin
//! convenience helpers that stamp timestamps from the injected clock. It
//! holds no state of its own; its sole purpose is that every subsystem
//! shares the same store instances. The semantic store is optional: hosts
//! without an embedding model simply run without similarity recall.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use crate::core::identifiers::NodeId;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::ToolName;
use crate::core::record::ActionType;
use crate::core::record::RecordStatus;
use crate::core::task::Role;
use crate::interfaces::Clock;
use crate::interfaces::EpisodicError;
use crate::interfaces::EpisodicStore;
use crate::interfaces::WorkingStateError;
use crate::interfaces::WorkingStateStore;
use crate::runtime::semantic::SemanticStore;

// ============================================================================
// SECTION: Memory Manager
// ============================================================================

/// Facade over the three memory stores.
///
/// # Invariants
/// - Exclusively owns the store handles; no other component constructs them.
/// - Stateless beyond the handles themselves.
#[derive(Clone)]
pub struct MemoryManager {
    /// Append-only episodic log.
    episodic: Arc<dyn EpisodicStore>,
    /// Per-task working-state documents.
    working: Arc<dyn WorkingStateStore>,
    /// Optional vector similarity store.
    semantic: Option<Arc<SemanticStore>>,
    /// Injected time source for record timestamps.
    clock: Arc<dyn Clock>,
}

impl MemoryManager {
    /// Creates a manager over the given stores.
    #[must_use]
    pub fn new(
        episodic: Arc<dyn EpisodicStore>,
        working: Arc<dyn WorkingStateStore>,
        semantic: Option<Arc<SemanticStore>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            episodic,
            working,
            semantic,
            clock,
        }
    }

    /// Returns the episodic store handle.
    #[must_use]
    pub fn episodic(&self) -> &Arc<dyn EpisodicStore> {
        &self.episodic
    }

    /// Returns the working-state store handle.
    #[must_use]
    pub fn working(&self) -> &Arc<dyn WorkingStateStore> {
        &self.working
    }

    /// Returns the semantic store handle, when configured.
    #[must_use]
    pub fn semantic(&self) -> Option<&Arc<SemanticStore>> {
        self.semantic.as_ref()
    }

    /// Returns the injected clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Appends a decision row stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns [`EpisodicError`] on backend failure.
    pub fn record_decision(
        &self,
        task_id: &TaskId,
        action_type: ActionType,
        content: &str,
        status: RecordStatus,
    ) -> Result<i64, EpisodicError> {
        self.episodic.append_decision(task_id, action_type, content, status, self.clock.now())
    }

    /// Appends a tool-call row stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns [`EpisodicError`] on backend failure.
    pub fn record_tool_call(
        &self,
        decision_id: i64,
        tool_name: &ToolName,
        params_json: &str,
        result_json: &str,
    ) -> Result<i64, EpisodicError> {
        self.episodic.append_tool_call(
            decision_id,
            tool_name,
            params_json,
            result_json,
            self.clock.now(),
        )
    }

    /// Appends a validation row stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns [`EpisodicError`] on backend failure.
    pub fn record_validation(
        &self,
        task_id: &TaskId,
        node_id: Option<&NodeId>,
        passed: bool,
        detail: &str,
    ) -> Result<i64, EpisodicError> {
        self.episodic.append_validation(task_id, node_id, passed, detail, self.clock.now())
    }

    /// Appends a transcript message stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns [`WorkingStateError`] on backend failure.
    pub fn append_message(
        &self,
        task_id: &TaskId,
        role: Role,
        content: &str,
    ) -> Result<(), WorkingStateError> {
        self.working.append_message(task_id, role, content, self.clock.now())
    }
}
