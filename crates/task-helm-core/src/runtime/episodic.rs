// crates/task-helm-core/src/runtime/episodic.rs
// ============================================================================
// Module: Task Helm In-Memory Episodic Store
// Description: Hermetic episodic log implementation.
// Purpose: Back tests and cache-free deployments without a database file.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! An in-process implementation of the append-only episodic log. Semantics
//! mirror the durable store exactly: monotone ids, case-insensitive
//! substring search ordered newest first, and no update or delete surface.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;

use crate::core::identifiers::NodeId;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::ToolName;
use crate::core::record::ActionType;
use crate::core::record::DecisionRecord;
use crate::core::record::RecordStatus;
use crate::core::record::ToolCallRecord;
use crate::core::record::ValidationRecord;
use crate::core::time::Timestamp;
use crate::interfaces::EpisodicError;
use crate::interfaces::EpisodicStore;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Rejects empty or whitespace queries.
pub(crate) fn validate_query(query: &str) -> Result<(), EpisodicError> {
    if query.trim().is_empty() {
        return Err(EpisodicError::EmptyQuery);
    }
    Ok(())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Mutable log contents.
#[derive(Debug, Default)]
struct LogInner {
    /// Decision rows in append order.
    decisions: Vec<DecisionRecord>,
    /// Tool-call rows in append order.
    tool_calls: Vec<ToolCallRecord>,
    /// Validation rows in append order.
    validations: Vec<ValidationRecord>,
}

/// In-memory episodic store.
///
/// # Invariants
/// - Row ids start at 1 and increase monotonically per table.
/// - Rows are never mutated after append.
#[derive(Debug, Default)]
pub struct InMemoryEpisodicStore {
    /// Log contents behind a writer mutex.
    inner: Mutex<LogInner>,
}

impl InMemoryEpisodicStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every validation row (test observability).
    #[must_use]
    pub fn validations(&self) -> Vec<ValidationRecord> {
        self.inner.lock().map(|inner| inner.validations.clone()).unwrap_or_default()
    }

    /// Runs `operate` on the locked contents.
    fn with_inner<T>(&self, operate: impl FnOnce(&mut LogInner) -> T) -> Result<T, EpisodicError> {
        let mut inner =
            self.inner.lock().map_err(|_| EpisodicError::Store("lock poisoned".to_string()))?;
        Ok(operate(&mut inner))
    }
}

impl EpisodicStore for InMemoryEpisodicStore {
    fn append_decision(
        &self,
        task_id: &TaskId,
        action_type: ActionType,
        content: &str,
        status: RecordStatus,
        timestamp: Timestamp,
    ) -> Result<i64, EpisodicError> {
        self.with_inner(|inner| {
            let id = i64::try_from(inner.decisions.len()).unwrap_or(i64::MAX) + 1;
            inner.decisions.push(DecisionRecord {
                id,
                task_id: task_id.clone(),
                action_type,
                content: content.to_string(),
                status,
                timestamp,
            });
            id
        })
    }

    fn append_tool_call(
        &self,
        decision_id: i64,
        tool_name: &ToolName,
        params_json: &str,
        result_json: &str,
        timestamp: Timestamp,
    ) -> Result<i64, EpisodicError> {
        self.with_inner(|inner| {
            let id = i64::try_from(inner.tool_calls.len()).unwrap_or(i64::MAX) + 1;
            inner.tool_calls.push(ToolCallRecord {
                id,
                decision_id,
                tool_name: tool_name.clone(),
                params: params_json.to_string(),
                result: result_json.to_string(),
                timestamp,
            });
            id
        })
    }

    fn append_validation(
        &self,
        task_id: &TaskId,
        node_id: Option<&NodeId>,
        passed: bool,
        detail: &str,
        timestamp: Timestamp,
    ) -> Result<i64, EpisodicError> {
        self.with_inner(|inner| {
            let id = i64::try_from(inner.validations.len()).unwrap_or(i64::MAX) + 1;
            inner.validations.push(ValidationRecord {
                id,
                task_id: task_id.clone(),
                node_id: node_id.cloned(),
                passed,
                detail: detail.to_string(),
                timestamp,
            });
            id
        })
    }

    fn search_decisions(
        &self,
        query: &str,
        task_id: Option<&TaskId>,
        limit: usize,
    ) -> Result<Vec<DecisionRecord>, EpisodicError> {
        validate_query(query)?;
        let needle = query.to_lowercase();
        self.with_inner(|inner| {
            let mut found: Vec<DecisionRecord> = inner
                .decisions
                .iter()
                .filter(|row| task_id.is_none_or(|wanted| &row.task_id == wanted))
                .filter(|row| row.content.to_lowercase().contains(&needle))
                .cloned()
                .collect();
            found.sort_by(|a, b| b.id.cmp(&a.id));
            found.truncate(limit);
            found
        })
    }

    fn search_tool_calls(
        &self,
        query: &str,
        task_id: Option<&TaskId>,
        limit: usize,
    ) -> Result<Vec<ToolCallRecord>, EpisodicError> {
        validate_query(query)?;
        let needle = query.to_lowercase();
        self.with_inner(|inner| {
            let task_decisions: Vec<i64> = task_id.map_or_else(Vec::new, |wanted| {
                inner
                    .decisions
                    .iter()
                    .filter(|row| &row.task_id == wanted)
                    .map(|row| row.id)
                    .collect()
            });
            let mut found: Vec<ToolCallRecord> = inner
                .tool_calls
                .iter()
                .filter(|row| task_id.is_none() || task_decisions.contains(&row.decision_id))
                .filter(|row| {
                    row.tool_name.as_str().to_lowercase().contains(&needle)
                        || row.params.to_lowercase().contains(&needle)
                        || row.result.to_lowercase().contains(&needle)
                })
                .cloned()
                .collect();
            found.sort_by(|a, b| b.id.cmp(&a.id));
            found.truncate(limit);
            found
        })
    }

    fn recent_decisions(
        &self,
        task_id: &TaskId,
        limit: usize,
    ) -> Result<Vec<DecisionRecord>, EpisodicError> {
        self.with_inner(|inner| {
            let mut found: Vec<DecisionRecord> = inner
                .decisions
                .iter()
                .filter(|row| &row.task_id == task_id)
                .cloned()
                .collect();
            found.sort_by(|a, b| b.id.cmp(&a.id));
            found.truncate(limit);
            found
        })
    }

    fn health(&self) -> Result<(), EpisodicError> {
        self.with_inner(|_| ())
    }
}
