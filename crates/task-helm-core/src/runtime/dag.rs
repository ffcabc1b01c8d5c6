// crates/task-helm-core/src/runtime/dag.rs
// ============================================================================
// Module: Task Helm DAG Executor
// Description: Topological, sequential workflow graph execution.
// Purpose: Run compiled graphs deterministically with full cycle rejection.
// Dependencies: crate::{core, interfaces, runtime::nodes}, thiserror
// ============================================================================

//! ## Overview
//! The executor computes a complete topological order before touching any
//! node: a cycle fails the run with `cycle_detected` and zero side effects.
//! Duplicate edges are deduplicated, and scheduling ties break by ascending
//! node id so the order is stable across runs. Execution is sequential; the
//! first node error stops the run and the partial event list is returned.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::core::graph::GraphError;
use crate::core::graph::NodeType;
use crate::core::graph::WorkflowGraph;
use crate::core::identifiers::NodeId;
use crate::interfaces::CancellationToken;
use crate::runtime::nodes::NodeContext;
use crate::runtime::nodes::NodeError;
use crate::runtime::nodes::WorkflowNode;

// ============================================================================
// SECTION: Run Budget
// ============================================================================

/// Per-run deadline and cancellation budget.
///
/// Once the deadline passes, the shared cancellation token is set so tool
/// handlers stop starting new operations.
#[derive(Debug, Clone)]
pub struct RunBudget {
    /// Optional absolute deadline.
    deadline: Option<Instant>,
    /// Shared cancellation signal.
    cancel: CancellationToken,
}

impl RunBudget {
    /// Creates a budget with an optional deadline.
    #[must_use]
    pub fn new(deadline: Option<Instant>) -> Self {
        Self {
            deadline,
            cancel: CancellationToken::new(),
        }
    }

    /// Returns the shared cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Returns `true` once the budget is exhausted, cancelling the token on
    /// first deadline expiry.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        if self.cancel.is_cancelled() {
            return true;
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            self.cancel.cancel();
            return true;
        }
        false
    }
}

impl Default for RunBudget {
    fn default() -> Self {
        Self::new(None)
    }
}

// ============================================================================
// SECTION: Events & Errors
// ============================================================================

/// Node event classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEventKind {
    /// Node began executing.
    Start,
    /// Node finished successfully.
    End,
    /// Node failed.
    Error,
}

/// One node execution event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEvent {
    /// Node identifier.
    pub node_id: NodeId,
    /// Node type.
    pub node_type: NodeType,
    /// Event classification.
    pub kind: NodeEventKind,
    /// Whether the step succeeded.
    pub success: bool,
    /// Elapsed nanoseconds for this node (zero on start events).
    pub elapsed_ns: u64,
    /// Offset from run start in nanoseconds.
    pub start_offset_ns: u64,
    /// Stable error code on failure.
    pub error_code: Option<String>,
}

/// Executor-level errors raised before any node runs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DagError {
    /// The graph contains a cycle.
    #[error("workflow graph contains a cycle")]
    CycleDetected,
    /// The graph failed structural validation.
    #[error(transparent)]
    Invalid(#[from] GraphError),
    /// A graph node has no registered implementation.
    #[error("no implementation for node: {0}")]
    MissingImplementation(String),
}

impl DagError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::CycleDetected => "cycle_detected",
            Self::Invalid(_) => "validation_error",
            Self::MissingImplementation(_) => "configuration_error",
        }
    }
}

/// Outcome of one graph execution.
pub struct DagRun {
    /// Node events in execution order.
    pub events: Vec<NodeEvent>,
    /// Final context (carries `node_error` on failure).
    pub context: NodeContext,
    /// First node failure, when one occurred.
    pub error: Option<(NodeId, NodeType, NodeError)>,
}

// ============================================================================
// SECTION: Executor
// ============================================================================

/// Deterministic, sequential DAG executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct DagExecutor;

impl DagExecutor {
    /// Creates an executor.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the stable topological order for a graph.
    ///
    /// # Errors
    ///
    /// Returns [`DagError::Invalid`] on structural violations and
    /// [`DagError::CycleDetected`] when no complete order exists.
    pub fn topological_order(graph: &WorkflowGraph) -> Result<Vec<NodeId>, DagError> {
        graph.validate()?;
        let edges: BTreeSet<(NodeId, NodeId)> = graph.edges.iter().cloned().collect();
        let mut in_degree: BTreeMap<NodeId, usize> =
            graph.nodes.iter().map(|node| (node.id.clone(), 0)).collect();
        let mut downstream: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for (from, to) in &edges {
            *in_degree.entry(to.clone()).or_insert(0) += 1;
            downstream.entry(from.clone()).or_default().push(to.clone());
        }
        let mut ready: BTreeSet<NodeId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| id.clone())
            .collect();
        let mut order = Vec::with_capacity(graph.nodes.len());
        while let Some(next) = ready.iter().next().cloned() {
            ready.remove(&next);
            if let Some(children) = downstream.get(&next) {
                for child in children {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.insert(child.clone());
                        }
                    }
                }
            }
            order.push(next);
        }
        if order.len() < graph.nodes.len() {
            return Err(DagError::CycleDetected);
        }
        Ok(order)
    }

    /// Executes a graph sequentially in topological order.
    ///
    /// # Errors
    ///
    /// Returns [`DagError`] for pre-execution failures (cycles, structural
    /// violations, missing implementations). Node failures do not error:
    /// they stop the run and surface in [`DagRun::error`].
    pub fn execute(
        &self,
        graph: &WorkflowGraph,
        implementations: &BTreeMap<NodeId, Arc<dyn WorkflowNode>>,
        mut context: NodeContext,
        budget: &RunBudget,
    ) -> Result<DagRun, DagError> {
        let order = Self::topological_order(graph)?;
        let node_types: BTreeMap<NodeId, NodeType> =
            graph.nodes.iter().map(|node| (node.id.clone(), node.node_type)).collect();
        for node_id in &order {
            if !implementations.contains_key(node_id) {
                return Err(DagError::MissingImplementation(node_id.to_string()));
            }
        }

        let started = Instant::now();
        let mut events = Vec::new();
        let mut error = None;

        for node_id in order {
            let node_type = node_types.get(&node_id).copied().unwrap_or(NodeType::Router);
            if budget.exhausted() {
                let failure = NodeError::new("deadline_exceeded", "run budget exhausted");
                context.set_error(&failure);
                events.push(NodeEvent {
                    node_id: node_id.clone(),
                    node_type,
                    kind: NodeEventKind::Error,
                    success: false,
                    elapsed_ns: 0,
                    start_offset_ns: offset_ns(started),
                    error_code: Some(failure.code.clone()),
                });
                error = Some((node_id, node_type, failure));
                break;
            }

            let Some(implementation) = implementations.get(&node_id) else {
                // Checked above; unreachable in practice.
                break;
            };

            events.push(NodeEvent {
                node_id: node_id.clone(),
                node_type,
                kind: NodeEventKind::Start,
                success: true,
                elapsed_ns: 0,
                start_offset_ns: offset_ns(started),
                error_code: None,
            });
            let node_started = Instant::now();
            let outcome = implementation.execute(&mut context);
            let elapsed = elapsed_ns(node_started);
            match outcome {
                Ok(()) => {
                    events.push(NodeEvent {
                        node_id: node_id.clone(),
                        node_type,
                        kind: NodeEventKind::End,
                        success: true,
                        elapsed_ns: elapsed,
                        start_offset_ns: offset_ns(started),
                        error_code: None,
                    });
                }
                Err(failure) => {
                    context.set_error(&failure);
                    events.push(NodeEvent {
                        node_id: node_id.clone(),
                        node_type,
                        kind: NodeEventKind::Error,
                        success: false,
                        elapsed_ns: elapsed,
                        start_offset_ns: offset_ns(started),
                        error_code: Some(failure.code.clone()),
                    });
                    error = Some((node_id, node_type, failure));
                    break;
                }
            }
        }

        Ok(DagRun {
            events,
            context,
            error,
        })
    }
}

/// Nanoseconds elapsed since `instant`, saturating into `u64`.
fn elapsed_ns(instant: Instant) -> u64 {
    u64::try_from(instant.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

/// Nanosecond offset since run start, saturating into `u64`.
fn offset_ns(started: Instant) -> u64 {
    elapsed_ns(started)
}
