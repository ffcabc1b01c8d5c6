// crates/task-helm-core/src/core/graph.rs
// ============================================================================
// Module: Task Helm Workflow Graph
// Description: Directed acyclic workflow graph model and canonical form.
// Purpose: Represent compiled plans with a deterministic, comparable shape.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! A workflow graph is the compiled form of a plan: a small set of typed
//! nodes plus directed edges. The canonical form sorts nodes by identifier
//! and edges lexicographically with duplicates removed, so graphs compiled
//! from identical inputs compare byte-identical after canonicalization.
//! Acyclicity is enforced by the executor before any node runs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::hashing::HashAlgorithm;
use crate::core::hashing::HashDigest;
use crate::core::hashing::HashError;
use crate::core::hashing::hash_canonical_json;
use crate::core::identifiers::NodeId;

// ============================================================================
// SECTION: Node Types
// ============================================================================

/// Workflow node classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Classifies user input into an intent tag.
    Router,
    /// Assembles transcript and retrieved context.
    ContextBuilder,
    /// Calls the language model and post-processes its output.
    LlmWorker,
    /// Dispatches a tool request through the executor.
    ToolCall,
    /// Gate-keeps the final output against the validator contract.
    Validator,
}

impl NodeType {
    /// Returns the wire label for this node type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Router => "router",
            Self::ContextBuilder => "context_builder",
            Self::LlmWorker => "llm_worker",
            Self::ToolCall => "tool_call",
            Self::Validator => "validator",
        }
    }
}

// ============================================================================
// SECTION: Graph Model
// ============================================================================

/// One node of a workflow graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Node identifier, unique within the graph.
    pub id: NodeId,
    /// Node classification.
    pub node_type: NodeType,
    /// Identifiers of nodes whose output feeds this node.
    pub inputs: BTreeSet<NodeId>,
    /// Node parameters as canonical JSON.
    pub params: Value,
}

/// A compiled workflow graph.
///
/// # Invariants
/// - `entry` names a node in `nodes`.
/// - Edge endpoints name nodes in `nodes`.
/// - Acyclicity is checked by the executor before execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    /// Graph nodes.
    pub nodes: Vec<NodeSpec>,
    /// Directed edges as `(from, to)` pairs.
    pub edges: Vec<(NodeId, NodeId)>,
    /// Entry node identifier.
    pub entry: NodeId,
}

/// Graph validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// The graph contains no nodes.
    #[error("workflow graph has no nodes")]
    Empty,
    /// Two nodes share an identifier.
    #[error("duplicate node id: {0}")]
    DuplicateNode(String),
    /// The entry node is not present in the node set.
    #[error("entry node not found: {0}")]
    UnknownEntry(String),
    /// An edge references a node that is not present in the node set.
    #[error("edge references unknown node: {0}")]
    UnknownEdgeEndpoint(String),
}

impl GraphError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Empty
            | Self::DuplicateNode(_)
            | Self::UnknownEntry(_)
            | Self::UnknownEdgeEndpoint(_) => "validation_error",
        }
    }
}

impl WorkflowGraph {
    /// Validates structural integrity: non-empty, unique node identifiers,
    /// known entry, and known edge endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError`] naming the first violation found.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.nodes.is_empty() {
            return Err(GraphError::Empty);
        }
        let mut ids = BTreeSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.clone()) {
                return Err(GraphError::DuplicateNode(node.id.to_string()));
            }
        }
        if !ids.contains(&self.entry) {
            return Err(GraphError::UnknownEntry(self.entry.to_string()));
        }
        for (from, to) in &self.edges {
            if !ids.contains(from) {
                return Err(GraphError::UnknownEdgeEndpoint(from.to_string()));
            }
            if !ids.contains(to) {
                return Err(GraphError::UnknownEdgeEndpoint(to.to_string()));
            }
        }
        Ok(())
    }

    /// Returns the canonical form: nodes sorted by identifier, edges
    /// deduplicated and sorted lexicographically.
    #[must_use]
    pub fn canonicalize(&self) -> Self {
        let mut nodes = self.nodes.clone();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let edges: BTreeSet<(NodeId, NodeId)> = self.edges.iter().cloned().collect();
        Self {
            nodes,
            edges: edges.into_iter().collect(),
            entry: self.entry.clone(),
        }
    }

    /// Hashes the canonical form of the graph.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when canonical serialization fails.
    pub fn canonical_hash(&self, algorithm: HashAlgorithm) -> Result<HashDigest, HashError> {
        hash_canonical_json(algorithm, &self.canonicalize())
    }
}
