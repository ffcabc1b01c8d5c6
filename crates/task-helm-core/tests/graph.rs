// crates/task-helm-core/tests/graph.rs
// ============================================================================
// Module: Workflow Graph Unit Tests
// Description: Canonical form, validation, and topological scheduling.
// Purpose: Validate graph determinism and full-cycle rejection.
// ============================================================================

//! ## Overview
//! Unit tests for the workflow graph model and the executor's scheduling:
//! - Canonicalization sorts nodes and deduplicates/sorts edges
//! - Structural validation rejects unknown entries and edge endpoints
//! - Topological order is stable with ascending-id tie-breaks
//! - Cycles are rejected before any node executes

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::collections::BTreeSet;

use serde_json::json;
use task_helm_core::DagExecutor;
use task_helm_core::NodeId;
use task_helm_core::core::graph::NodeSpec;
use task_helm_core::core::graph::NodeType;
use task_helm_core::core::graph::WorkflowGraph;
use task_helm_core::runtime::DagError;
use task_helm_core::runtime::Intent;
use task_helm_core::runtime::PlanCompiler;

fn node(id: &str, node_type: NodeType) -> NodeSpec {
    NodeSpec {
        id: NodeId::new(id),
        node_type,
        inputs: BTreeSet::new(),
        params: json!({}),
    }
}

fn edge(from: &str, to: &str) -> (NodeId, NodeId) {
    (NodeId::new(from), NodeId::new(to))
}

#[test]
fn canonicalize_sorts_nodes_and_edges() {
    let graph = WorkflowGraph {
        nodes: vec![node("b", NodeType::LlmWorker), node("a", NodeType::Router)],
        edges: vec![edge("a", "b"), edge("a", "b"), edge("a", "a")],
        entry: NodeId::new("a"),
    };
    let canonical = graph.canonicalize();
    let ids: Vec<&str> = canonical.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, ["a", "b"]);
    assert_eq!(canonical.edges, vec![edge("a", "a"), edge("a", "b")], "deduped and sorted");
}

#[test]
fn canonical_hash_is_insertion_order_independent() {
    let forward = WorkflowGraph {
        nodes: vec![node("a", NodeType::Router), node("b", NodeType::LlmWorker)],
        edges: vec![edge("a", "b")],
        entry: NodeId::new("a"),
    };
    let reversed = WorkflowGraph {
        nodes: vec![node("b", NodeType::LlmWorker), node("a", NodeType::Router)],
        edges: vec![edge("a", "b"), edge("a", "b")],
        entry: NodeId::new("a"),
    };
    let lhs = forward
        .canonical_hash(task_helm_core::DEFAULT_HASH_ALGORITHM)
        .expect("hash");
    let rhs = reversed
        .canonical_hash(task_helm_core::DEFAULT_HASH_ALGORITHM)
        .expect("hash");
    assert_eq!(lhs, rhs);
}

#[test]
fn validation_rejects_unknown_entry_and_endpoints() {
    let graph = WorkflowGraph {
        nodes: vec![node("a", NodeType::Router)],
        edges: Vec::new(),
        entry: NodeId::new("missing"),
    };
    let error = graph.validate().expect_err("unknown entry");
    assert_eq!(error.code(), "validation_error");

    let graph = WorkflowGraph {
        nodes: vec![node("a", NodeType::Router)],
        edges: vec![edge("a", "ghost")],
        entry: NodeId::new("a"),
    };
    let error = graph.validate().expect_err("unknown endpoint");
    assert_eq!(error.code(), "validation_error");
}

#[test]
fn topological_order_breaks_ties_by_ascending_id() {
    // Diamond: a -> {b, c} -> d. b and c become ready together.
    let graph = WorkflowGraph {
        nodes: vec![
            node("a", NodeType::Router),
            node("c", NodeType::LlmWorker),
            node("b", NodeType::ContextBuilder),
            node("d", NodeType::Validator),
        ],
        edges: vec![edge("a", "b"), edge("a", "c"), edge("b", "d"), edge("c", "d")],
        entry: NodeId::new("a"),
    };
    let order = DagExecutor::topological_order(&graph).expect("acyclic");
    let ids: Vec<&str> = order.iter().map(NodeId::as_str).collect();
    assert_eq!(ids, ["a", "b", "c", "d"]);
}

#[test]
fn cycle_is_rejected_before_execution() {
    let graph = WorkflowGraph {
        nodes: vec![
            node("a", NodeType::Router),
            node("b", NodeType::ContextBuilder),
            node("c", NodeType::LlmWorker),
        ],
        edges: vec![edge("a", "b"), edge("b", "c"), edge("c", "b")],
        entry: NodeId::new("a"),
    };
    let error = DagExecutor::topological_order(&graph).expect_err("cycle");
    assert_eq!(error, DagError::CycleDetected);
    assert_eq!(error.code(), "cycle_detected");
}

#[test]
fn compiled_plan_is_deterministic_per_intent() {
    let compiler = PlanCompiler::new();
    let lhs = compiler.compile(Intent::Chat, false);
    let rhs = compiler.compile(Intent::Chat, false);
    assert_eq!(lhs.canonicalize(), rhs.canonicalize());

    let ids: Vec<&str> = lhs.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, ["router", "context_builder", "llm_worker", "validator"]);
}

#[test]
fn tool_call_node_is_inserted_only_on_request() {
    let compiler = PlanCompiler::new();
    let without = compiler.compile(Intent::FileOps, false);
    assert!(without.nodes.iter().all(|n| n.node_type != NodeType::ToolCall));

    let with = compiler.compile(Intent::FileOps, true);
    let ids: Vec<&str> = with.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, ["router", "context_builder", "tool_call", "llm_worker", "validator"]);
    assert!(
        with.edges.contains(&edge("context_builder", "tool_call"))
            && with.edges.contains(&edge("tool_call", "llm_worker")),
        "tool_call sits between context_builder and llm_worker"
    );
}
