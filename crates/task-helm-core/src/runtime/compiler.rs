// crates/task-helm-core/src/runtime/compiler.rs
// ============================================================================
// Module: Task Helm Plan Compiler
// Description: Compiles an intent into a fixed workflow graph.
// Purpose: Produce small, deterministic DAGs for the executor.
// Dependencies: crate::{core, runtime::nodes}, serde_json
// ============================================================================

//! ## Overview
//! The plan compiler maps a classified intent (plus whether the caller
//! supplied a tool request) to a small fixed graph:
//! `router → context_builder → [tool_call] → llm_worker → validator`.
//! The tool-call node is inserted only when a tool request is present.
//! Compilation is pure: identical inputs yield identical graphs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde_json::json;

use crate::core::graph::NodeSpec;
use crate::core::graph::NodeType;
use crate::core::graph::WorkflowGraph;
use crate::core::identifiers::NodeId;
use crate::runtime::nodes::Intent;

// ============================================================================
// SECTION: Node Identifiers
// ============================================================================

/// Compiled node id for the router.
pub const ROUTER_NODE: &str = "router";
/// Compiled node id for the context builder.
pub const CONTEXT_BUILDER_NODE: &str = "context_builder";
/// Compiled node id for the tool call.
pub const TOOL_CALL_NODE: &str = "tool_call";
/// Compiled node id for the LLM worker.
pub const LLM_WORKER_NODE: &str = "llm_worker";
/// Compiled node id for the validator.
pub const VALIDATOR_NODE: &str = "validator";

// ============================================================================
// SECTION: Compiler
// ============================================================================

/// Deterministic plan compiler.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanCompiler;

impl PlanCompiler {
    /// Creates a compiler.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Compiles a plan into a workflow graph.
    #[must_use]
    pub fn compile(&self, intent: Intent, has_tool_call: bool) -> WorkflowGraph {
        let mut chain: Vec<(&str, NodeType)> = vec![
            (ROUTER_NODE, NodeType::Router),
            (CONTEXT_BUILDER_NODE, NodeType::ContextBuilder),
        ];
        if has_tool_call {
            chain.push((TOOL_CALL_NODE, NodeType::ToolCall));
        }
        chain.push((LLM_WORKER_NODE, NodeType::LlmWorker));
        chain.push((VALIDATOR_NODE, NodeType::Validator));

        let mut nodes = Vec::with_capacity(chain.len());
        let mut edges = Vec::with_capacity(chain.len().saturating_sub(1));
        for (index, (id, node_type)) in chain.iter().enumerate() {
            let mut inputs = BTreeSet::new();
            if index > 0 {
                inputs.insert(NodeId::new(chain[index - 1].0));
                edges.push((NodeId::new(chain[index - 1].0), NodeId::new(*id)));
            }
            let params = if *node_type == NodeType::LlmWorker {
                json!({ "intent": intent.as_str() })
            } else {
                json!({})
            };
            nodes.push(NodeSpec {
                id: NodeId::new(*id),
                node_type: *node_type,
                inputs,
                params,
            });
        }

        WorkflowGraph {
            nodes,
            edges,
            entry: NodeId::new(ROUTER_NODE),
        }
    }
}
