// crates/task-helm-core/tests/nodes.rs
// ============================================================================
// Module: Workflow Node Unit Tests
// Description: Router rules, LLM post-processing, context assembly, validation.
// Purpose: Validate each node's contract in isolation.
// ============================================================================

//! ## Overview
//! Unit tests for the workflow nodes:
//! - Router keyword rules and their fixed precedence
//! - LLM worker stop-token stripping and the name-recall normalization
//! - Context builder transcript loading and retrieved-context insertion
//! - Validator gate criteria and its validation records

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use std::sync::Arc;

use serde_json::Value;
use serde_json::json;
use task_helm_core::Clock;
use task_helm_core::FixedClock;
use task_helm_core::InMemoryEpisodicStore;
use task_helm_core::InMemoryWorkingStateStore;
use task_helm_core::MemoryManager;
use task_helm_core::Role;
use task_helm_core::TaskId;
use task_helm_core::Timestamp;
use task_helm_core::TranscriptMessage;
use task_helm_core::WorkingState;
use task_helm_core::interfaces::EpisodicStore;
use task_helm_core::interfaces::WorkingStateStore;
use task_helm_core::runtime::ContextBuilderNode;
use task_helm_core::runtime::Intent;
use task_helm_core::runtime::LlmWorkerNode;
use task_helm_core::runtime::NodeContext;
use task_helm_core::runtime::RouterNode;
use task_helm_core::runtime::ValidatorConfig;
use task_helm_core::runtime::ValidatorNode;
use task_helm_core::runtime::WorkflowNode;
use task_helm_core::runtime::ctx_keys;

struct NodeSetup {
    memory: Arc<MemoryManager>,
    episodic: Arc<InMemoryEpisodicStore>,
    task_id: TaskId,
}

fn node_setup() -> NodeSetup {
    let clock =
        Arc::new(FixedClock::new(Timestamp::from_unix_millis(common::TEST_EPOCH_MS)));
    let episodic = Arc::new(InMemoryEpisodicStore::new());
    let working = Arc::new(InMemoryWorkingStateStore::new());
    let memory = Arc::new(MemoryManager::new(
        Arc::clone(&episodic) as Arc<dyn EpisodicStore>,
        Arc::clone(&working) as Arc<dyn WorkingStateStore>,
        None,
        Arc::clone(&clock) as Arc<dyn Clock>,
    ));
    let task_id = TaskId::new("task-node000aa");
    let doc = WorkingState::new(task_id.clone(), "node tests", clock.now());
    memory.working().save(&doc).expect("seed doc");
    NodeSetup {
        memory,
        episodic,
        task_id,
    }
}

fn context_for(setup: &NodeSetup, user_input: &str) -> NodeContext {
    let mut context = NodeContext::new();
    context.set(ctx_keys::USER_INPUT, Value::String(user_input.to_string()));
    context.set(ctx_keys::TASK_ID, Value::String(setup.task_id.to_string()));
    context.set(ctx_keys::TURN, Value::from(1_u64));
    context
}

// ============================================================================
// SECTION: Router
// ============================================================================

#[test]
fn router_classifies_by_keyword_rules() {
    assert_eq!(RouterNode::classify("please debug this function"), Intent::Code);
    assert_eq!(RouterNode::classify("list the files in my folder"), Intent::FileOps);
    assert_eq!(RouterNode::classify("search for the latest news"), Intent::Research);
    assert_eq!(RouterNode::classify("how are you today"), Intent::Chat);
}

#[test]
fn router_precedence_is_code_then_file_ops_then_research() {
    // "script" (code) beats "file" (file_ops) beats "search" (research).
    assert_eq!(RouterNode::classify("write a script to search my files"), Intent::Code);
    assert_eq!(RouterNode::classify("search inside that folder"), Intent::FileOps);
}

#[test]
fn router_is_case_insensitive_and_word_bounded() {
    assert_eq!(RouterNode::classify("DEBUG the thing"), Intent::Code);
    // "filesystem" is not the word "file".
    assert_eq!(RouterNode::classify("the filesystem is fine"), Intent::Chat);
}

#[test]
fn router_writes_intent_into_context() {
    let setup = node_setup();
    let mut context = context_for(&setup, "implement a parser");
    RouterNode::new().execute(&mut context).expect("router");
    assert_eq!(context.get_str(ctx_keys::INTENT), Some("code"));
}

#[test]
fn router_without_input_fails_validation() {
    let mut context = NodeContext::new();
    let error = RouterNode::new().execute(&mut context).expect_err("no input");
    assert_eq!(error.code, "validation_error");
}

// ============================================================================
// SECTION: LLM Worker
// ============================================================================

fn worker(setup: &NodeSetup, reply: &str) -> LlmWorkerNode {
    LlmWorkerNode::new(Arc::new(common::StubLlm::always(reply)), Arc::clone(&setup.memory))
}

#[test]
fn postprocess_cuts_at_first_stop_token() {
    let setup = node_setup();
    let node = worker(&setup, "unused");
    assert_eq!(node.postprocess("Paris\nUser: next question"), "Paris");
    assert_eq!(node.postprocess("Paris<|eot_id|>garbage"), "Paris");
    assert_eq!(node.postprocess("  Paris  "), "Paris");
}

#[test]
fn postprocess_normalizes_name_recall_on_first_line() {
    let setup = node_setup();
    let node = worker(&setup, "unused");
    assert_eq!(node.postprocess("My name is Alice."), "Alice");
    assert_eq!(node.postprocess("the name is Bob"), "Bob");
    // The rule only watches the first non-empty line.
    assert_eq!(
        node.postprocess("Certainly.\nYour name is Carol."),
        "Certainly.\nYour name is Carol."
    );
    // No "name is" phrase: untouched.
    assert_eq!(node.postprocess("The capital is Paris."), "The capital is Paris.");
}

#[test]
fn worker_emits_assistant_message_and_output() {
    let setup = node_setup();
    setup
        .memory
        .append_message(&setup.task_id, Role::User, "what is the capital")
        .expect("seed");
    let node = worker(&setup, "Paris");
    let mut context = context_for(&setup, "what is the capital");
    node.execute(&mut context).expect("worker");
    assert_eq!(context.get_str(ctx_keys::LLM_OUTPUT), Some("Paris"));

    let messages = setup
        .memory
        .working()
        .list_recent_messages(&setup.task_id, 10)
        .expect("messages");
    let last = messages.last().expect("assistant reply persisted");
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.content, "Paris");
}

#[test]
fn unavailable_model_is_a_node_error() {
    let setup = node_setup();
    let node = LlmWorkerNode::new(
        Arc::new(common::StubLlm::unavailable()),
        Arc::clone(&setup.memory),
    );
    let mut context = context_for(&setup, "anything");
    let error = node.execute(&mut context).expect_err("model offline");
    assert_eq!(error.code, "execution_error");
}

// ============================================================================
// SECTION: Context Builder
// ============================================================================

#[test]
fn context_builder_loads_recent_messages() {
    let setup = node_setup();
    setup.memory.append_message(&setup.task_id, Role::User, "first").expect("seed");
    setup.memory.append_message(&setup.task_id, Role::Assistant, "second").expect("seed");
    let node = ContextBuilderNode::new(Arc::clone(&setup.memory), None, None);
    let mut context = context_for(&setup, "first question");
    node.execute(&mut context).expect("builder");

    let messages: Vec<TranscriptMessage> =
        serde_json::from_value(context.get(ctx_keys::MESSAGES).cloned().expect("messages"))
            .expect("decode");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "first");
}

#[test]
fn missing_retriever_leaves_context_unchanged() {
    let setup = node_setup();
    setup.memory.append_message(&setup.task_id, Role::User, "hello").expect("seed");
    let node = ContextBuilderNode::new(Arc::clone(&setup.memory), None, None);
    let mut context = context_for(&setup, "hello");
    node.execute(&mut context).expect("builder");
    let messages: Vec<TranscriptMessage> =
        serde_json::from_value(context.get(ctx_keys::MESSAGES).cloned().expect("messages"))
            .expect("decode");
    assert!(
        messages.iter().all(|message| message.role != Role::System),
        "no retrieved-context insertion without a retriever"
    );
}

// ============================================================================
// SECTION: Validator
// ============================================================================

fn validated_context(setup: &NodeSetup, output: &str) -> NodeContext {
    let mut context = context_for(setup, "question");
    context.set(ctx_keys::LLM_OUTPUT, Value::String(output.to_string()));
    context
}

#[test]
fn validator_accepts_clean_output_and_records() {
    let setup = node_setup();
    let node = ValidatorNode::new(ValidatorConfig::default(), Arc::clone(&setup.memory));
    let mut context = validated_context(&setup, "A perfectly fine answer.");
    node.execute(&mut context).expect("valid");

    let validations = setup.episodic.validations();
    assert_eq!(validations.len(), 1);
    assert!(validations[0].passed);
}

#[test]
fn validator_rejects_empty_output() {
    let setup = node_setup();
    let node = ValidatorNode::new(ValidatorConfig::default(), Arc::clone(&setup.memory));
    let mut context = validated_context(&setup, "   ");
    let error = node.execute(&mut context).expect_err("empty");
    assert_eq!(error.code, "validation_error");
    assert!(!setup.episodic.validations()[0].passed);
}

#[test]
fn validator_rejects_oversized_output() {
    let setup = node_setup();
    let config = ValidatorConfig {
        max_output_chars: 8,
        ..ValidatorConfig::default()
    };
    let node = ValidatorNode::new(config, Arc::clone(&setup.memory));
    let mut context = validated_context(&setup, "far too long for the cap");
    let error = node.execute(&mut context).expect_err("oversized");
    assert_eq!(error.code, "validation_error");
}

#[test]
fn validator_rejects_surfaced_stop_tokens() {
    let setup = node_setup();
    let node = ValidatorNode::new(ValidatorConfig::default(), Arc::clone(&setup.memory));
    let mut context = validated_context(&setup, "Answer\nUser: leaked turn");
    let error = node.execute(&mut context).expect_err("forbidden token");
    assert_eq!(error.code, "validation_error");
}

#[test]
fn validator_config_defaults_are_sensible() {
    let config = ValidatorConfig::default();
    assert_eq!(config.max_output_chars, 4_000);
    assert!(config.forbidden_tokens.iter().any(|token| token == "Instruction:"));
    assert!(config.forbidden_tokens.iter().any(|token| token == "User:"));
}

#[test]
fn context_builder_inserts_retrieved_context_after_system_message() {
    let setup = node_setup();
    // Seed a transcript that already carries a system message first.
    let mut doc =
        setup.memory.working().load(&setup.task_id).expect("load").expect("doc");
    doc.push_message(Role::System, "You are helpful.", 50);
    doc.push_message(Role::User, "what is the answer", 50);
    setup.memory.working().save(&doc).expect("save");

    // Build a retriever over a semantic store holding an exact match.
    let clock =
        Arc::new(FixedClock::new(Timestamp::from_unix_millis(common::TEST_EPOCH_MS)));
    let scratch = tempfile::tempdir().expect("scratch").keep();
    let semantic = Arc::new(task_helm_core::SemanticStore::new(
        Arc::new(common::StubEmbedder),
        Box::new(task_helm_core::FlatVectorIndex::new()),
        Arc::new(task_helm_core::InMemorySemanticMetadata::new()),
        scratch.join("index.ann"),
    ));
    semantic
        .add("what is the answer", json!({ "timestamp": common::TEST_EPOCH_MS }))
        .expect("seed semantic");
    let memory = Arc::new(MemoryManager::new(
        Arc::clone(setup.memory.episodic()),
        Arc::clone(setup.memory.working()),
        Some(semantic),
        Arc::clone(&clock) as Arc<dyn Clock>,
    ));
    let retriever = Arc::new(task_helm_core::HybridRetriever::new(
        Arc::clone(&memory),
        task_helm_core::RetrievalConfig::default(),
        Arc::clone(&clock) as Arc<dyn Clock>,
    ));

    let node = ContextBuilderNode::new(memory, None, Some(retriever));
    let mut context = context_for(&setup, "what is the answer");
    node.execute(&mut context).expect("builder");

    let messages: Vec<TranscriptMessage> =
        serde_json::from_value(context.get(ctx_keys::MESSAGES).cloned().expect("messages"))
            .expect("decode");
    assert_eq!(messages[0].content, "You are helpful.");
    assert_eq!(messages[1].role, Role::System);
    assert!(messages[1].content.starts_with("Retrieved Context:"));
    assert!(messages[1].content.contains("[semantic] score="));
    assert_eq!(messages[2].content, "what is the answer");
}
