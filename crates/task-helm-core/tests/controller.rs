// crates/task-helm-core/tests/controller.rs
// ============================================================================
// Module: Controller End-To-End Tests
// Description: Full lifecycle runs against stubbed capabilities.
// Purpose: Validate the FSM contract, trace determinism, and failure paths.
// ============================================================================

//! ## Overview
//! End-to-end tests for the controller:
//! - Round-trip recall across two turns of one task
//! - Exactly one decision row per FSM transition, plus node rows
//! - Canonical graph and trace determinism across identical runs
//! - Latency baseline tolerance between identical runs
//! - Archived records are immutable across later turns
//! - Node failures (including an offline model) drive FAILED with the
//!   failing node and code in the last decision row
//! - Deadlines fail with `deadline_exceeded`

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use task_helm_core::ActionType;
use task_helm_core::ArchiveDocument;
use task_helm_core::EpisodicStore;
use task_helm_core::RunRequest;
use task_helm_core::TaskState;
use task_helm_core::ToolName;
use task_helm_core::ToolRequest;
use task_helm_core::canonical_trace;
use task_helm_core::core::task::TraceEventType;

use common::StubLlm;
use common::fixture_with_llm;
use common::fixture_with_retrieval;

#[test]
fn round_trip_recall_returns_only_the_name() {
    let fixture = fixture_with_llm(Arc::new(StubLlm::always("My name is Alice.")));

    let first = fixture
        .controller
        .run(&RunRequest::new("My name is Alice."))
        .expect("first turn");
    assert_eq!(first.final_state, TaskState::Archive);
    let task_id = first.task_id.clone();

    let second = fixture
        .controller
        .run(
            &RunRequest::new("What is my name? Reply with only the name.")
                .with_task_id(task_id.clone()),
        )
        .expect("second turn");
    assert_eq!(second.task_id, task_id, "same task resumed");
    assert_eq!(second.final_state, TaskState::Archive);
    assert_eq!(second.llm_output, "Alice", "name normalization yields the bare name");
}

#[test]
fn transcript_accumulates_across_turns() {
    let fixture = fixture_with_llm(Arc::new(StubLlm::always("Hello!")));
    let first = fixture.controller.run(&RunRequest::new("hi there")).expect("turn 1");
    let second = fixture
        .controller
        .run(&RunRequest::new("hi again").with_task_id(first.task_id.clone()))
        .expect("turn 2");
    assert_eq!(second.task_id, first.task_id);

    let messages = fixture
        .memory
        .working()
        .list_recent_messages(&first.task_id, 10)
        .expect("messages");
    let contents: Vec<&str> =
        messages.iter().map(|message| message.content.as_str()).collect();
    assert_eq!(contents, ["hi there", "Hello!", "hi again", "Hello!"]);
}

#[test]
fn every_transition_appends_exactly_one_decision_row() {
    let fixture = fixture_with_llm(Arc::new(StubLlm::always("fine")));
    let report = fixture.controller.run(&RunRequest::new("say something")).expect("run");
    assert_eq!(report.final_state, TaskState::Archive);

    let decisions = fixture
        .episodic
        .recent_decisions(&report.task_id, 100)
        .expect("decisions");
    // Transitions: PLAN, EXECUTE, VALIDATE, COMMIT, ARCHIVE.
    let plan = decisions.iter().filter(|row| row.action_type == ActionType::Plan).count();
    let validate =
        decisions.iter().filter(|row| row.action_type == ActionType::Validate).count();
    let archive =
        decisions.iter().filter(|row| row.action_type == ActionType::Archive).count();
    assert_eq!(plan, 1, "INIT->PLAN");
    assert_eq!(validate, 2, "EXECUTE->VALIDATE and VALIDATE->COMMIT");
    assert_eq!(archive, 1, "COMMIT->ARCHIVE");

    // Node rows: start and end for router, context_builder, llm_worker,
    // validator, plus the PLAN->EXECUTE transition row.
    let node_rows =
        decisions.iter().filter(|row| row.action_type == ActionType::Node).count();
    assert_eq!(node_rows, 9);

    // Ids are monotone and equal temporal order (newest first here).
    let ids: Vec<i64> = decisions.iter().map(|row| row.id).collect();
    let mut sorted = ids.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(ids, sorted);
}

#[test]
fn canonical_trace_and_graph_are_deterministic() {
    let fixture_a = fixture_with_llm(Arc::new(StubLlm::always("two")));
    let fixture_b = fixture_with_llm(Arc::new(StubLlm::always("two")));

    let first = fixture_a.controller.run(&RunRequest::new("one-plus-one")).expect("run a");
    let second = fixture_b.controller.run(&RunRequest::new("one-plus-one")).expect("run b");

    assert_eq!(first.canonical_graph, second.canonical_graph);
    assert_eq!(canonical_trace(&first.trace), canonical_trace(&second.trace));

    // Latency tolerance: |e1 - e2| <= max(2ms, 10% of the larger run).
    let latency = |report: &task_helm_core::RunReport| {
        report
            .trace
            .last()
            .filter(|event| event.event_type == TraceEventType::LatencyBaseline)
            .map(|event| event.elapsed_ns)
            .expect("latency baseline entry")
    };
    let (a, b) = (latency(&first), latency(&second));
    let drift = a.abs_diff(b);
    let bound = 2_000_000_u64.max(a.max(b) / 10);
    assert!(drift <= bound, "latency drift {drift}ns exceeds {bound}ns");
}

#[test]
fn trace_ends_with_latency_baseline() {
    let fixture = fixture_with_llm(Arc::new(StubLlm::always("ok")));
    let report = fixture.controller.run(&RunRequest::new("hello")).expect("run");
    let last = report.trace.last().expect("non-empty trace");
    assert_eq!(last.event_type, TraceEventType::LatencyBaseline);
    assert!(last.elapsed_ns > 0);
}

#[test]
fn archived_snapshots_are_immutable_across_turns() {
    let fixture = fixture_with_llm(Arc::new(StubLlm::always("noted")));
    let first = fixture.controller.run(&RunRequest::new("remember this")).expect("turn 1");
    let archive_path =
        fixture.archive_dir.path().join(format!("{}.json", first.task_id.as_str()));
    let initial: ArchiveDocument =
        serde_json::from_str(&fs::read_to_string(&archive_path).expect("archive"))
            .expect("decode");
    assert_eq!(initial.snapshots.len(), 1);

    let _ = fixture
        .controller
        .run(&RunRequest::new("second turn").with_task_id(first.task_id.clone()))
        .expect("turn 2");
    let grown: ArchiveDocument =
        serde_json::from_str(&fs::read_to_string(&archive_path).expect("archive"))
            .expect("decode");
    assert_eq!(grown.snapshots.len(), 2, "new turn appends a snapshot");
    assert_eq!(grown.snapshots[0], initial.snapshots[0], "turn-1 record never mutates");
}

#[test]
fn unknown_supplied_task_id_creates_that_task() {
    let fixture = fixture_with_llm(Arc::new(StubLlm::always("ok")));
    let wanted = task_helm_core::TaskId::new("task-feedbeef00");
    let report = fixture
        .controller
        .run(&RunRequest::new("hello").with_task_id(wanted.clone()))
        .expect("run");
    assert_eq!(report.task_id, wanted);
    assert_eq!(report.final_state, TaskState::Archive);
}

#[test]
fn offline_model_fails_the_task_with_the_failing_node() {
    let fixture = fixture_with_llm(Arc::new(StubLlm::unavailable()));
    let report = fixture.controller.run(&RunRequest::new("anything")).expect("run");
    assert_eq!(report.final_state, TaskState::Failed);
    assert_eq!(report.error_code.as_deref(), Some("execution_error"));
    assert!(report.llm_output.is_empty());

    let decisions = fixture
        .episodic
        .recent_decisions(&report.task_id, 100)
        .expect("decisions");
    let last = decisions.first().expect("rows exist");
    assert_eq!(last.action_type, ActionType::Error);
    assert!(last.content.contains("node=llm_worker"));
    assert!(last.content.contains("code=execution_error"));

    let archive_path =
        fixture.archive_dir.path().join(format!("{}.json", report.task_id.as_str()));
    assert!(!archive_path.exists(), "failed runs never archive");
}

#[test]
fn validator_failure_reaches_failed_through_validate() {
    // Empty model output violates the validator contract.
    let fixture = fixture_with_llm(Arc::new(StubLlm::always("")));
    let report = fixture.controller.run(&RunRequest::new("anything")).expect("run");
    assert_eq!(report.final_state, TaskState::Failed);
    assert_eq!(report.error_code.as_deref(), Some("validation_error"));

    let decisions = fixture
        .episodic
        .recent_decisions(&report.task_id, 100)
        .expect("decisions");
    assert!(
        decisions
            .iter()
            .any(|row| row.action_type == ActionType::Validate),
        "EXECUTE->VALIDATE was entered before failing"
    );
}

#[test]
fn tool_call_run_records_tool_rows() {
    let fixture = fixture_with_llm(Arc::new(StubLlm::always("done")));
    fs::write(fixture.sandbox_root.join("notes.txt"), "sandbox payload").expect("seed");
    let request = RunRequest::new("read my file for me").with_tool_call(ToolRequest {
        tool_name: ToolName::new("read_file"),
        payload: json!({ "path": "notes.txt" }),
        external: false,
    });
    let report = fixture.controller.run(&request).expect("run");
    assert_eq!(report.final_state, TaskState::Archive);

    let calls = fixture
        .episodic
        .search_tool_calls("read_file", Some(&report.task_id), 10)
        .expect("tool rows");
    assert_eq!(calls.len(), 1, "one tool_call row per invocation");
    assert!(calls[0].result.contains("sandbox payload"));

    let tool_decisions = fixture
        .episodic
        .recent_decisions(&report.task_id, 100)
        .expect("decisions")
        .into_iter()
        .filter(|row| row.action_type == ActionType::Tool)
        .count();
    assert_eq!(tool_decisions, 1, "tool row has its owning decision");
}

#[test]
fn gated_tool_call_fails_the_task() {
    let fixture = fixture_with_llm(Arc::new(StubLlm::always("done")));
    let request = RunRequest::new("write my file").with_tool_call(ToolRequest {
        tool_name: ToolName::new("write_file"),
        payload: json!({ "path": "out.txt", "content": "x" }),
        external: false,
    });
    let report = fixture.controller.run(&request).expect("run");
    assert_eq!(report.final_state, TaskState::Failed);
    assert_eq!(report.error_code.as_deref(), Some("permission_denied"));
}

#[test]
fn deadline_exceeded_fails_the_task() {
    let fixture = fixture_with_llm(Arc::new(StubLlm::always("slow")));
    let request = RunRequest::new("anything").with_deadline(Duration::ZERO);
    let report = fixture.controller.run(&request).expect("run");
    assert_eq!(report.final_state, TaskState::Failed);
    assert_eq!(report.error_code.as_deref(), Some("deadline_exceeded"));
}

#[test]
fn empty_input_is_rejected() {
    let fixture = fixture_with_llm(Arc::new(StubLlm::always("x")));
    let error = fixture.controller.run(&RunRequest::new("   ")).expect_err("empty");
    assert_eq!(error.code(), "invalid_argument");
}

#[test]
fn health_reports_ok_components() {
    let fixture = fixture_with_retrieval(Arc::new(StubLlm::always("x")));
    let health = fixture.controller.health();
    assert_eq!(health.status, task_helm_core::HealthStatus::Ok);
    for name in ["llm", "cache", "semantic", "episodic"] {
        assert!(health.components.contains_key(name), "missing component {name}");
    }
}

#[test]
fn retrieval_feeds_the_prompt_on_later_turns() {
    let llm = Arc::new(StubLlm::always("42"));
    let fixture = fixture_with_retrieval(Arc::clone(&llm) as Arc<dyn task_helm_core::LanguageModel>);
    fixture
        .semantic
        .as_ref()
        .expect("semantic store")
        .add(
            "the answer to everything is 42",
            json!({ "timestamp": common::TEST_EPOCH_MS }),
        )
        .expect("seed semantic");

    let report = fixture
        .controller
        .run(&RunRequest::new("the answer to everything is 42"))
        .expect("run");
    assert_eq!(report.final_state, TaskState::Archive);

    let prompts = llm.prompts.lock().expect("prompts");
    let prompt = prompts.first().expect("one generate call");
    assert!(
        prompt.contains("Retrieved Context:"),
        "retrieved context reaches the prompt: {prompt}"
    );
    assert!(prompt.contains("[semantic] score="));
}

#[test]
fn canonical_trace_strips_volatile_fields() {
    let fixture = fixture_with_llm(Arc::new(StubLlm::always("ok")));
    let report = fixture.controller.run(&RunRequest::new("hello")).expect("run");
    let canonical = canonical_trace(&report.trace);
    assert_eq!(canonical.len(), report.trace.len());
    let encoded = serde_json::to_string(&canonical).expect("encode");
    assert!(!encoded.contains("elapsed_ns"));
    assert!(!encoded.contains("start_offset_ns"));
    assert!(!encoded.contains(report.task_id.as_str()));
}
