// crates/task-helm-core/tests/fsm.rs
// ============================================================================
// Module: Task FSM Unit Tests
// Description: Lifecycle transition table and transcript bounds.
// Purpose: Validate terminal-state closure, illegal transitions, and the
//          ring-capped transcript.
// ============================================================================

//! ## Overview
//! Unit tests for the task state machine:
//! - Legal transition table, including any-non-terminal to FAILED
//! - Terminal states admit no successor
//! - Illegal transitions surface `invalid_transition`
//! - Transcript ring cap drops oldest first
//! - New turns on terminal tasks keep the transcript

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

use task_helm_core::Role;
use task_helm_core::Task;
use task_helm_core::TaskId;
use task_helm_core::TaskState;
use task_helm_core::Timestamp;

fn sample_task() -> Task {
    Task::new(TaskId::new("task-00000000aa"), "say hello", Timestamp::from_unix_millis(0))
}

#[test]
fn happy_path_transitions_are_legal() {
    let order = [
        TaskState::Plan,
        TaskState::Execute,
        TaskState::Validate,
        TaskState::Commit,
        TaskState::Archive,
    ];
    let mut task = sample_task();
    for next in order {
        task.transition(next).expect("legal transition");
    }
    assert_eq!(task.state, TaskState::Archive);
}

#[test]
fn every_non_terminal_state_may_fail() {
    for from in [
        TaskState::Init,
        TaskState::Plan,
        TaskState::Execute,
        TaskState::Validate,
        TaskState::Commit,
    ] {
        assert!(from.can_transition(TaskState::Failed), "{from:?} must be able to fail");
    }
}

#[test]
fn terminal_states_admit_no_successor() {
    for terminal in [TaskState::Archive, TaskState::Failed] {
        for to in [
            TaskState::Init,
            TaskState::Plan,
            TaskState::Execute,
            TaskState::Validate,
            TaskState::Commit,
            TaskState::Archive,
            TaskState::Failed,
        ] {
            assert!(!terminal.can_transition(to), "{terminal:?} -> {to:?} must be illegal");
        }
    }
}

#[test]
fn illegal_transition_reports_stable_code() {
    let mut task = sample_task();
    let error = task.transition(TaskState::Commit).expect_err("INIT->COMMIT is illegal");
    assert_eq!(error.code(), "invalid_transition");
    assert_eq!(task.state, TaskState::Init, "state unchanged after rejection");
}

#[test]
fn skipping_a_stage_is_illegal() {
    let mut task = sample_task();
    task.transition(TaskState::Plan).expect("legal");
    let error = task.transition(TaskState::Validate).expect_err("PLAN->VALIDATE is illegal");
    assert_eq!(error.code(), "invalid_transition");
}

#[test]
fn transcript_ring_cap_drops_oldest_first() {
    let mut task = sample_task();
    task.transcript_cap = 3;
    for index in 0..5 {
        task.push_message(Role::User, format!("message {index}"));
    }
    let contents: Vec<&str> =
        task.transcript.iter().map(|message| message.content.as_str()).collect();
    assert_eq!(contents, ["message 2", "message 3", "message 4"]);
}

#[test]
fn next_turn_resets_state_and_keeps_transcript() {
    let mut task = sample_task();
    task.push_message(Role::User, "hello");
    task.push_message(Role::Assistant, "hi");
    task.transition(TaskState::Plan).expect("legal");
    task.transition(TaskState::Failed).expect("legal");

    task.begin_next_turn();
    assert_eq!(task.state, TaskState::Init);
    assert_eq!(task.turn, 2);
    assert_eq!(task.transcript.len(), 2, "transcript survives across turns");
    assert!(task.final_output.is_none());
}

#[test]
fn next_turn_is_noop_on_active_task() {
    let mut task = sample_task();
    task.transition(TaskState::Plan).expect("legal");
    task.begin_next_turn();
    assert_eq!(task.state, TaskState::Plan, "non-terminal task is untouched");
    assert_eq!(task.turn, 1);
}

#[test]
fn state_labels_are_wire_stable() {
    assert_eq!(TaskState::Init.as_str(), "INIT");
    assert_eq!(TaskState::Plan.as_str(), "PLAN");
    assert_eq!(TaskState::Execute.as_str(), "EXECUTE");
    assert_eq!(TaskState::Validate.as_str(), "VALIDATE");
    assert_eq!(TaskState::Commit.as_str(), "COMMIT");
    assert_eq!(TaskState::Archive.as_str(), "ARCHIVE");
    assert_eq!(TaskState::Failed.as_str(), "FAILED");
}
