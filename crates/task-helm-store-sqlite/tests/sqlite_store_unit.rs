// crates/task-helm-store-sqlite/tests/sqlite_store_unit.rs
// ============================================================================
// Module: SQLite Store Unit Tests
// Description: Append-only semantics, search ordering, and schema guards.
// Purpose: Validate the durable store against the episodic contract.
// ============================================================================

//! ## Overview
//! Unit tests for the `SQLite` stores:
//! - Appends return monotone ids; ordering equals temporal order
//! - Search is case-insensitive, wildcard-escaped, ordered newest first
//! - Empty queries reject with `invalid_argument`
//! - Tool-call search joins through the owning decision for task scoping
//! - Validation rows persist
//! - Schema version mismatches fail closed
//! - Semantic metadata rows round-trip with their vectors

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

use rusqlite::Connection;
use serde_json::json;
use task_helm_core::TaskId;
use task_helm_core::ToolName;
use task_helm_core::core::record::ActionType;
use task_helm_core::core::record::RecordStatus;
use task_helm_core::core::time::Timestamp;
use task_helm_core::interfaces::EpisodicStore;
use task_helm_core::interfaces::SemanticEntry;
use task_helm_core::interfaces::SemanticMetadataStore;
use task_helm_store_sqlite::SqliteEpisodicStore;
use task_helm_store_sqlite::SqliteSemanticMetadata;
use task_helm_store_sqlite::SqliteStoreConfig;
use task_helm_store_sqlite::SqliteStoreError;
use tempfile::TempDir;

fn store_in(dir: &TempDir) -> SqliteEpisodicStore {
    SqliteEpisodicStore::new(&SqliteStoreConfig::new(dir.path().join("trace.db")))
        .expect("open store")
}

fn stamp(offset_ms: i64) -> Timestamp {
    Timestamp::from_unix_millis(1_700_000_000_000 + offset_ms)
}

fn task(id: &str) -> TaskId {
    TaskId::new(id)
}

#[test]
fn appends_return_monotone_ids() {
    let dir = TempDir::new().expect("dir");
    let store = store_in(&dir);
    let task_id = task("task-0000000001");
    let mut previous = 0;
    for index in 0..5 {
        let id = store
            .append_decision(
                &task_id,
                ActionType::Node,
                &format!("step {index}"),
                RecordStatus::Ok,
                stamp(index),
            )
            .expect("append");
        assert!(id > previous, "ids are monotone");
        previous = id;
    }
}

#[test]
fn search_is_case_insensitive_and_newest_first() {
    let dir = TempDir::new().expect("dir");
    let store = store_in(&dir);
    let task_id = task("task-0000000002");
    for (index, content) in
        ["Compiled the Plan", "executed the plan", "unrelated row"].iter().enumerate()
    {
        store
            .append_decision(
                &task_id,
                ActionType::Plan,
                content,
                RecordStatus::Ok,
                stamp(i64::try_from(index).unwrap()),
            )
            .expect("append");
    }
    let found = store.search_decisions("PLAN", None, 20).expect("search");
    assert_eq!(found.len(), 2);
    assert!(found[0].id > found[1].id, "newest first");
    assert_eq!(found[0].content, "executed the plan");
}

#[test]
fn search_scopes_by_task_and_limits() {
    let dir = TempDir::new().expect("dir");
    let store = store_in(&dir);
    let mine = task("task-0000000003");
    let other = task("task-0000000004");
    for index in 0..4 {
        store
            .append_decision(&mine, ActionType::Node, "shared marker", RecordStatus::Ok, stamp(index))
            .expect("append");
    }
    store
        .append_decision(&other, ActionType::Node, "shared marker", RecordStatus::Ok, stamp(9))
        .expect("append");

    let scoped = store.search_decisions("marker", Some(&mine), 20).expect("search");
    assert_eq!(scoped.len(), 4);
    assert!(scoped.iter().all(|row| row.task_id == mine));

    let limited = store.search_decisions("marker", Some(&mine), 2).expect("search");
    assert_eq!(limited.len(), 2);
}

#[test]
fn empty_query_rejects_with_invalid_argument() {
    let dir = TempDir::new().expect("dir");
    let store = store_in(&dir);
    let error = store.search_decisions("   ", None, 20).expect_err("empty");
    assert_eq!(error.code(), "invalid_argument");
    let error = store.search_tool_calls("", None, 20).expect_err("empty");
    assert_eq!(error.code(), "invalid_argument");
}

#[test]
fn like_wildcards_are_escaped() {
    let dir = TempDir::new().expect("dir");
    let store = store_in(&dir);
    let task_id = task("task-0000000005");
    store
        .append_decision(&task_id, ActionType::Node, "100% literal", RecordStatus::Ok, stamp(0))
        .expect("append");
    store
        .append_decision(&task_id, ActionType::Node, "100x literal", RecordStatus::Ok, stamp(1))
        .expect("append");
    let found = store.search_decisions("100%", None, 20).expect("search");
    assert_eq!(found.len(), 1, "% must not act as a wildcard");
    assert_eq!(found[0].content, "100% literal");
}

#[test]
fn tool_calls_join_their_owning_decision() {
    let dir = TempDir::new().expect("dir");
    let store = store_in(&dir);
    let mine = task("task-0000000006");
    let other = task("task-0000000007");
    let my_decision = store
        .append_decision(&mine, ActionType::Tool, "tool=read_file", RecordStatus::Ok, stamp(0))
        .expect("decision");
    let other_decision = store
        .append_decision(&other, ActionType::Tool, "tool=read_file", RecordStatus::Ok, stamp(1))
        .expect("decision");

    store
        .append_tool_call(
            my_decision,
            &ToolName::new("read_file"),
            r#"{"path":"a.txt"}"#,
            r#"{"content":"alpha"}"#,
            stamp(2),
        )
        .expect("tool call");
    store
        .append_tool_call(
            other_decision,
            &ToolName::new("read_file"),
            r#"{"path":"b.txt"}"#,
            r#"{"content":"beta"}"#,
            stamp(3),
        )
        .expect("tool call");

    let scoped = store.search_tool_calls("read_file", Some(&mine), 20).expect("search");
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].decision_id, my_decision);

    let by_result = store.search_tool_calls("beta", None, 20).expect("search");
    assert_eq!(by_result.len(), 1);
    assert_eq!(by_result[0].decision_id, other_decision);
}

#[test]
fn validations_persist() {
    let dir = TempDir::new().expect("dir");
    let store = store_in(&dir);
    let task_id = task("task-0000000008");
    let id = store
        .append_validation(&task_id, None, true, "ok", stamp(0))
        .expect("validation");
    assert!(id >= 1);
}

#[test]
fn recent_decisions_are_task_scoped_newest_first() {
    let dir = TempDir::new().expect("dir");
    let store = store_in(&dir);
    let task_id = task("task-0000000009");
    for index in 0..3 {
        store
            .append_decision(
                &task_id,
                ActionType::Node,
                &format!("row {index}"),
                RecordStatus::Ok,
                stamp(index),
            )
            .expect("append");
    }
    let recent = store.recent_decisions(&task_id, 2).expect("recent");
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].content, "row 2");
    assert_eq!(recent[1].content, "row 1");
}

#[test]
fn timestamps_round_trip_with_rfc3339_column() {
    let dir = TempDir::new().expect("dir");
    let store = store_in(&dir);
    let task_id = task("task-000000000a");
    let when = stamp(123);
    store
        .append_decision(&task_id, ActionType::Archive, "archived", RecordStatus::Ok, when)
        .expect("append");
    let recent = store.recent_decisions(&task_id, 1).expect("recent");
    assert_eq!(recent[0].timestamp, when);

    // The stored text column is real RFC 3339.
    let connection =
        Connection::open(dir.path().join("trace.db")).expect("raw connection");
    let rendered: String = connection
        .query_row("SELECT timestamp_rfc3339 FROM decisions LIMIT 1", [], |row| row.get(0))
        .expect("column");
    assert_eq!(rendered, when.to_rfc3339().expect("render"));
}

#[test]
fn schema_version_mismatch_fails_closed() {
    let dir = TempDir::new().expect("dir");
    let path = dir.path().join("trace.db");
    {
        let connection = Connection::open(&path).expect("raw connection");
        connection.pragma_update(None, "user_version", 99).expect("stamp bogus version");
    }
    let error = SqliteEpisodicStore::new(&SqliteStoreConfig::new(&path))
        .map(|_| ())
        .expect_err("version mismatch");
    assert!(matches!(error, SqliteStoreError::VersionMismatch { found: 99, .. }));
}

#[test]
fn reopened_store_keeps_rows() {
    let dir = TempDir::new().expect("dir");
    let task_id = task("task-000000000b");
    {
        let store = store_in(&dir);
        store
            .append_decision(&task_id, ActionType::Plan, "durable row", RecordStatus::Ok, stamp(0))
            .expect("append");
    }
    let store = store_in(&dir);
    let recent = store.recent_decisions(&task_id, 10).expect("recent");
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].content, "durable row");
}

#[test]
fn semantic_metadata_round_trips_vectors() {
    let dir = TempDir::new().expect("dir");
    let store =
        SqliteSemanticMetadata::new(&SqliteStoreConfig::new(dir.path().join("metadata.db")))
            .expect("open metadata");
    assert_eq!(store.next_vector_id().expect("fresh"), 1);

    let entry = SemanticEntry {
        vector_id: 1,
        text: "the answer is 42".to_string(),
        metadata: json!({ "timestamp": 1_700_000_000_000_i64 }),
        vector: vec![0.25, 0.5, 0.75],
    };
    store.insert(&entry).expect("insert");

    let loaded = store.get(1).expect("get").expect("present");
    assert_eq!(loaded, entry);
    assert_eq!(store.next_vector_id().expect("next"), 2);

    let all = store.all_entries().expect("all");
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].vector, vec![0.25, 0.5, 0.75]);
}
