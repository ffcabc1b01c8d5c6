// crates/task-helm-core/tests/hashing.rs
// ============================================================================
// Module: Canonical Hashing Unit Tests
// Description: RFC 8785 canonicalization and digest stability.
// Purpose: Validate canonical JSON determinism and round-trip law.
// ============================================================================

//! ## Overview
//! Unit tests for the hashing module:
//! - Canonical JSON is independent of map insertion order
//! - Known SHA-256 vectors hold
//! - Round-trip: parse(canonical(x)) == x
//! - Non-finite floats are rejected at the boundary

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

use serde_json::Value;
use serde_json::json;
use task_helm_core::DEFAULT_HASH_ALGORITHM;
use task_helm_core::canonical_json_bytes;
use task_helm_core::canonical_json_string;
use task_helm_core::content_hash_hex;
use task_helm_core::hash_bytes;
use task_helm_core::hash_canonical_json;

#[test]
fn canonical_json_sorts_keys() {
    let value = json!({ "zeta": 1, "alpha": { "nested_z": true, "nested_a": false } });
    let canonical = canonical_json_string(&value).expect("canonical");
    assert_eq!(canonical, r#"{"alpha":{"nested_a":false,"nested_z":true},"zeta":1}"#);
}

#[test]
fn canonical_hash_is_key_order_independent() {
    #[derive(serde::Serialize)]
    struct Forward {
        alpha: u32,
        beta: u32,
    }
    #[derive(serde::Serialize)]
    struct Backward {
        beta: u32,
        alpha: u32,
    }
    let lhs = hash_canonical_json(DEFAULT_HASH_ALGORITHM, &Forward { alpha: 1, beta: 2 })
        .expect("hash");
    let rhs = hash_canonical_json(DEFAULT_HASH_ALGORITHM, &Backward { beta: 2, alpha: 1 })
        .expect("hash");
    assert_eq!(lhs, rhs);
}

#[test]
fn empty_input_matches_known_sha256_vector() {
    let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, b"");
    assert_eq!(
        digest.value,
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}

#[test]
fn content_hash_is_lowercase_hex() {
    let hex = content_hash_hex("tie-break");
    assert_eq!(hex.len(), 64);
    assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

#[test]
fn round_trip_preserves_admissible_values() {
    let original = json!({
        "string": "text",
        "int": 42,
        "float": 0.5,
        "bool": true,
        "null": null,
        "list": [1, 2, 3],
        "nested": { "k": "v" }
    });
    let bytes = canonical_json_bytes(&original).expect("canonical");
    let parsed: Value = serde_json::from_slice(&bytes).expect("parse");
    assert_eq!(parsed, original);
}

#[test]
fn canonical_form_is_idempotent() {
    let value = json!({ "b": [{ "y": 1, "x": 2 }], "a": "text" });
    let once = canonical_json_string(&value).expect("canonical");
    let reparsed: Value = serde_json::from_str(&once).expect("parse");
    let twice = canonical_json_string(&reparsed).expect("canonical");
    assert_eq!(once, twice);
}
