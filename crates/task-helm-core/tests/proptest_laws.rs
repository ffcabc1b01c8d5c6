// crates/task-helm-core/tests/proptest_laws.rs
// ============================================================================
// Module: Property Tests
// Description: Redaction closure and cache-key determinism laws.
// Purpose: Exercise the laws over generated inputs, not just fixed cases.
// ============================================================================

//! ## Overview
//! Property tests for the two laws the determinism guarantees lean on
//! hardest:
//! - Redaction is closed: redacting already-redacted text detects nothing,
//!   for arbitrary surrounding text and mixtures of PII.
//! - Cache keys are deterministic and bounded: permuting key-part insertion
//!   order never changes the key, and emitted keys respect the length cap
//!   or carry the hashed form.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

use proptest::prelude::*;
use serde_json::Value;
use task_helm_core::PiiRedactor;
use task_helm_core::RedactionMode;
use task_helm_core::make_cache_key;
use task_helm_core::runtime::make_cache_key_with_limit;

/// PII fragments spliced into generated text.
fn pii_fragment() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("jane.doe@example.com".to_string()),
        Just("555-867-5309".to_string()),
        Just("123-45-6789".to_string()),
        Just("4539 1488 0343 6467".to_string()),
        Just("192.168.1.10".to_string()),
        Just("api_key: sk_live_0123456789abcdef".to_string()),
        Just("password: hunter2secret".to_string()),
        Just("Bearer abcdef1234567890".to_string()),
    ]
}

/// Benign filler text with no digits or keywords.
fn filler() -> impl Strategy<Value = String> {
    "[a-z ]{0,24}".prop_map(|text| text.replace("name", "naXe"))
}

proptest! {
    #[test]
    fn redaction_is_closed_over_generated_text(
        prefix in filler(),
        fragment in pii_fragment(),
        middle in filler(),
        fragment_two in pii_fragment(),
        suffix in filler(),
        strict in any::<bool>(),
    ) {
        let mode = if strict { RedactionMode::Strict } else { RedactionMode::Partial };
        let text = format!("{prefix} {fragment} {middle} {fragment_two} {suffix}");
        let redactor = PiiRedactor::new();
        let first = redactor.redact(&text, mode);
        let second = redactor.redact(&first.redacted, mode);
        prop_assert!(
            !second.pii_detected,
            "second pass found {:?} in {:?}",
            second.matches,
            first.redacted
        );
    }

    #[test]
    fn detection_is_deterministic(
        prefix in filler(),
        fragment in pii_fragment(),
        suffix in filler(),
    ) {
        let text = format!("{prefix} {fragment} {suffix}");
        let redactor = PiiRedactor::new();
        prop_assert_eq!(redactor.detect(&text), redactor.detect(&text));
    }

    #[test]
    fn cache_keys_ignore_insertion_order(
        keys in proptest::collection::btree_map("[a-z]{1,8}", 0_i64..1000, 1..6),
    ) {
        let forward: Value = keys
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(*v)))
            .collect::<serde_json::Map<String, Value>>()
            .into();
        let backward: Value = keys
            .iter()
            .rev()
            .map(|(k, v)| (k.clone(), Value::from(*v)))
            .collect::<serde_json::Map<String, Value>>()
            .into();
        let lhs = make_cache_key("p", &forward).expect("key");
        let rhs = make_cache_key("p", &backward).expect("key");
        prop_assert_eq!(lhs, rhs);
    }

    #[test]
    fn cache_keys_respect_the_length_cap(
        payload in "[a-zA-Z0-9]{0,400}",
        cap in 32_usize..320,
    ) {
        let parts = serde_json::json!({ "payload": payload });
        let key = make_cache_key_with_limit("tool", &parts, cap).expect("key");
        prop_assert!(
            key.len() <= cap || key.starts_with("tool:v1:h:"),
            "key {key:?} over cap {cap} without hashed form"
        );
    }
}
