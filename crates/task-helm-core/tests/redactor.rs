// crates/task-helm-core/tests/redactor.rs
// ============================================================================
// Module: PII Redactor Unit Tests
// Description: Detector coverage, modes, and the closure law.
// Purpose: Validate every detector and the redact-twice guarantee.
// ============================================================================

//! ## Overview
//! Unit tests for the PII redactor:
//! - Each pattern detector fires on representative inputs
//! - Card candidates require a valid Luhn checksum
//! - Contextual detectors require their keyword
//! - Partial mode preserves email domains; strict mode is uniform
//! - Redaction is closed: redacting redacted text detects nothing

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

use task_helm_core::PiiRedactor;
use task_helm_core::PiiType;
use task_helm_core::RedactionMode;

fn redactor() -> PiiRedactor {
    PiiRedactor::new()
}

#[test]
fn detects_email() {
    let matches = redactor().detect("contact me at jane.doe+spam@example.co.uk thanks");
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].pii_type, PiiType::Email);
    assert_eq!(matches[0].matched, "jane.doe+spam@example.co.uk");
}

#[test]
fn detects_phone_and_ssn() {
    let matches = redactor().detect("call 555-867-5309 or fax (555) 867-5309; ssn 123-45-6789");
    let types: Vec<PiiType> = matches.iter().map(|m| m.pii_type).collect();
    assert!(types.contains(&PiiType::Phone));
    assert!(types.contains(&PiiType::Ssn));
}

#[test]
fn credit_card_requires_luhn() {
    // 4539 1488 0343 6467 passes Luhn; 4539 1488 0343 6468 does not.
    let valid = redactor().detect("card 4539 1488 0343 6467 on file");
    assert!(valid.iter().any(|m| m.pii_type == PiiType::CreditCard));

    let invalid = redactor().detect("card 4539 1488 0343 6468 on file");
    assert!(!invalid.iter().any(|m| m.pii_type == PiiType::CreditCard));
}

#[test]
fn ipv4_requires_valid_octets() {
    let valid = redactor().detect("server at 192.168.1.10 responded");
    assert!(valid.iter().any(|m| m.pii_type == PiiType::Ipv4));

    let invalid = redactor().detect("version 300.300.300.300 is not an address");
    assert!(!invalid.iter().any(|m| m.pii_type == PiiType::Ipv4));
}

#[test]
fn contextual_detectors_require_keyword() {
    let with_keyword = redactor().detect("api_key: sk_live_abcdef1234567890");
    assert!(with_keyword.iter().any(|m| m.pii_type == PiiType::ApiKey));

    let without_keyword = redactor().detect("value sk_live_abcdef1234567890 alone");
    assert!(without_keyword.is_empty(), "bare token without keyword is not PII");

    let password = redactor().detect("password = hunter2secret");
    assert!(password.iter().any(|m| m.pii_type == PiiType::Password));

    let bearer = redactor().detect("Authorization: Bearer abc123def456ghi789");
    assert!(bearer.iter().any(|m| m.pii_type == PiiType::BearerToken));
}

#[test]
fn detect_is_pure_and_offset_ordered() {
    let text = "a@b.io then 555-867-5309 then c@d.io";
    let first = redactor().detect(text);
    let second = redactor().detect(text);
    assert_eq!(first, second, "detection is deterministic");
    let offsets: Vec<usize> = first.iter().map(|m| m.start).collect();
    let mut sorted = offsets.clone();
    sorted.sort_unstable();
    assert_eq!(offsets, sorted, "matches ordered by offset");
}

#[test]
fn partial_mode_preserves_email_domain() {
    let outcome =
        redactor().redact("write to jane@example.com today", RedactionMode::Partial);
    assert!(outcome.pii_detected);
    assert_eq!(outcome.redacted, "write to [REDACTED_EMAIL]@example.com today");
    assert_eq!(outcome.original, "write to jane@example.com today");
}

#[test]
fn strict_mode_is_uniform() {
    let outcome = redactor().redact("write to jane@example.com today", RedactionMode::Strict);
    assert_eq!(outcome.redacted, "write to [REDACTED:EMAIL] today");
}

#[test]
fn multiple_matches_replace_rightmost_inward() {
    let outcome = redactor()
        .redact("a@b.io and c@d.io and 555-867-5309", RedactionMode::Strict);
    assert_eq!(
        outcome.redacted,
        "[REDACTED:EMAIL] and [REDACTED:EMAIL] and [REDACTED:PHONE]"
    );
    assert_eq!(outcome.matches.len(), 3);
}

#[test]
fn redaction_is_closed_partial() {
    let noisy = "email jane@example.com password: s3cret! card 4539 1488 0343 6467 \
                 ip 10.0.0.1 Bearer abcdef123456789";
    let first = redactor().redact(noisy, RedactionMode::Partial);
    let second = redactor().redact(&first.redacted, RedactionMode::Partial);
    assert!(!second.pii_detected, "second pass found: {:?}", second.matches);
}

#[test]
fn redaction_is_closed_strict() {
    let noisy = "email jane@example.com ssn 123-45-6789 api-key: abcd1234efgh5678";
    let first = redactor().redact(noisy, RedactionMode::Strict);
    let second = redactor().redact(&first.redacted, RedactionMode::Strict);
    assert!(!second.pii_detected, "second pass found: {:?}", second.matches);
}

#[test]
fn detected_types_are_sorted_and_deduped() {
    let types = redactor().detected_types("a@b.io c@d.io ssn 123-45-6789");
    assert_eq!(types, ["email", "ssn"]);
}

#[test]
fn clean_text_yields_no_matches() {
    let outcome = redactor().redact("nothing sensitive here at all", RedactionMode::Strict);
    assert!(!outcome.pii_detected);
    assert_eq!(outcome.redacted, outcome.original);
}
