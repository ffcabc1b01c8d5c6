// crates/task-helm-core/src/core/redact.rs
// ============================================================================
// Module: Task Helm PII Redactor
// Description: Pattern and context based PII detection and redaction.
// Purpose: Keep sensitive values out of external payloads and audit events.
// Dependencies: regex, serde
// ============================================================================

//! ## Overview
//! The redactor detects personally identifiable information with fixed
//! pattern detectors (email, North-American phone, SSN, Luhn-validated card
//! numbers, IPv4) plus contextual detectors (API key, password, bearer
//! token) that require a keyword adjacent to the value. Detection is pure
//! and deterministic; redaction replaces matches from the rightmost inward
//! so earlier offsets stay valid, and is closed: redacting already-redacted
//! text detects nothing.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Detector Patterns
// ============================================================================

/// Email address detector.
#[allow(clippy::unwrap_used, reason = "pattern is a compile-time constant")]
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap()
});

/// North-American phone number detector.
#[allow(clippy::unwrap_used, reason = "pattern is a compile-time constant")]
static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+1[-. ]?)?\(?\d{3}\)?[-. ]\d{3}[-. ]?\d{4}\b").unwrap()
});

/// US social security number detector.
#[allow(clippy::unwrap_used, reason = "pattern is a compile-time constant")]
static SSN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap()
});

/// Payment card candidate detector (prefix-shaped; Luhn-confirmed afterwards).
#[allow(clippy::unwrap_used, reason = "pattern is a compile-time constant")]
static CARD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:4\d{3}|5[1-5]\d{2}|3[47]\d{2}|6011)(?:[- ]?\d{4}){2}[- ]?\d{1,4}\b")
        .unwrap()
});

/// IPv4 address candidate detector (octet range confirmed afterwards).
#[allow(clippy::unwrap_used, reason = "pattern is a compile-time constant")]
static IPV4_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap()
});

/// Contextual API key detector; group 2 is the secret value.
#[allow(clippy::unwrap_used, reason = "pattern is a compile-time constant")]
static API_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(api[_ -]?key)\s*[:=]\s*([A-Za-z0-9_\-]{8,})").unwrap()
});

/// Contextual password detector; group 2 is the secret value.
#[allow(clippy::unwrap_used, reason = "pattern is a compile-time constant")]
static PASSWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(password|passwd|pwd)\s*[:=]\s*([^\s\[\]]+)").unwrap()
});

/// Contextual bearer token detector; group 2 is the secret value.
#[allow(clippy::unwrap_used, reason = "pattern is a compile-time constant")]
static BEARER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(bearer)\s+([A-Za-z0-9._\-]{8,})").unwrap()
});

// ============================================================================
// SECTION: Types
// ============================================================================

/// PII classification labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiType {
    /// Email address.
    Email,
    /// North-American phone number.
    Phone,
    /// US social security number.
    Ssn,
    /// Payment card number.
    CreditCard,
    /// IPv4 address.
    Ipv4,
    /// API key adjacent to an identifying keyword.
    ApiKey,
    /// Password adjacent to an identifying keyword.
    Password,
    /// Bearer token.
    BearerToken,
}

impl PiiType {
    /// Returns the wire label for this PII type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Ssn => "ssn",
            Self::CreditCard => "credit_card",
            Self::Ipv4 => "ipv4",
            Self::ApiKey => "api_key",
            Self::Password => "password",
            Self::BearerToken => "bearer_token",
        }
    }

    /// Returns the uppercase label used in redaction markers.
    #[must_use]
    pub const fn marker(self) -> &'static str {
        match self {
            Self::Email => "EMAIL",
            Self::Phone => "PHONE",
            Self::Ssn => "SSN",
            Self::CreditCard => "CREDIT_CARD",
            Self::Ipv4 => "IPV4",
            Self::ApiKey => "API_KEY",
            Self::Password => "PASSWORD",
            Self::BearerToken => "BEARER_TOKEN",
        }
    }
}

/// One detected PII span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiMatch {
    /// Classification of the span.
    pub pii_type: PiiType,
    /// Byte offset of the span start.
    pub start: usize,
    /// Byte offset one past the span end.
    pub end: usize,
    /// Matched text.
    pub matched: String,
}

/// Redaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionMode {
    /// Preserve non-identifying structure (email domains survive).
    Partial,
    /// Uniform `[REDACTED:TYPE]` markers.
    Strict,
}

/// Outcome of a redaction pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redaction {
    /// Input text, unchanged.
    pub original: String,
    /// Text with every detected span replaced.
    pub redacted: String,
    /// Detected spans, ordered by offset.
    pub matches: Vec<PiiMatch>,
    /// Whether any PII was detected.
    pub pii_detected: bool,
}

// ============================================================================
// SECTION: Redactor
// ============================================================================

/// Deterministic PII detector and redactor.
#[derive(Debug, Clone, Copy, Default)]
pub struct PiiRedactor;

impl PiiRedactor {
    /// Creates a redactor.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Detects PII spans in `text`.
    ///
    /// Detection is pure and deterministic: detectors run in a fixed order
    /// and overlapping spans resolve in favor of the earlier-registered
    /// detector, then the earlier offset.
    #[must_use]
    pub fn detect(&self, text: &str) -> Vec<PiiMatch> {
        let mut accepted: Vec<PiiMatch> = Vec::new();

        collect_full(&EMAIL_RE, PiiType::Email, text, &mut accepted, |_| true);
        collect_full(&SSN_RE, PiiType::Ssn, text, &mut accepted, |_| true);
        collect_full(&CARD_RE, PiiType::CreditCard, text, &mut accepted, luhn_valid);
        collect_full(&PHONE_RE, PiiType::Phone, text, &mut accepted, |_| true);
        collect_full(&IPV4_RE, PiiType::Ipv4, text, &mut accepted, ipv4_valid);
        collect_secret(&API_KEY_RE, PiiType::ApiKey, text, &mut accepted);
        collect_secret(&PASSWORD_RE, PiiType::Password, text, &mut accepted);
        collect_secret(&BEARER_RE, PiiType::BearerToken, text, &mut accepted);

        accepted.sort_by(|a, b| a.start.cmp(&b.start).then(a.end.cmp(&b.end)));
        accepted
    }

    /// Redacts PII in `text` under the given mode.
    ///
    /// Replacement proceeds from the rightmost match inward so byte offsets
    /// of earlier matches remain valid while splicing.
    #[must_use]
    pub fn redact(&self, text: &str, mode: RedactionMode) -> Redaction {
        let matches = self.detect(text);
        let mut redacted = text.to_string();
        for found in matches.iter().rev() {
            let replacement = replacement_for(found, mode);
            redacted.replace_range(found.start..found.end, &replacement);
        }
        Redaction {
            original: text.to_string(),
            redacted,
            pii_detected: !matches.is_empty(),
            matches,
        }
    }

    /// Returns the sorted, deduplicated PII type labels present in `text`.
    #[must_use]
    pub fn detected_types(&self, text: &str) -> Vec<&'static str> {
        let mut types: Vec<&'static str> =
            self.detect(text).iter().map(|m| m.pii_type.as_str()).collect();
        types.sort_unstable();
        types.dedup();
        types
    }
}

/// Builds the replacement text for one match.
fn replacement_for(found: &PiiMatch, mode: RedactionMode) -> String {
    match mode {
        RedactionMode::Strict => format!("[REDACTED:{}]", found.pii_type.marker()),
        RedactionMode::Partial => {
            if found.pii_type == PiiType::Email {
                found.matched.split_once('@').map_or_else(
                    || "[REDACTED_EMAIL]".to_string(),
                    |(_, domain)| format!("[REDACTED_EMAIL]@{domain}"),
                )
            } else {
                format!("[REDACTED_{}]", found.pii_type.marker())
            }
        }
    }
}

/// Collects full-pattern matches that pass `confirm`, skipping overlaps.
fn collect_full(
    pattern: &Regex,
    pii_type: PiiType,
    text: &str,
    accepted: &mut Vec<PiiMatch>,
    confirm: fn(&str) -> bool,
) {
    for found in pattern.find_iter(text) {
        if !confirm(found.as_str()) {
            continue;
        }
        push_unless_overlapping(accepted, pii_type, found.start(), found.end(), found.as_str());
    }
}

/// Collects contextual matches, redacting only the secret capture group.
fn collect_secret(pattern: &Regex, pii_type: PiiType, text: &str, accepted: &mut Vec<PiiMatch>) {
    for captures in pattern.captures_iter(text) {
        if let Some(secret) = captures.get(2) {
            push_unless_overlapping(accepted, pii_type, secret.start(), secret.end(), secret.as_str());
        }
    }
}

/// Appends a match unless its span overlaps an already-accepted span.
fn push_unless_overlapping(
    accepted: &mut Vec<PiiMatch>,
    pii_type: PiiType,
    start: usize,
    end: usize,
    matched: &str,
) {
    let overlaps = accepted.iter().any(|m| start < m.end && m.start < end);
    if !overlaps {
        accepted.push(PiiMatch {
            pii_type,
            start,
            end,
            matched: matched.to_string(),
        });
    }
}

// ============================================================================
// SECTION: Confirmations
// ============================================================================

/// Luhn checksum over the digits of a card candidate.
fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let mut sum = 0;
    for (index, digit) in digits.iter().rev().enumerate() {
        let mut value = *digit;
        if index % 2 == 1 {
            value *= 2;
            if value > 9 {
                value -= 9;
            }
        }
        sum += value;
    }
    sum % 10 == 0
}

/// Confirms every octet of an IPv4 candidate is in range.
fn ipv4_valid(candidate: &str) -> bool {
    candidate.split('.').all(|octet| octet.parse::<u16>().is_ok_and(|value| value <= 255))
}
