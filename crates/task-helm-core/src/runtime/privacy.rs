// crates/task-helm-core/src/runtime/privacy.rs
// ============================================================================
// Module: Task Helm Privacy Wrapper
// Description: PII-aware gate for externally bound tool calls.
// Purpose: Policy-gate external calls, scan payloads, and audit the outcome.
// Dependencies: crate::{core, interfaces, runtime::audit}, serde_json
// ============================================================================

//! ## Overview
//! Every external call routes through the privacy wrapper. The wrapper
//! policy-gates on `allow_external`, scans the outgoing payload for PII,
//! emits `external_call_initiated` on allow and `permission_denied` on deny,
//! and attaches a redacted representation of the result to successful
//! outcomes. Audit context carries only PII type labels and counts, never
//! the matched values.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::core::hashing::canonical_json_string;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::ToolName;
use crate::core::redact::PiiRedactor;
use crate::core::redact::RedactionMode;
use crate::interfaces::AuditEventType;
use crate::interfaces::AuditSink;
use crate::interfaces::Clock;
use crate::interfaces::Severity;
use crate::runtime::audit::build_event;

// ============================================================================
// SECTION: Types
// ============================================================================

/// PII summary attached to tool outcomes.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PrivacyInfo {
    /// Whether any PII was detected in the payload.
    pub pii_detected: bool,
    /// Sorted, deduplicated PII type labels.
    pub types: Vec<String>,
}

/// Privacy wrapper errors.
#[derive(Debug, Error)]
pub enum PrivacyError {
    /// External calls are not allowed for this execution.
    #[error("external call denied for tool {0}")]
    Denied(String),
}

impl PrivacyError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Denied(_) => "permission_denied",
        }
    }
}

// ============================================================================
// SECTION: Privacy Wrapper
// ============================================================================

/// PII-aware gate for external tool calls.
pub struct PrivacyWrapper {
    /// PII detector and redactor.
    redactor: PiiRedactor,
    /// Audit sink for gate decisions.
    audit: Arc<dyn AuditSink>,
    /// Injected time source for event timestamps.
    clock: Arc<dyn Clock>,
    /// Redaction mode applied to result representations.
    mode: RedactionMode,
}

impl PrivacyWrapper {
    /// Creates a wrapper with the given sink, clock, and redaction mode.
    #[must_use]
    pub fn new(audit: Arc<dyn AuditSink>, clock: Arc<dyn Clock>, mode: RedactionMode) -> Self {
        Self {
            redactor: PiiRedactor::new(),
            audit,
            clock,
            mode,
        }
    }

    /// Gates an external call: scans the payload, audits, and denies when
    /// `allow_external` is off.
    ///
    /// # Errors
    ///
    /// Returns [`PrivacyError::Denied`] when external calls are not allowed;
    /// a `permission_denied` audit event is emitted first.
    pub fn gate_external(
        &self,
        tool_name: &ToolName,
        payload: &Value,
        allow_external: bool,
        task_id: Option<&TaskId>,
    ) -> Result<PrivacyInfo, PrivacyError> {
        let payload_text = canonical_json_string(payload).unwrap_or_else(|_| payload.to_string());
        let matches = self.redactor.detect(&payload_text);
        let types: Vec<String> = {
            let mut labels: Vec<String> =
                matches.iter().map(|m| m.pii_type.as_str().to_string()).collect();
            labels.sort();
            labels.dedup();
            labels
        };
        let pii_detected = !matches.is_empty();

        if pii_detected {
            self.emit(
                AuditEventType::PiiDetected,
                Severity::Warning,
                task_id,
                json!({
                    "tool": tool_name.as_str(),
                    "types": types,
                    "match_count": matches.len(),
                }),
            );
        }

        if !allow_external {
            self.emit(
                AuditEventType::PermissionDenied,
                Severity::Warning,
                task_id,
                json!({
                    "tool": tool_name.as_str(),
                    "reason": "external_not_allowed",
                }),
            );
            return Err(PrivacyError::Denied(tool_name.to_string()));
        }

        self.emit(
            AuditEventType::ExternalCallInitiated,
            Severity::Info,
            task_id,
            json!({
                "tool": tool_name.as_str(),
                "pii_detected": pii_detected,
            }),
        );

        Ok(PrivacyInfo { pii_detected, types })
    }

    /// Builds the redacted representation of a successful external result.
    ///
    /// The raw value is returned to the caller unchanged; this method only
    /// produces the scrubbed text attached alongside it, emitting a
    /// `pii_redacted` event when anything was scrubbed.
    #[must_use]
    pub fn redact_result(&self, value: &Value, task_id: Option<&TaskId>) -> String {
        let text = match value {
            Value::String(text) => text.clone(),
            other => canonical_json_string(other).unwrap_or_else(|_| other.to_string()),
        };
        let redaction = self.redactor.redact(&text, self.mode);
        if redaction.pii_detected {
            let mut types: Vec<&'static str> =
                redaction.matches.iter().map(|m| m.pii_type.as_str()).collect();
            types.sort_unstable();
            types.dedup();
            self.emit(
                AuditEventType::PiiRedacted,
                Severity::Info,
                task_id,
                json!({
                    "types": types,
                    "match_count": redaction.matches.len(),
                }),
            );
        }
        redaction.redacted
    }

    /// Emits one audit event, swallowing sink failures.
    fn emit(
        &self,
        event_type: AuditEventType,
        severity: Severity,
        task_id: Option<&TaskId>,
        context: Value,
    ) {
        let event =
            build_event(event_type, severity, task_id.cloned(), context, self.clock.now());
        let _ = self.audit.emit(&event);
    }
}
