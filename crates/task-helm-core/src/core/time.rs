// crates/task-helm-core/src/core/time.rs
// ============================================================================
// Module: Task Helm Time Model
// Description: Canonical timestamp representation for records and traces.
// Purpose: Provide deterministic, replayable time values across Task Helm records.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Task Helm embeds explicit time values in decision rows, audit events, and
//! retrieval metadata to keep replay deterministic. The core never reads
//! wall-clock time directly; a [`crate::interfaces::Clock`] capability is
//! injected wherever "now" is needed, so tests can pin time exactly.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when converting timestamps to or from RFC 3339 text.
#[derive(Debug, Error)]
pub enum TimeError {
    /// The value does not represent a valid instant.
    #[error("invalid timestamp: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical timestamp used in Task Helm records and audit events.
///
/// # Invariants
/// - Stored as milliseconds since the unix epoch, UTC.
/// - Values are explicitly provided by callers or an injected clock; the core
///   never samples wall-clock time on its own.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as unix epoch milliseconds.
    #[must_use]
    pub const fn unix_millis(self) -> i64 {
        self.0
    }

    /// Returns the age of this timestamp relative to `now`, in fractional
    /// hours. Negative ages (timestamps in the future) clamp to zero.
    #[must_use]
    pub fn age_hours(self, now: Self) -> f64 {
        let delta_ms = now.0.saturating_sub(self.0);
        if delta_ms <= 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss, reason = "age scoring tolerates sub-ms rounding")]
        let hours = delta_ms as f64 / 3_600_000.0;
        hours
    }

    /// Renders the timestamp as an RFC 3339 UTC string.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::Invalid`] when the value is outside the
    /// representable datetime range.
    pub fn to_rfc3339(self) -> Result<String, TimeError> {
        let instant = OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.0) * 1_000_000)
            .map_err(|err| TimeError::Invalid(err.to_string()))?;
        instant.format(&Rfc3339).map_err(|err| TimeError::Invalid(err.to_string()))
    }

    /// Parses an RFC 3339 string into a timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::Invalid`] when the text is not valid RFC 3339.
    pub fn parse_rfc3339(text: &str) -> Result<Self, TimeError> {
        let instant = OffsetDateTime::parse(text, &Rfc3339)
            .map_err(|err| TimeError::Invalid(err.to_string()))?;
        let nanos = instant.unix_timestamp_nanos();
        #[allow(clippy::cast_possible_truncation, reason = "millisecond instants fit i64")]
        let millis = (nanos / 1_000_000) as i64;
        Ok(Self(millis))
    }
}
