// crates/task-helm-core/src/core/identifiers.rs
// ============================================================================
// Module: Task Helm Identifiers
// Description: Canonical opaque identifiers for tasks, workflow nodes, and tools.
// Purpose: Provide strongly typed, serializable identifiers with stable wire forms.
// Dependencies: rand, serde
// ============================================================================

//! ## Overview
//! This module defines the canonical identifiers used throughout Task Helm.
//! Identifiers are opaque strings on the wire. Task identifiers carry a
//! well-known `task-` prefix plus ten lowercase hex characters when generated
//! locally, but externally supplied identifiers are accepted verbatim so that
//! transports can resume tasks they minted themselves.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use rand::Rng;
use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Prefix for locally generated task identifiers.
const TASK_ID_PREFIX: &str = "task-";
/// Number of hex characters in a locally generated task identifier suffix.
const TASK_ID_HEX_CHARS: usize = 10;

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

/// Task identifier for one conversational or computational request.
///
/// # Invariants
/// - Opaque UTF-8 string; generated values are `task-` plus ten lowercase hex
///   characters, externally supplied values are accepted verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Creates a task identifier from an externally supplied value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh local task identifier (`task-` + 10 hex chars).
    #[must_use]
    pub fn generate() -> Self {
        let suffix: u64 = rand::thread_rng().gen_range(0..(1_u64 << (TASK_ID_HEX_CHARS * 4)));
        Self(format!("{TASK_ID_PREFIX}{suffix:010x}"))
    }

    /// Returns `true` when the identifier has the canonical local form.
    #[must_use]
    pub fn is_canonical(&self) -> bool {
        self.0.strip_prefix(TASK_ID_PREFIX).is_some_and(|suffix| {
            suffix.len() == TASK_ID_HEX_CHARS
                && suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        })
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Workflow node identifier within a compiled graph.
///
/// # Invariants
/// - Opaque UTF-8 string; ordering is plain lexicographic byte order and is
///   relied upon for deterministic scheduling tie-breaks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a new node identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Registered tool name used for dispatch and cache keying.
///
/// # Invariants
/// - Opaque UTF-8 string; no normalization or validation is applied by this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolName(String);

impl ToolName {
    /// Creates a new tool name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ToolName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ToolName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
