// crates/task-helm-core/src/core/mod.rs
// ============================================================================
// Module: Task Helm Core Data Model
// Description: Identifiers, time, hashing, records, graphs, and redaction.
// Purpose: Group the pure data-model modules behind one namespace.
// Dependencies: crate::core submodules
// ============================================================================

//! ## Overview
//! The core namespace holds the pure data model: no I/O, no clocks, no
//! backends. Everything here is deterministic and serializable, which is
//! what makes canonical-form comparisons across runs possible.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod graph;
pub mod hashing;
pub mod identifiers;
pub mod record;
pub mod redact;
pub mod retrieval;
pub mod task;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use graph::GraphError;
pub use graph::NodeSpec;
pub use graph::NodeType;
pub use graph::WorkflowGraph;
pub use hashing::DEFAULT_HASH_ALGORITHM;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use hashing::HashError;
pub use hashing::canonical_json_bytes;
pub use hashing::canonical_json_string;
pub use hashing::content_hash_hex;
pub use hashing::hash_bytes;
pub use hashing::hash_canonical_json;
pub use identifiers::NodeId;
pub use identifiers::TaskId;
pub use identifiers::ToolName;
pub use record::ActionType;
pub use record::ArchiveDocument;
pub use record::ArchiveSnapshot;
pub use record::DecisionRecord;
pub use record::RecordStatus;
pub use record::ToolCallRecord;
pub use record::ValidationRecord;
pub use redact::PiiMatch;
pub use redact::PiiRedactor;
pub use redact::PiiType;
pub use redact::Redaction;
pub use redact::RedactionMode;
pub use retrieval::RetrievalConfig;
pub use retrieval::RetrievalError;
pub use retrieval::RetrievalResult;
pub use retrieval::RetrievalSource;
pub use retrieval::SourceWeights;
pub use task::CanonicalTraceEvent;
pub use task::DEFAULT_TRANSCRIPT_CAP;
pub use task::Role;
pub use task::Task;
pub use task::TaskState;
pub use task::TraceEvent;
pub use task::TraceEventType;
pub use task::TranscriptMessage;
pub use task::TransitionError;
pub use task::WorkingState;
pub use task::canonical_trace;
pub use time::TimeError;
pub use time::Timestamp;
