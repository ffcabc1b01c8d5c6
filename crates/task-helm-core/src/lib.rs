// crates/task-helm-core/src/lib.rs
// ============================================================================
// Module: Task Helm Core Library
// Description: Public API surface for the Task Helm core.
// Purpose: Expose core types, interfaces, and runtime subsystems.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Task Helm core is a deterministic task controller: one entry point drives
//! a user utterance through a fixed lifecycle, compiles the intent into a
//! small acyclic workflow graph, executes it against layered memory, gates
//! tool calls through a permission sandbox, and records a replayable trace
//! whose canonical form is bit-stable for identical inputs. External
//! capabilities (language model, embedder, vector index, cache backend) are
//! injected through explicit interfaces rather than constructed here.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::AuditError;
pub use interfaces::AuditEvent;
pub use interfaces::AuditEventType;
pub use interfaces::AuditSink;
pub use interfaces::CacheBackend;
pub use interfaces::CacheBackendError;
pub use interfaces::CancellationToken;
pub use interfaces::Clock;
pub use interfaces::EmbedError;
pub use interfaces::EpisodicError;
pub use interfaces::EpisodicStore;
pub use interfaces::FixedClock;
pub use interfaces::IndexError;
pub use interfaces::LanguageModel;
pub use interfaces::LlmError;
pub use interfaces::SemanticEntry;
pub use interfaces::SemanticMetadataError;
pub use interfaces::SemanticMetadataStore;
pub use interfaces::Severity;
pub use interfaces::SystemClock;
pub use interfaces::TextEmbedder;
pub use interfaces::VectorIndex;
pub use interfaces::WorkingStateError;
pub use interfaces::WorkingStateStore;
pub use runtime::Cache;
pub use runtime::CacheSettings;
pub use runtime::Controller;
pub use runtime::ControllerConfig;
pub use runtime::ControllerError;
pub use runtime::DagExecutor;
pub use runtime::ExecutionPolicy;
pub use runtime::FileAuditLog;
pub use runtime::FlatVectorIndex;
pub use runtime::FsWorkingStateStore;
pub use runtime::HealthReport;
pub use runtime::HealthStatus;
pub use runtime::HybridRetriever;
pub use runtime::InMemoryCacheBackend;
pub use runtime::InMemoryEpisodicStore;
pub use runtime::InMemorySemanticMetadata;
pub use runtime::InMemoryWorkingStateStore;
pub use runtime::MemoryManager;
pub use runtime::MemoryAuditSink;
pub use runtime::PermissionTier;
pub use runtime::PlanCompiler;
pub use runtime::PrivacyWrapper;
pub use runtime::RunReport;
pub use runtime::RunRequest;
pub use runtime::Sandbox;
pub use runtime::SandboxConfig;
pub use runtime::SandboxError;
pub use runtime::SemanticStore;
pub use runtime::ToolExecutor;
pub use runtime::ToolRegistry;
pub use runtime::ToolRequest;
pub use runtime::make_cache_key;
