// crates/task-helm-core/src/interfaces/mod.rs
// ============================================================================
// Module: Task Helm Interfaces
// Description: Backend-agnostic interfaces for models, stores, cache, and audit.
// Purpose: Define the contract surfaces used by the Task Helm runtime.
// Dependencies: crate::core, serde, thiserror
// ============================================================================

//! ## Overview
//! Interfaces define how Task Helm integrates with external capabilities
//! without embedding backend-specific details: the language model, the
//! embedding model, the vector index, the three memory stores, the cache
//! backend, the audit sink, and the clock. Implementations must be
//! deterministic where the contract says so and fail closed on invalid data.
//! The core never constructs these capabilities itself; hosts inject them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::identifiers::NodeId;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::ToolName;
use crate::core::record::ActionType;
use crate::core::record::DecisionRecord;
use crate::core::record::RecordStatus;
use crate::core::record::ToolCallRecord;
use crate::core::task::Role;
use crate::core::task::TranscriptMessage;
use crate::core::task::WorkingState;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Language Model
// ============================================================================

/// Language model errors.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The model runtime is unreachable or not loaded.
    #[error("language model unavailable: {0}")]
    Unavailable(String),
    /// Generation failed mid-flight.
    #[error("language model generation failed: {0}")]
    Generation(String),
}

impl LlmError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) | Self::Generation(_) => "execution_error",
        }
    }
}

/// Opaque text-generation capability.
pub trait LanguageModel: Send + Sync {
    /// Generates a completion for `prompt`, honoring `stop_tokens` and the
    /// completion cap.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] when the runtime is unavailable or generation
    /// fails.
    fn generate(
        &self,
        prompt: &str,
        stop_tokens: &[String],
        max_tokens: usize,
    ) -> Result<String, LlmError>;
}

// ============================================================================
// SECTION: Embedding Model
// ============================================================================

/// Embedding model errors.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The embedding model failed to produce a vector.
    #[error("embedding failed: {0}")]
    Embedding(String),
}

impl EmbedError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Embedding(_) => "execution_error",
        }
    }
}

/// Opaque text-embedding capability.
pub trait TextEmbedder: Send + Sync {
    /// Embeds `text` into a fixed-dimension vector.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError`] when embedding fails.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

// ============================================================================
// SECTION: Vector Index
// ============================================================================

/// Vector index errors.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Index I/O failed.
    #[error("vector index io error: {0}")]
    Io(String),
    /// Index contents are corrupt or dimensionally inconsistent.
    #[error("vector index corrupt: {0}")]
    Corrupt(String),
}

impl IndexError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Io(_) | Self::Corrupt(_) => "store_error",
        }
    }
}

/// Approximate-nearest-neighbor index capability.
///
/// Any backend implementing this contract suffices; the default in-process
/// implementation is an exact flat scan.
pub trait VectorIndex: Send {
    /// Inserts a vector under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on dimension mismatch or backend failure.
    fn add(&mut self, id: i64, vector: &[f32]) -> Result<(), IndexError>;

    /// Returns up to `k` `(id, distance)` pairs ordered by ascending
    /// distance, ties broken by ascending id.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on backend failure.
    fn search(&self, vector: &[f32], k: usize) -> Result<Vec<(i64, f32)>, IndexError>;

    /// Persists the index to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Io`] when writing fails.
    fn save(&self, path: &Path) -> Result<(), IndexError>;

    /// Loads the index from `path`, replacing current contents.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] when the file is missing or corrupt.
    fn load(&mut self, path: &Path) -> Result<(), IndexError>;

    /// Number of vectors currently indexed.
    fn len(&self) -> usize;

    /// Returns `true` when the index holds no vectors.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// SECTION: Episodic Store
// ============================================================================

/// Episodic store errors.
#[derive(Debug, Error)]
pub enum EpisodicError {
    /// A search query was empty or whitespace.
    #[error("search query must not be empty")]
    EmptyQuery,
    /// Backend storage failure.
    #[error("episodic store error: {0}")]
    Store(String),
}

impl EpisodicError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::EmptyQuery => "invalid_argument",
            Self::Store(_) => "store_error",
        }
    }
}

/// Append-only episodic log of decisions, tool calls, and validations.
///
/// The trait deliberately exposes no update or delete operation.
pub trait EpisodicStore: Send + Sync {
    /// Appends a decision row and returns its store-assigned id.
    ///
    /// # Errors
    ///
    /// Returns [`EpisodicError::Store`] on backend failure.
    fn append_decision(
        &self,
        task_id: &TaskId,
        action_type: ActionType,
        content: &str,
        status: RecordStatus,
        timestamp: Timestamp,
    ) -> Result<i64, EpisodicError>;

    /// Appends a tool-call row under an owning decision.
    ///
    /// # Errors
    ///
    /// Returns [`EpisodicError::Store`] on backend failure.
    fn append_tool_call(
        &self,
        decision_id: i64,
        tool_name: &ToolName,
        params_json: &str,
        result_json: &str,
        timestamp: Timestamp,
    ) -> Result<i64, EpisodicError>;

    /// Appends a validation row.
    ///
    /// # Errors
    ///
    /// Returns [`EpisodicError::Store`] on backend failure.
    fn append_validation(
        &self,
        task_id: &TaskId,
        node_id: Option<&NodeId>,
        passed: bool,
        detail: &str,
        timestamp: Timestamp,
    ) -> Result<i64, EpisodicError>;

    /// Case-insensitive substring search over decision content, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`EpisodicError::EmptyQuery`] for empty or whitespace queries
    /// and [`EpisodicError::Store`] on backend failure.
    fn search_decisions(
        &self,
        query: &str,
        task_id: Option<&TaskId>,
        limit: usize,
    ) -> Result<Vec<DecisionRecord>, EpisodicError>;

    /// Case-insensitive substring search over tool-call params and results,
    /// newest first.
    ///
    /// # Errors
    ///
    /// Returns [`EpisodicError::EmptyQuery`] for empty or whitespace queries
    /// and [`EpisodicError::Store`] on backend failure.
    fn search_tool_calls(
        &self,
        query: &str,
        task_id: Option<&TaskId>,
        limit: usize,
    ) -> Result<Vec<ToolCallRecord>, EpisodicError>;

    /// Returns the newest decisions for a task, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`EpisodicError::Store`] on backend failure.
    fn recent_decisions(
        &self,
        task_id: &TaskId,
        limit: usize,
    ) -> Result<Vec<DecisionRecord>, EpisodicError>;

    /// Cheap liveness probe.
    ///
    /// # Errors
    ///
    /// Returns [`EpisodicError::Store`] when the backend is unreachable.
    fn health(&self) -> Result<(), EpisodicError>;
}

// ============================================================================
// SECTION: Working State Store
// ============================================================================

/// Working state store errors.
#[derive(Debug, Error)]
pub enum WorkingStateError {
    /// Backend storage failure.
    #[error("working state store error: {0}")]
    Store(String),
    /// Stored document is corrupt.
    #[error("working state corrupt: {0}")]
    Corrupt(String),
}

impl WorkingStateError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Store(_) | Self::Corrupt(_) => "store_error",
        }
    }
}

/// Per-task working-state document store.
pub trait WorkingStateStore: Send + Sync {
    /// Loads the document for a task, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`WorkingStateError`] on backend failure or corrupt documents.
    fn load(&self, task_id: &TaskId) -> Result<Option<WorkingState>, WorkingStateError>;

    /// Atomically replaces the document for a task.
    ///
    /// # Errors
    ///
    /// Returns [`WorkingStateError::Store`] on backend failure.
    fn save(&self, state: &WorkingState) -> Result<(), WorkingStateError>;

    /// Appends a transcript message, ring-capping the transcript.
    ///
    /// # Errors
    ///
    /// Returns [`WorkingStateError`] on backend failure.
    fn append_message(
        &self,
        task_id: &TaskId,
        role: Role,
        content: &str,
        now: Timestamp,
    ) -> Result<(), WorkingStateError>;

    /// Returns up to `n` most recent messages, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`WorkingStateError`] on backend failure.
    fn list_recent_messages(
        &self,
        task_id: &TaskId,
        n: usize,
    ) -> Result<Vec<TranscriptMessage>, WorkingStateError>;
}

// ============================================================================
// SECTION: Semantic Metadata Store
// ============================================================================

/// One stored semantic entry.
///
/// The embedding vector is persisted alongside the text so the vector index
/// can be rebuilt from metadata when the index file is missing or corrupt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticEntry {
    /// Index identifier.
    pub vector_id: i64,
    /// Stored text.
    pub text: String,
    /// Free-form metadata; a `timestamp` key enables recency scoring.
    pub metadata: Value,
    /// Stored embedding vector.
    pub vector: Vec<f32>,
}

/// Semantic metadata store errors.
#[derive(Debug, Error)]
pub enum SemanticMetadataError {
    /// Backend storage failure.
    #[error("semantic metadata store error: {0}")]
    Store(String),
}

impl SemanticMetadataError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Store(_) => "store_error",
        }
    }
}

/// Metadata table paired with the vector index.
pub trait SemanticMetadataStore: Send + Sync {
    /// Inserts an entry; `vector_id` must be fresh.
    ///
    /// # Errors
    ///
    /// Returns [`SemanticMetadataError`] on backend failure.
    fn insert(&self, entry: &SemanticEntry) -> Result<(), SemanticMetadataError>;

    /// Fetches one entry by id.
    ///
    /// # Errors
    ///
    /// Returns [`SemanticMetadataError`] on backend failure.
    fn get(&self, vector_id: i64) -> Result<Option<SemanticEntry>, SemanticMetadataError>;

    /// Returns every stored entry ordered by id (used for index rebuilds).
    ///
    /// # Errors
    ///
    /// Returns [`SemanticMetadataError`] on backend failure.
    fn all_entries(&self) -> Result<Vec<SemanticEntry>, SemanticMetadataError>;

    /// Returns the next unused vector id.
    ///
    /// # Errors
    ///
    /// Returns [`SemanticMetadataError`] on backend failure.
    fn next_vector_id(&self) -> Result<i64, SemanticMetadataError>;
}

// ============================================================================
// SECTION: Cache Backend
// ============================================================================

/// Cache backend errors.
#[derive(Debug, Error)]
pub enum CacheBackendError {
    /// The backend is unreachable or timed out (2-second bound).
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    /// The backend rejected the operation.
    #[error("cache backend operation failed: {0}")]
    Operation(String),
}

impl CacheBackendError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) | Self::Operation(_) => "cache_error",
        }
    }
}

/// Key-value cache backend with TTL expiry.
///
/// Backends own their 2-second connect/operation bound; the client above
/// them is strictly fail-open and never propagates these errors.
pub trait CacheBackend: Send + Sync {
    /// Fetches a live value for `key` as of `now`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheBackendError`] on backend failure.
    fn get(&self, key: &str, now: Timestamp) -> Result<Option<String>, CacheBackendError>;

    /// Stores `value` under `key` with a positive TTL in seconds.
    ///
    /// # Errors
    ///
    /// Returns [`CacheBackendError`] on backend failure.
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
        now: Timestamp,
    ) -> Result<(), CacheBackendError>;

    /// Deletes `key`, reporting whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheBackendError`] on backend failure.
    fn delete(&self, key: &str) -> Result<bool, CacheBackendError>;

    /// Deletes every key matching a `*`-wildcard pattern, returning the count.
    ///
    /// # Errors
    ///
    /// Returns [`CacheBackendError`] on backend failure.
    fn delete_matching(&self, pattern: &str) -> Result<u64, CacheBackendError>;

    /// Cheap liveness probe.
    ///
    /// # Errors
    ///
    /// Returns [`CacheBackendError::Unavailable`] when unreachable.
    fn ping(&self) -> Result<(), CacheBackendError>;
}

// ============================================================================
// SECTION: Audit Sink
// ============================================================================

/// Audit event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational event.
    Info,
    /// Policy-relevant event.
    Warning,
    /// Security-critical event.
    Critical,
}

/// Audit event classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// PII was detected in a payload.
    PiiDetected,
    /// PII was redacted from a payload.
    PiiRedacted,
    /// An external call was permitted and initiated.
    ExternalCallInitiated,
    /// A gated operation was denied.
    PermissionDenied,
}

impl AuditEventType {
    /// Returns the wire label for this event type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PiiDetected => "pii_detected",
            Self::PiiRedacted => "pii_redacted",
            Self::ExternalCallInitiated => "external_call_initiated",
            Self::PermissionDenied => "permission_denied",
        }
    }
}

/// One structured audit event.
///
/// # Invariants
/// - `context` never contains raw PII; only summaries (types, counts,
///   truncated snippets already passed through the redactor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event classification.
    pub event_type: AuditEventType,
    /// RFC 3339 UTC timestamp.
    pub timestamp: String,
    /// Severity level.
    pub severity: Severity,
    /// Task the event concerns, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    /// Structured, PII-free context.
    pub context: Value,
}

/// Audit sink errors.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The sink could not record the event.
    #[error("audit sink write failed: {0}")]
    Write(String),
}

/// Structured audit event sink.
///
/// Callers treat the sink as an optimization: emission failures are
/// swallowed and never block the primary computation.
pub trait AuditSink: Send + Sync {
    /// Records one event.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Write`] when the sink cannot record the event.
    fn emit(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Injectable time source.
pub trait Clock: Send + Sync {
    /// Returns the current timestamp.
    fn now(&self) -> Timestamp;
}

/// Wall-clock implementation of [`Clock`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| {
                i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
            });
        Timestamp::from_unix_millis(millis)
    }
}

/// Fixed clock for deterministic tests; advances only when told to.
#[derive(Debug, Default)]
pub struct FixedClock {
    /// Current instant in unix millis.
    millis: std::sync::atomic::AtomicI64,
}

impl FixedClock {
    /// Creates a fixed clock pinned at `timestamp`.
    #[must_use]
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            millis: std::sync::atomic::AtomicI64::new(timestamp.unix_millis()),
        }
    }

    /// Advances the clock by `millis`.
    pub fn advance_millis(&self, millis: i64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_unix_millis(self.millis.load(Ordering::SeqCst))
    }
}

// ============================================================================
// SECTION: Cancellation
// ============================================================================

/// Shared cancellation signal honored by tool handlers and the executor.
///
/// In-flight filesystem operations complete (bounded by size caps); no new
/// operation starts once the token is set.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    /// Shared cancelled flag.
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates an unset token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
