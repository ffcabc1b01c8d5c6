// crates/task-helm-core/src/runtime/tools.rs
// ============================================================================
// Module: Task Helm Tool Registry & Executor
// Description: Schema-validated tool dispatch behind permission tiers.
// Purpose: Fail closed on unknown tools, bad payloads, and gated tiers.
// Dependencies: crate::{core, interfaces, runtime}, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The registry maps tool names to declared schemas, permission tiers, and
//! handlers; registrations happen once at startup and lookups are read-only
//! afterwards. The executor validates payloads against the declared schema
//! before dispatch, enforces the tier policy (READ_ONLY permitted by
//! default, WRITE_SAFE deny-by-default, SYSTEM permanently denied), routes
//! external calls through the privacy wrapper, and caches READ_ONLY results
//! under the deterministic `tool` key prefix. Every failure maps to a
//! stable code from the fixed taxonomy.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::core::identifiers::TaskId;
use crate::core::identifiers::ToolName;
use crate::interfaces::CancellationToken;
use crate::runtime::cache::Cache;
use crate::runtime::cache::make_cache_key;
use crate::runtime::privacy::PrivacyInfo;
use crate::runtime::privacy::PrivacyWrapper;
use crate::runtime::sandbox::Sandbox;
use crate::runtime::sandbox::SandboxError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default TTL for cached READ_ONLY tool results, in seconds.
pub const DEFAULT_TOOL_CACHE_TTL_SECONDS: u64 = 1_800;
/// Cache key prefix for tool results.
pub const TOOL_CACHE_PREFIX: &str = "tool";
/// Metrics category for tool cache traffic.
const TOOL_CACHE_CATEGORY: &str = "tool";

// ============================================================================
// SECTION: Permission Tiers
// ============================================================================

/// Permission tier of a registered tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionTier {
    /// Safe, side-effect-free operations; permitted by default.
    ReadOnly,
    /// Bounded side effects; deny-by-default unless explicitly allowed.
    WriteSafe,
    /// Host-level operations; permanently denied at this tier.
    System,
}

impl PermissionTier {
    /// Returns the wire label for this tier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "READ_ONLY",
            Self::WriteSafe => "WRITE_SAFE",
            Self::System => "SYSTEM",
        }
    }
}

// ============================================================================
// SECTION: Schemas
// ============================================================================

/// Declared field value kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// UTF-8 string.
    String,
    /// Integer number.
    Integer,
    /// Finite float.
    Float,
    /// Boolean.
    Boolean,
}

impl FieldKind {
    /// Returns the wire label for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
        }
    }

    /// Returns `true` when `value` matches this kind.
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::Boolean => value.is_boolean(),
        }
    }
}

/// Declared specification for one payload field.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FieldSpec {
    /// Value kind.
    pub kind: FieldKind,
    /// Whether the field must be supplied (or defaulted).
    pub required: bool,
    /// Default applied when the field is absent.
    pub default: Option<Value>,
}

impl FieldSpec {
    /// A required field of the given kind.
    #[must_use]
    pub const fn required(kind: FieldKind) -> Self {
        Self {
            kind,
            required: true,
            default: None,
        }
    }

    /// An optional field with a default value.
    #[must_use]
    pub const fn optional(kind: FieldKind, default: Value) -> Self {
        Self {
            kind,
            required: false,
            default: Some(default),
        }
    }
}

/// Validated, typed tool payload (sorted field order).
pub type ToolPayload = Map<String, Value>;

/// Declared tool payload schema.
///
/// # Invariants
/// - Field order in exports is deterministic (sorted by field name).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolSchema {
    /// Field specifications keyed by field name.
    fields: BTreeMap<String, FieldSpec>,
}

impl ToolSchema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field specification.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.insert(name.into(), spec);
        self
    }

    /// Validates a raw payload into a typed payload, applying defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Validation`] on non-object payloads, unknown
    /// fields, missing required fields, or kind mismatches.
    pub fn validate(&self, payload: &Value) -> Result<ToolPayload, ToolError> {
        let supplied = match payload {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            _ => {
                return Err(ToolError::Validation("payload must be a JSON object".to_string()));
            }
        };
        for name in supplied.keys() {
            if !self.fields.contains_key(name) {
                return Err(ToolError::Validation(format!("unknown field: {name}")));
            }
        }
        let mut validated = Map::new();
        for (name, spec) in &self.fields {
            match supplied.get(name) {
                Some(value) => {
                    if !spec.kind.accepts(value) {
                        return Err(ToolError::Validation(format!(
                            "field {name} expects {}",
                            spec.kind.as_str()
                        )));
                    }
                    validated.insert(name.clone(), value.clone());
                }
                None => {
                    if let Some(default) = &spec.default {
                        validated.insert(name.clone(), default.clone());
                    } else if spec.required {
                        return Err(ToolError::Validation(format!(
                            "missing required field: {name}"
                        )));
                    }
                }
            }
        }
        Ok(validated)
    }

    /// Exports the schema as deterministic JSON (sorted field order).
    #[must_use]
    pub fn export(&self) -> Value {
        let mut fields = Map::new();
        for (name, spec) in &self.fields {
            let mut entry = Map::new();
            entry.insert("type".to_string(), Value::String(spec.kind.as_str().to_string()));
            entry.insert("required".to_string(), Value::Bool(spec.required));
            if let Some(default) = &spec.default {
                entry.insert("default".to_string(), default.clone());
            }
            fields.insert(name.clone(), Value::Object(entry));
        }
        Value::Object(fields)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Handler-level failure surfaced by tool implementations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    /// Stable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl HandlerError {
    /// Creates a handler error with an explicit code.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<SandboxError> for HandlerError {
    fn from(error: SandboxError) -> Self {
        Self::new(error.code(), error.to_string())
    }
}

/// Tool execution errors with stable, append-only codes.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool is registered under the requested name.
    #[error("tool not found: {0}")]
    NotFound(String),
    /// Payload failed schema validation.
    #[error("tool payload invalid: {0}")]
    Validation(String),
    /// The tier policy denied the call.
    #[error("tool permission denied: {0}")]
    PermissionDenied(String),
    /// The execution environment is misconfigured for this request.
    #[error("tool configuration error: {0}")]
    Configuration(String),
    /// The tool is registered but has no handler.
    #[error("tool not implemented: {0}")]
    NotImplemented(String),
    /// The handler failed.
    #[error("tool execution failed [{code}]: {message}")]
    Execution {
        /// Stable error code reported by the handler.
        code: String,
        /// Human-readable message.
        message: String,
    },
}

impl ToolError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::NotFound(_) => "tool_not_found",
            Self::Validation(_) => "validation_error",
            Self::PermissionDenied(_) => "permission_denied",
            Self::Configuration(_) => "configuration_error",
            Self::NotImplemented(_) => "tool_not_implemented",
            Self::Execution { code, .. } => code,
        }
    }
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Tool handler contract.
///
/// Handlers receive a validated payload and the shared cancellation token;
/// they must not start new filesystem operations once cancellation is set.
pub trait ToolHandler: Send + Sync {
    /// Executes the tool against a validated payload.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] carrying a stable code on failure.
    fn call(&self, payload: &ToolPayload, cancel: &CancellationToken)
    -> Result<Value, HandlerError>;
}

/// One registry entry.
pub struct ToolRegistration {
    /// Tool name.
    pub name: ToolName,
    /// Declared payload schema.
    pub schema: ToolSchema,
    /// Permission tier.
    pub tier: PermissionTier,
    /// Handler, when implemented.
    pub handler: Option<Arc<dyn ToolHandler>>,
}

/// Registry of available tools.
///
/// # Invariants
/// - Registrations happen once at startup; lookups never mutate.
/// - Schema export order is deterministic (sorted by tool name).
#[derive(Default)]
pub struct ToolRegistry {
    /// Registered tools keyed by name.
    entries: BTreeMap<ToolName, ToolRegistration>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Configuration`] when the name is already taken.
    pub fn register(&mut self, registration: ToolRegistration) -> Result<(), ToolError> {
        if self.entries.contains_key(&registration.name) {
            return Err(ToolError::Configuration(format!(
                "tool already registered: {}",
                registration.name
            )));
        }
        self.entries.insert(registration.name.clone(), registration);
        Ok(())
    }

    /// Looks up a registration by name.
    #[must_use]
    pub fn get(&self, name: &ToolName) -> Option<&ToolRegistration> {
        self.entries.get(name)
    }

    /// Returns registered tool names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<ToolName> {
        self.entries.keys().cloned().collect()
    }

    /// Exports every schema as deterministic JSON, sorted by tool name.
    #[must_use]
    pub fn export_schemas(&self) -> Value {
        let mut out = Map::new();
        for (name, registration) in &self.entries {
            let mut entry = Map::new();
            entry.insert(
                "permission_tier".to_string(),
                Value::String(registration.tier.as_str().to_string()),
            );
            entry.insert("schema".to_string(), registration.schema.export());
            out.insert(name.to_string(), Value::Object(entry));
        }
        Value::Object(out)
    }

    /// Builds the builtin registry of sandbox-backed file tools.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Configuration`] only if a builtin name collides,
    /// which would be a programmer error.
    pub fn builtin(sandbox: Arc<Sandbox>) -> Result<Self, ToolError> {
        let mut registry = Self::new();
        registry.register(ToolRegistration {
            name: ToolName::new("read_file"),
            schema: ToolSchema::new().field("path", FieldSpec::required(FieldKind::String)),
            tier: PermissionTier::ReadOnly,
            handler: Some(Arc::new(ReadFileTool {
                sandbox: Arc::clone(&sandbox),
            })),
        })?;
        registry.register(ToolRegistration {
            name: ToolName::new("write_file"),
            schema: ToolSchema::new()
                .field("path", FieldSpec::required(FieldKind::String))
                .field("content", FieldSpec::required(FieldKind::String)),
            tier: PermissionTier::WriteSafe,
            handler: Some(Arc::new(WriteFileTool {
                sandbox: Arc::clone(&sandbox),
            })),
        })?;
        registry.register(ToolRegistration {
            name: ToolName::new("list_dir"),
            schema: ToolSchema::new()
                .field("path", FieldSpec::optional(FieldKind::String, Value::String(".".into()))),
            tier: PermissionTier::ReadOnly,
            handler: Some(Arc::new(ListDirTool {
                sandbox: Arc::clone(&sandbox),
            })),
        })?;
        registry.register(ToolRegistration {
            name: ToolName::new("file_info"),
            schema: ToolSchema::new().field("path", FieldSpec::required(FieldKind::String)),
            tier: PermissionTier::ReadOnly,
            handler: Some(Arc::new(FileInfoTool {
                sandbox: Arc::clone(&sandbox),
            })),
        })?;
        registry.register(ToolRegistration {
            name: ToolName::new("search_files"),
            schema: ToolSchema::new()
                .field("root", FieldSpec::optional(FieldKind::String, Value::String(".".into())))
                .field("glob", FieldSpec::required(FieldKind::String)),
            tier: PermissionTier::ReadOnly,
            handler: Some(Arc::new(SearchFilesTool { sandbox })),
        })?;
        Ok(registry)
    }
}

// ============================================================================
// SECTION: Requests & Outcomes
// ============================================================================

/// One tool invocation request.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolRequest {
    /// Tool to invoke.
    pub tool_name: ToolName,
    /// Raw payload (validated against the declared schema before dispatch).
    pub payload: Value,
    /// Whether the call leaves the local host.
    #[serde(default)]
    pub external: bool,
}

/// Execution policy for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionPolicy {
    /// Whether WRITE_SAFE tools may run.
    pub allow_write_safe: bool,
    /// Whether external calls may leave the host.
    pub allow_external: bool,
}

/// Successful tool outcome.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolOutcome {
    /// Handler return value (unredacted).
    pub value: Value,
    /// Whether the value came from cache.
    pub cache_hit: bool,
    /// PII summary for external calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy: Option<PrivacyInfo>,
    /// Redacted result representation for external calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redacted_result_text: Option<String>,
}

// ============================================================================
// SECTION: Executor
// ============================================================================

/// Schema-validated, permission-gated tool executor.
pub struct ToolExecutor {
    /// Shared tool registry.
    registry: Arc<ToolRegistry>,
    /// TTL for cached READ_ONLY results.
    tool_cache_ttl_seconds: u64,
}

impl ToolExecutor {
    /// Creates an executor over a registry with the default cache TTL.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            tool_cache_ttl_seconds: DEFAULT_TOOL_CACHE_TTL_SECONDS,
        }
    }

    /// Overrides the tool-result cache TTL.
    #[must_use]
    pub const fn with_cache_ttl(mut self, ttl_seconds: u64) -> Self {
        self.tool_cache_ttl_seconds = ttl_seconds;
        self
    }

    /// Executes one tool request under the given policy.
    ///
    /// Caching is active only when a cache client is present and active,
    /// the tier is READ_ONLY, and no privacy wrapper is in play (the request
    /// is not external). Any cache failure degrades to direct execution.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] with a stable code per the fixed taxonomy.
    pub fn execute(
        &self,
        request: &ToolRequest,
        policy: ExecutionPolicy,
        cache: Option<&Cache>,
        privacy: Option<&PrivacyWrapper>,
        cancel: &CancellationToken,
        task_id: Option<&TaskId>,
    ) -> Result<ToolOutcome, ToolError> {
        let registration = self
            .registry
            .get(&request.tool_name)
            .ok_or_else(|| ToolError::NotFound(request.tool_name.to_string()))?;

        let payload = registration.schema.validate(&request.payload)?;

        match registration.tier {
            PermissionTier::System => {
                return Err(ToolError::PermissionDenied(format!(
                    "{}: SYSTEM tier is denied",
                    request.tool_name
                )));
            }
            PermissionTier::WriteSafe if !policy.allow_write_safe => {
                return Err(ToolError::PermissionDenied(format!(
                    "{}: WRITE_SAFE requires explicit allowance",
                    request.tool_name
                )));
            }
            PermissionTier::WriteSafe | PermissionTier::ReadOnly => {}
        }

        let mut privacy_info = None;
        if request.external {
            let wrapper = privacy.ok_or_else(|| {
                ToolError::Configuration(format!(
                    "{}: external call without a privacy wrapper",
                    request.tool_name
                ))
            })?;
            let payload_value = Value::Object(payload.clone());
            let info = wrapper
                .gate_external(&request.tool_name, &payload_value, policy.allow_external, task_id)
                .map_err(|err| ToolError::PermissionDenied(err.to_string()))?;
            privacy_info = Some(info);
        }

        let cacheable = !request.external
            && registration.tier == PermissionTier::ReadOnly
            && cache.is_some_and(Cache::is_active);
        let cache_key = if cacheable {
            make_cache_key(
                TOOL_CACHE_PREFIX,
                &json!({
                    "tool_name": request.tool_name.as_str(),
                    "payload": Value::Object(payload.clone()),
                }),
            )
            .ok()
        } else {
            None
        };

        if let (Some(client), Some(key)) = (cache, cache_key.as_deref())
            && let Some(value) = client.get_json::<Value>(key, TOOL_CACHE_CATEGORY)
        {
            return Ok(ToolOutcome {
                value,
                cache_hit: true,
                privacy: None,
                redacted_result_text: None,
            });
        }

        if cancel.is_cancelled() {
            return Err(ToolError::Execution {
                code: "deadline_exceeded".to_string(),
                message: format!("{}: cancelled before dispatch", request.tool_name),
            });
        }

        let handler = registration
            .handler
            .as_ref()
            .ok_or_else(|| ToolError::NotImplemented(request.tool_name.to_string()))?;

        let value = handler.call(&payload, cancel).map_err(|err| ToolError::Execution {
            code: err.code,
            message: err.message,
        })?;

        let redacted_result_text = if request.external {
            privacy.map(|wrapper| wrapper.redact_result(&value, task_id))
        } else {
            None
        };

        if let (Some(client), Some(key)) = (cache, cache_key.as_deref()) {
            let _ = client.set_json(key, &value, self.tool_cache_ttl_seconds);
        }

        Ok(ToolOutcome {
            value,
            cache_hit: false,
            privacy: privacy_info,
            redacted_result_text,
        })
    }
}

// ============================================================================
// SECTION: Builtin Handlers
// ============================================================================

/// Extracts a required string field from a validated payload.
fn payload_str<'a>(payload: &'a ToolPayload, field: &str) -> Result<&'a str, HandlerError> {
    payload.get(field).and_then(Value::as_str).ok_or_else(|| {
        HandlerError::new("validation_error", format!("missing string field: {field}"))
    })
}

/// Fails with `deadline_exceeded` once cancellation is requested.
fn check_cancel(cancel: &CancellationToken, tool: &str) -> Result<(), HandlerError> {
    if cancel.is_cancelled() {
        return Err(HandlerError::new("deadline_exceeded", format!("{tool}: cancelled")));
    }
    Ok(())
}

/// Sandbox-backed `read_file` handler.
struct ReadFileTool {
    /// Shared sandbox.
    sandbox: Arc<Sandbox>,
}

impl ToolHandler for ReadFileTool {
    fn call(
        &self,
        payload: &ToolPayload,
        cancel: &CancellationToken,
    ) -> Result<Value, HandlerError> {
        check_cancel(cancel, "read_file")?;
        let path = payload_str(payload, "path")?;
        let content = self.sandbox.read_text(path)?;
        Ok(json!({ "path": path, "content": content }))
    }
}

/// Sandbox-backed `write_file` handler.
struct WriteFileTool {
    /// Shared sandbox.
    sandbox: Arc<Sandbox>,
}

impl ToolHandler for WriteFileTool {
    fn call(
        &self,
        payload: &ToolPayload,
        cancel: &CancellationToken,
    ) -> Result<Value, HandlerError> {
        check_cancel(cancel, "write_file")?;
        let path = payload_str(payload, "path")?;
        let content = payload_str(payload, "content")?;
        let bytes_written = self.sandbox.write_text(path, content)?;
        Ok(json!({ "path": path, "bytes_written": bytes_written }))
    }
}

/// Sandbox-backed `list_dir` handler.
struct ListDirTool {
    /// Shared sandbox.
    sandbox: Arc<Sandbox>,
}

impl ToolHandler for ListDirTool {
    fn call(
        &self,
        payload: &ToolPayload,
        cancel: &CancellationToken,
    ) -> Result<Value, HandlerError> {
        check_cancel(cancel, "list_dir")?;
        let path = payload_str(payload, "path")?;
        let entries = self.sandbox.list_dir(path)?;
        let encoded = serde_json::to_value(entries)
            .map_err(|err| HandlerError::new("execution_error", err.to_string()))?;
        Ok(json!({ "path": path, "entries": encoded }))
    }
}

/// Sandbox-backed `file_info` handler.
struct FileInfoTool {
    /// Shared sandbox.
    sandbox: Arc<Sandbox>,
}

impl ToolHandler for FileInfoTool {
    fn call(
        &self,
        payload: &ToolPayload,
        cancel: &CancellationToken,
    ) -> Result<Value, HandlerError> {
        check_cancel(cancel, "file_info")?;
        let path = payload_str(payload, "path")?;
        let info = self.sandbox.file_info(path)?;
        serde_json::to_value(info)
            .map_err(|err| HandlerError::new("execution_error", err.to_string()))
    }
}

/// Sandbox-backed `search_files` handler.
struct SearchFilesTool {
    /// Shared sandbox.
    sandbox: Arc<Sandbox>,
}

impl ToolHandler for SearchFilesTool {
    fn call(
        &self,
        payload: &ToolPayload,
        cancel: &CancellationToken,
    ) -> Result<Value, HandlerError> {
        check_cancel(cancel, "search_files")?;
        let root = payload_str(payload, "root")?;
        let glob = payload_str(payload, "glob")?;
        let matches = self.sandbox.search(root, glob)?;
        Ok(json!({ "root": root, "glob": glob, "matches": matches }))
    }
}
