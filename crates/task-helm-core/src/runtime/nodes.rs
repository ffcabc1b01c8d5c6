// crates/task-helm-core/src/runtime/nodes.rs
// ============================================================================
// Module: Task Helm Workflow Nodes
// Description: Router, context builder, LLM worker, tool call, and validator.
// Purpose: Implement the node contract: transform the context, never raise.
// Dependencies: crate::{core, interfaces, runtime}, regex, serde_json
// ============================================================================

//! ## Overview
//! Workflow nodes transform a shared context map. They are pure with respect
//! to that map except for well-defined calls into the memory manager, cache,
//! or tool executor. A node failure is a structured error the executor folds
//! into the context as `node_error`; nothing escapes uncaught. Secondary
//! capabilities (cache, retriever) degrade silently when absent or failing.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use crate::core::graph::NodeType;
use crate::core::identifiers::TaskId;
use crate::core::task::Role;
use crate::core::task::TranscriptMessage;
use crate::interfaces::CancellationToken;
use crate::interfaces::LanguageModel;
use crate::runtime::cache::Cache;
use crate::runtime::cache::make_cache_key;
use crate::runtime::memory::MemoryManager;
use crate::runtime::privacy::PrivacyWrapper;
use crate::runtime::retriever::HybridRetriever;
use crate::runtime::tools::ExecutionPolicy;
use crate::runtime::tools::ToolExecutor;
use crate::runtime::tools::ToolRequest;

// ============================================================================
// SECTION: Context Keys
// ============================================================================

/// Well-known context map keys.
pub mod ctx_keys {
    /// Raw user utterance.
    pub const USER_INPUT: &str = "user_input";
    /// Owning task identifier.
    pub const TASK_ID: &str = "task_id";
    /// Turn counter.
    pub const TURN: &str = "turn";
    /// Classified intent tag.
    pub const INTENT: &str = "intent";
    /// Assembled transcript messages.
    pub const MESSAGES: &str = "messages";
    /// Tool request supplied by the caller.
    pub const TOOL_REQUEST: &str = "tool_request";
    /// Tool outcome produced by the tool-call node.
    pub const TOOL_RESULT: &str = "tool_result";
    /// Final model output.
    pub const LLM_OUTPUT: &str = "llm_output";
    /// Stable code of the first node failure.
    pub const NODE_ERROR: &str = "node_error";
    /// Message of the first node failure.
    pub const NODE_ERROR_MESSAGE: &str = "node_error_message";
}

// ============================================================================
// SECTION: Node Context
// ============================================================================

/// Shared context map flowing through the workflow graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeContext {
    /// Underlying sorted key-value map.
    values: Map<String, Value>,
}

impl NodeContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a raw value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Reads a string value.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Reads an unsigned integer value.
    #[must_use]
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.values.get(key).and_then(Value::as_u64)
    }

    /// Writes a value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Returns `true` when a node error has been recorded.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.values.contains_key(ctx_keys::NODE_ERROR)
    }

    /// Records a node error on the context.
    pub fn set_error(&mut self, error: &NodeError) {
        self.values
            .insert(ctx_keys::NODE_ERROR.to_string(), Value::String(error.code.clone()));
        self.values.insert(
            ctx_keys::NODE_ERROR_MESSAGE.to_string(),
            Value::String(error.message.clone()),
        );
    }

    /// Reads the owning task identifier.
    #[must_use]
    pub fn task_id(&self) -> Option<TaskId> {
        self.get_str(ctx_keys::TASK_ID).map(TaskId::new)
    }
}

// ============================================================================
// SECTION: Node Contract
// ============================================================================

/// Structured node failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeError {
    /// Stable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl NodeError {
    /// Creates a node error.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for validation failures.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }
}

/// Workflow node contract: transform the context, never raise.
pub trait WorkflowNode: Send + Sync {
    /// Returns this node's type tag.
    fn node_type(&self) -> NodeType;

    /// Executes the node against the shared context.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError`] with a stable code; the executor folds it into
    /// the context and stops the run.
    fn execute(&self, context: &mut NodeContext) -> Result<(), NodeError>;
}

// ============================================================================
// SECTION: Router Node
// ============================================================================

/// Intent tags produced by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Conversational reply.
    Chat,
    /// Code assistance.
    Code,
    /// Sandboxed filesystem work.
    FileOps,
    /// Information lookup.
    Research,
}

impl Intent {
    /// Returns the wire label for this intent.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Code => "code",
            Self::FileOps => "file_ops",
            Self::Research => "research",
        }
    }

    /// Parses a wire label back into an intent.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "chat" => Some(Self::Chat),
            "code" => Some(Self::Code),
            "file_ops" => Some(Self::FileOps),
            "research" => Some(Self::Research),
            _ => None,
        }
    }
}

/// Keywords routing to the `code` intent.
const CODE_KEYWORDS: &[&str] =
    &["code", "function", "implement", "compile", "debug", "script", "refactor", "bug"];
/// Keywords routing to the `file_ops` intent.
const FILE_OPS_KEYWORDS: &[&str] =
    &["file", "files", "directory", "folder", "path", "save", "rename"];
/// Keywords routing to the `research` intent.
const RESEARCH_KEYWORDS: &[&str] =
    &["search", "research", "latest", "news", "lookup", "investigate"];

/// Deterministic keyword-rule intent classifier.
///
/// Rules evaluate in the fixed order `code`, `file_ops`, `research`; the
/// first category with a keyword hit wins, otherwise `chat`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouterNode;

impl RouterNode {
    /// Creates a router node.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Classifies an utterance into an intent tag.
    #[must_use]
    pub fn classify(input: &str) -> Intent {
        let words: Vec<String> = input
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|word| !word.is_empty())
            .map(str::to_string)
            .collect();
        let contains_any =
            |keywords: &[&str]| keywords.iter().any(|kw| words.iter().any(|w| w == kw));
        if contains_any(CODE_KEYWORDS) {
            Intent::Code
        } else if contains_any(FILE_OPS_KEYWORDS) {
            Intent::FileOps
        } else if contains_any(RESEARCH_KEYWORDS) {
            Intent::Research
        } else {
            Intent::Chat
        }
    }
}

impl WorkflowNode for RouterNode {
    fn node_type(&self) -> NodeType {
        NodeType::Router
    }

    fn execute(&self, context: &mut NodeContext) -> Result<(), NodeError> {
        let input = context
            .get_str(ctx_keys::USER_INPUT)
            .ok_or_else(|| NodeError::validation("missing user_input"))?;
        let intent = Self::classify(input);
        context.set(ctx_keys::INTENT, Value::String(intent.as_str().to_string()));
        Ok(())
    }
}

// ============================================================================
// SECTION: Context Builder Node
// ============================================================================

/// Cache key prefix for assembled context.
const CONTEXT_CACHE_PREFIX: &str = "context";
/// Metrics category for context cache traffic.
const CONTEXT_CACHE_CATEGORY: &str = "context";
/// Default number of transcript messages loaded into the context.
pub const DEFAULT_CONTEXT_MESSAGES: usize = 10;
/// Default TTL for cached context, in seconds.
pub const DEFAULT_CONTEXT_CACHE_TTL_SECONDS: u64 = 3_600;
/// Maximum retrieval snippets folded into the context message.
const MAX_RETRIEVAL_SNIPPETS: usize = 3;
/// Character budget per retrieval snippet.
const MAX_SNIPPET_CHARS: usize = 200;

/// Assembles transcript and retrieved context for the LLM worker.
pub struct ContextBuilderNode {
    /// Shared memory facade.
    memory: Arc<MemoryManager>,
    /// Optional cache for assembled transcripts.
    cache: Option<Cache>,
    /// Optional hybrid retriever.
    retriever: Option<Arc<HybridRetriever>>,
    /// Transcript window size.
    max_messages: usize,
    /// Context cache TTL in seconds.
    cache_ttl_seconds: u64,
}

impl ContextBuilderNode {
    /// Creates a context builder.
    #[must_use]
    pub fn new(
        memory: Arc<MemoryManager>,
        cache: Option<Cache>,
        retriever: Option<Arc<HybridRetriever>>,
    ) -> Self {
        Self {
            memory,
            cache,
            retriever,
            max_messages: DEFAULT_CONTEXT_MESSAGES,
            cache_ttl_seconds: DEFAULT_CONTEXT_CACHE_TTL_SECONDS,
        }
    }

    /// Overrides the context cache TTL.
    #[must_use]
    pub const fn with_cache_ttl(mut self, ttl_seconds: u64) -> Self {
        self.cache_ttl_seconds = ttl_seconds;
        self
    }

    /// Loads the transcript window, consulting the cache when available.
    fn load_messages(&self, task_id: &TaskId, turn: u64) -> Vec<TranscriptMessage> {
        let cache_key = self.cache.as_ref().and_then(|_| {
            make_cache_key(CONTEXT_CACHE_PREFIX, &json!({ "task_id": task_id, "turn": turn }))
                .ok()
        });
        if let (Some(cache), Some(key)) = (self.cache.as_ref(), cache_key.as_deref())
            && let Some(messages) =
                cache.get_json::<Vec<TranscriptMessage>>(key, CONTEXT_CACHE_CATEGORY)
        {
            return messages;
        }
        let messages = self
            .memory
            .working()
            .list_recent_messages(task_id, self.max_messages)
            .unwrap_or_default();
        if let (Some(cache), Some(key)) = (self.cache.as_ref(), cache_key.as_deref()) {
            let _ = cache.set_json(key, &messages, self.cache_ttl_seconds);
        }
        messages
    }

    /// Builds the single retrieved-context system message, when retrieval
    /// yields anything. Every failure path returns `None` (fail-safe).
    fn retrieved_context(&self, query: &str, task_id: &TaskId) -> Option<TranscriptMessage> {
        let retriever = self.retriever.as_ref()?;
        if query.trim().is_empty() {
            return None;
        }
        let results = retriever.retrieve(query, task_id).ok()?;
        if results.is_empty() {
            return None;
        }
        let mut content = String::from("Retrieved Context:");
        for result in results.iter().take(MAX_RETRIEVAL_SNIPPETS) {
            let mut snippet: String = result.content.chars().take(MAX_SNIPPET_CHARS).collect();
            if snippet.len() < result.content.len() {
                snippet.push_str(" ...");
            }
            content.push_str(&format!(
                "\n[{}] score={:.3}\n{}",
                result.source.as_str(),
                result.final_score,
                snippet
            ));
        }
        Some(TranscriptMessage {
            role: Role::System,
            content,
        })
    }
}

impl WorkflowNode for ContextBuilderNode {
    fn node_type(&self) -> NodeType {
        NodeType::ContextBuilder
    }

    fn execute(&self, context: &mut NodeContext) -> Result<(), NodeError> {
        let task_id = context
            .task_id()
            .ok_or_else(|| NodeError::validation("missing task_id"))?;
        let turn = context.get_u64(ctx_keys::TURN).unwrap_or(1);
        let mut messages = self.load_messages(&task_id, turn);

        let query = context.get_str(ctx_keys::USER_INPUT).unwrap_or_default().to_string();
        if let Some(retrieved) = self.retrieved_context(&query, &task_id) {
            // After the first existing system message, else at the front.
            let position = messages
                .iter()
                .position(|message| message.role == Role::System)
                .map_or(0, |index| index + 1);
            messages.insert(position, retrieved);
        }

        let encoded = serde_json::to_value(&messages)
            .map_err(|err| NodeError::new("execution_error", err.to_string()))?;
        context.set(ctx_keys::MESSAGES, encoded);
        Ok(())
    }
}

// ============================================================================
// SECTION: LLM Worker Node
// ============================================================================

/// Default completion cap in tokens.
pub const DEFAULT_MAX_COMPLETION_TOKENS: usize = 256;
/// Default prompt budget in characters.
pub const DEFAULT_MAX_PROMPT_CHARS: usize = 4_000;

/// Stop tokens every worker passes to the model.
#[must_use]
pub fn default_stop_tokens() -> Vec<String> {
    vec![
        "Instruction:".to_string(),
        "User:".to_string(),
        "<|eot_id|>".to_string(),
        "<|im_end|>".to_string(),
        "</s>".to_string(),
    ]
}

/// Name-recall normalization: first non-empty line `name is <Token>`.
#[allow(clippy::unwrap_used, reason = "pattern is a compile-time constant")]
static NAME_IS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bname\s+is\s+([A-Za-z][A-Za-z0-9_'-]*)").unwrap()
});

/// Calls the language model and post-processes its output.
pub struct LlmWorkerNode {
    /// Injected language model.
    llm: Arc<dyn LanguageModel>,
    /// Shared memory facade (assistant message emission).
    memory: Arc<MemoryManager>,
    /// Stop tokens passed to the model and enforced in post-processing.
    stop_tokens: Vec<String>,
    /// Completion cap in tokens.
    max_tokens: usize,
    /// Prompt budget in characters.
    max_prompt_chars: usize,
}

impl LlmWorkerNode {
    /// Creates an LLM worker with default bounds and stop tokens.
    #[must_use]
    pub fn new(llm: Arc<dyn LanguageModel>, memory: Arc<MemoryManager>) -> Self {
        Self {
            llm,
            memory,
            stop_tokens: default_stop_tokens(),
            max_tokens: DEFAULT_MAX_COMPLETION_TOKENS,
            max_prompt_chars: DEFAULT_MAX_PROMPT_CHARS,
        }
    }

    /// Renders one transcript message into prompt form.
    fn render_message(message: &TranscriptMessage) -> String {
        let label = match message.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => "System",
        };
        format!("{label}: {}\n", message.content)
    }

    /// Builds a bounded prompt: oldest messages drop first past the budget.
    ///
    /// The transcript already ends with the current user utterance when the
    /// context builder ran; it is appended here only when absent.
    fn build_prompt(&self, messages: &[TranscriptMessage], user_input: &str) -> String {
        let ends_with_input = messages
            .last()
            .is_some_and(|last| last.role == Role::User && last.content == user_input);
        let tail = if ends_with_input {
            "Assistant:".to_string()
        } else {
            format!("User: {user_input}\nAssistant:")
        };
        let mut start = 0;
        loop {
            let body: String = messages[start..].iter().map(Self::render_message).collect();
            let prompt = format!("{body}{tail}");
            if prompt.len() <= self.max_prompt_chars || start >= messages.len() {
                return prompt;
            }
            start += 1;
        }
    }

    /// Strips stop-token fragments, trims, and applies the name-recall rule
    /// to the first non-empty line.
    #[must_use]
    pub fn postprocess(&self, raw: &str) -> String {
        let mut cut = raw.len();
        for token in &self.stop_tokens {
            if let Some(found) = raw.find(token.as_str()) {
                cut = cut.min(found);
            }
        }
        let trimmed = raw[..cut].trim().to_string();
        let first_line = trimmed.lines().find(|line| !line.trim().is_empty());
        if let Some(line) = first_line
            && let Some(captures) = NAME_IS_RE.captures(line)
            && let Some(token) = captures.get(1)
        {
            return token.as_str().to_string();
        }
        trimmed
    }
}

impl WorkflowNode for LlmWorkerNode {
    fn node_type(&self) -> NodeType {
        NodeType::LlmWorker
    }

    fn execute(&self, context: &mut NodeContext) -> Result<(), NodeError> {
        let task_id = context
            .task_id()
            .ok_or_else(|| NodeError::validation("missing task_id"))?;
        let user_input = context
            .get_str(ctx_keys::USER_INPUT)
            .ok_or_else(|| NodeError::validation("missing user_input"))?
            .to_string();
        let messages: Vec<TranscriptMessage> = context
            .get(ctx_keys::MESSAGES)
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default();

        let prompt = self.build_prompt(&messages, &user_input);
        let raw = self
            .llm
            .generate(&prompt, &self.stop_tokens, self.max_tokens)
            .map_err(|err| NodeError::new(err.code(), err.to_string()))?;
        let output = self.postprocess(&raw);

        self.memory
            .append_message(&task_id, Role::Assistant, &output)
            .map_err(|err| NodeError::new(err.code(), err.to_string()))?;
        context.set(ctx_keys::LLM_OUTPUT, Value::String(output));
        Ok(())
    }
}

// ============================================================================
// SECTION: Tool Call Node
// ============================================================================

/// Dispatches the caller-supplied tool request through the executor.
///
/// This node only exists in graphs compiled with a tool request present;
/// WRITE_SAFE remains deny-by-default unless the run policy allows it.
pub struct ToolCallNode {
    /// Shared tool executor.
    executor: Arc<ToolExecutor>,
    /// Shared memory facade (tool-call record emission).
    memory: Arc<MemoryManager>,
    /// Optional result cache.
    cache: Option<Cache>,
    /// Optional privacy wrapper for external calls.
    privacy: Option<Arc<PrivacyWrapper>>,
    /// Run execution policy.
    policy: ExecutionPolicy,
    /// Shared cancellation signal.
    cancel: CancellationToken,
}

impl ToolCallNode {
    /// Creates a tool-call node.
    #[must_use]
    pub fn new(
        executor: Arc<ToolExecutor>,
        memory: Arc<MemoryManager>,
        cache: Option<Cache>,
        privacy: Option<Arc<PrivacyWrapper>>,
        policy: ExecutionPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor,
            memory,
            cache,
            privacy,
            policy,
            cancel,
        }
    }

    /// Appends the decision and tool-call rows for one invocation.
    fn record(&self, task_id: &TaskId, request: &ToolRequest, result_json: &str, ok: bool) {
        let status = if ok {
            crate::core::record::RecordStatus::Ok
        } else {
            crate::core::record::RecordStatus::Err
        };
        let content = format!("tool={} ok={ok}", request.tool_name);
        if let Ok(decision_id) = self.memory.record_decision(
            task_id,
            crate::core::record::ActionType::Tool,
            &content,
            status,
        ) {
            let params = crate::core::hashing::canonical_json_string(&request.payload)
                .unwrap_or_else(|_| request.payload.to_string());
            let _ = self.memory.record_tool_call(
                decision_id,
                &request.tool_name,
                &params,
                result_json,
            );
        }
    }
}

impl WorkflowNode for ToolCallNode {
    fn node_type(&self) -> NodeType {
        NodeType::ToolCall
    }

    fn execute(&self, context: &mut NodeContext) -> Result<(), NodeError> {
        let task_id = context
            .task_id()
            .ok_or_else(|| NodeError::validation("missing task_id"))?;
        let request: ToolRequest = context
            .get(ctx_keys::TOOL_REQUEST)
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
            .ok_or_else(|| NodeError::validation("missing tool_request"))?;

        let outcome = self.executor.execute(
            &request,
            self.policy,
            self.cache.as_ref(),
            self.privacy.as_deref(),
            &self.cancel,
            Some(&task_id),
        );
        match outcome {
            Ok(outcome) => {
                let encoded = serde_json::to_value(&outcome)
                    .map_err(|err| NodeError::new("execution_error", err.to_string()))?;
                self.record(&task_id, &request, &encoded.to_string(), true);
                context.set(ctx_keys::TOOL_RESULT, encoded);
                Ok(())
            }
            Err(error) => {
                self.record(&task_id, &request, error.code(), false);
                Err(NodeError::new(error.code().to_string(), error.to_string()))
            }
        }
    }
}

// ============================================================================
// SECTION: Validator Node
// ============================================================================

/// Validator gate configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorConfig {
    /// Maximum accepted output length in characters.
    pub max_output_chars: usize,
    /// Substrings that must not surface in the output.
    pub forbidden_tokens: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_output_chars: 4_000,
            forbidden_tokens: vec![
                "Instruction:".to_string(),
                "User:".to_string(),
                "<|eot_id|>".to_string(),
                "<|im_end|>".to_string(),
            ],
        }
    }
}

/// Gate-keeps the model output against the validator contract.
pub struct ValidatorNode {
    /// Gate configuration.
    config: ValidatorConfig,
    /// Shared memory facade (validation record emission).
    memory: Arc<MemoryManager>,
}

impl ValidatorNode {
    /// Creates a validator node.
    #[must_use]
    pub const fn new(config: ValidatorConfig, memory: Arc<MemoryManager>) -> Self {
        Self { config, memory }
    }

    /// Returns the failure reason for an output, when invalid.
    fn violation(&self, output: &str) -> Option<String> {
        if output.trim().is_empty() {
            return Some("empty output".to_string());
        }
        let chars = output.chars().count();
        if chars > self.config.max_output_chars {
            return Some(format!(
                "output too large: {chars} chars (max {})",
                self.config.max_output_chars
            ));
        }
        for token in &self.config.forbidden_tokens {
            if output.contains(token.as_str()) {
                return Some(format!("forbidden token surfaced: {token}"));
            }
        }
        None
    }
}

impl WorkflowNode for ValidatorNode {
    fn node_type(&self) -> NodeType {
        NodeType::Validator
    }

    fn execute(&self, context: &mut NodeContext) -> Result<(), NodeError> {
        let task_id = context
            .task_id()
            .ok_or_else(|| NodeError::validation("missing task_id"))?;
        let output = context.get_str(ctx_keys::LLM_OUTPUT).unwrap_or_default().to_string();
        match self.violation(&output) {
            None => {
                let node_id = crate::core::identifiers::NodeId::new("validator");
                let _ = self.memory.record_validation(&task_id, Some(&node_id), true, "ok");
                Ok(())
            }
            Some(reason) => {
                let node_id = crate::core::identifiers::NodeId::new("validator");
                let _ = self.memory.record_validation(&task_id, Some(&node_id), false, &reason);
                Err(NodeError::validation(reason))
            }
        }
    }
}
