// crates/task-helm-core/src/runtime/controller.rs
// ============================================================================
// Module: Task Helm Controller
// Description: Task lifecycle state machine and per-run trace assembly.
// Purpose: Drive one utterance through the FSM with a replayable trace.
// Dependencies: crate::{core, interfaces, runtime}, serde_json, tempfile
// ============================================================================

//! ## Overview
//! The controller is the single canonical execution path: every transport
//! calls `run(input, task_id?)` and nothing else mutates task state. Each
//! FSM transition appends exactly one decision row; each node event appends
//! a trace entry and a node decision row; the final trace entry reports the
//! whole-run latency baseline. Terminal states never transition again — a
//! further call on an archived task starts a new turn, keeps the transcript,
//! and appends a fresh snapshot to the task's archive document without
//! touching earlier snapshots. Cache and retriever failures degrade
//! silently; node failures drive the task to FAILED with the failing node
//! and code recorded in the last decision row.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::core::graph::NodeType;
use crate::core::graph::WorkflowGraph;
use crate::core::hashing::DEFAULT_HASH_ALGORITHM;
use crate::core::hashing::hash_canonical_json;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::TaskId;
use crate::core::record::ActionType;
use crate::core::record::ArchiveDocument;
use crate::core::record::ArchiveSnapshot;
use crate::core::record::RecordStatus;
use crate::core::task::Role;
use crate::core::task::TaskState;
use crate::core::task::TraceEvent;
use crate::core::task::TraceEventType;
use crate::core::task::TransitionError;
use crate::core::task::WorkingState;
use crate::core::task::canonical_trace;
use crate::interfaces::EpisodicError;
use crate::interfaces::LanguageModel;
use crate::interfaces::WorkingStateError;
use crate::runtime::cache::Cache;
use crate::runtime::compiler::PlanCompiler;
use crate::runtime::dag::DagError;
use crate::runtime::dag::DagExecutor;
use crate::runtime::dag::NodeEvent;
use crate::runtime::dag::NodeEventKind;
use crate::runtime::dag::RunBudget;
use crate::runtime::memory::MemoryManager;
use crate::runtime::nodes::ContextBuilderNode;
use crate::runtime::nodes::LlmWorkerNode;
use crate::runtime::nodes::NodeContext;
use crate::runtime::nodes::NodeError;
use crate::runtime::nodes::RouterNode;
use crate::runtime::nodes::ToolCallNode;
use crate::runtime::nodes::ValidatorConfig;
use crate::runtime::nodes::ValidatorNode;
use crate::runtime::nodes::WorkflowNode;
use crate::runtime::nodes::ctx_keys;
use crate::runtime::privacy::PrivacyWrapper;
use crate::runtime::retriever::HybridRetriever;
use crate::runtime::tools::ExecutionPolicy;
use crate::runtime::tools::ToolExecutor;
use crate::runtime::tools::ToolRequest;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Controller-level errors (infrastructure and programmer classes only;
/// node failures surface as `final_state = FAILED`, not as errors).
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The user input is empty or whitespace.
    #[error("user input must not be empty")]
    EmptyInput,
    /// Illegal FSM transition (programmer error).
    #[error(transparent)]
    Transition(#[from] TransitionError),
    /// Episodic store failure.
    #[error(transparent)]
    Episodic(#[from] EpisodicError),
    /// Working state store failure.
    #[error(transparent)]
    Working(#[from] WorkingStateError),
    /// Pre-execution graph failure.
    #[error(transparent)]
    Dag(#[from] DagError),
    /// Archive document failure.
    #[error("archive error: {0}")]
    Archive(String),
}

impl ControllerError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::EmptyInput => "invalid_argument",
            Self::Transition(err) => err.code(),
            Self::Episodic(err) => err.code(),
            Self::Working(err) => err.code(),
            Self::Dag(err) => err.code(),
            Self::Archive(_) => "store_error",
        }
    }
}

// ============================================================================
// SECTION: Requests & Reports
// ============================================================================

/// One task submission.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// User utterance.
    pub user_input: String,
    /// Existing task to resume, when present.
    pub task_id: Option<TaskId>,
    /// Optional tool request; its presence inserts the tool-call node.
    pub tool_call: Option<ToolRequest>,
    /// Optional run deadline.
    pub deadline: Option<Duration>,
}

impl RunRequest {
    /// Creates a request for a fresh task.
    #[must_use]
    pub fn new(user_input: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            task_id: None,
            tool_call: None,
            deadline: None,
        }
    }

    /// Targets an existing task.
    #[must_use]
    pub fn with_task_id(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Attaches a tool request.
    #[must_use]
    pub fn with_tool_call(mut self, request: ToolRequest) -> Self {
        self.tool_call = Some(request);
        self
    }

    /// Attaches a run deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Result of one `run` invocation.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Task identifier (created or resumed).
    pub task_id: TaskId,
    /// Final FSM state (`ARCHIVE` or `FAILED`).
    pub final_state: TaskState,
    /// Post-processed model output; empty when the run failed before it.
    pub llm_output: String,
    /// Ordered trace events, ending with the latency baseline entry.
    pub trace: Vec<TraceEvent>,
    /// Canonical form of the executed workflow graph.
    pub canonical_graph: WorkflowGraph,
    /// Stable code of the failure, when the run failed.
    pub error_code: Option<String>,
}

// ============================================================================
// SECTION: Health
// ============================================================================

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// All components healthy.
    Ok,
    /// At least one component is unhealthy.
    Degraded,
}

/// One component's health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Whether the component is usable.
    pub ok: bool,
    /// Human-readable detail.
    pub message: String,
}

/// Health report across controller components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Overall status.
    pub status: HealthStatus,
    /// Per-component detail keyed by component name.
    pub components: BTreeMap<String, ComponentHealth>,
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Directory for per-task archive documents.
    pub archive_dir: PathBuf,
    /// Validator gate configuration.
    pub validator: ValidatorConfig,
    /// Tool execution policy for workflow tool calls.
    pub execution_policy: ExecutionPolicy,
    /// TTL for cached context windows, in seconds.
    pub context_cache_ttl_seconds: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            archive_dir: PathBuf::from("data/archives"),
            validator: ValidatorConfig::default(),
            execution_policy: ExecutionPolicy::default(),
            context_cache_ttl_seconds: 3_600,
        }
    }
}

// ============================================================================
// SECTION: Controller
// ============================================================================

/// Deterministic task controller.
///
/// # Invariants
/// - One active `run` per task at a time (caller contract).
/// - Every FSM transition appends exactly one decision row.
/// - Terminal states never transition; a new call starts a new turn.
pub struct Controller {
    /// Shared memory facade.
    memory: Arc<MemoryManager>,
    /// Injected language model.
    llm: Arc<dyn LanguageModel>,
    /// Optional cache client.
    cache: Option<Cache>,
    /// Optional hybrid retriever.
    retriever: Option<Arc<HybridRetriever>>,
    /// Shared tool executor.
    executor: Arc<ToolExecutor>,
    /// Optional privacy wrapper for external tool calls.
    privacy: Option<Arc<PrivacyWrapper>>,
    /// Plan compiler.
    compiler: PlanCompiler,
    /// Controller configuration.
    config: ControllerConfig,
}

impl Controller {
    /// Creates a controller with the mandatory collaborators.
    #[must_use]
    pub fn new(
        memory: Arc<MemoryManager>,
        llm: Arc<dyn LanguageModel>,
        executor: Arc<ToolExecutor>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            memory,
            llm,
            cache: None,
            retriever: None,
            executor,
            privacy: None,
            compiler: PlanCompiler::new(),
            config,
        }
    }

    /// Attaches a cache client.
    #[must_use]
    pub fn with_cache(mut self, cache: Cache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Attaches a hybrid retriever.
    #[must_use]
    pub fn with_retriever(mut self, retriever: Arc<HybridRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Attaches a privacy wrapper.
    #[must_use]
    pub fn with_privacy(mut self, privacy: Arc<PrivacyWrapper>) -> Self {
        self.privacy = Some(privacy);
        self
    }

    /// Drives one utterance through the full lifecycle.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError`] only for infrastructure and programmer
    /// failures (empty input, store outages, illegal transitions, graph
    /// compilation defects). Node failures — including an unavailable
    /// language model — yield `Ok` with `final_state = FAILED`.
    pub fn run(&self, request: &RunRequest) -> Result<RunReport, ControllerError> {
        if request.user_input.trim().is_empty() {
            return Err(ControllerError::EmptyInput);
        }
        let run_started = Instant::now();
        let budget = RunBudget::new(request.deadline.map(|deadline| Instant::now() + deadline));
        let now = self.memory.clock().now();

        // Resolve or create the task and its working-state document.
        let task_id = request
            .task_id
            .clone()
            .unwrap_or_else(TaskId::generate);
        let mut document = match self.memory.working().load(&task_id)? {
            Some(existing) => existing,
            None => {
                let fresh = WorkingState::new(task_id.clone(), &request.user_input, now);
                self.memory.working().save(&fresh)?;
                fresh
            }
        };
        self.memory.append_message(&task_id, Role::User, &request.user_input)?;
        document = self.memory.working().load(&task_id)?.unwrap_or(document);
        let turn = u64::try_from(
            document.messages.iter().filter(|message| message.role == Role::User).count(),
        )
        .unwrap_or(1);

        let mut state = TaskState::Init;
        let mut trace: Vec<TraceEvent> = Vec::new();

        // INIT -> PLAN: classify intent and compile the graph.
        let intent = RouterNode::classify(&request.user_input);
        self.transition(
            &task_id,
            &mut state,
            TaskState::Plan,
            &format!("transition INIT->PLAN intent={}", intent.as_str()),
        )?;
        let graph = self.compiler.compile(intent, request.tool_call.is_some());

        // PLAN -> EXECUTE: run the DAG.
        self.transition(&task_id, &mut state, TaskState::Execute, "transition PLAN->EXECUTE")?;
        let implementations = self.build_nodes(&graph, &budget);
        let mut context = NodeContext::new();
        context.set(
            ctx_keys::USER_INPUT,
            serde_json::Value::String(request.user_input.clone()),
        );
        context.set(ctx_keys::TASK_ID, serde_json::Value::String(task_id.to_string()));
        context.set(ctx_keys::TURN, serde_json::Value::from(turn));
        if let Some(tool_call) = &request.tool_call {
            let encoded =
                serde_json::to_value(tool_call).unwrap_or(serde_json::Value::Null);
            context.set(ctx_keys::TOOL_REQUEST, encoded);
        }
        let dag_run = DagExecutor::new().execute(&graph, &implementations, context, &budget)?;
        for event in &dag_run.events {
            trace.push(self.to_trace_event(&task_id, state, event));
            self.record_node_event(&task_id, event)?;
        }

        let llm_output = dag_run
            .context
            .get_str(ctx_keys::LLM_OUTPUT)
            .unwrap_or_default()
            .to_string();

        let mut error_code = None;
        match dag_run.error {
            Some((node_id, node_type, failure)) => {
                if node_type == NodeType::Validator {
                    self.transition(
                        &task_id,
                        &mut state,
                        TaskState::Validate,
                        "transition EXECUTE->VALIDATE",
                    )?;
                }
                self.fail(&task_id, &mut state, &mut document, &node_id, &failure)?;
                error_code = Some(failure.code);
            }
            None => {
                self.transition(
                    &task_id,
                    &mut state,
                    TaskState::Validate,
                    "transition EXECUTE->VALIDATE",
                )?;
                self.transition(
                    &task_id,
                    &mut state,
                    TaskState::Commit,
                    "transition VALIDATE->COMMIT",
                )?;
                self.commit_document(&task_id, &mut document, &graph, state)?;
                self.transition(
                    &task_id,
                    &mut state,
                    TaskState::Archive,
                    "transition COMMIT->ARCHIVE",
                )?;
                self.write_archive_snapshot(
                    &task_id,
                    &document,
                    &graph,
                    &trace,
                    &llm_output,
                    turn,
                )?;
                document.status = TaskState::Archive.as_str().to_string();
                document.updated_at = self.memory.clock().now();
                self.memory.working().save(&document)?;
            }
        }

        trace.push(TraceEvent {
            task_id: task_id.clone(),
            controller_state: state,
            event_type: TraceEventType::LatencyBaseline,
            node_id: None,
            node_type: None,
            success: error_code.is_none(),
            elapsed_ns: u64::try_from(run_started.elapsed().as_nanos()).unwrap_or(u64::MAX),
            start_offset_ns: 0,
            error_code: None,
        });

        Ok(RunReport {
            task_id,
            final_state: state,
            llm_output,
            trace,
            canonical_graph: graph.canonicalize(),
            error_code,
        })
    }

    /// Reports component health.
    #[must_use]
    pub fn health(&self) -> HealthReport {
        let mut components = BTreeMap::new();
        components.insert(
            "llm".to_string(),
            ComponentHealth {
                ok: true,
                message: "configured".to_string(),
            },
        );
        let cache_health = self.cache.as_ref().map(Cache::health);
        components.insert(
            "cache".to_string(),
            cache_health.map_or_else(
                || ComponentHealth {
                    ok: true,
                    message: "absent (optional)".to_string(),
                },
                |health| ComponentHealth {
                    ok: !health.enabled || health.connected,
                    message: health.message,
                },
            ),
        );
        components.insert(
            "semantic".to_string(),
            self.memory.semantic().map_or_else(
                || ComponentHealth {
                    ok: true,
                    message: "absent (optional)".to_string(),
                },
                |store| match store.health() {
                    Ok(()) => ComponentHealth {
                        ok: true,
                        message: "ok".to_string(),
                    },
                    Err(err) => ComponentHealth {
                        ok: false,
                        message: err.to_string(),
                    },
                },
            ),
        );
        components.insert(
            "episodic".to_string(),
            match self.memory.episodic().health() {
                Ok(()) => ComponentHealth {
                    ok: true,
                    message: "ok".to_string(),
                },
                Err(err) => ComponentHealth {
                    ok: false,
                    message: err.to_string(),
                },
            },
        );
        let status = if components.values().all(|component| component.ok) {
            HealthStatus::Ok
        } else {
            HealthStatus::Degraded
        };
        HealthReport { status, components }
    }

    /// Builds the node implementations for a compiled graph.
    fn build_nodes(
        &self,
        graph: &WorkflowGraph,
        budget: &RunBudget,
    ) -> BTreeMap<NodeId, Arc<dyn WorkflowNode>> {
        let mut implementations: BTreeMap<NodeId, Arc<dyn WorkflowNode>> = BTreeMap::new();
        for node in &graph.nodes {
            let implementation: Arc<dyn WorkflowNode> = match node.node_type {
                NodeType::Router => Arc::new(RouterNode::new()),
                NodeType::ContextBuilder => Arc::new(
                    ContextBuilderNode::new(
                        Arc::clone(&self.memory),
                        self.cache.clone(),
                        self.retriever.clone(),
                    )
                    .with_cache_ttl(self.config.context_cache_ttl_seconds),
                ),
                NodeType::LlmWorker => Arc::new(LlmWorkerNode::new(
                    Arc::clone(&self.llm),
                    Arc::clone(&self.memory),
                )),
                NodeType::ToolCall => Arc::new(ToolCallNode::new(
                    Arc::clone(&self.executor),
                    Arc::clone(&self.memory),
                    self.cache.clone(),
                    self.privacy.clone(),
                    self.config.execution_policy,
                    budget.cancel_token(),
                )),
                NodeType::Validator => Arc::new(ValidatorNode::new(
                    self.config.validator.clone(),
                    Arc::clone(&self.memory),
                )),
            };
            implementations.insert(node.id.clone(), implementation);
        }
        implementations
    }

    /// Performs one FSM transition, appending exactly one decision row.
    fn transition(
        &self,
        task_id: &TaskId,
        state: &mut TaskState,
        to: TaskState,
        content: &str,
    ) -> Result<(), ControllerError> {
        if !state.can_transition(to) {
            return Err(ControllerError::Transition(TransitionError::Invalid {
                from: state.as_str(),
                to: to.as_str(),
            }));
        }
        *state = to;
        let status = if to == TaskState::Failed { RecordStatus::Err } else { RecordStatus::Ok };
        self.memory.record_decision(task_id, action_for(to), content, status)?;
        Ok(())
    }

    /// Drives the task to FAILED, recording the failing node and code.
    fn fail(
        &self,
        task_id: &TaskId,
        state: &mut TaskState,
        document: &mut WorkingState,
        node_id: &NodeId,
        failure: &NodeError,
    ) -> Result<(), ControllerError> {
        self.transition(
            task_id,
            state,
            TaskState::Failed,
            &format!("failed node={node_id} code={}", failure.code),
        )?;
        document.status = TaskState::Failed.as_str().to_string();
        document.current_step = Some(node_id.to_string());
        document.updated_at = self.memory.clock().now();
        self.memory.working().save(document)?;
        Ok(())
    }

    /// Persists the committed working-state document.
    fn commit_document(
        &self,
        task_id: &TaskId,
        document: &mut WorkingState,
        graph: &WorkflowGraph,
        state: TaskState,
    ) -> Result<(), ControllerError> {
        *document = self.memory.working().load(task_id)?.unwrap_or_else(|| document.clone());
        document.status = state.as_str().to_string();
        document.current_step = None;
        document.completed_steps =
            graph.canonicalize().nodes.iter().map(|node| node.id.to_string()).collect();
        document.next_steps = Vec::new();
        document.updated_at = self.memory.clock().now();
        self.memory.working().save(document)?;
        Ok(())
    }

    /// Appends a per-turn snapshot to the task's archive document.
    ///
    /// Earlier snapshots are never modified: the document is append-only and
    /// written atomically.
    fn write_archive_snapshot(
        &self,
        task_id: &TaskId,
        document: &WorkingState,
        graph: &WorkflowGraph,
        trace: &[TraceEvent],
        llm_output: &str,
        turn: u64,
    ) -> Result<(), ControllerError> {
        let raw = task_id.as_str();
        if raw.is_empty() || raw.contains(['/', '\\']) || raw == "." || raw == ".." {
            return Err(ControllerError::Archive(format!("unsafe task id: {raw}")));
        }
        fs::create_dir_all(&self.config.archive_dir)
            .map_err(|err| ControllerError::Archive(err.to_string()))?;
        let path = self.config.archive_dir.join(format!("{raw}.json"));
        let mut archive = match fs::read_to_string(&path) {
            Ok(existing) => serde_json::from_str::<ArchiveDocument>(&existing)
                .map_err(|err| ControllerError::Archive(err.to_string()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                ArchiveDocument::new(task_id.clone())
            }
            Err(err) => return Err(ControllerError::Archive(err.to_string())),
        };

        let canonical_graph = serde_json::to_value(graph.canonicalize())
            .map_err(|err| ControllerError::Archive(err.to_string()))?;
        let canonical_events = serde_json::to_value(canonical_trace(trace))
            .map_err(|err| ControllerError::Archive(err.to_string()))?;
        let mut snapshot = ArchiveSnapshot {
            turn: u32::try_from(turn).unwrap_or(u32::MAX),
            archived_at: self.memory.clock().now(),
            goal: document.goal.clone(),
            final_state: TaskState::Archive.as_str().to_string(),
            llm_output: llm_output.to_string(),
            transcript: document.messages.clone(),
            canonical_graph,
            canonical_trace: canonical_events,
            state_hash: None,
        };
        let digest = hash_canonical_json(DEFAULT_HASH_ALGORITHM, &snapshot)
            .map_err(|err| ControllerError::Archive(err.to_string()))?;
        snapshot.state_hash = Some(digest);
        archive.snapshots.push(snapshot);

        let encoded = serde_json::to_vec_pretty(&archive)
            .map_err(|err| ControllerError::Archive(err.to_string()))?;
        let mut temp = NamedTempFile::new_in(&self.config.archive_dir)
            .map_err(|err| ControllerError::Archive(err.to_string()))?;
        temp.write_all(&encoded).map_err(|err| ControllerError::Archive(err.to_string()))?;
        temp.persist(&path).map_err(|err| ControllerError::Archive(err.to_string()))?;
        Ok(())
    }

    /// Maps a node event into a trace event.
    fn to_trace_event(&self, task_id: &TaskId, state: TaskState, event: &NodeEvent) -> TraceEvent {
        TraceEvent {
            task_id: task_id.clone(),
            controller_state: state,
            event_type: match event.kind {
                NodeEventKind::Start => TraceEventType::NodeStart,
                NodeEventKind::End => TraceEventType::NodeEnd,
                NodeEventKind::Error => TraceEventType::NodeError,
            },
            node_id: Some(event.node_id.clone()),
            node_type: Some(event.node_type),
            success: event.success,
            elapsed_ns: event.elapsed_ns,
            start_offset_ns: event.start_offset_ns,
            error_code: event.error_code.clone(),
        }
    }

    /// Appends a node decision row for one node event.
    fn record_node_event(&self, task_id: &TaskId, event: &NodeEvent) -> Result<(), ControllerError> {
        let label = match event.kind {
            NodeEventKind::Start => "start",
            NodeEventKind::End => "end",
            NodeEventKind::Error => "error",
        };
        let content = event.error_code.as_ref().map_or_else(
            || format!("node={} event={label}", event.node_id),
            |code| format!("node={} event={label} code={code}", event.node_id),
        );
        let status = if event.success { RecordStatus::Ok } else { RecordStatus::Err };
        self.memory.record_decision(task_id, ActionType::Node, &content, status)?;
        Ok(())
    }
}

/// Maps a destination state to the decision-row action type.
const fn action_for(to: TaskState) -> ActionType {
    match to {
        TaskState::Init | TaskState::Plan => ActionType::Plan,
        TaskState::Execute => ActionType::Node,
        TaskState::Validate | TaskState::Commit => ActionType::Validate,
        TaskState::Archive => ActionType::Archive,
        TaskState::Failed => ActionType::Error,
    }
}
