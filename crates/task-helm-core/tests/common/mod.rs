// crates/task-helm-core/tests/common/mod.rs
// ============================================================================
// Module: Core Test Fixtures
// Description: Shared stubs and builders for controller-level tests.
// Purpose: Assemble a hermetic controller with deterministic capabilities.
// ============================================================================

//! ## Overview
//! Deterministic stand-ins for every injected capability: a scripted
//! language model, a byte-sum embedder, a pinned clock, and in-memory
//! stores. Controller fixtures wire them exactly the way a host would.

#![allow(
    dead_code,
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only helpers are permitted."
)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use task_helm_core::Cache;
use task_helm_core::CacheSettings;
use task_helm_core::Clock;
use task_helm_core::Controller;
use task_helm_core::ControllerConfig;
use task_helm_core::EmbedError;
use task_helm_core::FixedClock;
use task_helm_core::FlatVectorIndex;
use task_helm_core::HybridRetriever;
use task_helm_core::InMemoryCacheBackend;
use task_helm_core::InMemoryEpisodicStore;
use task_helm_core::InMemorySemanticMetadata;
use task_helm_core::InMemoryWorkingStateStore;
use task_helm_core::LanguageModel;
use task_helm_core::LlmError;
use task_helm_core::MemoryManager;
use task_helm_core::RetrievalConfig;
use task_helm_core::Sandbox;
use task_helm_core::SandboxConfig;
use task_helm_core::SemanticStore;
use task_helm_core::TextEmbedder;
use task_helm_core::Timestamp;
use task_helm_core::ToolExecutor;
use task_helm_core::ToolRegistry;
use task_helm_core::interfaces::EpisodicStore;
use task_helm_core::interfaces::WorkingStateStore;

/// A fixed, arbitrary test instant (2026-01-02T03:04:05Z).
pub const TEST_EPOCH_MS: i64 = 1_767_323_045_000;

/// Scripted language model: returns one canned reply, or fails every call.
pub struct StubLlm {
    /// Canned reply.
    reply: Option<String>,
    /// Prompts observed, for assertions.
    pub prompts: Mutex<Vec<String>>,
}

impl StubLlm {
    /// A model that always answers `reply`.
    #[must_use]
    pub fn always(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// A model that fails every call.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            reply: None,
            prompts: Mutex::new(Vec::new()),
        }
    }
}

impl LanguageModel for StubLlm {
    fn generate(
        &self,
        prompt: &str,
        _stop_tokens: &[String],
        _max_tokens: usize,
    ) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply
            .clone()
            .ok_or_else(|| LlmError::Unavailable("model runtime offline".to_string()))
    }
}

/// Deterministic embedder: maps text onto a small fixed-dimension vector
/// derived from byte sums, so equal text embeds equally.
pub struct StubEmbedder;

impl TextEmbedder for StubEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vector = [0.0_f32; 8];
        for (index, byte) in text.bytes().enumerate() {
            vector[index % 8] += f32::from(byte) / 255.0;
        }
        Ok(vector.to_vec())
    }
}

/// Assembled fixture pieces.
pub struct Fixture {
    /// Controller under test.
    pub controller: Controller,
    /// Shared memory facade.
    pub memory: Arc<MemoryManager>,
    /// Episodic store handle for assertions.
    pub episodic: Arc<InMemoryEpisodicStore>,
    /// Working state store handle for assertions.
    pub working: Arc<InMemoryWorkingStateStore>,
    /// Semantic store handle, when the fixture includes one.
    pub semantic: Option<Arc<SemanticStore>>,
    /// Pinned clock.
    pub clock: Arc<FixedClock>,
    /// Sandbox root for seeding files tool calls can touch.
    pub sandbox_root: PathBuf,
    /// Archive directory scratch (kept alive for the fixture's lifetime).
    pub archive_dir: tempfile::TempDir,
}

/// Builds a hermetic controller around a scripted model.
pub fn fixture_with_llm(llm: Arc<dyn LanguageModel>) -> Fixture {
    build_fixture(llm, false, false)
}

/// Builds a controller with cache, semantic store, and hybrid retriever.
pub fn fixture_with_retrieval(llm: Arc<dyn LanguageModel>) -> Fixture {
    build_fixture(llm, true, true)
}

/// Shared fixture assembly.
fn build_fixture(llm: Arc<dyn LanguageModel>, with_cache: bool, with_retrieval: bool) -> Fixture {
    let clock = Arc::new(FixedClock::new(Timestamp::from_unix_millis(TEST_EPOCH_MS)));
    let episodic = Arc::new(InMemoryEpisodicStore::new());
    let working = Arc::new(InMemoryWorkingStateStore::new());

    let semantic_scratch = tempfile::tempdir().expect("semantic scratch").keep();
    let semantic = with_retrieval.then(|| {
        Arc::new(SemanticStore::new(
            Arc::new(StubEmbedder),
            Box::new(FlatVectorIndex::new()),
            Arc::new(InMemorySemanticMetadata::new()),
            semantic_scratch.join("index.ann"),
        ))
    });

    let memory = Arc::new(MemoryManager::new(
        Arc::clone(&episodic) as Arc<dyn EpisodicStore>,
        Arc::clone(&working) as Arc<dyn WorkingStateStore>,
        semantic.clone(),
        Arc::clone(&clock) as Arc<dyn Clock>,
    ));

    let sandbox_root = tempfile::tempdir().expect("sandbox scratch").keep();
    let sandbox = Arc::new(
        Sandbox::new(SandboxConfig::read_only(&sandbox_root)).expect("sandbox"),
    );
    let registry = Arc::new(ToolRegistry::builtin(sandbox).expect("builtin registry"));
    let executor = Arc::new(ToolExecutor::new(registry));

    let archive_dir = tempfile::tempdir().expect("archive scratch");
    let config = ControllerConfig {
        archive_dir: archive_dir.path().to_path_buf(),
        ..ControllerConfig::default()
    };

    let mut controller = Controller::new(Arc::clone(&memory), llm, executor, config);
    if with_cache {
        controller = controller.with_cache(memory_cache(&clock));
    }
    if with_retrieval {
        let retriever = Arc::new(HybridRetriever::new(
            Arc::clone(&memory),
            RetrievalConfig::default(),
            Arc::clone(&clock) as Arc<dyn Clock>,
        ));
        controller = controller.with_retriever(retriever);
    }

    Fixture {
        controller,
        memory,
        episodic,
        working,
        semantic,
        clock,
        sandbox_root,
        archive_dir,
    }
}

/// Builds an in-memory cache over the pinned clock.
pub fn memory_cache(clock: &Arc<FixedClock>) -> Cache {
    Cache::new(
        Some(Arc::new(InMemoryCacheBackend::new())),
        CacheSettings::default(),
        Arc::clone(clock) as Arc<dyn Clock>,
    )
}
