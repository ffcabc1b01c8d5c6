// crates/task-helm-core/src/runtime/semantic.rs
// ============================================================================
// Module: Task Helm Semantic Store
// Description: Vector index plus metadata with normalized similarity search.
// Purpose: Provide deterministic similarity recall with rebuild-on-corrupt.
// Dependencies: crate::{core, interfaces}, serde_json
// ============================================================================

//! ## Overview
//! The semantic store pairs an injected embedding model with a vector index
//! and a metadata table. Every add embeds the text, writes the metadata row
//! (vector included), inserts into the index, and persists the index file in
//! one logical transaction. Because the metadata rows carry their vectors,
//! a missing or corrupt index file is rebuilt from metadata on first use.
//! Similarity is `1/(1+L2_distance)`, always in `(0,1]`, and results order
//! by `(-similarity, vector_id)` for determinism. An empty store returns an
//! empty result set, never an error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::interfaces::EmbedError;
use crate::interfaces::IndexError;
use crate::interfaces::SemanticEntry;
use crate::interfaces::SemanticMetadataError;
use crate::interfaces::SemanticMetadataStore;
use crate::interfaces::TextEmbedder;
use crate::interfaces::VectorIndex;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Semantic store errors.
#[derive(Debug, Error)]
pub enum SemanticStoreError {
    /// Embedding the text failed.
    #[error(transparent)]
    Embed(#[from] EmbedError),
    /// Vector index failure.
    #[error(transparent)]
    Index(#[from] IndexError),
    /// Metadata table failure.
    #[error(transparent)]
    Metadata(#[from] SemanticMetadataError),
    /// Index lock poisoned.
    #[error("semantic store lock poisoned")]
    Lock,
}

impl SemanticStoreError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Embed(err) => err.code(),
            Self::Index(err) => err.code(),
            Self::Metadata(err) => err.code(),
            Self::Lock => "store_error",
        }
    }
}

// ============================================================================
// SECTION: Search Hits
// ============================================================================

/// One semantic search hit.
///
/// # Invariants
/// - `similarity` is `1/(1+distance)` and therefore in `(0,1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticHit {
    /// Index identifier of the hit.
    pub vector_id: i64,
    /// Stored text.
    pub text: String,
    /// Stored metadata.
    pub metadata: Value,
    /// Normalized similarity in `(0,1]`, higher is better.
    pub similarity: f64,
}

// ============================================================================
// SECTION: Flat Vector Index
// ============================================================================

/// Serialized form of the flat index file.
#[derive(Debug, Serialize, Deserialize)]
struct FlatIndexFile {
    /// Vector dimension; zero when empty.
    dimension: usize,
    /// `(id, vector)` pairs.
    entries: Vec<(i64, Vec<f32>)>,
}

/// Exact flat-scan vector index with JSON persistence.
///
/// Fulfills the [`VectorIndex`] contract without an external ANN library;
/// suitable for the corpus sizes a single-host assistant accumulates.
#[derive(Debug, Default)]
pub struct FlatVectorIndex {
    /// Vector dimension; zero until the first insert.
    dimension: usize,
    /// Stored vectors keyed by id.
    entries: BTreeMap<i64, Vec<f32>>,
}

impl FlatVectorIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorIndex for FlatVectorIndex {
    fn add(&mut self, id: i64, vector: &[f32]) -> Result<(), IndexError> {
        if vector.is_empty() {
            return Err(IndexError::Corrupt("empty vector".to_string()));
        }
        if self.dimension == 0 {
            self.dimension = vector.len();
        } else if vector.len() != self.dimension {
            return Err(IndexError::Corrupt(format!(
                "dimension mismatch: expected {}, got {}",
                self.dimension,
                vector.len()
            )));
        }
        self.entries.insert(id, vector.to_vec());
        Ok(())
    }

    fn search(&self, vector: &[f32], k: usize) -> Result<Vec<(i64, f32)>, IndexError> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if vector.len() != self.dimension {
            return Err(IndexError::Corrupt(format!(
                "query dimension mismatch: expected {}, got {}",
                self.dimension,
                vector.len()
            )));
        }
        let mut scored: Vec<(i64, f32)> = self
            .entries
            .iter()
            .map(|(id, stored)| {
                let distance = stored
                    .iter()
                    .zip(vector.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f32>()
                    .sqrt();
                (*id, distance)
            })
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }

    fn save(&self, path: &Path) -> Result<(), IndexError> {
        let file = FlatIndexFile {
            dimension: self.dimension,
            entries: self.entries.iter().map(|(id, vector)| (*id, vector.clone())).collect(),
        };
        let encoded =
            serde_json::to_vec(&file).map_err(|err| IndexError::Io(err.to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| IndexError::Io(err.to_string()))?;
        }
        fs::write(path, encoded).map_err(|err| IndexError::Io(err.to_string()))
    }

    fn load(&mut self, path: &Path) -> Result<(), IndexError> {
        let raw = fs::read(path).map_err(|err| IndexError::Io(err.to_string()))?;
        let file: FlatIndexFile =
            serde_json::from_slice(&raw).map_err(|err| IndexError::Corrupt(err.to_string()))?;
        for (_, vector) in &file.entries {
            if file.dimension == 0 || vector.len() != file.dimension {
                return Err(IndexError::Corrupt("inconsistent vector dimensions".to_string()));
            }
        }
        self.dimension = file.dimension;
        self.entries = file.entries.into_iter().collect();
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

// ============================================================================
// SECTION: In-Memory Metadata Store
// ============================================================================

/// In-memory metadata table for hermetic tests.
#[derive(Debug, Default)]
pub struct InMemorySemanticMetadata {
    /// Entries keyed by vector id.
    entries: Mutex<BTreeMap<i64, SemanticEntry>>,
}

impl InMemorySemanticMetadata {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SemanticMetadataStore for InMemorySemanticMetadata {
    fn insert(&self, entry: &SemanticEntry) -> Result<(), SemanticMetadataError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| SemanticMetadataError::Store("lock poisoned".to_string()))?;
        entries.insert(entry.vector_id, entry.clone());
        Ok(())
    }

    fn get(&self, vector_id: i64) -> Result<Option<SemanticEntry>, SemanticMetadataError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| SemanticMetadataError::Store("lock poisoned".to_string()))?;
        Ok(entries.get(&vector_id).cloned())
    }

    fn all_entries(&self) -> Result<Vec<SemanticEntry>, SemanticMetadataError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| SemanticMetadataError::Store("lock poisoned".to_string()))?;
        Ok(entries.values().cloned().collect())
    }

    fn next_vector_id(&self) -> Result<i64, SemanticMetadataError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| SemanticMetadataError::Store("lock poisoned".to_string()))?;
        Ok(entries.keys().next_back().copied().unwrap_or(0) + 1)
    }
}

// ============================================================================
// SECTION: Semantic Store
// ============================================================================

/// Guarded index state with its readiness flag.
struct IndexState {
    /// Vector index implementation.
    index: Box<dyn VectorIndex>,
    /// Whether load-or-rebuild has run.
    ready: bool,
}

/// Vector similarity store over embedder + index + metadata.
pub struct SemanticStore {
    /// Injected embedding model.
    embedder: Arc<dyn TextEmbedder>,
    /// Vector index behind a writer mutex; searches snapshot under the lock.
    state: Mutex<IndexState>,
    /// Metadata table paired with the index.
    metadata: Arc<dyn SemanticMetadataStore>,
    /// Index persistence path.
    index_path: PathBuf,
}

impl SemanticStore {
    /// Creates a store; the index is loaded or rebuilt lazily on first use.
    #[must_use]
    pub fn new(
        embedder: Arc<dyn TextEmbedder>,
        index: Box<dyn VectorIndex>,
        metadata: Arc<dyn SemanticMetadataStore>,
        index_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            embedder,
            state: Mutex::new(IndexState { index, ready: false }),
            metadata,
            index_path: index_path.into(),
        }
    }

    /// Adds a text with metadata, returning the assigned vector id.
    ///
    /// The metadata row (vector included) and the index insert form one
    /// logical transaction: after a successful return the index file and the
    /// metadata table agree.
    ///
    /// # Errors
    ///
    /// Returns [`SemanticStoreError`] when embedding, metadata insertion, or
    /// index persistence fails.
    pub fn add(&self, text: &str, metadata: Value) -> Result<i64, SemanticStoreError> {
        let vector = self.embedder.embed(text)?;
        let mut state = self.state.lock().map_err(|_| SemanticStoreError::Lock)?;
        Self::ensure_ready(&mut state, &self.metadata, &self.index_path)?;
        let vector_id = self.metadata.next_vector_id()?;
        self.metadata.insert(&SemanticEntry {
            vector_id,
            text: text.to_string(),
            metadata,
            vector: vector.clone(),
        })?;
        state.index.add(vector_id, &vector)?;
        state.index.save(&self.index_path)?;
        Ok(vector_id)
    }

    /// Searches for the `top_k` most similar entries.
    ///
    /// # Errors
    ///
    /// Returns [`SemanticStoreError`] when embedding or index access fails.
    /// An empty store yields `Ok(vec![])`.
    pub fn search_text(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SemanticHit>, SemanticStoreError> {
        let mut state = self.state.lock().map_err(|_| SemanticStoreError::Lock)?;
        Self::ensure_ready(&mut state, &self.metadata, &self.index_path)?;
        if state.index.is_empty() {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(query)?;
        let neighbors = state.index.search(&vector, top_k)?;
        let mut hits = Vec::with_capacity(neighbors.len());
        for (vector_id, distance) in neighbors {
            let Some(entry) = self.metadata.get(vector_id)? else {
                // Index ahead of metadata would mean a torn add; skip the row.
                continue;
            };
            hits.push(SemanticHit {
                vector_id,
                text: entry.text,
                metadata: entry.metadata,
                similarity: 1.0 / (1.0 + f64::from(distance)),
            });
        }
        hits.sort_by(|a, b| {
            b.similarity.total_cmp(&a.similarity).then(a.vector_id.cmp(&b.vector_id))
        });
        Ok(hits)
    }

    /// Returns the number of stored entries.
    ///
    /// # Errors
    ///
    /// Returns [`SemanticStoreError`] on metadata failure.
    pub fn len(&self) -> Result<usize, SemanticStoreError> {
        Ok(self.metadata.all_entries()?.len())
    }

    /// Returns `true` when no entries are stored.
    ///
    /// # Errors
    ///
    /// Returns [`SemanticStoreError`] on metadata failure.
    pub fn is_empty(&self) -> Result<bool, SemanticStoreError> {
        Ok(self.len()? == 0)
    }

    /// Cheap liveness probe for health reporting.
    ///
    /// # Errors
    ///
    /// Returns [`SemanticStoreError`] when the metadata table is unreachable.
    pub fn health(&self) -> Result<(), SemanticStoreError> {
        self.metadata.next_vector_id()?;
        Ok(())
    }

    /// Loads the index file, rebuilding from metadata when it is missing or
    /// corrupt while metadata rows exist.
    fn ensure_ready(
        state: &mut IndexState,
        metadata: &Arc<dyn SemanticMetadataStore>,
        index_path: &Path,
    ) -> Result<(), SemanticStoreError> {
        if state.ready {
            return Ok(());
        }
        if state.index.load(index_path).is_err() {
            let entries = metadata.all_entries()?;
            if !entries.is_empty() {
                for entry in &entries {
                    state.index.add(entry.vector_id, &entry.vector)?;
                }
                state.index.save(index_path)?;
            }
        }
        state.ready = true;
        Ok(())
    }
}
