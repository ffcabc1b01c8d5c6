// crates/task-helm-core/src/core/retrieval.rs
// ============================================================================
// Module: Task Helm Retrieval Model
// Description: Ranked retrieval results and hybrid retrieval configuration.
// Purpose: Enforce the [0,1] score invariants at construction boundaries.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Retrieval results are ranked units merged from the working-state,
//! semantic, and episodic sources. Scores live in `[0,1]` with higher
//! meaning better, and `final_score` is always derived from the weighted
//! relevance/recency formula; constructors reject any input that would
//! violate those invariants rather than clamping silently.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Sources
// ============================================================================

/// Origin of a retrieval result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalSource {
    /// Per-task working-state transcript.
    WorkingState,
    /// Vector similarity store.
    Semantic,
    /// Append-only episodic log.
    Episodic,
}

impl RetrievalSource {
    /// Returns the wire label for this source.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WorkingState => "working_state",
            Self::Semantic => "semantic",
            Self::Episodic => "episodic",
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when constructing retrieval values.
#[derive(Debug, Error, PartialEq)]
pub enum RetrievalError {
    /// A score fell outside `[0,1]` or was non-finite.
    #[error("score out of range for {field}: {value}")]
    ScoreOutOfRange {
        /// Offending score field.
        field: &'static str,
        /// Offending value.
        value: f64,
    },
    /// The query text is empty or whitespace.
    #[error("retrieval query must not be empty")]
    EmptyQuery,
}

impl RetrievalError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ScoreOutOfRange { .. } | Self::EmptyQuery => "invalid_argument",
        }
    }
}

// ============================================================================
// SECTION: Retrieval Result
// ============================================================================

/// One ranked retrieval unit.
///
/// # Invariants
/// - `relevance_score`, `recency_score`, and `final_score` are finite and in
///   `[0,1]`.
/// - `final_score` equals `relevance·w_relevance + recency·w_recency` for
///   the source's configured weights; it is never supplied independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Retrieved content text.
    pub content: String,
    /// Source the content came from.
    pub source: RetrievalSource,
    /// Relevance component in `[0,1]`.
    pub relevance_score: f64,
    /// Recency component in `[0,1]`.
    pub recency_score: f64,
    /// Weighted final score in `[0,1]`.
    pub final_score: f64,
    /// Source-specific metadata.
    pub metadata: Value,
}

impl RetrievalResult {
    /// Builds a result, deriving `final_score` from the supplied weights.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::ScoreOutOfRange`] when any component or the
    /// derived final score is non-finite or outside `[0,1]`.
    pub fn derive(
        content: impl Into<String>,
        source: RetrievalSource,
        relevance_score: f64,
        recency_score: f64,
        weights: SourceWeights,
        metadata: Value,
    ) -> Result<Self, RetrievalError> {
        check_unit_score("relevance_score", relevance_score)?;
        check_unit_score("recency_score", recency_score)?;
        let final_score =
            relevance_score * weights.relevance + recency_score * weights.recency;
        check_unit_score("final_score", final_score)?;
        Ok(Self {
            content: content.into(),
            source,
            relevance_score,
            recency_score,
            final_score,
            metadata,
        })
    }
}

/// Validates that a score is finite and within `[0,1]`.
fn check_unit_score(field: &'static str, value: f64) -> Result<(), RetrievalError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(RetrievalError::ScoreOutOfRange { field, value });
    }
    Ok(())
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Relevance/recency weight pair for one source.
///
/// # Invariants
/// - Both weights are finite, non-negative, and sum to at most 1.0 so the
///   derived final score stays in `[0,1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceWeights {
    /// Weight applied to the relevance component.
    pub relevance: f64,
    /// Weight applied to the recency component.
    pub recency: f64,
}

impl SourceWeights {
    /// Builds a weight pair, validating the `[0,1]` envelope.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::ScoreOutOfRange`] when a weight is negative,
    /// non-finite, or the pair sums above 1.0.
    pub fn new(relevance: f64, recency: f64) -> Result<Self, RetrievalError> {
        check_unit_score("w_relevance", relevance)?;
        check_unit_score("w_recency", recency)?;
        check_unit_score("w_relevance + w_recency", relevance + recency)?;
        Ok(Self { relevance, recency })
    }
}

/// Hybrid retriever configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Weights for working-state results.
    pub working_weights: SourceWeights,
    /// Weights for semantic results.
    pub semantic_weights: SourceWeights,
    /// Weights for episodic results.
    pub episodic_weights: SourceWeights,
    /// Number of most-recent working-state messages considered.
    pub max_working_state_messages: usize,
    /// Number of semantic hits requested.
    pub semantic_top_k: usize,
    /// Per-keyword episodic search limit.
    pub episodic_limit: usize,
    /// Recency half-life parameter in hours for timestamped sources.
    pub decay_hours: f64,
    /// Minimum final score a result must reach to be returned.
    pub min_final_score_threshold: f64,
    /// Maximum merged results returned.
    pub max_total_results: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            working_weights: SourceWeights {
                relevance: 0.3,
                recency: 0.7,
            },
            semantic_weights: SourceWeights {
                relevance: 0.9,
                recency: 0.1,
            },
            episodic_weights: SourceWeights {
                relevance: 0.7,
                recency: 0.3,
            },
            max_working_state_messages: 10,
            semantic_top_k: 5,
            episodic_limit: 20,
            decay_hours: 24.0,
            min_final_score_threshold: 0.0,
            max_total_results: 10,
        }
    }
}
