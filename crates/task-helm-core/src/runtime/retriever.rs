// crates/task-helm-core/src/runtime/retriever.rs
// ============================================================================
// Module: Task Helm Hybrid Retriever
// Description: Unified ranking across working, semantic, and episodic memory.
// Purpose: Merge heterogeneous recall into one deterministic [0,1] ranking.
// Dependencies: crate::{core, interfaces, runtime}, serde_json
// ============================================================================

//! ## Overview
//! The hybrid retriever scores each source on `(relevance, recency)`, both
//! in `[0,1]`, combines them with per-source weights, filters by threshold,
//! and sorts with a content-hash tie-break so equal scores still order
//! deterministically. A failing or empty source contributes zero results,
//! never an error; only an empty query is rejected.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use serde_json::json;

use crate::core::hashing::content_hash_hex;
use crate::core::identifiers::TaskId;
use crate::core::retrieval::RetrievalConfig;
use crate::core::retrieval::RetrievalError;
use crate::core::retrieval::RetrievalResult;
use crate::core::retrieval::RetrievalSource;
use crate::core::time::Timestamp;
use crate::interfaces::Clock;
use crate::runtime::memory::MemoryManager;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Minimum keyword length for episodic search extraction.
const MIN_KEYWORD_LENGTH: usize = 4;
/// Recency assigned when a source entry carries no timestamp.
const UNKNOWN_RECENCY: f64 = 0.5;
/// Floor of the exponential recency decay.
const RECENCY_FLOOR: f64 = 0.1;

// ============================================================================
// SECTION: Hybrid Retriever
// ============================================================================

/// Unified retriever over the three memory layers.
pub struct HybridRetriever {
    /// Shared memory facade.
    memory: Arc<MemoryManager>,
    /// Scoring configuration.
    config: RetrievalConfig,
    /// Injected time source for recency scoring.
    clock: Arc<dyn Clock>,
}

impl HybridRetriever {
    /// Creates a retriever.
    #[must_use]
    pub fn new(memory: Arc<MemoryManager>, config: RetrievalConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            memory,
            config,
            clock,
        }
    }

    /// Retrieves and ranks context for `query` within `task_id`'s scope.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::EmptyQuery`] for empty or whitespace
    /// queries. Source failures degrade to empty contributions.
    pub fn retrieve(
        &self,
        query: &str,
        task_id: &TaskId,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        if query.trim().is_empty() {
            return Err(RetrievalError::EmptyQuery);
        }
        let now = self.clock.now();
        let mut merged = Vec::new();
        merged.extend(self.working_results(query, task_id));
        merged.extend(self.semantic_results(query, now));
        merged.extend(self.episodic_results(query, now));

        merged.retain(|result| result.final_score >= self.config.min_final_score_threshold);
        merged.sort_by(|a, b| {
            b.final_score
                .total_cmp(&a.final_score)
                .then_with(|| a.source.as_str().cmp(b.source.as_str()))
                .then_with(|| content_hash_hex(&a.content).cmp(&content_hash_hex(&b.content)))
        });
        merged.truncate(self.config.max_total_results);
        Ok(merged)
    }

    /// Scores the most recent working-state messages.
    ///
    /// Relevance is the fraction of query words present in the message;
    /// recency decays from 1.0 (newest) to 0.1 (oldest) by position.
    fn working_results(&self, query: &str, task_id: &TaskId) -> Vec<RetrievalResult> {
        let messages = self
            .memory
            .working()
            .list_recent_messages(task_id, self.config.max_working_state_messages)
            .unwrap_or_default();
        let total = messages.len();
        if total == 0 {
            return Vec::new();
        }
        let query_words: Vec<String> =
            query.split_whitespace().map(str::to_lowercase).collect();
        let mut results = Vec::new();
        for (position, message) in messages.iter().enumerate() {
            let haystack = message.content.to_lowercase();
            let matched =
                query_words.iter().filter(|word| haystack.contains(word.as_str())).count();
            #[allow(clippy::cast_precision_loss, reason = "scores tolerate rounding")]
            let relevance = if query_words.is_empty() {
                0.0
            } else {
                (matched as f64 / query_words.len() as f64).min(1.0)
            };
            #[allow(clippy::cast_precision_loss, reason = "scores tolerate rounding")]
            let recency = if total == 1 {
                1.0
            } else {
                RECENCY_FLOOR + 0.9 * (position as f64 / (total - 1) as f64)
            };
            let derived = RetrievalResult::derive(
                message.content.clone(),
                RetrievalSource::WorkingState,
                relevance,
                recency,
                self.config.working_weights,
                json!({ "role": message.role.as_str(), "position": position }),
            );
            if let Ok(result) = derived {
                results.push(result);
            }
        }
        results
    }

    /// Scores semantic similarity hits.
    fn semantic_results(&self, query: &str, now: Timestamp) -> Vec<RetrievalResult> {
        let Some(store) = self.memory.semantic() else {
            return Vec::new();
        };
        let hits = store.search_text(query, self.config.semantic_top_k).unwrap_or_default();
        let mut results = Vec::new();
        for hit in hits {
            let relevance = hit.similarity.clamp(0.0, 1.0);
            let recency = self.recency_from_metadata(&hit.metadata, now);
            let derived = RetrievalResult::derive(
                hit.text,
                RetrievalSource::Semantic,
                relevance,
                recency,
                self.config.semantic_weights,
                json!({ "vector_id": hit.vector_id, "similarity": hit.similarity }),
            );
            if let Ok(result) = derived {
                results.push(result);
            }
        }
        results
    }

    /// Scores episodic decisions matched by extracted keywords.
    ///
    /// Keywords are the case-folded query words longer than three chars;
    /// each keyword is searched independently and the hits unioned by
    /// decision id. Relevance is the fraction of keywords present in the
    /// decision content.
    fn episodic_results(&self, query: &str, now: Timestamp) -> Vec<RetrievalResult> {
        let keywords: Vec<String> = {
            let mut seen = BTreeSet::new();
            query
                .split_whitespace()
                .map(str::to_lowercase)
                .filter(|word| word.len() >= MIN_KEYWORD_LENGTH)
                .filter(|word| seen.insert(word.clone()))
                .collect()
        };
        if keywords.is_empty() {
            return Vec::new();
        }
        let mut seen_ids = BTreeSet::new();
        let mut rows = Vec::new();
        for keyword in &keywords {
            let found = self
                .memory
                .episodic()
                .search_decisions(keyword, None, self.config.episodic_limit)
                .unwrap_or_default();
            for row in found {
                if seen_ids.insert(row.id) {
                    rows.push(row);
                }
            }
        }
        let mut results = Vec::new();
        for row in rows {
            let haystack = row.content.to_lowercase();
            let matched =
                keywords.iter().filter(|keyword| haystack.contains(keyword.as_str())).count();
            #[allow(clippy::cast_precision_loss, reason = "scores tolerate rounding")]
            let relevance = (matched as f64 / keywords.len() as f64).min(1.0);
            let recency = self.decayed_recency(row.timestamp, now);
            let derived = RetrievalResult::derive(
                row.content.clone(),
                RetrievalSource::Episodic,
                relevance,
                recency,
                self.config.episodic_weights,
                json!({
                    "decision_id": row.id,
                    "task_id": row.task_id.as_str(),
                    "action_type": row.action_type.as_str(),
                }),
            );
            if let Ok(result) = derived {
                results.push(result);
            }
        }
        results
    }

    /// Extracts a recency score from entry metadata.
    ///
    /// Accepts a `timestamp` key holding either unix millis or an RFC 3339
    /// string; anything else scores the unknown-recency constant.
    fn recency_from_metadata(&self, metadata: &Value, now: Timestamp) -> f64 {
        let stamp = metadata.get("timestamp").and_then(|value| match value {
            Value::Number(number) => number.as_i64().map(Timestamp::from_unix_millis),
            Value::String(text) => Timestamp::parse_rfc3339(text).ok(),
            _ => None,
        });
        stamp.map_or(UNKNOWN_RECENCY, |stamp| self.decayed_recency(stamp, now))
    }

    /// Exponential decay `exp(-age_hours / decay_hours)` clamped to
    /// `[0.1, 1.0]`.
    fn decayed_recency(&self, stamp: Timestamp, now: Timestamp) -> f64 {
        let age_hours = stamp.age_hours(now);
        let decay = if self.config.decay_hours > 0.0 { self.config.decay_hours } else { 1.0 };
        (-age_hours / decay).exp().clamp(RECENCY_FLOOR, 1.0)
    }
}
