// crates/task-helm-config/src/config.rs
// ============================================================================
// Module: Task Helm Configuration
// Description: Configuration loading and validation for Task Helm.
// Purpose: Provide strict, fail-closed config parsing with documented defaults.
// Dependencies: task-helm-core, dotenvy, serde, thiserror
// ============================================================================

//! ## Overview
//! Every tunable resolves in precedence order: process environment, then the
//! `.env` file, then built-in defaults. Booleans accept `1/true/yes/on` and
//! `0/false/no/off` case-insensitively and reject everything else. Retrieval
//! weights must be finite, in `[0,1]`, and sum to at most 1 per source.
//! `DEBUG` accepts `dev|release` only; any other value collapses to
//! `release` so arbitrary host values never propagate into behavior.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use task_helm_core::RetrievalConfig;
use task_helm_core::SourceWeights;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default `.env` filename resolved against the working directory.
const DEFAULT_ENV_FILE: &str = ".env";
/// Default data directory for persistent state.
const DEFAULT_DATA_DIR: &str = "data";
/// Default cache TTL in seconds.
const DEFAULT_CACHE_TTL_SECONDS: u64 = 3_600;
/// Default context cache TTL in seconds.
const DEFAULT_CONTEXT_CACHE_TTL_SECONDS: u64 = 3_600;
/// Default tool cache TTL in seconds.
const DEFAULT_TOOL_CACHE_TTL_SECONDS: u64 = 1_800;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A boolean option has an unrecognized value.
    #[error("option {key} expects a boolean, got {value:?}")]
    InvalidBool {
        /// Option name.
        key: String,
        /// Rejected value.
        value: String,
    },
    /// A numeric option failed to parse.
    #[error("option {key} expects a number, got {value:?}")]
    InvalidNumber {
        /// Option name.
        key: String,
        /// Rejected value.
        value: String,
    },
    /// A float option is non-finite or outside `[0,1]`.
    #[error("option {key} must be a float in [0,1], got {value:?}")]
    OutOfRange {
        /// Option name.
        key: String,
        /// Rejected value.
        value: String,
    },
    /// A weight pair sums above 1.0.
    #[error("weights for {source_name} sum above 1.0")]
    WeightSum {
        /// Source whose weights are invalid.
        source_name: &'static str,
    },
}

impl ConfigError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidBool { .. }
            | Self::InvalidNumber { .. }
            | Self::OutOfRange { .. }
            | Self::WeightSum { .. } => "configuration_error",
        }
    }
}

// ============================================================================
// SECTION: Debug Mode
// ============================================================================

/// Build-behavior mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugMode {
    /// Development mode with relaxed ergonomics.
    Dev,
    /// Release mode (default).
    #[default]
    Release,
}

impl DebugMode {
    /// Parses `dev|release`; anything else collapses to `Release`.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "dev" => Self::Dev,
            _ => Self::Release,
        }
    }
}

// ============================================================================
// SECTION: Parsing Helpers
// ============================================================================

/// Parses a boolean option: `1/true/yes/on` or `0/false/no/off`,
/// case-insensitive.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidBool`] for any other value.
pub fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Parses a positive-seconds option.
fn parse_seconds(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidNumber {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Parses a float constrained to `[0,1]`.
fn parse_unit_float(key: &str, value: &str) -> Result<f64, ConfigError> {
    let parsed = value.trim().parse::<f64>().map_err(|_| ConfigError::InvalidNumber {
        key: key.to_string(),
        value: value.to_string(),
    })?;
    if !parsed.is_finite() || !(0.0..=1.0).contains(&parsed) {
        return Err(ConfigError::OutOfRange {
            key: key.to_string(),
            value: value.to_string(),
        });
    }
    Ok(parsed)
}

// ============================================================================
// SECTION: Runtime Config
// ============================================================================

/// Resolved runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Master cache gate (`CACHE_ENABLED`).
    pub cache_enabled: bool,
    /// Default cache TTL in seconds (`CACHE_DEFAULT_TTL`).
    pub cache_default_ttl_seconds: u64,
    /// Context cache TTL in seconds (`CONTEXT_CACHE_TTL_SECONDS`).
    pub context_cache_ttl_seconds: u64,
    /// Tool cache TTL in seconds (`TOOL_CACHE_TTL_SECONDS`).
    pub tool_cache_ttl_seconds: u64,
    /// PII detection gate (`ENABLE_PII_DETECTION`).
    pub enable_pii_detection: bool,
    /// PII redaction gate (`ENABLE_PII_REDACTION`).
    pub enable_pii_redaction: bool,
    /// Security audit gate (`ENABLE_SECURITY_AUDIT`).
    pub enable_security_audit: bool,
    /// Hybrid retrieval gate (`ENABLE_HYBRID_RETRIEVAL`).
    pub enable_hybrid_retrieval: bool,
    /// Retrieval weights and thresholds.
    pub retrieval: RetrievalConfig,
    /// Debug mode (`DEBUG`).
    pub debug: DebugMode,
    /// Root directory for persistent state.
    pub data_dir: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_default_ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
            context_cache_ttl_seconds: DEFAULT_CONTEXT_CACHE_TTL_SECONDS,
            tool_cache_ttl_seconds: DEFAULT_TOOL_CACHE_TTL_SECONDS,
            enable_pii_detection: true,
            enable_pii_redaction: true,
            enable_security_audit: true,
            enable_hybrid_retrieval: false,
            retrieval: RetrievalConfig::default(),
            debug: DebugMode::Release,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }
}

impl RuntimeConfig {
    /// Loads configuration: process environment over `.env` over defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when any recognized option fails strict
    /// parsing.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env_file(Path::new(DEFAULT_ENV_FILE))
    }

    /// Loads configuration with an explicit `.env` path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when any recognized option fails strict
    /// parsing. A missing or unreadable `.env` file is not an error; the
    /// layer simply contributes nothing.
    pub fn load_with_env_file(env_file: &Path) -> Result<Self, ConfigError> {
        let mut resolved: BTreeMap<String, String> = BTreeMap::new();
        if let Ok(entries) = dotenvy::from_path_iter(env_file) {
            for entry in entries.flatten() {
                resolved.insert(entry.0, entry.1);
            }
        }
        for (key, value) in env::vars() {
            resolved.insert(key, value);
        }
        Self::from_map(&resolved)
    }

    /// Resolves configuration from an explicit key-value map (testable core
    /// of the loader).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when any recognized option fails strict
    /// parsing.
    pub fn from_map(options: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = options.get("CACHE_ENABLED") {
            config.cache_enabled = parse_bool("CACHE_ENABLED", value)?;
        }
        if let Some(value) = options.get("CACHE_DEFAULT_TTL") {
            config.cache_default_ttl_seconds = parse_seconds("CACHE_DEFAULT_TTL", value)?;
        }
        if let Some(value) = options.get("CONTEXT_CACHE_TTL_SECONDS") {
            config.context_cache_ttl_seconds =
                parse_seconds("CONTEXT_CACHE_TTL_SECONDS", value)?;
        }
        if let Some(value) = options.get("TOOL_CACHE_TTL_SECONDS") {
            config.tool_cache_ttl_seconds = parse_seconds("TOOL_CACHE_TTL_SECONDS", value)?;
        }
        if let Some(value) = options.get("ENABLE_PII_DETECTION") {
            config.enable_pii_detection = parse_bool("ENABLE_PII_DETECTION", value)?;
        }
        if let Some(value) = options.get("ENABLE_PII_REDACTION") {
            config.enable_pii_redaction = parse_bool("ENABLE_PII_REDACTION", value)?;
        }
        if let Some(value) = options.get("ENABLE_SECURITY_AUDIT") {
            config.enable_security_audit = parse_bool("ENABLE_SECURITY_AUDIT", value)?;
        }
        if let Some(value) = options.get("ENABLE_HYBRID_RETRIEVAL") {
            config.enable_hybrid_retrieval = parse_bool("ENABLE_HYBRID_RETRIEVAL", value)?;
        }
        if let Some(value) = options.get("DEBUG") {
            config.debug = DebugMode::parse(value);
        }
        if let Some(value) = options.get("DATA_DIR") {
            config.data_dir = PathBuf::from(value);
        }

        config.retrieval.working_weights = resolve_weights(
            options,
            "working",
            "RETRIEVAL_WORKING_W_RELEVANCE",
            "RETRIEVAL_WORKING_W_RECENCY",
            config.retrieval.working_weights,
        )?;
        config.retrieval.semantic_weights = resolve_weights(
            options,
            "semantic",
            "RETRIEVAL_SEMANTIC_W_RELEVANCE",
            "RETRIEVAL_SEMANTIC_W_RECENCY",
            config.retrieval.semantic_weights,
        )?;
        config.retrieval.episodic_weights = resolve_weights(
            options,
            "episodic",
            "RETRIEVAL_EPISODIC_W_RELEVANCE",
            "RETRIEVAL_EPISODIC_W_RECENCY",
            config.retrieval.episodic_weights,
        )?;
        if let Some(value) = options.get("RETRIEVAL_MIN_FINAL_SCORE") {
            config.retrieval.min_final_score_threshold =
                parse_unit_float("RETRIEVAL_MIN_FINAL_SCORE", value)?;
        }

        Ok(config)
    }

    /// Path of the episodic trace database.
    #[must_use]
    pub fn episodic_db_path(&self) -> PathBuf {
        self.data_dir.join("episodic").join("trace.db")
    }

    /// Directory of per-task working-state documents.
    #[must_use]
    pub fn working_state_dir(&self) -> PathBuf {
        self.data_dir.join("working_state")
    }

    /// Path of the semantic vector index file.
    #[must_use]
    pub fn semantic_index_path(&self) -> PathBuf {
        self.data_dir.join("semantic").join("index.ann")
    }

    /// Path of the semantic metadata database.
    #[must_use]
    pub fn semantic_metadata_path(&self) -> PathBuf {
        self.data_dir.join("semantic").join("metadata.db")
    }

    /// Path of the JSONL security audit log.
    #[must_use]
    pub fn audit_log_path(&self) -> PathBuf {
        self.data_dir.join("logs").join("security_audit.jsonl")
    }

    /// Directory of per-task archive documents.
    #[must_use]
    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir.join("archives")
    }
}

/// Resolves one source's weight pair, validating the `[0,1]` envelope.
fn resolve_weights(
    options: &BTreeMap<String, String>,
    source: &'static str,
    relevance_key: &str,
    recency_key: &str,
    current: SourceWeights,
) -> Result<SourceWeights, ConfigError> {
    let relevance = match options.get(relevance_key) {
        Some(value) => parse_unit_float(relevance_key, value)?,
        None => current.relevance,
    };
    let recency = match options.get(recency_key) {
        Some(value) => parse_unit_float(recency_key, value)?,
        None => current.recency,
    };
    SourceWeights::new(relevance, recency).map_err(|_| ConfigError::WeightSum { source_name: source })
}
