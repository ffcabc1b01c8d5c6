// crates/task-helm-core/src/runtime/cache.rs
// ============================================================================
// Module: Task Helm Cache
// Description: Deterministic-key, fail-open cache client with metrics.
// Purpose: Accelerate repeated lookups without ever becoming a prerequisite.
// Dependencies: crate::{core, interfaces}, serde, serde_json
// ============================================================================

//! ## Overview
//! The cache is an optimization, never a dependency: every operation is
//! fail-open, returning the "absent" result on any backend error, and every
//! caller must tolerate the cache being absent entirely. Keys are produced
//! only through the deterministic key policy: canonical JSON of the key
//! parts, a version tag baked into every key, and a SHA-256 fallback once
//! the encoded form exceeds the configured length cap.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::core::hashing::DEFAULT_HASH_ALGORITHM;
use crate::core::hashing::canonical_json_string;
use crate::core::hashing::hash_bytes;
use crate::core::time::Timestamp;
use crate::interfaces::CacheBackend;
use crate::interfaces::CacheBackendError;
use crate::interfaces::Clock;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Version tag baked into every cache key.
pub const CACHE_KEY_VERSION: &str = "v1";
/// Default maximum encoded key length before hashing kicks in.
pub const DEFAULT_MAX_KEY_LENGTH: usize = 240;
/// Default TTL in seconds for cache entries.
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 3_600;
/// Category label applied when callers pass an empty or whitespace category.
pub const GENERAL_CATEGORY: &str = "general";

// ============================================================================
// SECTION: Key Policy
// ============================================================================

/// Errors raised by the cache key policy.
#[derive(Debug, Error)]
pub enum CacheKeyError {
    /// Key parts could not be canonicalized (non-finite float or
    /// unserializable value).
    #[error("cache key parts are not canonicalizable: {0}")]
    NonCanonical(String),
}

impl CacheKeyError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NonCanonical(_) => "invalid_argument",
        }
    }
}

/// Builds a deterministic cache key with the default length cap.
///
/// # Errors
///
/// Returns [`CacheKeyError::NonCanonical`] when `parts` cannot be
/// canonicalized (for example, a non-finite float).
pub fn make_cache_key<T: Serialize + ?Sized>(
    prefix: &str,
    parts: &T,
) -> Result<String, CacheKeyError> {
    make_cache_key_with_limit(prefix, parts, DEFAULT_MAX_KEY_LENGTH)
}

/// Builds a deterministic cache key with an explicit length cap.
///
/// The encoded form is `{prefix}:{version}:{canonical-json}`; when its
/// length exceeds `max_key_length`, the JSON suffix is replaced by a
/// SHA-256 hex digest and the shape becomes `{prefix}:{version}:h:{hex}`.
/// A key exactly at the cap is not hashed.
///
/// # Errors
///
/// Returns [`CacheKeyError::NonCanonical`] when `parts` cannot be
/// canonicalized.
pub fn make_cache_key_with_limit<T: Serialize + ?Sized>(
    prefix: &str,
    parts: &T,
    max_key_length: usize,
) -> Result<String, CacheKeyError> {
    let canonical = canonical_json_string(parts)
        .map_err(|err| CacheKeyError::NonCanonical(err.to_string()))?;
    let encoded = format!("{prefix}:{CACHE_KEY_VERSION}:{canonical}");
    if encoded.len() <= max_key_length {
        return Ok(encoded);
    }
    let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, canonical.as_bytes());
    Ok(format!("{prefix}:{CACHE_KEY_VERSION}:h:{}", digest.value))
}

// ============================================================================
// SECTION: Metrics
// ============================================================================

/// In-process cache counters.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetrics {
    /// Successful lookups.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Stored entries.
    pub sets: u64,
    /// Deleted entries.
    pub deletes: u64,
    /// Backend errors swallowed by fail-open handling.
    pub errors: u64,
    /// Per-category hit counts.
    pub category_hits: BTreeMap<String, u64>,
    /// Per-category miss counts.
    pub category_misses: BTreeMap<String, u64>,
}

impl CacheMetrics {
    /// Records a hit under `category`.
    fn record_hit(&mut self, category: &str) {
        self.hits += 1;
        *self.category_hits.entry(normalize_category(category)).or_insert(0) += 1;
    }

    /// Records a miss under `category`.
    fn record_miss(&mut self, category: &str) {
        self.misses += 1;
        *self.category_misses.entry(normalize_category(category)).or_insert(0) += 1;
    }

    /// Builds a summary with raw rates and percent-formatted strings.
    #[must_use]
    pub fn summary(&self) -> CacheMetricsSummary {
        let lookups = self.hits + self.misses;
        #[allow(clippy::cast_precision_loss, reason = "rates tolerate rounding")]
        let hit_rate = if lookups == 0 { 0.0 } else { self.hits as f64 / lookups as f64 };
        let mut categories: BTreeMap<String, CategorySummary> = BTreeMap::new();
        for (name, hits) in &self.category_hits {
            categories.entry(name.clone()).or_insert_with(|| CategorySummary::new(name)).hits =
                *hits;
        }
        for (name, misses) in &self.category_misses {
            categories.entry(name.clone()).or_insert_with(|| CategorySummary::new(name)).misses =
                *misses;
        }
        let categories = categories
            .into_values()
            .map(|mut summary| {
                summary.hit_rate_percent = percent(summary.hits, summary.hits + summary.misses);
                summary
            })
            .collect();
        CacheMetricsSummary {
            hits: self.hits,
            misses: self.misses,
            sets: self.sets,
            deletes: self.deletes,
            errors: self.errors,
            hit_rate,
            hit_rate_percent: percent(self.hits, lookups),
            categories,
        }
    }
}

/// Per-category summary line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySummary {
    /// Normalized category name.
    pub name: String,
    /// Hit count.
    pub hits: u64,
    /// Miss count.
    pub misses: u64,
    /// Percent-formatted hit rate.
    pub hit_rate_percent: String,
}

impl CategorySummary {
    /// Creates an empty summary for a category.
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            hits: 0,
            misses: 0,
            hit_rate_percent: String::new(),
        }
    }
}

/// Snapshot summary of the cache counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetricsSummary {
    /// Successful lookups.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Stored entries.
    pub sets: u64,
    /// Deleted entries.
    pub deletes: u64,
    /// Backend errors swallowed by fail-open handling.
    pub errors: u64,
    /// Raw hit rate in `[0,1]`.
    pub hit_rate: f64,
    /// Percent-formatted hit rate.
    pub hit_rate_percent: String,
    /// Per-category summaries in sorted category order.
    pub categories: Vec<CategorySummary>,
}

/// Normalizes a category label: trimmed, empty/whitespace becomes `general`.
#[must_use]
pub fn normalize_category(category: &str) -> String {
    let trimmed = category.trim();
    if trimmed.is_empty() {
        GENERAL_CATEGORY.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Formats a ratio as a percent string with one decimal place.
fn percent(part: u64, whole: u64) -> String {
    if whole == 0 {
        return "0.0%".to_string();
    }
    #[allow(clippy::cast_precision_loss, reason = "rates tolerate rounding")]
    let rate = part as f64 / whole as f64 * 100.0;
    format!("{rate:.1}%")
}

// ============================================================================
// SECTION: Health
// ============================================================================

/// Cache health snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheHealth {
    /// Whether caching is enabled by configuration.
    pub enabled: bool,
    /// Whether the backend answered a ping.
    pub connected: bool,
    /// Human-readable status message.
    pub message: String,
}

// ============================================================================
// SECTION: Cache Client
// ============================================================================

/// Cache client settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    /// Master enable gate.
    pub enabled: bool,
    /// Default TTL in seconds.
    pub default_ttl_seconds: u64,
    /// Maximum encoded key length before hashing.
    pub max_key_length: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
        }
    }
}

/// Fail-open cache client.
///
/// # Invariants
/// - No backend error ever propagates to callers; the "absent" result is
///   returned and the error counter incremented instead.
/// - Keys handed to `get`/`set` are produced by the key policy above.
#[derive(Clone)]
pub struct Cache {
    /// Optional backend; absent means every operation is a no-op.
    backend: Option<Arc<dyn CacheBackend>>,
    /// Client settings.
    settings: CacheSettings,
    /// Injected time source for TTL arithmetic.
    clock: Arc<dyn Clock>,
    /// Shared counters.
    metrics: Arc<Mutex<CacheMetrics>>,
}

impl Cache {
    /// Creates a cache client.
    #[must_use]
    pub fn new(
        backend: Option<Arc<dyn CacheBackend>>,
        settings: CacheSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            settings,
            clock,
            metrics: Arc::new(Mutex::new(CacheMetrics::default())),
        }
    }

    /// Returns `true` when the cache can serve requests.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.settings.enabled && self.backend.is_some()
    }

    /// Returns the configured default TTL in seconds.
    #[must_use]
    pub const fn default_ttl_seconds(&self) -> u64 {
        self.settings.default_ttl_seconds
    }

    /// Fetches a value under the `general` category.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.get_categorized(key, GENERAL_CATEGORY)
    }

    /// Fetches a value, attributing the hit/miss to `category`.
    #[must_use]
    pub fn get_categorized(&self, key: &str, category: &str) -> Option<String> {
        let backend = self.active_backend()?;
        match backend.get(key, self.clock.now()) {
            Ok(Some(value)) => {
                self.with_metrics(|metrics| metrics.record_hit(category));
                Some(value)
            }
            Ok(None) => {
                self.with_metrics(|metrics| metrics.record_miss(category));
                None
            }
            Err(_) => {
                self.with_metrics(|metrics| metrics.errors += 1);
                None
            }
        }
    }

    /// Stores a value; returns `false` on inactive cache, zero TTL, or
    /// backend error.
    pub fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> bool {
        let Some(backend) = self.active_backend() else {
            return false;
        };
        if ttl_seconds == 0 {
            return false;
        }
        match backend.set(key, value, ttl_seconds, self.clock.now()) {
            Ok(()) => {
                self.with_metrics(|metrics| metrics.sets += 1);
                true
            }
            Err(_) => {
                self.with_metrics(|metrics| metrics.errors += 1);
                false
            }
        }
    }

    /// Deletes a key; returns whether an entry existed.
    pub fn delete(&self, key: &str) -> bool {
        let Some(backend) = self.active_backend() else {
            return false;
        };
        match backend.delete(key) {
            Ok(existed) => {
                if existed {
                    self.with_metrics(|metrics| metrics.deletes += 1);
                }
                existed
            }
            Err(_) => {
                self.with_metrics(|metrics| metrics.errors += 1);
                false
            }
        }
    }

    /// Deletes every key matching a `*`-wildcard pattern; returns the count.
    pub fn invalidate_pattern(&self, pattern: &str) -> u64 {
        let Some(backend) = self.active_backend() else {
            return 0;
        };
        match backend.delete_matching(pattern) {
            Ok(count) => {
                self.with_metrics(|metrics| metrics.deletes += count);
                count
            }
            Err(_) => {
                self.with_metrics(|metrics| metrics.errors += 1);
                0
            }
        }
    }

    /// Fetches and deserializes a JSON value.
    #[must_use]
    pub fn get_json<T: DeserializeOwned>(&self, key: &str, category: &str) -> Option<T> {
        let raw = self.get_categorized(key, category)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(_) => {
                self.with_metrics(|metrics| metrics.errors += 1);
                None
            }
        }
    }

    /// Serializes a value to stable JSON and stores it.
    pub fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: u64) -> bool {
        match canonical_json_string(value) {
            Ok(encoded) => self.set(key, &encoded, ttl_seconds),
            Err(_) => {
                self.with_metrics(|metrics| metrics.errors += 1);
                false
            }
        }
    }

    /// Reports cache health.
    #[must_use]
    pub fn health(&self) -> CacheHealth {
        if !self.settings.enabled {
            return CacheHealth {
                enabled: false,
                connected: false,
                message: "cache disabled by configuration".to_string(),
            };
        }
        match &self.backend {
            None => CacheHealth {
                enabled: true,
                connected: false,
                message: "no cache backend configured".to_string(),
            },
            Some(backend) => match backend.ping() {
                Ok(()) => CacheHealth {
                    enabled: true,
                    connected: true,
                    message: "ok".to_string(),
                },
                Err(err) => CacheHealth {
                    enabled: true,
                    connected: false,
                    message: err.to_string(),
                },
            },
        }
    }

    /// Snapshots the metrics counters.
    #[must_use]
    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.lock().map(|metrics| metrics.clone()).unwrap_or_default()
    }

    /// Returns the backend when the cache is active.
    fn active_backend(&self) -> Option<&Arc<dyn CacheBackend>> {
        if self.settings.enabled { self.backend.as_ref() } else { None }
    }

    /// Runs `update` against the metrics, ignoring lock poisoning.
    fn with_metrics(&self, update: impl FnOnce(&mut CacheMetrics)) {
        if let Ok(mut metrics) = self.metrics.lock() {
            update(&mut metrics);
        }
    }
}

// ============================================================================
// SECTION: In-Memory Backend
// ============================================================================

/// One stored entry with its expiry instant.
#[derive(Debug, Clone)]
struct StoredEntry {
    /// Stored value.
    value: String,
    /// Expiry instant in unix millis.
    expires_at_millis: i64,
}

/// In-process cache backend with TTL expiry against the injected clock.
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    /// Stored entries keyed by cache key.
    entries: Mutex<BTreeMap<String, StoredEntry>>,
}

impl InMemoryCacheBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBackend for InMemoryCacheBackend {
    fn get(
        &self,
        key: &str,
        now: Timestamp,
    ) -> Result<Option<String>, CacheBackendError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CacheBackendError::Operation("lock poisoned".into()))?;
        match entries.get(key) {
            Some(entry) if entry.expires_at_millis > now.unix_millis() => {
                Ok(Some(entry.value.clone()))
            }
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
        now: Timestamp,
    ) -> Result<(), CacheBackendError> {
        let ttl_millis = i64::try_from(ttl_seconds.saturating_mul(1_000)).unwrap_or(i64::MAX);
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CacheBackendError::Operation("lock poisoned".into()))?;
        entries.insert(
            key.to_string(),
            StoredEntry {
                value: value.to_string(),
                expires_at_millis: now.unix_millis().saturating_add(ttl_millis),
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, CacheBackendError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CacheBackendError::Operation("lock poisoned".into()))?;
        Ok(entries.remove(key).is_some())
    }

    fn delete_matching(&self, pattern: &str) -> Result<u64, CacheBackendError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CacheBackendError::Operation("lock poisoned".into()))?;
        let doomed: Vec<String> = entries
            .keys()
            .filter(|key| wildcard_match(pattern, key))
            .cloned()
            .collect();
        for key in &doomed {
            entries.remove(key);
        }
        Ok(u64::try_from(doomed.len()).unwrap_or(u64::MAX))
    }

    fn ping(&self) -> Result<(), CacheBackendError> {
        Ok(())
    }
}

/// Matches `pattern` (with `*` wildcards) against `key`.
fn wildcard_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }
    let mut remaining = key;
    for (index, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if index == 0 {
            let Some(rest) = remaining.strip_prefix(part) else {
                return false;
            };
            remaining = rest;
        } else if index == parts.len() - 1 {
            return remaining.ends_with(part);
        } else {
            let Some(found) = remaining.find(part) else {
                return false;
            };
            remaining = &remaining[found + part.len()..];
        }
    }
    // Pattern ends with '*' (last part empty) or every literal consumed.
    true
}
