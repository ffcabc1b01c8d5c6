// crates/task-helm-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Episodic & Semantic Stores
// Description: Durable append-only log and semantic metadata in SQLite WAL.
// Purpose: Persist decisions, tool calls, validations, and vector metadata.
// Dependencies: task-helm-core, rusqlite, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This module implements the durable stores over `SQLite`. The episodic log
//! is strictly append-only: the schema and this code expose no update or
//! delete path, rows are stamped with both unix-milli and RFC 3339 forms of
//! their timestamp, and search is a parameterized case-insensitive substring
//! match ordered newest first. Writers serialize on a process-local mutex on
//! top of `SQLite`'s own transaction; `synchronous=FULL` makes every append
//! durable before the call returns. The semantic metadata table stores each
//! entry's embedding vector as JSON so the paired vector index can be
//! rebuilt when its file is missing or corrupt.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;
use task_helm_core::NodeId;
use task_helm_core::TaskId;
use task_helm_core::ToolName;
use task_helm_core::core::record::ActionType;
use task_helm_core::core::record::DecisionRecord;
use task_helm_core::core::record::RecordStatus;
use task_helm_core::core::record::ToolCallRecord;
use task_helm_core::core::time::Timestamp;
use task_helm_core::interfaces::EpisodicError;
use task_helm_core::interfaces::EpisodicStore;
use task_helm_core::interfaces::SemanticEntry;
use task_helm_core::interfaces::SemanticMetadataError;
use task_helm_core::interfaces::SemanticMetadataStore;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the stores.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Configuration for the `SQLite` stores.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
}

impl SqliteStoreConfig {
    /// Creates a config for `path` with the default busy timeout.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages avoid embedding raw row payloads.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: found {found}, expected {expected}")]
    VersionMismatch {
        /// Version found in the database file.
        found: i64,
        /// Version this build expects.
        expected: i64,
    },
    /// Invalid stored data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
}

impl From<rusqlite::Error> for SqliteStoreError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Db(error.to_string())
    }
}

impl From<SqliteStoreError> for EpisodicError {
    fn from(error: SqliteStoreError) -> Self {
        Self::Store(error.to_string())
    }
}

impl From<SqliteStoreError> for SemanticMetadataError {
    fn from(error: SqliteStoreError) -> Self {
        Self::Store(error.to_string())
    }
}

// ============================================================================
// SECTION: Connection Setup
// ============================================================================

/// Opens a connection with WAL, full synchronous durability, and the busy
/// timeout applied.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    if let Some(parent) = config.path.parent() {
        fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))?;
    }
    let connection = Connection::open(&config.path)?;
    connection.pragma_update(None, "journal_mode", "wal")?;
    connection.pragma_update(None, "synchronous", "full")?;
    connection.pragma_update(None, "foreign_keys", "on")?;
    #[allow(clippy::cast_possible_wrap, reason = "timeouts are far below i64::MAX")]
    connection.pragma_update(None, "busy_timeout", config.busy_timeout_ms as i64)?;
    Ok(connection)
}

/// Validates or stamps the schema version.
fn check_schema_version(connection: &Connection) -> Result<(), SqliteStoreError> {
    let found: i64 =
        connection.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if found == 0 {
        connection.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        return Ok(());
    }
    if found != SCHEMA_VERSION {
        return Err(SqliteStoreError::VersionMismatch {
            found,
            expected: SCHEMA_VERSION,
        });
    }
    Ok(())
}

/// Escapes `LIKE` wildcards in a user query.
fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Rejects empty or whitespace search queries.
fn validate_query(query: &str) -> Result<(), EpisodicError> {
    if query.trim().is_empty() {
        return Err(EpisodicError::EmptyQuery);
    }
    Ok(())
}

// ============================================================================
// SECTION: Episodic Store
// ============================================================================

/// `SQLite`-backed append-only episodic log.
///
/// # Invariants
/// - No update or delete statement exists anywhere in this type.
/// - Row ids are `AUTOINCREMENT` and therefore monotone per table.
/// - Connection access is serialized through a mutex.
pub struct SqliteEpisodicStore {
    /// Shared connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteEpisodicStore {
    /// Opens (creating as needed) the episodic log database.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the file cannot be opened, the
    /// schema version mismatches, or table creation fails.
    pub fn new(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        let connection = open_connection(config)?;
        check_schema_version(&connection)?;
        connection.execute_batch(
            "CREATE TABLE IF NOT EXISTS decisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                action_type TEXT NOT NULL,
                content TEXT NOT NULL,
                status TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                timestamp_rfc3339 TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_decisions_task_id ON decisions (task_id);
            CREATE INDEX IF NOT EXISTS idx_decisions_action_type ON decisions (action_type);
            CREATE INDEX IF NOT EXISTS idx_decisions_id_desc ON decisions (id DESC);
            CREATE TABLE IF NOT EXISTS tool_calls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                decision_id INTEGER NOT NULL REFERENCES decisions (id),
                tool_name TEXT NOT NULL,
                params TEXT NOT NULL,
                result TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                timestamp_rfc3339 TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tool_calls_decision_id ON tool_calls (decision_id);
            CREATE INDEX IF NOT EXISTS idx_tool_calls_tool_name ON tool_calls (tool_name);
            CREATE INDEX IF NOT EXISTS idx_tool_calls_id_desc ON tool_calls (id DESC);
            CREATE TABLE IF NOT EXISTS validations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                node_id TEXT,
                passed INTEGER NOT NULL,
                detail TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                timestamp_rfc3339 TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_validations_task_id ON validations (task_id);",
        )?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Runs `operate` with the locked connection.
    fn with_connection<T>(
        &self,
        operate: impl FnOnce(&Connection) -> Result<T, SqliteStoreError>,
    ) -> Result<T, SqliteStoreError> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| SqliteStoreError::Db("lock poisoned".to_string()))?;
        operate(&connection)
    }

    /// Renders a timestamp into its stored forms.
    fn timestamp_columns(timestamp: Timestamp) -> (i64, String) {
        (timestamp.unix_millis(), timestamp.to_rfc3339().unwrap_or_default())
    }

    /// Maps a decisions row into a record.
    fn decision_from_row(row: &rusqlite::Row<'_>) -> Result<DecisionRecord, rusqlite::Error> {
        let action_raw: String = row.get(2)?;
        let status_raw: String = row.get(4)?;
        Ok(DecisionRecord {
            id: row.get(0)?,
            task_id: TaskId::new(row.get::<_, String>(1)?),
            action_type: ActionType::parse(&action_raw).unwrap_or(ActionType::Error),
            content: row.get(3)?,
            status: RecordStatus::parse(&status_raw).unwrap_or(RecordStatus::Err),
            timestamp: Timestamp::from_unix_millis(row.get(5)?),
        })
    }

    /// Maps a tool_calls row into a record.
    fn tool_call_from_row(row: &rusqlite::Row<'_>) -> Result<ToolCallRecord, rusqlite::Error> {
        Ok(ToolCallRecord {
            id: row.get(0)?,
            decision_id: row.get(1)?,
            tool_name: ToolName::new(row.get::<_, String>(2)?),
            params: row.get(3)?,
            result: row.get(4)?,
            timestamp: Timestamp::from_unix_millis(row.get(5)?),
        })
    }
}

impl EpisodicStore for SqliteEpisodicStore {
    fn append_decision(
        &self,
        task_id: &TaskId,
        action_type: ActionType,
        content: &str,
        status: RecordStatus,
        timestamp: Timestamp,
    ) -> Result<i64, EpisodicError> {
        let (millis, rfc3339) = Self::timestamp_columns(timestamp);
        let id = self.with_connection(|connection| {
            connection.execute(
                "INSERT INTO decisions
                    (task_id, action_type, content, status, timestamp_ms, timestamp_rfc3339)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    task_id.as_str(),
                    action_type.as_str(),
                    content,
                    status.as_str(),
                    millis,
                    rfc3339
                ],
            )?;
            Ok(connection.last_insert_rowid())
        })?;
        Ok(id)
    }

    fn append_tool_call(
        &self,
        decision_id: i64,
        tool_name: &ToolName,
        params_json: &str,
        result_json: &str,
        timestamp: Timestamp,
    ) -> Result<i64, EpisodicError> {
        let (millis, rfc3339) = Self::timestamp_columns(timestamp);
        let id = self.with_connection(|connection| {
            connection.execute(
                "INSERT INTO tool_calls
                    (decision_id, tool_name, params, result, timestamp_ms, timestamp_rfc3339)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    decision_id,
                    tool_name.as_str(),
                    params_json,
                    result_json,
                    millis,
                    rfc3339
                ],
            )?;
            Ok(connection.last_insert_rowid())
        })?;
        Ok(id)
    }

    fn append_validation(
        &self,
        task_id: &TaskId,
        node_id: Option<&NodeId>,
        passed: bool,
        detail: &str,
        timestamp: Timestamp,
    ) -> Result<i64, EpisodicError> {
        let (millis, rfc3339) = Self::timestamp_columns(timestamp);
        let id = self.with_connection(|connection| {
            connection.execute(
                "INSERT INTO validations
                    (task_id, node_id, passed, detail, timestamp_ms, timestamp_rfc3339)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    task_id.as_str(),
                    node_id.map(NodeId::as_str),
                    i64::from(passed),
                    detail,
                    millis,
                    rfc3339
                ],
            )?;
            Ok(connection.last_insert_rowid())
        })?;
        Ok(id)
    }

    fn search_decisions(
        &self,
        query: &str,
        task_id: Option<&TaskId>,
        limit: usize,
    ) -> Result<Vec<DecisionRecord>, EpisodicError> {
        validate_query(query)?;
        let pattern = format!("%{}%", escape_like(query));
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self.with_connection(|connection| {
            let mut found = Vec::new();
            match task_id {
                Some(task_id) => {
                    let mut statement = connection.prepare(
                        "SELECT id, task_id, action_type, content, status, timestamp_ms
                         FROM decisions
                         WHERE task_id = ?1 AND content LIKE ?2 ESCAPE '\\'
                         ORDER BY id DESC LIMIT ?3",
                    )?;
                    let mapped = statement.query_map(
                        params![task_id.as_str(), pattern, limit],
                        Self::decision_from_row,
                    )?;
                    for row in mapped {
                        found.push(row?);
                    }
                }
                None => {
                    let mut statement = connection.prepare(
                        "SELECT id, task_id, action_type, content, status, timestamp_ms
                         FROM decisions
                         WHERE content LIKE ?1 ESCAPE '\\'
                         ORDER BY id DESC LIMIT ?2",
                    )?;
                    let mapped =
                        statement.query_map(params![pattern, limit], Self::decision_from_row)?;
                    for row in mapped {
                        found.push(row?);
                    }
                }
            }
            Ok(found)
        })?;
        Ok(rows)
    }

    fn search_tool_calls(
        &self,
        query: &str,
        task_id: Option<&TaskId>,
        limit: usize,
    ) -> Result<Vec<ToolCallRecord>, EpisodicError> {
        validate_query(query)?;
        let pattern = format!("%{}%", escape_like(query));
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self.with_connection(|connection| {
            let mut found = Vec::new();
            match task_id {
                Some(task_id) => {
                    let mut statement = connection.prepare(
                        "SELECT t.id, t.decision_id, t.tool_name, t.params, t.result,
                                t.timestamp_ms
                         FROM tool_calls t
                         JOIN decisions d ON d.id = t.decision_id
                         WHERE d.task_id = ?1
                           AND (t.tool_name LIKE ?2 ESCAPE '\\'
                                OR t.params LIKE ?2 ESCAPE '\\'
                                OR t.result LIKE ?2 ESCAPE '\\')
                         ORDER BY t.id DESC LIMIT ?3",
                    )?;
                    let mapped = statement.query_map(
                        params![task_id.as_str(), pattern, limit],
                        Self::tool_call_from_row,
                    )?;
                    for row in mapped {
                        found.push(row?);
                    }
                }
                None => {
                    let mut statement = connection.prepare(
                        "SELECT id, decision_id, tool_name, params, result, timestamp_ms
                         FROM tool_calls
                         WHERE tool_name LIKE ?1 ESCAPE '\\'
                            OR params LIKE ?1 ESCAPE '\\'
                            OR result LIKE ?1 ESCAPE '\\'
                         ORDER BY id DESC LIMIT ?2",
                    )?;
                    let mapped =
                        statement.query_map(params![pattern, limit], Self::tool_call_from_row)?;
                    for row in mapped {
                        found.push(row?);
                    }
                }
            }
            Ok(found)
        })?;
        Ok(rows)
    }

    fn recent_decisions(
        &self,
        task_id: &TaskId,
        limit: usize,
    ) -> Result<Vec<DecisionRecord>, EpisodicError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self.with_connection(|connection| {
            let mut statement = connection.prepare(
                "SELECT id, task_id, action_type, content, status, timestamp_ms
                 FROM decisions
                 WHERE task_id = ?1
                 ORDER BY id DESC LIMIT ?2",
            )?;
            let mapped = statement
                .query_map(params![task_id.as_str(), limit], Self::decision_from_row)?;
            let mut found = Vec::new();
            for row in mapped {
                found.push(row?);
            }
            Ok(found)
        })?;
        Ok(rows)
    }

    fn health(&self) -> Result<(), EpisodicError> {
        self.with_connection(|connection| {
            connection.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Semantic Metadata Store
// ============================================================================

/// `SQLite`-backed semantic metadata table.
///
/// # Invariants
/// - Each row stores its embedding vector as JSON so the paired vector
///   index can be rebuilt from this table alone.
pub struct SqliteSemanticMetadata {
    /// Shared connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteSemanticMetadata {
    /// Opens (creating as needed) the semantic metadata database.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the file cannot be opened or table
    /// creation fails.
    pub fn new(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        let connection = open_connection(config)?;
        check_schema_version(&connection)?;
        connection.execute_batch(
            "CREATE TABLE IF NOT EXISTS semantic_entries (
                vector_id INTEGER PRIMARY KEY,
                text TEXT NOT NULL,
                metadata TEXT NOT NULL,
                vector TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Runs `operate` with the locked connection.
    fn with_connection<T>(
        &self,
        operate: impl FnOnce(&Connection) -> Result<T, SqliteStoreError>,
    ) -> Result<T, SqliteStoreError> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| SqliteStoreError::Db("lock poisoned".to_string()))?;
        operate(&connection)
    }

    /// Maps a semantic_entries row into an entry.
    fn entry_from_row(row: &rusqlite::Row<'_>) -> Result<SemanticEntry, rusqlite::Error> {
        let metadata_raw: String = row.get(2)?;
        let vector_raw: String = row.get(3)?;
        Ok(SemanticEntry {
            vector_id: row.get(0)?,
            text: row.get(1)?,
            metadata: serde_json::from_str(&metadata_raw)
                .unwrap_or(serde_json::Value::Null),
            vector: serde_json::from_str(&vector_raw).unwrap_or_default(),
        })
    }
}

impl SemanticMetadataStore for SqliteSemanticMetadata {
    fn insert(&self, entry: &SemanticEntry) -> Result<(), SemanticMetadataError> {
        let metadata = serde_json::to_string(&entry.metadata)
            .map_err(|err| SemanticMetadataError::Store(err.to_string()))?;
        let vector = serde_json::to_string(&entry.vector)
            .map_err(|err| SemanticMetadataError::Store(err.to_string()))?;
        self.with_connection(|connection| {
            connection.execute(
                "INSERT INTO semantic_entries (vector_id, text, metadata, vector)
                 VALUES (?1, ?2, ?3, ?4)",
                params![entry.vector_id, entry.text, metadata, vector],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    fn get(&self, vector_id: i64) -> Result<Option<SemanticEntry>, SemanticMetadataError> {
        let entry = self.with_connection(|connection| {
            let found = connection
                .query_row(
                    "SELECT vector_id, text, metadata, vector
                     FROM semantic_entries WHERE vector_id = ?1",
                    params![vector_id],
                    Self::entry_from_row,
                )
                .optional()?;
            Ok(found)
        })?;
        Ok(entry)
    }

    fn all_entries(&self) -> Result<Vec<SemanticEntry>, SemanticMetadataError> {
        let entries = self.with_connection(|connection| {
            let mut statement = connection.prepare(
                "SELECT vector_id, text, metadata, vector
                 FROM semantic_entries ORDER BY vector_id ASC",
            )?;
            let mapped = statement.query_map([], Self::entry_from_row)?;
            let mut found = Vec::new();
            for row in mapped {
                found.push(row?);
            }
            Ok(found)
        })?;
        Ok(entries)
    }

    fn next_vector_id(&self) -> Result<i64, SemanticMetadataError> {
        let next = self.with_connection(|connection| {
            let max: Option<i64> = connection.query_row(
                "SELECT MAX(vector_id) FROM semantic_entries",
                [],
                |row| row.get(0),
            )?;
            Ok(max.unwrap_or(0) + 1)
        })?;
        Ok(next)
    }
}
