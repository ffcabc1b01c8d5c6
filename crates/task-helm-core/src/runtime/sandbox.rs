// crates/task-helm-core/src/runtime/sandbox.rs
// ============================================================================
// Module: Task Helm Sandbox
// Description: Path-scoped, size-bounded filesystem operations.
// Purpose: Fail closed on any path that escapes the allowed roots.
// Dependencies: crate::core, globset, thiserror
// ============================================================================

//! ## Overview
//! The sandbox mediates every filesystem touch a tool handler makes. Allowed
//! roots are resolved to absolute paths at construction and immutable
//! afterwards, so the sandbox is safe to share across tasks. Each operation
//! joins the requested path against a root, fully resolves it (symlinks
//! followed for existing targets; non-existent targets resolve their parent
//! strictly), and requires the result to be lexically contained in an
//! allowed root. Anything else is `path_not_allowed`, regardless of flags.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use globset::Glob;
use globset::GlobMatcher;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default cap on bytes returned by a single read.
pub const DEFAULT_MAX_READ_BYTES: u64 = 1_048_576;
/// Default cap on bytes accepted by a single write.
pub const DEFAULT_MAX_WRITE_BYTES: u64 = 1_048_576;
/// Default cap on entries returned by a directory listing.
pub const DEFAULT_MAX_LIST_ENTRIES: usize = 1_000;
/// Default cap on filesystem entries visited by a search.
pub const DEFAULT_MAX_VISITED: usize = 20_000;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Sandbox operation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SandboxError {
    /// The resolved path is not contained in any allowed root.
    #[error("path not allowed: {0}")]
    PathNotAllowed(String),
    /// Reads are disabled for this sandbox.
    #[error("read not allowed")]
    ReadNotAllowed,
    /// Writes are disabled for this sandbox.
    #[error("write not allowed")]
    WriteNotAllowed,
    /// Deletes are disabled for this sandbox.
    #[error("delete not allowed")]
    DeleteNotAllowed,
    /// A search visited more entries than the scan cap permits.
    #[error("search visited more than {max_visited} entries")]
    SearchLimitExceeded {
        /// Configured scan cap.
        max_visited: usize,
    },
    /// A payload exceeded the configured size cap.
    #[error("size limit exceeded: {actual_bytes} bytes (max {max_bytes})")]
    SizeLimitExceeded {
        /// Configured cap in bytes.
        max_bytes: u64,
        /// Actual size in bytes.
        actual_bytes: u64,
    },
    /// The glob pattern failed to compile.
    #[error("invalid glob pattern: {0}")]
    InvalidGlob(String),
    /// Underlying filesystem failure.
    #[error("sandbox io error: {0}")]
    Io(String),
}

impl SandboxError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::PathNotAllowed(_) => "path_not_allowed",
            Self::ReadNotAllowed => "permission_denied",
            Self::WriteNotAllowed => "write_not_allowed",
            Self::DeleteNotAllowed => "delete_not_allowed",
            Self::SearchLimitExceeded { .. } => "search_limit_exceeded",
            Self::SizeLimitExceeded { .. } => "size_limit_exceeded",
            Self::InvalidGlob(_) => "invalid_argument",
            Self::Io(_) => "execution_error",
        }
    }
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Sandbox construction parameters.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Allowed roots; resolved to absolute paths at construction.
    pub roots: Vec<PathBuf>,
    /// Whether reads are permitted.
    pub allow_read: bool,
    /// Whether writes are permitted.
    pub allow_write: bool,
    /// Whether deletes are permitted.
    pub allow_delete: bool,
    /// Cap on bytes returned by a single read.
    pub max_read_bytes: u64,
    /// Cap on bytes accepted by a single write.
    pub max_write_bytes: u64,
    /// Cap on entries returned by a directory listing.
    pub max_list_entries: usize,
    /// Cap on filesystem entries visited by a search.
    pub max_visited: usize,
}

impl SandboxConfig {
    /// Creates a read-only configuration over one root with default caps.
    #[must_use]
    pub fn read_only(root: impl Into<PathBuf>) -> Self {
        Self {
            roots: vec![root.into()],
            allow_read: true,
            allow_write: false,
            allow_delete: false,
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
            max_write_bytes: DEFAULT_MAX_WRITE_BYTES,
            max_list_entries: DEFAULT_MAX_LIST_ENTRIES,
            max_visited: DEFAULT_MAX_VISITED,
        }
    }
}

// ============================================================================
// SECTION: Result Types
// ============================================================================

/// One directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntryInfo {
    /// Entry name.
    pub name: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// Size in bytes for files, zero for directories.
    pub size: u64,
}

/// Metadata snapshot for one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Fully resolved path.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Whether the path is a directory.
    pub is_dir: bool,
    /// Whether the path is a regular file.
    pub is_file: bool,
    /// Modification time in unix millis, when available.
    pub modified_millis: Option<i64>,
}

// ============================================================================
// SECTION: Sandbox
// ============================================================================

/// Path-scoped, size-bounded filesystem mediator.
///
/// # Invariants
/// - `roots` are absolute, canonical, and immutable after construction.
/// - No operation touches a path outside the allowed roots.
#[derive(Debug, Clone)]
pub struct Sandbox {
    /// Canonicalized allowed roots.
    roots: Vec<PathBuf>,
    /// Whether reads are permitted.
    allow_read: bool,
    /// Whether writes are permitted.
    allow_write: bool,
    /// Whether deletes are permitted.
    allow_delete: bool,
    /// Cap on bytes returned by a single read.
    max_read_bytes: u64,
    /// Cap on bytes accepted by a single write.
    max_write_bytes: u64,
    /// Cap on entries returned by a directory listing.
    max_list_entries: usize,
    /// Cap on filesystem entries visited by a search.
    max_visited: usize,
}

impl Sandbox {
    /// Builds a sandbox, canonicalizing every allowed root.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::PathNotAllowed`] when no roots are supplied
    /// and [`SandboxError::Io`] when a root cannot be resolved.
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        if config.roots.is_empty() {
            return Err(SandboxError::PathNotAllowed("no allowed roots configured".to_string()));
        }
        let mut roots = Vec::with_capacity(config.roots.len());
        for root in &config.roots {
            let resolved = fs::canonicalize(root).map_err(|err| {
                SandboxError::Io(format!("cannot resolve root {}: {err}", root.display()))
            })?;
            roots.push(resolved);
        }
        Ok(Self {
            roots,
            allow_read: config.allow_read,
            allow_write: config.allow_write,
            allow_delete: config.allow_delete,
            max_read_bytes: config.max_read_bytes,
            max_write_bytes: config.max_write_bytes,
            max_list_entries: config.max_list_entries,
            max_visited: config.max_visited,
        })
    }

    /// Returns the canonical allowed roots.
    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Returns the primary (first) allowed root.
    #[must_use]
    pub fn primary_root(&self) -> &Path {
        &self.roots[0]
    }

    /// Reads a UTF-8 file within the sandbox.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError`] on policy denial, containment failure, size
    /// cap violation, or I/O failure.
    pub fn read_text(&self, path: &str) -> Result<String, SandboxError> {
        if !self.allow_read {
            return Err(SandboxError::ReadNotAllowed);
        }
        let resolved = self.resolve(path, true)?;
        let metadata =
            fs::metadata(&resolved).map_err(|err| SandboxError::Io(err.to_string()))?;
        if metadata.len() > self.max_read_bytes {
            return Err(SandboxError::SizeLimitExceeded {
                max_bytes: self.max_read_bytes,
                actual_bytes: metadata.len(),
            });
        }
        fs::read_to_string(&resolved).map_err(|err| SandboxError::Io(err.to_string()))
    }

    /// Writes a UTF-8 file within the sandbox, returning bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError`] on policy denial, containment failure, size
    /// cap violation, or I/O failure.
    pub fn write_text(&self, path: &str, content: &str) -> Result<u64, SandboxError> {
        if !self.allow_write {
            return Err(SandboxError::WriteNotAllowed);
        }
        let size = u64::try_from(content.len()).unwrap_or(u64::MAX);
        if size > self.max_write_bytes {
            return Err(SandboxError::SizeLimitExceeded {
                max_bytes: self.max_write_bytes,
                actual_bytes: size,
            });
        }
        let resolved = self.resolve(path, false)?;
        fs::write(&resolved, content).map_err(|err| SandboxError::Io(err.to_string()))?;
        Ok(size)
    }

    /// Deletes a file within the sandbox.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError`] on policy denial, containment failure, or
    /// I/O failure.
    pub fn delete_file(&self, path: &str) -> Result<(), SandboxError> {
        if !self.allow_delete {
            return Err(SandboxError::DeleteNotAllowed);
        }
        let resolved = self.resolve(path, true)?;
        fs::remove_file(&resolved).map_err(|err| SandboxError::Io(err.to_string()))
    }

    /// Lists a directory, sorted by name, bounded by the listing cap.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError`] on policy denial, containment failure, or
    /// I/O failure.
    pub fn list_dir(&self, path: &str) -> Result<Vec<DirEntryInfo>, SandboxError> {
        if !self.allow_read {
            return Err(SandboxError::ReadNotAllowed);
        }
        let resolved = self.resolve(path, true)?;
        let mut entries = Vec::new();
        let reader =
            fs::read_dir(&resolved).map_err(|err| SandboxError::Io(err.to_string()))?;
        for entry in reader {
            let entry = entry.map_err(|err| SandboxError::Io(err.to_string()))?;
            let metadata = entry.metadata().map_err(|err| SandboxError::Io(err.to_string()))?;
            entries.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: metadata.is_dir(),
                size: if metadata.is_file() { metadata.len() } else { 0 },
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries.truncate(self.max_list_entries);
        Ok(entries)
    }

    /// Returns metadata for one path.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError`] on policy denial, containment failure, or
    /// I/O failure.
    pub fn file_info(&self, path: &str) -> Result<FileInfo, SandboxError> {
        if !self.allow_read {
            return Err(SandboxError::ReadNotAllowed);
        }
        let resolved = self.resolve(path, true)?;
        let metadata =
            fs::metadata(&resolved).map_err(|err| SandboxError::Io(err.to_string()))?;
        let modified_millis = metadata.modified().ok().and_then(|modified| {
            modified
                .duration_since(UNIX_EPOCH)
                .ok()
                .and_then(|elapsed| i64::try_from(elapsed.as_millis()).ok())
        });
        Ok(FileInfo {
            path: resolved.to_string_lossy().into_owned(),
            size: metadata.len(),
            is_dir: metadata.is_dir(),
            is_file: metadata.is_file(),
            modified_millis,
        })
    }

    /// Searches under `root` for entries matching `glob`, returning paths
    /// relative to the searched root in lexicographic order.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::SearchLimitExceeded`] once the visited-entry
    /// count passes the scan cap, plus the usual policy and I/O errors.
    pub fn search(&self, root: &str, glob: &str) -> Result<Vec<String>, SandboxError> {
        if !self.allow_read {
            return Err(SandboxError::ReadNotAllowed);
        }
        let resolved = self.resolve(root, true)?;
        let matcher = Glob::new(glob)
            .map_err(|err| SandboxError::InvalidGlob(err.to_string()))?
            .compile_matcher();
        let mut visited = 0_usize;
        let mut matches = Vec::new();
        self.walk(&resolved, &resolved, &matcher, &mut visited, &mut matches)?;
        matches.sort();
        Ok(matches)
    }

    /// Depth-first walk with deterministic (sorted) traversal order.
    fn walk(
        &self,
        base: &Path,
        dir: &Path,
        matcher: &GlobMatcher,
        visited: &mut usize,
        matches: &mut Vec<String>,
    ) -> Result<(), SandboxError> {
        let reader = fs::read_dir(dir).map_err(|err| SandboxError::Io(err.to_string()))?;
        let mut children: Vec<PathBuf> = Vec::new();
        for entry in reader {
            let entry = entry.map_err(|err| SandboxError::Io(err.to_string()))?;
            children.push(entry.path());
        }
        children.sort();
        for child in children {
            *visited += 1;
            if *visited > self.max_visited {
                return Err(SandboxError::SearchLimitExceeded {
                    max_visited: self.max_visited,
                });
            }
            let relative = child.strip_prefix(base).unwrap_or(&child);
            if matcher.is_match(relative) {
                matches.push(relative.to_string_lossy().into_owned());
            }
            if child.is_dir() {
                self.walk(base, &child, matcher, visited, matches)?;
            }
        }
        Ok(())
    }

    /// Resolves a requested path and enforces root containment.
    ///
    /// Existing targets are fully canonicalized (symlinks followed).
    /// Non-existent targets resolve their parent strictly and then join the
    /// final component, so a dangling symlink cannot smuggle a write outside
    /// the roots.
    fn resolve(&self, requested: &str, must_exist: bool) -> Result<PathBuf, SandboxError> {
        let joined = self.primary_root().join(requested);
        let resolved = match fs::canonicalize(&joined) {
            Ok(resolved) => resolved,
            Err(_) if !must_exist => {
                let parent = joined
                    .parent()
                    .ok_or_else(|| SandboxError::PathNotAllowed(requested.to_string()))?;
                let name = joined
                    .file_name()
                    .ok_or_else(|| SandboxError::PathNotAllowed(requested.to_string()))?;
                let parent = fs::canonicalize(parent)
                    .map_err(|_| SandboxError::PathNotAllowed(requested.to_string()))?;
                parent.join(name)
            }
            Err(_) => {
                // Resolve what we can so out-of-root probes report containment,
                // not existence.
                let parent_resolved = joined
                    .parent()
                    .and_then(|parent| fs::canonicalize(parent).ok())
                    .and_then(|parent| joined.file_name().map(|name| parent.join(name)));
                match parent_resolved {
                    Some(resolved) if self.is_contained(&resolved) => {
                        return Err(SandboxError::Io(format!(
                            "no such file: {}",
                            resolved.display()
                        )));
                    }
                    _ => return Err(SandboxError::PathNotAllowed(requested.to_string())),
                }
            }
        };
        if self.is_contained(&resolved) {
            Ok(resolved)
        } else {
            Err(SandboxError::PathNotAllowed(requested.to_string()))
        }
    }

    /// Returns `true` when `path` sits lexically inside an allowed root.
    fn is_contained(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| path.starts_with(root))
    }
}
