// crates/task-helm-store-sqlite/src/lib.rs
// ============================================================================
// Module: Task Helm SQLite Store Library
// Description: Public API surface for the durable stores.
// Purpose: Expose the SQLite-backed episodic log and semantic metadata table.
// Dependencies: crate::store
// ============================================================================

//! ## Overview
//! Durable implementations of the Task Helm store interfaces backed by
//! `SQLite`: an append-only episodic log (`decisions`, `tool_calls`,
//! `validations`) and the semantic metadata table paired with the vector
//! index. Writes are serialized through a mutex and `SQLite` runs in WAL
//! mode with full synchronous durability.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::SqliteEpisodicStore;
pub use store::SqliteSemanticMetadata;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
