// crates/task-helm-config/src/lib.rs
// ============================================================================
// Module: Task Helm Config Library
// Description: Public API surface for runtime configuration.
// Purpose: Expose strict, fail-closed configuration resolution.
// Dependencies: crate::config
// ============================================================================

//! ## Overview
//! Runtime configuration for Task Helm, resolved in precedence order:
//! process environment, then `.env` file, then built-in defaults. Parsing is
//! strict and fail-closed — a malformed boolean or an out-of-range weight is
//! a configuration error, never a silent fallback — with the single
//! documented exception of `DEBUG`, which collapses unknown values to
//! `release` so arbitrary host values cannot propagate.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::ConfigError;
pub use config::DebugMode;
pub use config::RuntimeConfig;
pub use config::parse_bool;
