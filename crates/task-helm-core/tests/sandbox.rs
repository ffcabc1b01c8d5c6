// crates/task-helm-core/tests/sandbox.rs
// ============================================================================
// Module: Sandbox Unit Tests
// Description: Root containment, flag gating, size caps, and scan limits.
// Purpose: Validate that every escape path fails closed.
// ============================================================================

//! ## Overview
//! Unit tests for the sandbox:
//! - Absolute and traversal paths outside the roots fail `path_not_allowed`
//! - Symlinks pointing outside the roots fail closed regardless of flags
//! - Disabled write/delete flags return their dedicated codes
//! - Size caps bound reads and writes
//! - Search is sorted and respects the visited-entry scan cap

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::fs;

use task_helm_core::Sandbox;
use task_helm_core::SandboxConfig;
use task_helm_core::SandboxError;
use tempfile::TempDir;

fn read_only_sandbox(root: &TempDir) -> Sandbox {
    Sandbox::new(SandboxConfig::read_only(root.path())).expect("sandbox")
}

fn writable_sandbox(root: &TempDir) -> Sandbox {
    let config = SandboxConfig {
        allow_write: true,
        allow_delete: true,
        ..SandboxConfig::read_only(root.path())
    };
    Sandbox::new(config).expect("sandbox")
}

#[test]
fn absolute_path_outside_root_fails_closed() {
    let root = TempDir::new().expect("root");
    let sandbox = read_only_sandbox(&root);
    let error = sandbox.read_text("/etc/passwd").expect_err("must deny");
    assert_eq!(error.code(), "path_not_allowed");
}

#[test]
fn traversal_outside_root_fails_closed() {
    let root = TempDir::new().expect("root");
    let sandbox = read_only_sandbox(&root);
    let error = sandbox.read_text("../../etc/passwd").expect_err("must deny");
    assert_eq!(error.code(), "path_not_allowed");
}

#[cfg(unix)]
#[test]
fn symlink_escape_fails_closed() {
    let root = TempDir::new().expect("root");
    std::os::unix::fs::symlink("/etc/passwd", root.path().join("innocent.txt"))
        .expect("symlink");
    let sandbox = read_only_sandbox(&root);
    let error = sandbox.read_text("innocent.txt").expect_err("must deny");
    assert_eq!(error.code(), "path_not_allowed");
}

#[test]
fn read_inside_root_succeeds() {
    let root = TempDir::new().expect("root");
    fs::write(root.path().join("note.txt"), "hello sandbox").expect("seed");
    let sandbox = read_only_sandbox(&root);
    assert_eq!(sandbox.read_text("note.txt").expect("read"), "hello sandbox");
}

#[test]
fn write_and_delete_flags_gate_with_dedicated_codes() {
    let root = TempDir::new().expect("root");
    fs::write(root.path().join("victim.txt"), "data").expect("seed");
    let sandbox = read_only_sandbox(&root);

    let error = sandbox.write_text("new.txt", "content").expect_err("write off");
    assert_eq!(error, SandboxError::WriteNotAllowed);
    assert_eq!(error.code(), "write_not_allowed");

    let error = sandbox.delete_file("victim.txt").expect_err("delete off");
    assert_eq!(error, SandboxError::DeleteNotAllowed);
    assert_eq!(error.code(), "delete_not_allowed");
}

#[test]
fn enabled_write_and_delete_operate_inside_root() {
    let root = TempDir::new().expect("root");
    let sandbox = writable_sandbox(&root);
    let written = sandbox.write_text("out.txt", "payload").expect("write");
    assert_eq!(written, 7);
    assert_eq!(sandbox.read_text("out.txt").expect("read back"), "payload");
    sandbox.delete_file("out.txt").expect("delete");
    assert!(sandbox.read_text("out.txt").is_err());
}

#[test]
fn size_caps_bound_reads_and_writes() {
    let root = TempDir::new().expect("root");
    fs::write(root.path().join("big.txt"), "x".repeat(64)).expect("seed");
    let config = SandboxConfig {
        allow_write: true,
        max_read_bytes: 16,
        max_write_bytes: 16,
        ..SandboxConfig::read_only(root.path())
    };
    let sandbox = Sandbox::new(config).expect("sandbox");

    let error = sandbox.read_text("big.txt").expect_err("read cap");
    assert_eq!(error.code(), "size_limit_exceeded");

    let error = sandbox.write_text("w.txt", &"y".repeat(32)).expect_err("write cap");
    assert_eq!(error.code(), "size_limit_exceeded");
}

#[test]
fn list_dir_is_sorted_and_bounded() {
    let root = TempDir::new().expect("root");
    for name in ["zeta.txt", "alpha.txt", "mid.txt"] {
        fs::write(root.path().join(name), "x").expect("seed");
    }
    let sandbox = read_only_sandbox(&root);
    let entries = sandbox.list_dir(".").expect("list");
    let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
    assert_eq!(names, ["alpha.txt", "mid.txt", "zeta.txt"]);
}

#[test]
fn file_info_reports_metadata() {
    let root = TempDir::new().expect("root");
    fs::write(root.path().join("info.txt"), "12345").expect("seed");
    let sandbox = read_only_sandbox(&root);
    let info = sandbox.file_info("info.txt").expect("info");
    assert!(info.is_file);
    assert!(!info.is_dir);
    assert_eq!(info.size, 5);
}

#[test]
fn search_returns_sorted_matches() {
    let root = TempDir::new().expect("root");
    fs::create_dir_all(root.path().join("sub")).expect("mkdir");
    fs::write(root.path().join("b.rs"), "x").expect("seed");
    fs::write(root.path().join("a.rs"), "x").expect("seed");
    fs::write(root.path().join("sub/c.rs"), "x").expect("seed");
    fs::write(root.path().join("skip.txt"), "x").expect("seed");
    let sandbox = read_only_sandbox(&root);
    let matches = sandbox.search(".", "**/*.rs").expect("search");
    assert_eq!(matches, ["a.rs", "b.rs", "sub/c.rs"]);
}

#[test]
fn search_scan_cap_fails_with_dedicated_code() {
    let root = TempDir::new().expect("root");
    for index in 0..8 {
        fs::write(root.path().join(format!("f{index}.txt")), "x").expect("seed");
    }
    let config = SandboxConfig {
        max_visited: 4,
        ..SandboxConfig::read_only(root.path())
    };
    let sandbox = Sandbox::new(config).expect("sandbox");
    let error = sandbox.search(".", "**/*.txt").expect_err("scan cap");
    assert_eq!(error.code(), "search_limit_exceeded");
}

#[test]
fn roots_are_canonical_and_immutable() {
    let root = TempDir::new().expect("root");
    let sandbox = read_only_sandbox(&root);
    assert_eq!(sandbox.roots().len(), 1);
    assert!(sandbox.roots()[0].is_absolute());
}
