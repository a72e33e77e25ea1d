//! CLI integration tests for the mcplink command-line interface.
//!
//! These tests verify:
//! - Help text is displayed correctly
//! - Config files are loaded and listed
//! - Invalid inputs are rejected with appropriate messages
//!
//! None of them need a live MCP server.

use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a command for the mcplink binary.
fn mcplink() -> Command {
    let mut cmd = Command::cargo_bin("mcplink").unwrap();
    cmd.env_remove("MCPLINK_CONFIG").env_remove("RUST_LOG");
    cmd
}

const CONFIG: &str = r#"
[client]
name = "cli-tests"

[[servers]]
name = "files"
command = "mcp-server-files"
args = ["--root", "/tmp"]

[[servers]]
name = "remote"
transport = "streamable-http"
url = "https://example.com/mcp"
headers = [["Authorization", "Bearer secret"]]

[[servers]]
name = "old"
transport = "sse"
url = "https://example.com/sse"
enabled = false

[[servers]]
name = "broken"
command = "nonexistent-command-12345"
"#;

fn write_config(contents: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, contents).unwrap();
    (dir, path)
}

// ─────────────────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_help_displays() {
    mcplink()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("mcplink"))
        .stdout(predicate::str::contains("Streamable HTTP"));
}

#[test]
fn test_version_displays() {
    mcplink()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mcplink"));
}

#[test]
fn test_help_lists_subcommands() {
    mcplink()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("ping"))
        .stdout(predicate::str::contains("tools"))
        .stdout(predicate::str::contains("call"))
        .stdout(predicate::str::contains("resources"))
        .stdout(predicate::str::contains("prompts"));
}

#[test]
fn test_call_help_mentions_args() {
    mcplink()
        .args(["call", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--args"));
}

#[test]
fn test_unknown_subcommand_fails() {
    mcplink()
        .arg("frobnicate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Config Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_list_table() {
    let (_dir, path) = write_config(CONFIG);
    mcplink()
        .arg("--config")
        .arg(&path)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("NAME"))
        .stdout(predicate::str::contains("mcp-server-files --root /tmp"))
        .stdout(predicate::str::contains("streamable-http"))
        .stdout(predicate::str::contains("disabled"));
}

#[test]
fn test_list_verbose_redacts_headers() {
    let (_dir, path) = write_config(CONFIG);
    mcplink()
        .arg("--config")
        .arg(&path)
        .args(["list", "--verbose"])
        .assert()
        .success()
        .stdout(predicate::str::contains("header Authorization: <redacted>"))
        .stdout(predicate::str::contains("Bearer secret").not());
}

#[test]
fn test_list_json() {
    let (_dir, path) = write_config(CONFIG);
    let output = mcplink()
        .arg("--config")
        .arg(&path)
        .args(["--json", "list"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let entries: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[1]["name"], "remote");
    assert_eq!(entries[1]["transport"], "streamable-http");
    assert_eq!(entries[2]["enabled"], false);
}

#[test]
fn test_list_empty_config() {
    let (_dir, path) = write_config("");
    mcplink()
        .arg("--config")
        .arg(&path)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No MCP servers configured."));
}

#[test]
fn test_config_from_env() {
    let (_dir, path) = write_config(CONFIG);
    mcplink()
        .env("MCPLINK_CONFIG", &path)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("remote"));
}

#[test]
fn test_missing_config_file() {
    let dir = tempfile::tempdir().unwrap();
    mcplink()
        .arg("--config")
        .arg(dir.path().join("nope.toml"))
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load"));
}

#[test]
fn test_invalid_config_rejected() {
    let (_dir, path) = write_config("[[servers]]\nname = \"x\"\ntransport = \"sse\"\n");
    mcplink()
        .arg("--config")
        .arg(&path)
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration error"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Server Command Errors
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_ping_unknown_server() {
    let (_dir, path) = write_config(CONFIG);
    mcplink()
        .arg("--config")
        .arg(&path)
        .args(["ping", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("server 'ghost' not found in config"));
}

#[test]
fn test_ping_unstartable_server() {
    let (_dir, path) = write_config(CONFIG);
    mcplink()
        .arg("--config")
        .arg(&path)
        .args(["ping", "broken"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to start MCP server process"));
}

#[test]
fn test_call_rejects_bad_arguments() {
    mcplink()
        .args(["call", "files", "echo", "--args", "{not json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--args must be valid JSON"));
}

#[test]
fn test_call_rejects_non_object_arguments() {
    mcplink()
        .args(["call", "files", "echo", "--args", "[1]"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--args must be a JSON object"));
}
