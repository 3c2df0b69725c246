//! Integration tests for the `xds-agent` binary.
//!
//! These tests validate argument parsing, config loading and error
//! reporting without a live XDS server.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `xds-agent` binary with env isolation.
fn agent_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("xds-agent");
    cmd.env("HOME", "/tmp/xds-agent-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/xds-agent-cli-test-nonexistent")
        .env_remove("XDS_AGENT_CONFIG")
        .env_remove("XDS_AGENT_HTTP_PORT")
        .env_remove("XDS_AGENT_AGENT_UID")
        .env_remove("RUST_LOG");
    cmd
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_help_flag() {
    agent_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("XDS")
            .and(predicate::str::contains("--config"))
            .and(predicate::str::contains("--log-file"))
            .and(predicate::str::contains("--verbose")),
    );
}

#[test]
fn test_version_flag() {
    agent_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("xds-agent"));
}

#[test]
fn test_unknown_flag_is_usage_error() {
    agent_cmd().arg("--bogus").assert().code(2);
}

// ── Configuration ───────────────────────────────────────────────────

#[test]
fn test_print_config_defaults() {
    agent_cmd()
        .arg("--print-config")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("http_port = 8800")
                .and(predicate::str::contains("http://localhost:8000")),
        );
}

#[test]
fn test_print_config_from_file_and_env() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.toml");
    std::fs::write(
        &path,
        "[[servers]]\nurl = \"http://build-a:8000\"\nconn_retry = 3\n\n\
         [syncthing]\napi_key = \"s3cret\"\n",
    )
    .unwrap();

    agent_cmd()
        .arg("--config")
        .arg(&path)
        .arg("--print-config")
        .env("XDS_AGENT_HTTP_PORT", "8811")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("http_port = 8811")
                .and(predicate::str::contains("http://build-a:8000"))
                .and(predicate::str::contains("s3cret").not()),
        );
}

#[test]
fn test_invalid_server_url_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.toml");
    std::fs::write(&path, "[[servers]]\nurl = \"not a url\"\n").unwrap();

    let output = agent_cmd().arg("--config").arg(&path).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Invalid configuration"),
        "Expected config error in output:\n{stderr}"
    );
}
