//! Integration tests for the `splice` CLI binary.
//!
//! Cover argument parsing, completions, settings, port utilities, the
//! health probe and a full `run --once` lifecycle against a temp record
//! directory.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `splice` binary with env isolation.
///
/// Clears `SPLICE_*` variables the tests rely on and points config
/// directories at a nonexistent path so the user's settings never leak in.
fn splice_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("splice");
    cmd.env("HOME", "/tmp/splice-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/splice-cli-test-nonexistent")
        .env("NO_COLOR", "1")
        .env_remove("SPLICE_CONFIG")
        .env_remove("SPLICE_OUTPUT")
        .env_remove("SPLICE_RECORDS__DIR")
        .env_remove("SPLICE_DEFAULTS__SHUTDOWN_POLICY")
        .env_remove("RUST_LOG");
    cmd
}

/// `splice_cmd` writing records under `dir`.
fn splice_with_records(dir: &Path) -> assert_cmd::Command {
    let mut cmd = splice_cmd();
    cmd.env("SPLICE_RECORDS__DIR", dir);
    cmd
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

const MANIFEST: &str = r#"
[[integrations]]
name = "echo"
type = "plugin"
config = { module = "echo" }

[[integrations]]
name = "hooks"
type = "webhook"
depends_on = ["echo"]
config = { secret = "s3cret", event = "push" }
"#;

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = splice_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    splice_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("integrations")
            .and(predicate::str::contains("run"))
            .and(predicate::str::contains("probe"))
            .and(predicate::str::contains("records")),
    );
}

#[test]
fn test_version_flag() {
    splice_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("splice"));
}

#[test]
fn test_completions_bash() {
    splice_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_invalid_subcommand() {
    let output = splice_cmd().arg("foobar").output().unwrap();
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("foobar"));
}

// ── Settings ────────────────────────────────────────────────────────

#[test]
fn test_config_path() {
    splice_cmd()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_show_reflects_env_override() {
    splice_cmd()
        .env("SPLICE_HUB__PORT_MIN", "4100")
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("port_min = 4100"));
}

#[test]
fn test_missing_explicit_config_fails() {
    let output = splice_cmd()
        .args(["--config", "/tmp/splice-cli-test-nonexistent/nope.toml", "config", "show"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("nope.toml"));
}

// ── Ports ───────────────────────────────────────────────────────────

#[test]
fn test_port_check_reports_bound_port_in_use() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let output = splice_cmd()
        .args(["-o", "json", "port", "check", &port.to_string()])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["port"], port);
    assert_eq!(json["available"], false);
}

#[test]
fn test_port_find_within_range() {
    let output = splice_cmd()
        .args(["-o", "json", "port", "find", "--min", "20000", "--max", "20100"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));
    let port = stdout_json(&output)["port"].as_u64().unwrap();
    assert!((20000..=20100).contains(&port));
}

#[test]
fn test_port_find_rejects_inverted_range() {
    let output = splice_cmd()
        .args(["port", "find", "--min", "5000", "--max", "4000"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("5000-4000"));
}

// ── Probe ───────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_probe_healthy_service() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let url = format!("{}/health", server.uri());
    let output = tokio::task::spawn_blocking(move || {
        splice_cmd()
            .args(["-o", "json", "probe", &url, "--retries", "1"])
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert!(output.status.success(), "{}", combined_output(&output));
    let json = stdout_json(&output);
    assert_eq!(json["success"], true);
    assert_eq!(json["status"], 200);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_probe_failing_service_exits_with_connection_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let url = format!("{}/health", server.uri());
    let output = tokio::task::spawn_blocking(move || {
        splice_cmd()
            .args(["probe", &url, "--retries", "2", "--retry-delay", "10"])
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert_eq!(output.status.code(), Some(7));
    let text = combined_output(&output);
    assert!(text.contains("2 attempt(s)"), "{text}");
    assert!(text.contains("HTTP 500"), "{text}");
}

// ── Records ─────────────────────────────────────────────────────────

#[test]
fn test_records_list_empty_dir() {
    let dir = tempfile::tempdir().unwrap();
    let output = splice_with_records(dir.path())
        .args(["-o", "json", "records", "list"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));
    assert_eq!(stdout_json(&output), Value::Array(vec![]));
}

#[test]
fn test_records_show_rejects_bad_id() {
    let dir = tempfile::tempdir().unwrap();
    let output = splice_with_records(dir.path())
        .args(["records", "show", "not-a-uuid"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("not a UUID"));
}

#[test]
fn test_records_show_unknown_id() {
    let dir = tempfile::tempdir().unwrap();
    let output = splice_with_records(dir.path())
        .args(["records", "show", "6f1c7a52-8d0e-4d4f-9a59-2b7c0e1f3a44"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    assert!(combined_output(&output).contains("records list"));
}

// ── Run ─────────────────────────────────────────────────────────────

#[test]
fn test_run_once_registers_then_tears_down() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = dir.path().join("splice.toml");
    std::fs::write(&manifest, MANIFEST).unwrap();
    let records = dir.path().join("records");

    let output = splice_with_records(&records)
        .args(["run", "--once", "--manifest"])
        .arg(&manifest)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("echo") && stdout.contains("hooks"));

    let output = splice_with_records(&records)
        .args(["-o", "json", "records", "list"])
        .output()
        .unwrap();
    let listed = stdout_json(&output);
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|r| r["status"] == "completed"));
    // Dependents go first.
    assert_eq!(listed[0]["integrationName"], "hooks");
    assert_eq!(listed[1]["integrationName"], "echo");

    let restorable = splice_with_records(&records)
        .args(["-o", "plain", "records", "list", "--restorable"])
        .output()
        .unwrap();
    assert_eq!(String::from_utf8_lossy(&restorable.stdout).lines().count(), 2);

    let id = listed[0]["id"].as_str().unwrap();
    splice_with_records(&records)
        .args(["records", "show", id])
        .assert()
        .success()
        .stdout(predicate::str::contains("archive").and(predicate::str::contains("hooks")));
}

#[test]
fn test_run_no_preserve_leaves_nothing_restorable() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = dir.path().join("splice.toml");
    std::fs::write(&manifest, MANIFEST).unwrap();
    let records = dir.path().join("records");

    splice_with_records(&records)
        .args(["-q", "run", "--once", "--no-preserve", "--manifest"])
        .arg(&manifest)
        .assert()
        .success();

    let output = splice_with_records(&records)
        .args(["-o", "plain", "records", "list", "--restorable"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).trim().is_empty());
}

#[test]
fn test_run_restores_preserved_record() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = dir.path().join("splice.toml");
    std::fs::write(&manifest, MANIFEST).unwrap();
    let empty = dir.path().join("empty.toml");
    std::fs::write(&empty, "").unwrap();
    let records = dir.path().join("records");

    splice_with_records(&records)
        .args(["-q", "run", "--once", "--manifest"])
        .arg(&manifest)
        .assert()
        .success();
    let output = splice_with_records(&records)
        .args(["-o", "json", "records", "list"])
        .output()
        .unwrap();
    let listed = stdout_json(&output);
    let echo = listed
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["integrationName"] == "echo")
        .unwrap()["id"]
        .as_str()
        .unwrap()
        .to_owned();

    let output = splice_with_records(&records)
        .args(["-o", "plain", "run", "--once", "--restore", &echo, "--manifest"])
        .arg(&empty)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));
    assert!(String::from_utf8_lossy(&output.stdout).contains("echo"));
}

#[test]
fn test_run_rejects_manifest_with_unknown_dependency() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = dir.path().join("bad.toml");
    std::fs::write(
        &manifest,
        "[[integrations]]\nname = \"a\"\ntype = \"plugin\"\ndepends_on = [\"ghost\"]\nconfig = { module = \"echo\" }\n",
    )
    .unwrap();

    let output = splice_with_records(dir.path())
        .args(["run", "--once", "--manifest"])
        .arg(&manifest)
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("ghost"));
}
