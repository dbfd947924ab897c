//! Binary smoke tests for the `whs` CLI.
//!
//! These run the actual compiled binary with `assert_cmd` so a regression in
//! argument parsing, exit codes, or the precondition checks can't hide behind
//! a unit test that calls the library functions directly.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn whs() -> Command {
    Command::cargo_bin("whs").unwrap()
}

// ── Init ────────────────────────────────────────────────────────────────────

#[test]
fn init_creates_marker_file() {
    let dir = TempDir::new().unwrap();
    whs()
        .arg("init")
        .env("WHS_CONFIG_DIR", dir.path())
        .env("WHS_TRACKER_BINARY", "true")
        .assert()
        .success();

    assert!(dir.path().join("config.json").exists());
}

// ── Start / already running (E6) ─────────────────────────────────────────────

#[test]
fn start_refused_when_already_running() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("config.json"), "{}\n").unwrap();
    // pid 1 is always alive; plant a lock as if another dispatcher held it.
    fs::write(
        dir.path().join("dispatcher.lock"),
        r#"{"pid":1,"startedAt":"2024-01-01T00:00:00Z"}"#,
    )
    .unwrap();

    whs()
        .arg("start")
        .env("WHS_CONFIG_DIR", dir.path())
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("acquiring dispatcher lock"));
}

#[test]
fn start_refused_when_not_initialized() {
    let dir = TempDir::new().unwrap();
    whs()
        .arg("start")
        .env("WHS_CONFIG_DIR", dir.path())
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("not initialized"));
}

// ── Status ───────────────────────────────────────────────────────────────────

#[test]
fn status_refused_when_not_initialized() {
    let dir = TempDir::new().unwrap();
    whs()
        .arg("status")
        .env("WHS_CONFIG_DIR", dir.path())
        .assert()
        .failure()
        .code(2);
}

#[test]
fn status_succeeds_once_initialized_with_no_dispatcher_running() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("config.json"), "{}\n").unwrap();

    whs()
        .arg("status")
        .env("WHS_CONFIG_DIR", dir.path())
        .env("WHS_TRACKER_BINARY", "this-binary-does-not-exist")
        .assert()
        .success()
        .stdout(predicate::str::contains("dispatcher not running"));
}

// ── Answer ───────────────────────────────────────────────────────────────────

#[test]
fn answer_unknown_question_id_fails() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("config.json"), "{}\n").unwrap();

    whs()
        .args(["answer", "q-nonexistent", "JWT"])
        .env("WHS_CONFIG_DIR", dir.path())
        .env("WHS_TRACKER_BINARY", "this-binary-does-not-exist")
        .assert()
        .failure()
        .code(1);
}
