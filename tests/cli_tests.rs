//! Binary smoke tests

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("vidstream")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("connect"));
}

#[test]
fn test_serve_help_lists_flags() {
    Command::cargo_bin("vidstream")
        .unwrap()
        .args(["serve", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--videos-dir"))
        .stdout(predicate::str::contains("--stream-port"));
}

#[test]
fn test_missing_command_fails() {
    Command::cargo_bin("vidstream")
        .unwrap()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_unknown_log_format_is_rejected() {
    Command::cargo_bin("vidstream")
        .unwrap()
        .args(["--log-format", "xml", "serve"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown log format"));
}

#[test]
fn test_missing_encoder_fails_serve() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("vidstream")
        .unwrap()
        .current_dir(dir.path())
        .env("VIDSTREAM_ENCODER_PROGRAM", "vidstream-no-such-encoder")
        .args(["serve", "--port", "18888"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("vidstream-no-such-encoder"));
}
