//! Integration tests for the `hydractl` binary.
//!
//! These exercise the CLI as a subprocess, verifying exit codes, stdout
//! output, and file-system side effects. None require a running control
//! plane — commands that need one fail gracefully against an unreachable
//! address.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::fs;
use std::path::Path;
use std::process::Command;

fn hydractl_bin() -> String {
    let path = env!("CARGO_BIN_EXE_hydractl");
    assert!(Path::new(path).exists(), "hydractl binary not found at {path}");
    path.to_owned()
}

fn run(args: &[&str]) -> (i32, String, String) {
    let output = Command::new(hydractl_bin())
        .args(args)
        .env("HYDRA_ADDR", "http://127.0.0.1:19999")
        .current_dir(std::env::temp_dir())
        .output()
        .expect("failed to execute hydractl");

    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

#[test]
fn test_version_flag() {
    let (code, stdout, _) = run(&["--version"]);
    assert_eq!(code, 0, "hydractl --version should exit 0");
    assert!(stdout.contains("hydractl"), "version output should contain 'hydractl': {stdout}");
}

#[test]
fn test_help_flag() {
    let (code, stdout, _) = run(&["--help"]);
    assert_eq!(code, 0, "hydractl --help should exit 0");
    assert!(stdout.contains("Administrative client"), "help should describe the client: {stdout}");
}

#[test]
fn test_status_against_unreachable_server_fails_cleanly() {
    let (code, _, stderr) = run(&["status", "alice"]);
    assert_ne!(code, 0, "status against an unreachable server should fail");
    assert!(stderr.contains("error:"), "stderr should report an error: {stderr}");
}

#[test]
fn test_missing_subcommand_shows_usage() {
    let (code, _, stderr) = run(&[]);
    assert_ne!(code, 0);
    assert!(stderr.to_lowercase().contains("usage"), "missing subcommand should print usage: {stderr}");
}

#[test]
fn test_keygen_writes_a_private_key_file_and_prints_the_public_line() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = Command::new(hydractl_bin())
        .args(["keygen", "zoe"])
        .current_dir(dir.path())
        .output()
        .expect("failed to execute hydractl");

    assert!(output.status.success(), "keygen should succeed without a server");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ssh-ed25519 "), "stdout should contain an authorized_keys line: {stdout}");
    assert!(stdout.contains("zoe@hydra"), "the key comment should name the user: {stdout}");

    let key_path = dir.path().join("zoe_id_ed25519.pem");
    assert!(key_path.exists(), "keygen should write a private key file");
    let pem = fs::read_to_string(key_path).expect("read private key");
    assert!(pem.contains("BEGIN PRIVATE KEY"));
}

#[test]
fn test_deny_without_reason_is_accepted() {
    let (code, _, stderr) = run(&["deny", "some-request-id"]);
    assert_ne!(code, 0, "deny against an unreachable server should fail at the HTTP layer, not at arg parsing");
    assert!(!stderr.to_lowercase().contains("usage"), "missing --reason must not be an argument error: {stderr}");
}
