//! CLI integration tests
//!
//! Tests the superray-tui CLI using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;

fn superray_tui() -> Command {
    let mut cmd = Command::cargo_bin("superray-tui")
        .expect("Failed to locate superray-tui binary - ensure it's built before running tests");
    cmd.env_remove("SUPERRAY_SUB_URL")
        .env_remove("SUPERRAY_ENGINE_ADDR")
        .env_remove("SUPERRAY_LOCAL_PORT")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_help() {
    superray_tui()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("superray-tui"))
        .stdout(predicate::str::contains(
            "Terminal client for the SuperRay proxy engine",
        ))
        .stdout(predicate::str::contains("--system-wide"));
}

#[test]
fn test_cli_version() {
    superray_tui()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("superray-tui"));
}

#[test]
fn test_cli_servers_help() {
    superray_tui()
        .args(["servers", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--probe"));
}

#[test]
fn test_cli_config_help() {
    superray_tui()
        .args(["config", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("show"))
        .stdout(predicate::str::contains("init"));
}

#[test]
fn test_cli_config_path_honors_flag() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom.toml");

    superray_tui()
        .args(["config", "path", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn test_cli_config_init_then_show() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    superray_tui()
        .arg("--config")
        .arg(&path)
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created configuration file"));
    assert!(path.exists());

    superray_tui()
        .arg("--config")
        .arg(&path)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("local_port = 10808"))
        .stdout(predicate::str::contains("engine_address"));

    // A second init without --force leaves the file alone
    superray_tui()
        .arg("--config")
        .arg(&path)
        .args(["config", "init"])
        .assert()
        .success()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_cli_config_show_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    superray_tui()
        .arg("--config")
        .arg(&path)
        .args(["config", "show"])
        .assert()
        .success()
        .stderr(predicate::str::contains("No configuration file found"));
}

#[test]
fn test_cli_servers_without_subscription() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "engine_address = \"127.0.0.1:1\"\n").unwrap();

    superray_tui()
        .arg("--config")
        .arg(&path)
        .arg("servers")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to refresh server list"));
}

#[test]
fn test_cli_servers_engine_unreachable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "local_port = 20808\n").unwrap();

    superray_tui()
        .arg("--config")
        .arg(&path)
        .args([
            "--engine",
            "127.0.0.1:1",
            "--subscription",
            "https://sub.example.com/feed",
            "servers",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to refresh server list"))
        .stderr(predicate::str::contains("Engine error"));
}

#[test]
fn test_cli_invalid_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "local_port = \"not a number\"\n").unwrap();

    superray_tui()
        .arg("--config")
        .arg(&path)
        .arg("servers")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}

#[test]
fn test_cli_unknown_command() {
    superray_tui()
        .arg("unknown-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}
