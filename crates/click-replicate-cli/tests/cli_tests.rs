//! CLI integration tests for click-replicate.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for various error conditions.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the click-replicate binary.
fn cmd() -> Command {
    Command::cargo_bin("click-replicate").unwrap()
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--source-database"))
        .stdout(predicate::str::contains("--destination-database"))
        .stdout(predicate::str::contains("--page-size"))
        .stdout(predicate::str::contains("--mode"));
}

#[test]
fn test_run_rejects_unknown_mode() {
    cmd()
        .args(["run", "--mode", "streaming"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("click-replicate"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_shutdown_timeout_default() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--shutdown-timeout"))
        .stdout(predicate::str::contains("[default: 60]"));
}

#[test]
fn test_output_json_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"));
}

#[test]
fn test_log_format_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"));
}

#[test]
fn test_verbosity_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"));
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_7() {
    // Missing file is an IO error (code 7), not config error (code 1)
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "health-check"])
        .assert()
        .code(7);
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_empty_config_exits_with_code_1() {
    let file = tempfile::NamedTempFile::new().unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_missing_required_fields_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    // Valid YAML but no destination section
    writeln!(file, "source:").unwrap();
    writeln!(file, "  host: localhost").unwrap();
    writeln!(file, "  database: raw").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_same_source_and_destination_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "source:\n  host: localhost\n  database: raw").unwrap();
    writeln!(file, "destination:\n  host: localhost\n  database: raw").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "validate"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("cannot be the same database"));
}

#[test]
fn test_sample_larger_than_page_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "source:\n  host: ch-a\n  database: raw").unwrap();
    writeln!(file, "destination:\n  host: ch-b\n  database: analytics").unwrap();
    writeln!(file, "replication:\n  page_size: 5\n  sample_size: 10").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("sample_size"));
}

#[test]
fn test_non_json_format_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "source:\n  host: ch-a\n  database: raw").unwrap();
    writeln!(file, "destination:\n  host: ch-b\n  database: analytics").unwrap();
    writeln!(file, "replication:\n  format: CSV").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("replication.format"));
}

#[test]
fn test_unreachable_endpoints_fail_health_check() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "source:\n  host: 127.0.0.1\n  port: 1\n  database: raw").unwrap();
    writeln!(file, "destination:\n  host: 127.0.0.1\n  port: 1\n  database: analytics").unwrap();

    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "--output-json",
            "health-check",
        ])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("\"healthy\": false"));
}

// =============================================================================
// Subcommand Existence Tests
// =============================================================================

#[test]
fn test_health_check_command_exists() {
    cmd()
        .args(["health-check", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Test warehouse connections"));
}

#[test]
fn test_validate_command_exists() {
    cmd()
        .args(["validate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Validate row counts"));
}

// =============================================================================
// Config Path Tests
// =============================================================================

#[test]
fn test_config_default_path() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

#[test]
fn test_short_config_flag() {
    cmd()
        .args(["-c", "some_config.yaml", "--help"])
        .assert()
        .success();
}

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}
