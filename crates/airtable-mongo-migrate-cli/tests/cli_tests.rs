//! CLI integration tests for airtable-mongo-migrate.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for error conditions that occur before any network access.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the airtable-mongo-migrate binary.
fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("airtable-mongo-migrate").unwrap();
    cmd.env_remove("AIRTABLE_API_KEY");
    cmd
}

const VALID_CONFIG: &str = r#"
source:
  base_id: appAGRI
  api_key: patTEST
target:
  uri: mongodb://127.0.0.1:27017
migration:
  tables:
    - table: 作物マスター
      collection: crop_master
      display_field: name
      rules:
        - { source: 作物名, dest: name, kind: rename, coerce: text }
"#;

fn config_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", content).unwrap();
    file
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
        .stdout(predicate::str::contains("resume"))
        .stdout(predicate::str::contains("check-mapping"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--tables"));
}

#[test]
fn test_resume_subcommand_help() {
    cmd()
        .args(["resume", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--tables"))
        .stdout(predicate::str::contains("earlier runs"));
}

#[test]
fn test_check_mapping_subcommand_help() {
    cmd()
        .args(["check-mapping", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--table"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("airtable-mongo-migrate"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_output_json_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"));
}

#[test]
fn test_report_file_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--report-file"));
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

// =============================================================================
// Exit Code Tests - Config Errors (Exit Code 2)
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_2() {
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "health-check"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_invalid_yaml_exits_with_code_2() {
    let file = config_file("invalid: yaml: content: [\n");

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(2);
}

#[test]
fn test_empty_config_exits_with_code_2() {
    let file = tempfile::NamedTempFile::new().unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(2);
}

#[test]
fn test_invalid_page_size_exits_with_code_2() {
    let file = config_file(&VALID_CONFIG.replace(
        "  api_key: patTEST",
        "  api_key: patTEST\n  page_size: 500",
    ));

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(2);
}

#[test]
fn test_missing_api_key_exits_with_code_2() {
    let file = config_file(&VALID_CONFIG.replace("  api_key: patTEST\n", ""));

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("AIRTABLE_API_KEY"));
}

#[test]
fn test_unknown_table_exits_with_code_2() {
    let file = config_file(VALID_CONFIG);
    let dir = tempfile::tempdir().unwrap();
    let report = dir.path().join("report.json");

    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "--report-file",
            report.to_str().unwrap(),
            "run",
            "--tables",
            "Tasks,作物マスター",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Tasks"));

    assert!(!report.exists());
}

#[test]
fn test_check_mapping_unknown_table_exits_with_code_2() {
    let file = config_file(VALID_CONFIG);

    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "check-mapping",
            "--table",
            "Tasks",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Unknown table"));
}

// =============================================================================
// No Subcommand Tests
// =============================================================================

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}
