//! CLI integration tests for pg-ora-migrate.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for various error conditions.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the pg-ora-migrate binary.
fn cmd() -> Command {
    Command::cargo_bin("pg-ora-migrate").unwrap()
}

/// Write a config file backed by the in-memory adapters.
fn memory_config(dir: &tempfile::TempDir, tables: &[&str]) -> std::path::PathBuf {
    let path = dir.path().join("config.yaml");
    let mut file = std::fs::File::create(&path).unwrap();
    let table_list = if tables.is_empty() {
        " []".to_string()
    } else {
        let lines = tables
            .iter()
            .map(|t| format!("  - {t}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!("\n{lines}")
    };
    write!(
        file,
        r#"
source:
  type: memory
  database: pcm
  user: reader
target:
  type: memory
  service_name: PCMDB
  user: pcm
tables:{table_list}
scripts_dir: {scripts}
"#,
        scripts = dir.path().join("migrations").display()
    )
    .unwrap();
    path
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
        .stdout(predicate::str::contains("migration"))
        .stdout(predicate::str::contains("test-data"))
        .stdout(predicate::str::contains("maintenance"))
        .stdout(predicate::str::contains("backup"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn test_migration_subcommands() {
    cmd()
        .args(["migration", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("version"))
        .stdout(predicate::str::contains("history"));
}

#[test]
fn test_test_data_subcommands() {
    cmd()
        .args(["test-data", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("load"))
        .stdout(predicate::str::contains("clean"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn test_maintenance_subcommands() {
    cmd()
        .args(["maintenance", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("analyze"))
        .stdout(predicate::str::contains("update-stats"))
        .stdout(predicate::str::contains("rebuild-indexes"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("pg-ora-migrate"));
}

#[test]
fn test_output_json_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"));
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_io_code() {
    cmd()
        .args(["--config", "/nonexistent/config.yaml", "validate"])
        .assert()
        .failure()
        .code(7);
}

#[test]
fn test_invalid_yaml_exits_with_config_code() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.yaml");
    std::fs::write(&path, "source: [not a mapping").unwrap();

    cmd()
        .arg("--config")
        .arg(&path)
        .arg("validate")
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_config_validation_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(
        &path,
        "source:\n  database: ''\n  user: u\ntarget:\n  service_name: s\n  user: u\n",
    )
    .unwrap();

    cmd()
        .arg("--config")
        .arg(&path)
        .arg("validate")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("database"));
}

// =============================================================================
// In-Memory End-to-End Tests
// =============================================================================

#[test]
fn test_migration_version_without_history() {
    let dir = tempfile::tempdir().unwrap();
    let config = memory_config(&dir, &[]);

    cmd()
        .arg("--config")
        .arg(&config)
        .args(["migration", "version"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No migrations applied"));
}

#[test]
fn test_migration_run_applies_scripts() {
    let dir = tempfile::tempdir().unwrap();
    let config = memory_config(&dir, &[]);
    let scripts = dir.path().join("migrations");
    std::fs::create_dir(&scripts).unwrap();
    std::fs::write(
        scripts.join("001_widgets.sql"),
        "CREATE TABLE widgets (id INT);\n",
    )
    .unwrap();

    cmd()
        .arg("--config")
        .arg(&config)
        .args(["migration", "run", "--schema-only"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 applied"));
}

#[test]
fn test_validate_empty_table_list_matches() {
    let dir = tempfile::tempdir().unwrap();
    let config = memory_config(&dir, &[]);

    cmd()
        .arg("--config")
        .arg(&config)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("MATCH"));
}

#[test]
fn test_backup_validate_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = memory_config(&dir, &[]);

    cmd()
        .arg("--config")
        .arg(&config)
        .args(["backup", "validate"])
        .arg(dir.path().join("missing.bak"))
        .assert()
        .failure()
        .code(8);
}
