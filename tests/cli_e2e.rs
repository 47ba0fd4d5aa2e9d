//! End-to-end CLI tests covering the exit-code contract: 0 normal, 2
//! configuration error, and the subcommand surface's own argument parsing.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn cmd() -> Command {
    Command::cargo_bin("chron-harvester").unwrap()
}

#[test]
fn help_exits_zero_and_lists_subcommands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("discover-batch"))
        .stdout(predicate::str::contains("download"));
}

#[test]
fn missing_subcommand_is_a_usage_error() {
    cmd().assert().failure().code(2);
}

#[test]
fn unknown_file_type_is_reported_as_a_configuration_error() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("state.db");
    let download_root = dir.path().join("downloads");

    cmd()
        .arg("--db")
        .arg(&db_path)
        .arg("--download-root")
        .arg(&download_root)
        .arg("download")
        .arg("--once")
        .arg("--file-types")
        .arg("epub")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("configuration error"));
}

#[test]
fn zero_workers_for_split_is_a_configuration_error() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("state.db");
    let output = dir.path().join("workers");

    cmd()
        .arg("--db")
        .arg(&db_path)
        .arg("split")
        .arg("--workers")
        .arg("0")
        .arg("--output")
        .arg(&output)
        .assert()
        .failure()
        .code(2);
}

#[test]
fn reset_stuck_on_a_fresh_store_succeeds_with_nothing_to_do() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("state.db");

    cmd().arg("--db").arg(&db_path).arg("reset-stuck").assert().success();
}
