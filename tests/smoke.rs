//! Smoke tests -- verify the binary runs and subcommands are wired.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_cli_help() {
    Command::cargo_bin("mplarchive")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("image-comparison artifacts"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("mplarchive")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("mplarchive"));
}

#[test]
fn test_archive_subcommand_exists() {
    Command::cargo_bin("mplarchive")
        .unwrap()
        .args(["archive", "--help"])
        .assert()
        .success()
        .stdout(predicates::str::contains("--artifacts-dir"));
}

#[test]
fn test_render_subcommand_exists() {
    Command::cargo_bin("mplarchive")
        .unwrap()
        .args(["render", "--help"])
        .assert()
        .success();
}

#[test]
fn test_name_prints_archive_path() {
    let dir = tempfile::TempDir::new().unwrap();
    Command::cargo_bin("mplarchive")
        .unwrap()
        .current_dir(dir.path())
        .env_remove("MPLARCHIVE_CONFIG")
        .args([
            "name",
            "--sha",
            "abcdef1234567890",
            "--branch",
            "refs/pull/42/merge",
            "--at",
            "20240301_101530",
        ])
        .assert()
        .success()
        .stdout("mpl-results/20240301_101530_abcdef1_pr-42\n");
}

#[test]
fn test_name_rejects_bad_timestamp() {
    let dir = tempfile::TempDir::new().unwrap();
    Command::cargo_bin("mplarchive")
        .unwrap()
        .current_dir(dir.path())
        .env_remove("MPLARCHIVE_CONFIG")
        .args(["name", "--sha", "abcdef1234567", "--branch", "main", "--at", "yesterday"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid timestamp"));
}

#[test]
fn test_history_on_empty_site() {
    let dir = tempfile::TempDir::new().unwrap();
    Command::cargo_bin("mplarchive")
        .unwrap()
        .current_dir(dir.path())
        .env_remove("MPLARCHIVE_CONFIG")
        .args(["history"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No archived runs."));
}

#[test]
fn test_archive_without_run_fails() {
    let dir = tempfile::TempDir::new().unwrap();
    Command::cargo_bin("mplarchive")
        .unwrap()
        .current_dir(dir.path())
        .env_remove("MPLARCHIVE_CONFIG")
        .env_remove("GITHUB_EVENT_PATH")
        .args(["archive", "--no-publish"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--run-id or --event"));
}

#[test]
fn test_archive_local_artifacts_end_to_end() {
    let site = tempfile::TempDir::new().unwrap();
    let artifacts = tempfile::TempDir::new().unwrap();
    let cfg_dir = artifacts.path().join("failed-comparisons-linux-py310-extra");
    std::fs::create_dir_all(&cfg_dir).unwrap();
    std::fs::write(cfg_dir.join("diff.png"), b"png").unwrap();
    std::fs::write(cfg_dir.join("mpl_comparison_report.html"), b"<html></html>").unwrap();

    Command::cargo_bin("mplarchive")
        .unwrap()
        .current_dir(site.path())
        .env_remove("MPLARCHIVE_CONFIG")
        .args(["--site-root"])
        .arg(site.path())
        .args([
            "archive",
            "--no-publish",
            "--json",
            "--run-id",
            "7",
            "--sha",
            "abcdef1234567",
            "--branch",
            "main",
            "--repo",
            "ultraplot/ultraplot",
            "--title",
            "Nightly",
            "--artifacts-dir",
        ])
        .arg(artifacts.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"outcome\": \"archived\""));

    assert!(site.path().join("mpl-results/history.txt").exists());
    let index = std::fs::read_to_string(site.path().join("index.md")).unwrap();
    assert!(index.contains("[linux-py310]"));
}

#[test]
fn test_unreadable_config_env_warns_and_falls_back() {
    let dir = tempfile::TempDir::new().unwrap();
    Command::cargo_bin("mplarchive")
        .unwrap()
        .current_dir(dir.path())
        .env("MPLARCHIVE_CONFIG", dir.path().join("missing.toml"))
        .env_remove("RUST_LOG")
        .args(["history"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No archived runs."))
        .stderr(predicate::str::contains("could not be loaded"));
}
