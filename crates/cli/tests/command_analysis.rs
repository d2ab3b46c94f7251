use std::path::{Path, PathBuf};

use namesmith_core::db::{ProjectDb, ProjectLayout};
use namesmith_core::oracle::SymbolOracle;
use predicates::prelude::*;
use tempfile::{tempdir, TempDir};

/// Nothing listens on the discard port, so every request fails to connect.
const UNREACHABLE: &str = "http://127.0.0.1:9/v1";

fn fixture() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/sample_snapshot.json")
}

/// `args` name the subcommand; `--root` is appended after them.
fn namesmith(root: &Path, args: &[&str]) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("namesmith");
    cmd.env("NAMESMITH_LOG", "off").env("OPENROUTER_API_KEY", "dummy-key");
    cmd.args(args).arg("--root").arg(root);
    cmd
}

fn project() -> TempDir {
    let dir = tempdir().expect("tempdir");
    let mut init = assert_cmd::cargo::cargo_bin_cmd!("namesmith");
    init.args(["init-project", "--name", "Analysis", "--root"]).arg(dir.path()).assert().success();
    namesmith(dir.path(), &["import-snapshot"]).arg("--path").arg(fixture()).assert().success();
    namesmith(dir.path(), &["config", "set-base-url", UNREACHABLE]).assert().success();
    dir
}

fn comment_of(root: &Path, name: &str) -> Option<String> {
    let db = ProjectDb::open(&ProjectLayout::new(root).db_path).expect("open db");
    db.function_by_name(name).and_then(|f| f.comment)
}

#[test]
fn dry_run_prints_the_prompt_without_a_key() {
    let dir = project();

    namesmith(dir.path(), &["analyze", "--function", "main", "--dry-run"])
        .env_remove("OPENROUTER_API_KEY")
        .assert()
        .success()
        .stdout(predicate::str::contains("Filename: sample.elf"));
    assert_eq!(comment_of(dir.path(), "main"), None);
}

#[test]
fn missing_api_key_is_an_error() {
    let dir = project();

    namesmith(dir.path(), &["analyze", "--function", "main"])
        .env_remove("OPENROUTER_API_KEY")
        .assert()
        .failure()
        .stderr(predicate::str::contains("OPENROUTER_API_KEY"));
}

#[test]
fn request_failure_is_written_as_the_comment() {
    let dir = project();

    namesmith(dir.path(), &["analyze", "--function", "main"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Analyzed 0x1000"))
        .stdout(predicate::str::contains("Model request failed"));

    let comment = comment_of(dir.path(), "main").expect("fallback comment");
    assert!(comment.contains("Analysis failed with request error:"), "{comment}");

    let db = ProjectDb::open(&ProjectLayout::new(dir.path()).db_path).expect("open db");
    assert!(db.function_by_name("main").is_some(), "name must survive a failed request");
}

#[test]
fn special_functions_need_confirmation() {
    let dir = project();

    namesmith(dir.path(), &["analyze", "--function", "nullsub_1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Skipped nullsub_1 (0x3000)."));
    assert_eq!(comment_of(dir.path(), "nullsub_1"), None);
}

#[test]
fn analyze_visible_dry_run_lists_direct_callees() {
    let dir = project();

    namesmith(dir.path(), &["analyze-visible", "--function", "main", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Functions to analyze (3):"))
        .stdout(predicate::str::contains("0x2000 sub_2000"))
        .stdout(predicate::str::contains("0x3000 nullsub_1"));
}

#[test]
fn batch_without_yes_is_cancelled() {
    let dir = project();

    namesmith(dir.path(), &["analyze-chain", "--function", "sub_2000"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cancelled."));
    assert_eq!(comment_of(dir.path(), "sub_2000"), None);
}

#[test]
fn analyze_chain_runs_every_function() {
    let dir = project();

    namesmith(dir.path(), &["analyze-chain", "--function", "sub_2000", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Functions to analyze (3):"))
        .stdout(predicate::str::contains("Done: 3 of 3 analyzed, 0 skipped, 3 failed requests"));

    for name in ["sub_2000", "main", "entry_point"] {
        let comment = comment_of(dir.path(), name).expect("comment written");
        assert!(comment.starts_with("Analysis failed"), "{name}: {comment}");
    }
}

#[test]
fn analyze_chain_rejects_bad_depth() {
    let dir = project();

    namesmith(dir.path(), &["analyze-chain", "--function", "main", "--depth", "0", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--depth must be between"));
}
