//! Smoke tests for the `buildforge` binary (C8) that don't require a live
//! server: argument parsing and help text only.

use assert_cmd::Command;
use predicates::str::contains;

fn cli() -> Command {
    Command::cargo_bin("buildforge").expect("binary built")
}

#[test]
fn top_level_help_lists_subcommands() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("project"))
        .stdout(contains("build"))
        .stdout(contains("git"));
}

#[test]
fn build_help_lists_lifecycle_subcommands() {
    cli()
        .args(["build", "--help"])
        .assert()
        .success()
        .stdout(contains("start"))
        .stdout(contains("status"))
        .stdout(contains("cancel"))
        .stdout(contains("logs"));
}

#[test]
fn build_start_without_required_flags_fails() {
    cli().args(["build", "start"]).assert().failure();
}

#[test]
fn unknown_subcommand_fails_with_usage() {
    cli().arg("not-a-real-command").assert().failure().stderr(contains("Usage"));
}

#[test]
fn git_commit_without_message_fails() {
    cli().args(["git", "commit", "1"]).assert().failure();
}
