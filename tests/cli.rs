use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn scribe(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("open-scribe").unwrap();
    cmd.arg("--config")
        .arg(dir.path().join("config.yaml"))
        .env("OPEN_SCRIBE_BASE_PATH", dir.path())
        .env("OPEN_SCRIBE_DOWNLOADS_PATH", dir.path().join("Downloads"))
        .env_remove("OPEN_SCRIBE_DB_PATH")
        .env_remove("OPEN_SCRIBE_ENGINE")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_commands() {
    let dir = tempfile::tempdir().unwrap();
    scribe(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("transcribe"))
        .stdout(predicate::str::contains("jobs"))
        .stdout(predicate::str::contains("cancel"));
}

#[test]
fn test_engines_command() {
    let dir = tempfile::tempdir().unwrap();
    scribe(&dir)
        .arg("engines")
        .assert()
        .success()
        .stdout(predicate::str::contains("gpt-4o-transcribe"))
        .stdout(predicate::str::contains("youtube-transcript-api"));
}

#[test]
fn test_missing_config_is_created() {
    let dir = tempfile::tempdir().unwrap();
    scribe(&dir).arg("config").assert().success();
    assert!(dir.path().join("config.yaml").exists());
}

#[test]
fn test_empty_job_list() {
    let dir = tempfile::tempdir().unwrap();
    scribe(&dir)
        .arg("jobs")
        .assert()
        .success()
        .stdout(predicate::str::contains("No jobs found."));
}

#[test]
fn test_unknown_job_fails() {
    let dir = tempfile::tempdir().unwrap();
    scribe(&dir)
        .args(["show", "99"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("99"));
}

#[test]
fn test_unknown_engine_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    scribe(&dir)
        .args(["--quiet", "transcribe", "https://youtu.be/dQw4w9WgXcQ", "-e", "bogus"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Unknown engine: bogus"));

    scribe(&dir)
        .arg("jobs")
        .assert()
        .success()
        .stdout(predicate::str::contains("No jobs found."));
}

#[test]
fn test_parallel_flag_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    scribe(&dir)
        .args(["transcribe", "https://youtu.be/dQw4w9WgXcQ", "-p", "0"])
        .assert()
        .failure();
}
