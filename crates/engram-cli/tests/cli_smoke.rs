use assert_cmd::Command;
use predicates::prelude::*;

fn engram() -> Command {
    Command::cargo_bin("engram").unwrap()
}

#[test]
fn test_help_lists_core_commands() {
    engram()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("search"))
        .stdout(predicate::str::contains("recall"))
        .stdout(predicate::str::contains("predict"))
        .stdout(predicate::str::contains("reconstruct"));
}

#[test]
fn test_stats_on_fresh_store() {
    let dir = tempfile::tempdir().unwrap();
    engram()
        .args(["--data-dir", dir.path().to_str().unwrap(), "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("chunks"));
}

#[test]
fn test_tools_list() {
    let dir = tempfile::tempdir().unwrap();
    engram()
        .args(["--data-dir", dir.path().to_str().unwrap(), "tools", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("recall"))
        .stdout(predicate::str::contains("forget"));
}

#[test]
fn test_search_json_on_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    engram()
        .args([
            "--data-dir",
            dir.path().to_str().unwrap(),
            "--format",
            "json",
            "search",
            "anything",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"chunks\""));
}

#[test]
fn test_ingest_then_stats_roundtrip() {
    let data = tempfile::tempdir().unwrap();
    let logs = tempfile::tempdir().unwrap();
    std::fs::write(
        logs.path().join("s.jsonl"),
        concat!(
            r#"{"type":"user","uuid":"u1","sessionId":"s","timestamp":"2025-01-01T10:00:00Z","cwd":"/proj","message":{"role":"user","content":"hello memory store"}}"#,
            "\n",
            r#"{"type":"assistant","uuid":"a1","sessionId":"s","timestamp":"2025-01-01T10:00:30Z","message":{"content":[{"type":"text","text":"hello back"}]}}"#,
            "\n",
        ),
    )
    .unwrap();

    engram()
        .args([
            "--data-dir",
            data.path().to_str().unwrap(),
            "ingest",
            logs.path().to_str().unwrap(),
        ])
        .assert()
        .success();

    engram()
        .args([
            "--data-dir",
            data.path().to_str().unwrap(),
            "--format",
            "json",
            "stats",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"chunks\": 1"));
}
