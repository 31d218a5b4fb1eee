//! CLI smoke tests for the binary.

#![allow(clippy::expect_used)]

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn cmd(dir: &TempDir) -> Command {
    let mut command = Command::cargo_bin("procjena").expect("binary builds");
    command.env("PROCJENA_DB_PATH", dir.path().join("state.db"));
    command
}

fn questionnaire_json() -> String {
    serde_json::json!([
        {
            "measure_code": "M.1",
            "measure_title": "Upravljanje",
            "submeasure_code": "1.1",
            "submeasure_title": "Politike",
            "control_code": "POL-001",
            "control_title": "Sigurnosna politika",
            "requirements": [
                {"level": "osnovna", "is_mandatory": true}
            ]
        }
    ])
    .to_string()
}

#[test]
fn test_init_and_status() {
    let dir = TempDir::new().expect("tempdir");
    cmd(&dir).arg("init").assert().success();
    cmd(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Documents:"));
}

#[test]
fn test_uninitialized_store_fails() {
    let dir = TempDir::new().expect("tempdir");
    cmd(&dir)
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

#[test]
fn test_import_answer_score_flow() {
    let dir = TempDir::new().expect("tempdir");
    let rows_path = dir.path().join("rows.json");
    std::fs::write(&rows_path, questionnaire_json()).expect("write rows");

    cmd(&dir).arg("init").assert().success();
    cmd(&dir)
        .args(["import"])
        .arg(&rows_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported version"));

    // Identical reimport is a no-op
    cmd(&dir)
        .args(["import"])
        .arg(&rows_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("unchanged"));

    cmd(&dir)
        .args([
            "create-assessment",
            "--org",
            "acme",
            "--level",
            "osnovna",
            "--title",
            "Godisnja",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created assessment 1"));

    cmd(&dir)
        .args([
            "answer",
            "--assessment",
            "1",
            "--control",
            "POL-001",
            "--submeasure",
            "1.1",
            "--doc",
            "4",
            "--implementation",
            "4",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Answer saved"));

    cmd(&dir)
        .args(["score", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Compliance:"));

    cmd(&dir)
        .args(["progress", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Mandatory: 1/1"));
}

#[test]
fn test_ingest_and_search() {
    let dir = TempDir::new().expect("tempdir");
    let doc_path = dir.path().join("politika.txt");
    std::fs::write(
        &doc_path,
        "Kontrola POL-001 zahtijeva dokumentiranu sigurnosnu politiku organizacije. ".repeat(10),
    )
    .expect("write doc");

    cmd(&dir).arg("init").assert().success();
    cmd(&dir)
        .args(["ingest"])
        .arg(&doc_path)
        .args(["--org", "acme"])
        .assert()
        .success()
        .stdout(predicate::str::contains("POL-001"));

    cmd(&dir)
        .args(["search", "POL-001", "--org", "acme"])
        .assert()
        .success()
        .stdout(predicate::str::contains("politika"));

    cmd(&dir)
        .args(["ask", "Kako zadovoljiti POL-001?", "--org", "acme"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Status: validated"));
}

#[test]
fn test_invalid_level_rejected() {
    let dir = TempDir::new().expect("tempdir");
    cmd(&dir).arg("init").assert().success();
    cmd(&dir)
        .args([
            "create-assessment",
            "--org",
            "acme",
            "--level",
            "extreme",
            "--title",
            "X",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid security level"));
}
