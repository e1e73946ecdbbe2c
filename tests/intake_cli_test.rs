use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn intake_cmd(work: &Path, home: &Path, bucket: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("case-intake");
    cmd.current_dir(work)
        .env_remove("CASE_INTAKE_CONFIG_PATH")
        .env_remove("CASE_INTAKE_LOGS_DIR")
        .env_remove("CASE_INTAKE_LOCATOR_PREFIX")
        .env_remove("CASE_INTAKE_PENDING_INDEX_KEY")
        .env("CASE_INTAKE_HOME", home)
        .env("CASE_INTAKE_BUCKET_ROOT", bucket)
        .env("CASE_INTAKE_TABLE", "cases");
    cmd
}

fn seed_table(home: &Path) {
    let tables = home.join("tables");
    fs::create_dir_all(&tables).expect("mkdir tables");
    fs::write(
        tables.join("cases.json"),
        r#"{
  "100200": {
    "CaseNumber": "100200",
    "UserName": "Jo Park",
    "PhoneNumber": "555-0101",
    "Files": [
      {"FilePath": "s3://attendance/Images/a.jpg", "UploadTimestamp": "2024-05-01T10:00:00.000000Z"},
      {"FilePath": "s3://attendance/Text_files/b.pdf", "UploadTimestamp": "2024-05-02T11:30:00.000000Z"}
    ]
  }
}"#,
    )
    .expect("write table");
}

#[test]
fn case_prints_stored_files_in_order() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    let bucket = tmp.path().join("bucket");
    seed_table(&home);

    let output = intake_cmd(tmp.path(), &home, &bucket)
        .args(["case", "100200"])
        .assert()
        .success()
        .stdout(predicate::str::contains("submitter_name=Jo Park"))
        .stdout(predicate::str::contains("phone_number=555-0101"))
        .stdout(predicate::str::contains("files=2"))
        .get_output()
        .stdout
        .clone();

    let text = String::from_utf8(output).expect("utf8");
    let first = text.find("Images/a.jpg").expect("first file");
    let second = text.find("Text_files/b.pdf").expect("second file");
    assert!(first < second);
    assert!(text.contains("uploaded=2024-05-01T10:00:00.000000Z"));
}

#[test]
fn unknown_case_is_reported_as_issue() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    let bucket = tmp.path().join("bucket");
    seed_table(&home);

    intake_cmd(tmp.path(), &home, &bucket)
        .args(["case", "999"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("issue: case 999 not found"));
}

#[test]
fn corrupt_table_is_reported_with_error_code() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    let bucket = tmp.path().join("bucket");
    fs::create_dir_all(home.join("tables")).expect("mkdir tables");
    fs::write(home.join("tables/cases.json"), "not json").expect("write table");

    intake_cmd(tmp.path(), &home, &bucket)
        .args(["case", "100200"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("E004_STORE_READ"));

    let raw = fs::read_to_string(home.join("tables/cases.json")).expect("read table");
    assert_eq!(raw, "not json");
}

#[test]
fn json_flag_emits_machine_readable_report() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    let bucket = tmp.path().join("bucket");
    seed_table(&home);

    let output = intake_cmd(tmp.path(), &home, &bucket)
        .args(["--json", "case", "100200"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let report: serde_json::Value = serde_json::from_slice(&output).expect("json report");
    assert_eq!(report["command"], "case");
    assert_eq!(report["ok"], true);
    let details = report["details"].as_array().expect("details");
    assert!(details.iter().any(|d| d == "files=2"));
}

#[test]
fn status_reports_configuration_and_last_poll() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    let bucket = tmp.path().join("bucket");
    seed_table(&home);
    fs::create_dir_all(&bucket).expect("mkdir bucket");

    intake_cmd(tmp.path(), &home, &bucket)
        .args(["watch", "--once"])
        .assert()
        .success();

    intake_cmd(tmp.path(), &home, &bucket)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("command=status ok=true"))
        .stdout(predicate::str::contains("case_table.cases=1"))
        .stdout(predicate::str::contains("pending_index.present=false"))
        .stdout(predicate::str::contains("daemon.lock=not_found"))
        .stdout(predicate::str::contains("watcher.last_outcome=source-unavailable"))
        .stdout(predicate::str::contains("watcher.consecutive_failures=1"));
}

#[test]
fn status_flags_unknown_prefixed_variables() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    let bucket = tmp.path().join("bucket");

    intake_cmd(tmp.path(), &home, &bucket)
        .env("CASE_INTAKE_POLL_INTERVALL", "5")
        .arg("status")
        .assert()
        .failure()
        .stdout(predicate::str::contains("unknown environment variable"));
}

#[test]
fn stop_without_daemon_is_a_no_op() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    let bucket = tmp.path().join("bucket");

    intake_cmd(tmp.path(), &home, &bucket)
        .arg("stop")
        .assert()
        .success()
        .stdout(predicate::str::contains("lock file not found"));
}

#[test]
fn dotenv_in_intake_home_supplies_configuration() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    let bucket = tmp.path().join("bucket");
    fs::create_dir_all(&home).expect("mkdir home");
    fs::write(
        home.join(".env"),
        format!(
            "CASE_INTAKE_BUCKET_ROOT={}\nCASE_INTAKE_TABLE=from_dotenv\n",
            bucket.display()
        ),
    )
    .expect("write .env");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("case-intake");
    cmd.current_dir(tmp.path())
        .env_remove("CASE_INTAKE_CONFIG_PATH")
        .env_remove("CASE_INTAKE_BUCKET_ROOT")
        .env_remove("CASE_INTAKE_TABLE")
        .env("CASE_INTAKE_HOME", &home)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "bucket_root={}",
            bucket.display()
        )))
        .stdout(predicate::str::contains("from_dotenv.json"));
}

#[test]
fn malformed_dotenv_is_reported_on_stderr() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    let bucket = tmp.path().join("bucket");
    fs::create_dir_all(&home).expect("mkdir home");
    fs::write(home.join(".env"), "CASE_INTAKE_TABLE='unterminated\n").expect("write .env");

    intake_cmd(tmp.path(), &home, &bucket)
        .arg("status")
        .assert()
        .stderr(predicate::str::contains("warning: ignoring unreadable"))
        .stderr(predicate::str::contains(".env"));
}
