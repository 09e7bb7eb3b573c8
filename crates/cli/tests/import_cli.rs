use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

use warehouse_core::db::ReportDb;

const REPORT: &str = r#"
<analysis>
  <metadata>
    <generator name="cppcheck" version="1.0"/>
    <sut><debian-source name="foo" version="2.0"/></sut>
  </metadata>
  <results>
    <issue cwe="79" severity="warning">
      <message>xss</message>
      <location>
        <file given-path="src/a.c"/>
        <point line="10" column="5"/>
      </location>
    </issue>
  </results>
</analysis>
"#;

fn write_report(dir: &Path, name: &str, xml: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, xml).expect("write report");
    path
}

#[test]
fn import_then_stats_reports_the_stored_rows() {
    let dir = tempdir().expect("tempdir");
    let db_path = dir.path().join("warehouse.db");
    let report = write_report(dir.path(), "report.xml", REPORT);

    // 1. Import the report.
    cargo_bin_cmd!("report-warehouse")
        .arg("import")
        .arg("--db")
        .arg(&db_path)
        .arg(&report)
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 1 report(s), 0 failure(s)"));

    // 2. Importing the identical file again stores nothing new.
    cargo_bin_cmd!("report-warehouse")
        .arg("import")
        .arg("--db")
        .arg(&db_path)
        .arg(&report)
        .assert()
        .success()
        .stdout(predicate::str::contains("(0 new row(s))"));

    // 3. Row counts, via the CLI and via the library directly.
    cargo_bin_cmd!("report-warehouse")
        .arg("stats")
        .arg("--db")
        .arg(&db_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("analysis: 1"))
        .stdout(predicate::str::contains("finding: 1"))
        .stdout(predicate::str::contains("generator: 1"));

    let db = ReportDb::open(&db_path).expect("open db");
    assert_eq!(db.count("analysis").expect("count"), 1);
    assert_eq!(db.list_import_runs().expect("runs").len(), 2);
}

#[test]
fn batch_with_a_bad_file_still_succeeds_and_reports_the_failure() {
    let dir = tempdir().expect("tempdir");
    let db_path = dir.path().join("warehouse.db");
    let good = write_report(dir.path(), "good.xml", REPORT);
    let bad = write_report(dir.path(), "bad.xml", "<analysis><metadata/></analysis>");

    cargo_bin_cmd!("report-warehouse")
        .arg("import")
        .arg("--db")
        .arg(&db_path)
        .arg(&good)
        .arg(&bad)
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 1 report(s), 1 failure(s)"))
        .stderr(predicate::str::contains("FAILED"))
        .stderr(predicate::str::contains("bad.xml"));

    // The recorded runs show one of each outcome.
    cargo_bin_cmd!("report-warehouse")
        .arg("runs")
        .arg("--db")
        .arg(&db_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Import runs (2):"))
        .stdout(predicate::str::contains("[imported]"))
        .stdout(predicate::str::contains("[failed]"));
}

#[test]
fn reset_drops_previous_content() {
    let dir = tempdir().expect("tempdir");
    let db_path = dir.path().join("warehouse.db");
    let report = write_report(dir.path(), "report.xml", REPORT);

    cargo_bin_cmd!("report-warehouse")
        .arg("import")
        .arg("--db")
        .arg(&db_path)
        .arg(&report)
        .assert()
        .success();

    // Reset wipes the earlier import, so everything is stored fresh.
    cargo_bin_cmd!("report-warehouse")
        .arg("import")
        .arg("--db")
        .arg(&db_path)
        .arg("--reset")
        .arg(&report)
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 1 report(s), 0 failure(s)"));

    let db = ReportDb::open(&db_path).expect("open db");
    assert_eq!(db.count("analysis").expect("count"), 1);
    assert_eq!(db.list_import_runs().expect("runs").len(), 1);
}

#[test]
fn hash_prints_a_stable_root_id_without_importing() {
    let dir = tempdir().expect("tempdir");
    let report = write_report(dir.path(), "report.xml", REPORT);

    let first = cargo_bin_cmd!("report-warehouse")
        .arg("hash")
        .arg(&report)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let second = cargo_bin_cmd!("report-warehouse")
        .arg("hash")
        .arg(&report)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let first = String::from_utf8(first).expect("utf8");
    assert_eq!(first, String::from_utf8(second).expect("utf8"));
    assert_eq!(first.trim().len(), 64);
}

#[test]
fn import_reads_a_document_from_stdin() {
    let dir = tempdir().expect("tempdir");
    let db_path = dir.path().join("warehouse.db");

    cargo_bin_cmd!("report-warehouse")
        .arg("import")
        .arg("--db")
        .arg(&db_path)
        .arg("-")
        .write_stdin(REPORT)
        .assert()
        .success()
        .stdout(predicate::str::contains("- -> analysis"));

    let db = ReportDb::open(&db_path).expect("open db");
    assert_eq!(db.count("analysis").expect("count"), 1);
}
