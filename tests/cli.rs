use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

const USAGE: &str = "Usage: <source file> <target file>\n";

fn cmd() -> Command {
    Command::cargo_bin("icash-import").unwrap()
}

fn fixture(name: &str) -> String {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
        .display()
        .to_string()
}

#[test]
fn no_arguments_prints_usage() {
    cmd().assert().success().stdout(USAGE).stderr("");
}

#[test]
fn too_many_arguments_prints_usage() {
    cmd().args(["a.xml", "b.xml", "c.xml"]).assert().success().stdout(USAGE);
}

#[test]
fn missing_source_is_reported_on_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out.xml");
    cmd()
        .arg("does-not-exist.xml")
        .arg(&dest)
        .assert()
        .success()
        .stdout("File does-not-exist.xml does not exist\n");
    assert!(!dest.exists());
}

#[test]
fn single_entry_matches_golden_file() {
    let expected = fs::read_to_string(fixture("single_entry.money.xml")).unwrap();
    cmd()
        .arg(fixture("single_entry.xml"))
        .assert()
        .success()
        .stdout(expected);
}

#[test]
fn export_matches_golden_file() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("money.xml");
    cmd()
        .arg(fixture("export.xml"))
        .arg(&dest)
        .assert()
        .success()
        .stdout("");
    assert_eq!(
        fs::read_to_string(&dest).unwrap(),
        fs::read_to_string(fixture("export.money.xml")).unwrap()
    );
}

#[test]
fn file_and_stdout_output_are_identical() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("money.xml");
    cmd().arg(fixture("export.xml")).arg(&dest).assert().success();
    let stdout = cmd().arg(fixture("export.xml")).output().unwrap().stdout;
    assert_eq!(fs::read(&dest).unwrap(), stdout);
}

#[test]
fn repeated_runs_are_deterministic() {
    let first = cmd().arg(fixture("export.xml")).output().unwrap();
    let second = cmd().arg(fixture("export.xml")).output().unwrap();
    assert!(first.status.success());
    assert_eq!(first.stdout, second.stdout);
}

#[test]
fn existing_destination_is_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("money.xml");
    fs::write(&dest, "stale content that is longer than nothing").unwrap();
    cmd().arg(fixture("single_entry.xml")).arg(&dest).assert().success();
    assert_eq!(
        fs::read_to_string(&dest).unwrap(),
        fs::read_to_string(fixture("single_entry.money.xml")).unwrap()
    );
}

#[test]
fn malformed_source_fails_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("broken.xml");
    let dest = dir.path().join("money.xml");
    fs::write(&src, "<icash><entry date=\"2024-01-01\" amount=\"1\"></icash>").unwrap();
    cmd()
        .arg(&src)
        .arg(&dest)
        .assert()
        .code(1)
        .stdout("")
        .stderr(predicate::str::contains("Cannot parse"));
    assert!(!dest.exists());
}

#[test]
fn invalid_entry_fails_transform() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("bad-date.xml");
    fs::write(&src, "<icash><entry date=\"tomorrow\" amount=\"1\"/></icash>").unwrap();
    cmd()
        .arg(&src)
        .assert()
        .failure()
        .stdout("")
        .stderr(predicate::str::contains("Transformation failed").and(predicate::str::contains("tomorrow")));
}

#[test]
fn verbose_logging_goes_to_stderr() {
    let expected = fs::read_to_string(fixture("single_entry.money.xml")).unwrap();
    cmd()
        .arg("-vv")
        .arg(fixture("single_entry.xml"))
        .assert()
        .success()
        .stdout(expected)
        .stderr(predicate::str::contains("stylesheet loaded"));
}

#[test]
fn unknown_flag_prints_usage() {
    cmd()
        .args(["a.xml", "b.xml", "--foo"])
        .assert()
        .success()
        .stdout(USAGE)
        .stderr("");
    cmd().arg("--foo").assert().success().stdout(USAGE);
}

#[test]
fn hyphenated_source_is_treated_as_a_file_name() {
    cmd()
        .arg("-report.xml")
        .assert()
        .success()
        .stdout("File -report.xml does not exist\n");

    let dir = tempfile::tempdir().unwrap();
    fs::copy(fixture("single_entry.xml"), dir.path().join("-report.xml")).unwrap();
    cmd()
        .current_dir(dir.path())
        .arg("-report.xml")
        .assert()
        .success()
        .stdout(fs::read_to_string(fixture("single_entry.money.xml")).unwrap());
}

#[test]
fn latin1_source_is_decoded() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("latin1.xml");
    let mut bytes = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\n".to_vec();
    bytes.extend_from_slice(b"<icash><entry date=\"2024-05-01\" amount=\"3\" comment=\"Caf\xe9\"/></icash>");
    fs::write(&src, bytes).unwrap();
    cmd()
        .arg(&src)
        .assert()
        .success()
        .stdout(predicate::str::contains("<comment>Café</comment>"));
}

#[test]
fn line_ends_and_tabs_in_attributes_become_spaces() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("crlf.xml");
    fs::write(
        &src,
        "<icash>\r\n<entry date=\"2024-05-01\" amount=\"3\" comment=\"a\tb\r\nc\"/>\r\n</icash>\r\n",
    )
    .unwrap();
    cmd()
        .arg(&src)
        .assert()
        .success()
        .stdout(predicate::str::contains("<comment>a b c</comment>"));
}
