use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn skein() -> Command {
    Command::cargo_bin("skein").unwrap()
}

fn project(source: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("prog.py"), source).unwrap();
    dir
}

#[test]
fn test_help_prints_usage_and_exits_one() {
    skein()
        .arg("--help")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("--nobounds"));
}

#[test]
fn test_unknown_flag_is_usage_error() {
    skein().args(["--bogus", "prog.py"]).assert().code(1);
}

#[test]
fn test_missing_file_argument_is_usage_error() {
    skein().assert().code(1);
}

#[test]
fn test_missing_source_exits_one() {
    let dir = TempDir::new().unwrap();
    skein()
        .current_dir(dir.path())
        .arg("nothere")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("cannot load module 'nothere'"))
        .stderr(predicate::str::contains("nothere.py"))
        .stderr(predicate::str::contains("no such file"));
}

#[test]
fn test_missing_flags_file_exits_one() {
    let dir = project("x = 1\n");
    skein()
        .current_dir(dir.path())
        .args(["-f", "missing.flags", "prog"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("flags file"));
}

#[test]
fn test_successful_run_writes_manifest_and_annotations() {
    let dir = project("def twice(v):\n    return v * 2\n\ny = twice(4)\n");
    skein()
        .current_dir(dir.path())
        .args(["-a", "prog"])
        .assert()
        .success()
        .stdout(predicate::str::contains("elapsed time"));

    let annotated = fs::read_to_string(dir.path().join("prog.ss.py")).unwrap();
    assert!(annotated.contains("# v: int"));
    assert!(dir.path().join("prog.types.json").is_file());
}

#[test]
fn test_silent_mode_still_prints_warnings() {
    let dir = project("y = undefined_name + 1\n");
    skein()
        .current_dir(dir.path())
        .args(["-n", "prog.py"])
        .assert()
        .success()
        .stdout(predicate::str::contains("*WARNING*"))
        .stdout(predicate::str::contains("elapsed time").not())
        .stdout(predicate::str::contains("SKEIN").not());
}

#[test]
fn test_unresolvable_import_is_load_error() {
    let dir = project("import nowhere\n");
    skein()
        .current_dir(dir.path())
        .arg("prog.py")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("nowhere"));
}

#[test]
fn test_library_directory_modules_are_not_annotated() {
    let dir = project("from util import square\nz = square(3)\n");
    let lib = TempDir::new().unwrap();
    fs::write(lib.path().join("util.py"), "def square(v):\n    return v * v\n").unwrap();
    skein()
        .current_dir(dir.path())
        .args(["-a", "-n", "-L"])
        .arg(lib.path())
        .arg("prog.py")
        .assert()
        .success();
    assert!(dir.path().join("prog.ss.py").is_file());
    assert!(!lib.path().join("util.ss.py").exists());
}
