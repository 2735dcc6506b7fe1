//! CLI smoke tests.

#![allow(deprecated)] // Command::cargo_bin is deprecated but still functional

use assert_cmd::Command;
use predicates::prelude::*;
use std::collections::BTreeMap;

use tracebuild::record::{
    BuildTarget, CCompile, MetaData, Record, RefKind, Reference, Rule,
};
use tracebuild::record_file::{RecordFileWriter, RecordWriter};

#[test]
fn test_help() {
    let mut cmd = Command::cargo_bin("tracebuild").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"))
        .stdout(predicate::str::contains("trace"))
        .stdout(predicate::str::contains("analyze-make"));
}

#[test]
fn test_requires_a_subcommand() {
    let mut cmd = Command::cargo_bin("tracebuild").unwrap();
    cmd.assert().failure();
}

#[test]
fn test_dump_prints_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("x.trace");

    let mut writer = RecordFileWriter::create(&path).unwrap();
    writer
        .write_record(&Record::MetaData(MetaData {
            project_root: "/proj".into(),
            project_name: "myproject".into(),
            build_dir: None,
        }))
        .unwrap();
    drop(writer);

    let mut cmd = Command::cargo_bin("tracebuild").unwrap();
    cmd.arg("dump")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("myproject"));
}

#[test]
fn test_dump_fails_on_missing_file() {
    let mut cmd = Command::cargo_bin("tracebuild").unwrap();
    cmd.arg("dump").arg("/nonexistent.trace").assert().failure();
}

#[test]
fn test_gen_ninja_writes_build_file() {
    let dir = tempfile::tempdir().unwrap();
    let targets_path = dir.path().join("x.targets");

    let mut writer = RecordFileWriter::create(&targets_path).unwrap();
    writer
        .write_record(&Record::BuildTarget(BuildTarget {
            qualified_name: "//src:foo".to_string(),
            srcs: vec![Reference {
                kind: RefKind::RelativeToProjectRoot,
                name: "src/foo.c".to_string(),
            }],
            outputs: vec![Reference {
                kind: RefKind::RelativeToProjectRoot,
                name: "src/foo.o".to_string(),
            }],
            rule: Rule::CCompile(CCompile {
                is_cc: false,
                flags: vec!["-Wall".to_string()],
                defs: BTreeMap::new(),
                header_search_path: Default::default(),
                headers: vec![],
            }),
            install: false,
        }))
        .unwrap();
    drop(writer);

    let mut cmd = Command::cargo_bin("tracebuild").unwrap();
    cmd.current_dir(dir.path())
        .arg("gen-ninja")
        .arg("x")
        .assert()
        .success();

    let ninja = std::fs::read_to_string(dir.path().join("build.ninja")).unwrap();
    assert!(ninja.contains("rule c_compile"));
    assert!(ninja.contains("build $builddir/src/foo.o: c_compile src/foo.c"));
}
