use std::path::Path;
use std::process::{Command, Output};

use efs_core::builder::ModelBuilder;
use efs_core::element::{Mode, RulePriority};
use efs_core::model::Model;

fn efs(args: &[&str], dir: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_efs"))
        .args(args)
        .current_dir(dir)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn write_model(dir: &Path, model: &Model) -> String {
    let path = dir.join("model.json");
    std::fs::write(&path, serde_json::to_string(model).unwrap()).unwrap();
    path.display().to_string()
}

fn counter() -> Model {
    let mut b = ModelBuilder::new();
    let n = b.namespace("N").unwrap();
    b.variable(n, "v", "Integer", Mode::Internal, Some("0")).unwrap();
    b.simple_rule(n, "Step", RulePriority::Processing, &[], &["v <- v + 1"])
        .unwrap();
    b.build()
}

#[test]
fn parse_prints_normalised_text() {
    let dir = tempfile::tempdir().unwrap();
    let out = efs(&["parse", "a+b*2"], dir.path());
    assert!(out.status.success());
    assert_eq!(stdout(&out).trim(), "a + b * 2");

    let out = efs(&["parse", "--statement", "x<-1"], dir.path());
    assert_eq!(stdout(&out).trim(), "x <- 1");

    let out = efs(&["parse", "a +"], dir.path());
    assert!(!out.status.success());
}

#[test]
fn check_fails_on_errors() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_model(dir.path(), &counter());
    assert!(efs(&["check", &model], dir.path()).status.success());

    let mut b = ModelBuilder::new();
    let n = b.namespace("N").unwrap();
    b.variable(n, "v", "Integer", Mode::Internal, None).unwrap();
    b.simple_rule(n, "Bad", RulePriority::Processing, &[], &["v <- missing"])
        .unwrap();
    let model = write_model(dir.path(), &b.build());
    let out = efs(&["check", &model], dir.path());
    assert!(!out.status.success());
    assert!(stdout(&out).contains("N.Bad"));
}

#[test]
fn run_uses_flags_over_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_model(dir.path(), &counter());
    std::fs::write(dir.path().join("efs.toml"), "[engine]\ncycles = 2\n").unwrap();

    let out = efs(&["run", &model], dir.path());
    assert!(out.status.success());
    assert!(stdout(&out).contains("N.v = 2"));

    let out = efs(&["run", &model, "--cycles", "5", "--json"], dir.path());
    let snapshot: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(snapshot["N.v"], serde_json::json!({ "Int": 5 }));
}
