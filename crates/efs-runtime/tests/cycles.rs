use efs_core::builder::ModelBuilder;
use efs_core::element::{Graph, Interpolation, Mode, RulePriority};
use efs_core::log::ErrorKind;
use efs_core::model::Model;
use efs_core::value::Value;
use efs_runtime::{EngineConfig, Session};

fn counter_model(start: &str) -> Model {
    let mut b = ModelBuilder::new();
    let n = b.namespace("N").unwrap();
    b.range(n, "R", 0.0, 10.0).unwrap();
    b.variable(n, "v", "R", Mode::Internal, Some(start)).unwrap();
    b.simple_rule(n, "Step", RulePriority::Processing, &[], &["v <- v + 1"])
        .unwrap();
    b.build()
}

#[test]
fn counter_advances_once_per_cycle() {
    let mut session = Session::new(counter_model("0"));
    for _ in 0..3 {
        session.run_cycle();
    }
    assert_eq!(session.value_of("N.v"), Some(&Value::Int(3)));
    assert_eq!(session.model().error_count(), 0);
}

#[test]
fn counter_stops_at_the_range_bound() {
    let mut session = Session::new(counter_model("10"));
    let report = session.run_cycle();
    assert_eq!(report.range_violations, 1);
    assert_eq!(session.value_of("N.v"), Some(&Value::Int(10)));
    let v = session.model().lookup("N.v").unwrap();
    assert_eq!(session.messages(v)[0].kind, ErrorKind::RangeViolation);
}

#[test]
fn priorities_order_the_phases() {
    let mut b = ModelBuilder::new();
    let n = b.namespace("N").unwrap();
    b.variable(n, "x", "Integer", Mode::Internal, None).unwrap();
    b.variable(n, "y", "Integer", Mode::Internal, None).unwrap();
    // Declared first, but runs in a later phase.
    b.simple_rule(n, "Out", RulePriority::UpdateOut, &[], &["y <- x + 1"])
        .unwrap();
    b.simple_rule(n, "Set", RulePriority::Processing, &[], &["x <- 5"])
        .unwrap();
    let mut session = Session::new(b.build());
    session.run_cycle();
    assert_eq!(session.value_of("N.y"), Some(&Value::Int(6)));
}

#[test]
fn identical_runs_have_identical_fingerprints() {
    let run = || {
        let mut session = Session::new(counter_model("2"));
        session.run_cycle();
        session.run_cycle();
        session.fingerprint()
    };
    assert_eq!(run(), run());

    let mut other = Session::new(counter_model("2"));
    other.run_cycle();
    assert_ne!(run(), other.fingerprint());
}

#[test]
fn refactoring_through_the_session_is_idempotent() {
    let mut b = ModelBuilder::new();
    let n = b.namespace("N").unwrap();
    b.enumeration(n, "Mode", &["Off", "On"]).unwrap();
    b.variable(n, "m", "Mode", Mode::Internal, Some("Mode.On")).unwrap();
    b.simple_rule(n, "Toggle", RulePriority::Processing, &["m == Mode.On"], &["m <- Mode.Off"])
        .unwrap();
    let mut session = Session::new(b.build());
    let mode = session.model().lookup("N.Mode").unwrap();

    let first = session.rename(mode, "Switch").unwrap();
    assert!(first.rewritten_slots >= 3);
    let second = session.refactor(mode).unwrap();
    assert_eq!(second.rewritten_slots, 0);

    session.run_cycle();
    let off = session.model().lookup("N.Switch.Off").unwrap();
    assert_eq!(session.value_of("N.m"), Some(&Value::EnumValue(off)));
    assert_eq!(session.model().error_count(), 0);
}

#[test]
fn cacheable_functions_and_graphs() {
    let mut b = ModelBuilder::new();
    let n = b.namespace("N").unwrap();
    let curve = b.function(n, "Curve", "Double", true).unwrap();
    b.parameter(curve, "x", "Double").unwrap();
    b.interpolation(curve, Interpolation::Graph(Graph::new(vec![(0.0, 0.0), (10.0, 5.0)])))
        .unwrap();
    b.variable(n, "a", "Double", Mode::Internal, None).unwrap();
    b.variable(n, "b", "Double", Mode::Internal, None).unwrap();
    b.simple_rule(
        n,
        "Sample",
        RulePriority::Processing,
        &[],
        &["a <- Curve(4)", "b <- Curve(4) + Curve(20)"],
    )
    .unwrap();
    let mut session = Session::new(b.build());
    let report = session.run_cycle();

    // Curve(20) is outside the graph, so the whole rule fails.
    assert_eq!(report.failures, 1);
    assert_eq!(session.value_of("N.a"), Some(&Value::Double(0.0)));
    assert_eq!(session.engine().cache().hits(), 1);
}

#[test]
fn procedures_run_their_rules_with_arguments() {
    let mut b = ModelBuilder::new();
    let n = b.namespace("N").unwrap();
    b.variable(n, "total", "Integer", Mode::Internal, None).unwrap();
    let add = b.procedure(n, "Add").unwrap();
    b.parameter(add, "amount", "Integer").unwrap();
    b.simple_rule(add, "Apply", RulePriority::Processing, &["amount > 0"], &["total <- total + amount"])
        .unwrap();
    b.simple_rule(n, "Main", RulePriority::Processing, &[], &["Add(2)", "Add(amount => 3)"])
        .unwrap();
    let mut session = Session::new(b.build());
    session.run_cycle();
    assert_eq!(session.value_of("N.total"), Some(&Value::Int(5)));
}

#[test]
fn configured_cycles_and_unmatched_warnings() {
    let config = EngineConfig {
        cycles: 4,
        warn_on_unmatched_rule: true,
        ..EngineConfig::default()
    };
    let mut b = ModelBuilder::new();
    let n = b.namespace("N").unwrap();
    b.variable(n, "k", "Integer", Mode::Internal, None).unwrap();
    b.simple_rule(n, "Upto", RulePriority::Processing, &["k < 2"], &["k <- k + 1"])
        .unwrap();
    let mut session = Session::with_config(b.build(), config);
    let reports = session.run_configured();
    assert_eq!(reports.len(), 4);
    assert_eq!(session.value_of("N.k"), Some(&Value::Int(2)));
    assert_eq!(reports[3].unmatched, 1);
    let rule = session.model().lookup("N.Upto").unwrap();
    assert_eq!(session.messages(rule).len(), 1);
}

#[test]
fn committed_values_must_fit_the_declared_type() {
    let mut b = ModelBuilder::new();
    let n = b.namespace("N").unwrap();
    let curve = b.function(n, "Curve", "Integer", false).unwrap();
    b.parameter(curve, "x", "Double").unwrap();
    b.interpolation(curve, Interpolation::Graph(Graph::new(vec![(0.0, 2.0), (10.0, 7.0)])))
        .unwrap();
    b.variable(n, "whole", "Integer", Mode::Internal, None).unwrap();
    b.variable(n, "half", "Integer", Mode::Internal, None).unwrap();
    b.simple_rule(
        n,
        "Sample",
        RulePriority::Processing,
        &[],
        &["whole <- Curve(0)", "half <- Curve(1)"],
    )
    .unwrap();
    let mut session = Session::new(b.build());
    let report = session.run_cycle();

    let curve = session.model().lookup("N.Curve").unwrap();
    assert_eq!(session.messages(curve)[0].kind, ErrorKind::TypeMismatch);

    // A whole result is narrowed; a fraction is rejected on its own.
    assert_eq!(report.failures, 0);
    assert_eq!(report.invalid_assignments, 1);
    assert_eq!(session.value_of("N.whole"), Some(&Value::Int(2)));
    assert_eq!(session.value_of("N.half"), Some(&Value::Int(0)));
    let half = session.model().lookup("N.half").unwrap();
    assert_eq!(session.messages(half)[0].kind, ErrorKind::InvalidAssignment);
}
