//! The cyclic rule engine.
//!
//! One cycle runs every rule activation phase by phase, in declaration
//! order within a phase. Each top-level activation stages its changes in a
//! fresh [`Evaluator`]; a successful activation commits them to the store
//! before the next one runs, so later rules see earlier results.

use std::collections::BTreeMap;

use efs_compiler::SlotTable;
use efs_core::element::{ElementId, ElementKind, KindTag, RulePriority};
use efs_core::log::{ErrorKind, Message, Origin};
use efs_core::model::Model;
use efs_core::types::{RangeViolation, Type, TypeEnv, TypeTable};
use efs_core::value::Value;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::eval::{Evaluator, Frame, RuleOutcome};
use crate::functions::FunctionCache;
use crate::store::{Location, VariableStore};

const MAX_NESTING: usize = 16;

/// What happened during one cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub rules_run: usize,
    pub fired: usize,
    pub unmatched: usize,
    pub failures: usize,
    pub range_violations: usize,
    /// Values the variable's type does not accept, such as a fraction
    /// assigned to an integer.
    pub invalid_assignments: usize,
    /// Runtime messages to attach to elements, in the order they arose.
    #[serde(skip)]
    pub diagnostics: Vec<(ElementId, Message)>,
}

/// One rule bound to the instance it runs for.
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    pub rule: ElementId,
    pub priority: RulePriority,
    pub this: Option<Location>,
    /// For state rules: the state the instance was in when the cycle began.
    pub state: Option<ElementId>,
}

#[derive(Debug, Default)]
pub struct Engine {
    config: EngineConfig,
    cache: FunctionCache,
    cycle: u64,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            cache: FunctionCache::new(),
            cycle: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    /// Number of cycles run so far.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn cache(&self) -> &FunctionCache {
        &self.cache
    }

    /// Align the store with the model and give new variables their initial
    /// values. Returns messages for variables whose default could not be used.
    pub fn initialize(
        &mut self,
        model: &Model,
        slots: &SlotTable,
        types: &TypeTable,
        store: &mut VariableStore,
    ) -> Vec<(ElementId, Message)> {
        let env = TypeEnv::new(model, types);
        let mut diagnostics = Vec::new();
        for variable in store.materialize(&env) {
            let ty = env.type_of(variable);
            let value = {
                let mut evaluator =
                    Evaluator::new(model, slots, types, &self.config, store, &mut self.cache);
                match slots.expression(variable) {
                    Some(expr) => evaluator
                        .evaluate(&mut Frame::default(), expr)
                        .map(|v| ty.coerce(model, v)),
                    None => evaluator.initial_value(&ty),
                }
            };
            let value = match value {
                Ok(v) => match check_deep(&env, &ty, &v, 0) {
                    Ok(()) => v,
                    Err(violation) => {
                        diagnostics.push((variable, range_message(&violation)));
                        ty.default_value(&env)
                    }
                },
                Err(err) => {
                    diagnostics.push((
                        variable,
                        Message::error(
                            ErrorKind::RuntimeEvaluation,
                            Origin::Runtime,
                            format!("initial value: {err}"),
                        ),
                    ));
                    ty.default_value(&env)
                }
            };
            debug!(variable = %model.qualified_name(variable), "variable initialized");
            store.set(variable, value);
        }
        diagnostics
    }

    /// Run one cycle over the store.
    pub fn run_cycle(
        &mut self,
        model: &Model,
        slots: &SlotTable,
        types: &TypeTable,
        store: &mut VariableStore,
    ) -> CycleReport {
        self.cycle += 1;
        self.cache.clear();
        let mut report = CycleReport {
            cycle: self.cycle,
            ..CycleReport::default()
        };
        report
            .diagnostics
            .extend(self.initialize(model, slots, types, store));

        let env = TypeEnv::new(model, types);
        let activations = activations(&env, store);
        debug!(cycle = self.cycle, activations = activations.len(), "cycle started");
        for phase in RulePriority::ALL {
            for activation in activations.iter().filter(|a| a.priority == phase) {
                self.activate(model, slots, types, store, activation, &mut report);
            }
        }
        info!(
            cycle = report.cycle,
            rules = report.rules_run,
            fired = report.fired,
            failures = report.failures,
            range_violations = report.range_violations,
            invalid_assignments = report.invalid_assignments,
            "cycle finished"
        );
        report
    }

    fn activate(
        &mut self,
        model: &Model,
        slots: &SlotTable,
        types: &TypeTable,
        store: &mut VariableStore,
        activation: &Activation,
        report: &mut CycleReport,
    ) {
        report.rules_run += 1;
        let mut evaluator = Evaluator::new(model, slots, types, &self.config, store, &mut self.cache);
        let result = evaluator.run_rule(activation.this.clone(), activation.rule);
        let changes = evaluator.finish();
        report.diagnostics.extend(changes.diagnostics);
        match result {
            Ok(RuleOutcome::Fired) => {
                report.fired += 1;
                commit(&TypeEnv::new(model, types), store, changes.values, report);
            }
            Ok(RuleOutcome::Unmatched) => report.unmatched += 1,
            Err(err) => {
                report.failures += 1;
                warn!(rule = %model.qualified_name(activation.rule), error = %err, "rule failed");
                report.diagnostics.push((
                    activation.rule,
                    Message::error(ErrorKind::RuntimeEvaluation, Origin::Runtime, err.to_string()),
                ));
            }
        }
    }
}

/// Write staged values to the store. A value that violates a range or that
/// the variable's type does not accept is rejected on its own; the variable
/// keeps its previous value.
fn commit(
    env: &TypeEnv<'_>,
    store: &mut VariableStore,
    changes: BTreeMap<ElementId, Value>,
    report: &mut CycleReport,
) {
    for (variable, value) in changes {
        let ty = env.type_of(variable);
        let name = env.model.qualified_name(variable);
        if let Err(violation) = check_deep(env, &ty, &value, 0) {
            warn!(variable = %name, %violation, "assignment rejected");
            report.range_violations += 1;
            report.diagnostics.push((variable, range_message(&violation)));
            continue;
        }
        if !ty.accepts(env, &value) {
            let value = value.display(env.model).to_string();
            warn!(variable = %name, %value, "assignment rejected: type mismatch");
            report.invalid_assignments += 1;
            report.diagnostics.push((
                variable,
                Message::error(
                    ErrorKind::InvalidAssignment,
                    Origin::Runtime,
                    format!("'{name}' cannot hold {value}"),
                ),
            ));
            continue;
        }
        store.set(variable, value);
    }
}

fn range_message(violation: &RangeViolation) -> Message {
    Message::error(ErrorKind::RangeViolation, Origin::Runtime, violation.to_string())
}

/// Range check through structure fields and collection items.
fn check_deep(env: &TypeEnv<'_>, ty: &Type, value: &Value, depth: usize) -> Result<(), RangeViolation> {
    ty.check_range(env.model, value)?;
    if depth > MAX_NESTING {
        return Ok(());
    }
    match (ty, value) {
        (Type::Structure(_), Value::Structure { ty: actual, fields }) => {
            for element in env.structure_elements(*actual) {
                if let Some(field) = fields.get(env.model.name(element)) {
                    check_deep(env, &env.type_of(element), field, depth + 1)?;
                }
            }
            Ok(())
        }
        (_, Value::List(items)) => match ty.element_type(env) {
            Some(element) => items
                .iter()
                .try_for_each(|item| check_deep(env, &element, item, depth + 1)),
            None => Ok(()),
        },
        _ => Ok(()),
    }
}

/// Every location holding a value, with its declared type: variables and,
/// recursively, their structure fields. Declaration order.
pub fn instances(env: &TypeEnv<'_>, store: &VariableStore) -> Vec<(Location, Type)> {
    fn collect(env: &TypeEnv<'_>, location: Location, ty: Type, depth: usize, out: &mut Vec<(Location, Type)>) {
        let fields = match &ty {
            Type::Structure(s) if depth <= MAX_NESTING => env.structure_elements(*s),
            _ => Vec::new(),
        };
        out.push((location.clone(), ty));
        for element in fields {
            collect(
                env,
                location.field(env.model.name(element)),
                env.type_of(element),
                depth + 1,
                out,
            );
        }
    }

    let mut out = Vec::new();
    for variable in crate::store::variables(env.model) {
        if store.get(variable).is_some() {
            collect(env, Location::variable(variable), env.type_of(variable), 0, &mut out);
        }
    }
    out
}

/// Rule activations for the current model and store. State rules are
/// included only for instances currently in that state.
pub fn activations(env: &TypeEnv<'_>, store: &VariableStore) -> Vec<Activation> {
    let model = env.model;
    let instances = instances(env, store);
    let of_type = |ty: Type| {
        instances
            .iter()
            .filter(move |(_, t)| *t == ty)
            .map(|(location, _)| location.clone())
    };

    let mut out = Vec::new();
    for rule in model.ids_in_order() {
        let Some(ElementKind::Rule { priority }) = model.get(rule).map(|e| &e.kind) else {
            continue;
        };
        let Some(parent) = model.parent(rule) else {
            continue;
        };
        let activation = |this: Option<Location>, state: Option<ElementId>| Activation {
            rule,
            priority: *priority,
            this,
            state,
        };
        match model.tag(parent) {
            Some(KindTag::NameSpace) => out.push(activation(None, None)),
            Some(KindTag::Structure) => {
                out.extend(of_type(Type::Structure(parent)).map(|l| activation(Some(l), None)));
            }
            Some(KindTag::StateMachine) => {
                out.extend(of_type(Type::StateMachine(parent)).map(|l| activation(Some(l), None)));
            }
            Some(KindTag::State) => {
                if let Some(machine) = model.parent(parent) {
                    out.extend(
                        of_type(Type::StateMachine(machine))
                            .filter(|l| store.read(l) == Some(&Value::State(parent)))
                            .map(|l| activation(Some(l), Some(parent))),
                    );
                }
            }
            // Sub-rules and procedure rules run from their owners.
            _ => {}
        }
    }
    out
}
