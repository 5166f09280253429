//! Host-facing session: one model, its compiler, store and engine.
//!
//! All entry points take `&mut self`, so edits, analysis and evaluation are
//! serialised by the borrow checker. Edits queue a deferred compile that is
//! served by [`Session::tick`]; [`Session::run_cycle`] compiles synchronously
//! first when bindings are stale.

use efs_compiler::{CompileOutcome, CompileRequest, Compiler, RefactorReport};
use efs_core::element::{ElementId, KindTag};
use efs_core::log::{Level, Message, Origin};
use efs_core::model::Model;
use efs_core::types::TypeEnv;
use efs_core::value::Value;
use efs_lang::{parse_expression, parse_statement};
use tracing::debug;

use crate::config::EngineConfig;
use crate::engine::{CycleReport, Engine};
use crate::error::{Result, SessionError};
use crate::store::{Snapshot, VariableStore};

#[derive(Debug)]
pub struct Session {
    model: Model,
    compiler: Compiler,
    engine: Engine,
    store: VariableStore,
}

impl Session {
    pub fn new(model: Model) -> Self {
        Self::with_config(model, EngineConfig::default())
    }

    pub fn with_config(model: Model, config: EngineConfig) -> Self {
        Self {
            model,
            compiler: Compiler::new(),
            engine: Engine::new(config),
            store: VariableStore::new(),
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Direct access for structural edits. Call [`Session::refactor`] after a
    /// rename and [`Session::refactor_and_relocate`] after a move.
    pub fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn store(&self) -> &VariableStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        self.engine.config()
    }

    pub fn set_config(&mut self, config: EngineConfig) {
        self.engine.set_config(config);
    }

    // --- Presentation ---

    /// The expression or statement text owned by `id`.
    pub fn expression_text(&self, id: ElementId) -> Option<&str> {
        self.model
            .get(id)
            .and_then(|e| e.kind.slot_text())
            .map(|(text, _)| text)
    }

    /// Replace the text of a slot. Text that parses is stored in normalised
    /// form; anything else is stored as typed and reported at the next compile.
    pub fn set_expression_text(&mut self, id: ElementId, text: &str) -> Result<()> {
        let normalised = if self.model.tag(id) == Some(KindTag::Action) {
            parse_statement(text).map(|s| s.to_string())
        } else {
            parse_expression(text).map(|e| e.to_string())
        };
        let stored = normalised.unwrap_or_else(|_| text.to_string());
        self.model.set_slot_text(id, &stored)?;
        debug!(%id, text = %stored, "slot text changed");
        self.compiler.compile(&mut self.model, CompileRequest::deferred());
        Ok(())
    }

    pub fn messages(&self, id: ElementId) -> &[Message] {
        self.model.messages(id)
    }

    /// Worst message level in the subtree of `id`.
    pub fn message_path_info(&self, id: ElementId) -> Option<Level> {
        self.model.message_path_info(id)
    }

    // --- Triggers ---

    /// Request a compile. With `blocking` false the request waits for
    /// [`Session::tick`].
    pub fn compile_synchronous(&mut self, force: bool, blocking: bool) -> CompileOutcome {
        self.compiler.compile(
            &mut self.model,
            CompileRequest {
                synchronous: blocking,
                force,
            },
        )
    }

    /// Serve deferred compile work.
    pub fn tick(&mut self) -> Option<CompileOutcome> {
        self.compiler.tick(&mut self.model)
    }

    pub fn refactor(&mut self, id: ElementId) -> Result<RefactorReport> {
        self.compiler.ensure_current(&mut self.model);
        Ok(self.compiler.refactor(&mut self.model, id)?)
    }

    pub fn rename(&mut self, id: ElementId, new_name: &str) -> Result<RefactorReport> {
        self.compiler.ensure_current(&mut self.model);
        Ok(self.compiler.rename(&mut self.model, id, new_name)?)
    }

    pub fn relocate(&mut self, id: ElementId, new_parent: ElementId) -> Result<RefactorReport> {
        self.compiler.ensure_current(&mut self.model);
        Ok(self.compiler.relocate(&mut self.model, id, new_parent)?)
    }

    pub fn refactor_and_relocate(&mut self, id: ElementId) -> Result<RefactorReport> {
        self.compiler.ensure_current(&mut self.model);
        Ok(self.compiler.refactor_and_relocate(&mut self.model, id)?)
    }

    /// Compile if stale and bring the store in line with the model.
    fn prepare(&mut self) {
        self.compiler.ensure_current(&mut self.model);
        let diagnostics = self.engine.initialize(
            &self.model,
            self.compiler.slots(),
            self.compiler.types(),
            &mut self.store,
        );
        for (id, message) in diagnostics {
            self.model.add_message(id, message);
        }
    }

    /// Run one cycle. Runtime messages of the previous cycle are replaced.
    pub fn run_cycle(&mut self) -> CycleReport {
        self.compiler.ensure_current(&mut self.model);
        let report = self.engine.run_cycle(
            &self.model,
            self.compiler.slots(),
            self.compiler.types(),
            &mut self.store,
        );
        self.model.clear_all_messages(Origin::Runtime);
        for (id, message) in &report.diagnostics {
            self.model.add_message(*id, message.clone());
        }
        report
    }

    /// Run the number of cycles configured in [`EngineConfig::cycles`].
    pub fn run_configured(&mut self) -> Vec<CycleReport> {
        (0..self.config().cycles).map(|_| self.run_cycle()).collect()
    }

    /// Set a variable from the host, typically an `Incoming` one.
    pub fn set_variable(&mut self, id: ElementId, value: Value) -> Result<()> {
        if self.model.tag(id) != Some(KindTag::Variable) {
            return Err(SessionError::NotAVariable(id));
        }
        self.prepare();
        let env = TypeEnv::new(&self.model, self.compiler.types());
        let ty = env.type_of(id);
        let value = ty.coerce(&self.model, value);
        ty.check_range(&self.model, &value)?;
        if !ty.accepts(&env, &value) {
            return Err(SessionError::TypeMismatch {
                variable: self.model.qualified_name(id),
                value: value.display(&self.model).to_string(),
            });
        }
        self.store.set(id, value);
        Ok(())
    }

    pub fn value(&self, id: ElementId) -> Option<&Value> {
        self.store.get(id)
    }

    /// Value of a variable by qualified name.
    pub fn value_of(&self, name: &str) -> Option<&Value> {
        self.model.lookup(name).and_then(|id| self.store.get(id))
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot(&self.model)
    }

    pub fn fingerprint(&self) -> String {
        self.store.fingerprint(&self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use efs_core::builder::ModelBuilder;
    use efs_core::element::{Mode, RulePriority};
    use efs_core::log::ErrorKind;

    fn session() -> Session {
        let mut b = ModelBuilder::new();
        let n = b.namespace("N").unwrap();
        b.range(n, "R", 0.0, 10.0).unwrap();
        b.variable(n, "input", "R", Mode::Incoming, None).unwrap();
        b.variable(n, "out", "Integer", Mode::Outgoing, None).unwrap();
        b.simple_rule(n, "Copy", RulePriority::Processing, &[], &["out <- input * 2"])
            .unwrap();
        Session::new(b.build())
    }

    #[test]
    fn host_input_is_checked() {
        let mut s = session();
        let input = s.model().lookup("N.input").unwrap();
        let rule = s.model().lookup("N.Copy").unwrap();

        assert!(matches!(
            s.set_variable(input, Value::Int(11)),
            Err(SessionError::Range(_))
        ));
        assert!(matches!(
            s.set_variable(input, Value::Bool(true)),
            Err(SessionError::TypeMismatch { .. })
        ));
        assert!(matches!(
            s.set_variable(rule, Value::Int(1)),
            Err(SessionError::NotAVariable(_))
        ));

        s.set_variable(input, Value::Int(4)).unwrap();
        s.run_cycle();
        assert_eq!(s.value_of("N.out"), Some(&Value::Int(8)));
    }

    #[test]
    fn text_is_normalised_and_compiled_on_tick() {
        let mut s = session();
        s.compile_synchronous(false, true);
        let rule = s.model().lookup("N.Copy").unwrap();
        let condition = s.model().children(rule)[0];
        let action = s.model().children(condition)[0];

        s.set_expression_text(action, "out<-input+1").unwrap();
        assert_eq!(s.expression_text(action), Some("out <- input + 1"));
        assert!(s.compiler().is_stale(s.model()));
        assert!(s.tick().is_some());
        assert!(!s.compiler().is_stale(s.model()));

        s.set_expression_text(action, "out <- (").unwrap();
        assert_eq!(s.expression_text(action), Some("out <- ("));
        s.tick();
        assert_eq!(s.messages(action)[0].kind, ErrorKind::Parse);
        assert_eq!(s.message_path_info(s.model().roots()[0]), Some(Level::Error));
    }

    #[test]
    fn relocating_after_an_edit_requalifies_references() {
        let mut b = ModelBuilder::new();
        let n = b.namespace("N").unwrap();
        let a = b.sub_namespace(n, "A").unwrap();
        let target = b.sub_namespace(n, "B").unwrap();
        b.variable(a, "x", "Integer", Mode::Internal, None).unwrap();
        b.simple_rule(n, "Set", RulePriority::Processing, &[], &["A.x <- 1"])
            .unwrap();
        let mut s = Session::new(b.build());
        let rule = s.model().lookup("N.Set").unwrap();
        let action = s.model().children(s.model().children(rule)[0])[0];

        s.set_expression_text(action, "A.x <- 2").unwrap();
        assert!(s.compiler().is_stale(s.model()));
        let x = s.model().lookup("N.A.x").unwrap();
        s.relocate(x, target).unwrap();
        assert_eq!(s.expression_text(action), Some("B.x <- 2"));

        s.run_cycle();
        assert_eq!(s.value_of("N.B.x"), Some(&Value::Int(2)));
    }

    #[test]
    fn overflowing_literals_are_kept_as_typed() {
        let mut s = session();
        let rule = s.model().lookup("N.Copy").unwrap();
        let action = s.model().children(s.model().children(rule)[0])[0];
        s.set_expression_text(action, "out <- 1.0e999").unwrap();
        assert_eq!(s.expression_text(action), Some("out <- 1.0e999"));
        s.tick();
        assert_eq!(s.messages(action)[0].kind, ErrorKind::Parse);
    }

    #[test]
    fn runtime_messages_are_replaced_each_cycle() {
        let mut s = session();
        let out = s.model().lookup("N.out").unwrap();
        let rule = s.model().lookup("N.Copy").unwrap();
        let condition = s.model().children(rule)[0];
        let action = s.model().children(condition)[0];
        s.set_expression_text(action, "out <- 1 / (input - input)").unwrap();

        s.run_cycle();
        assert_eq!(s.messages(rule).len(), 1);
        s.run_cycle();
        assert_eq!(s.messages(rule).len(), 1);
        assert_eq!(s.value(out), Some(&Value::Int(0)));
    }
}
