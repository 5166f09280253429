//! Compilation driver.
//!
//! The [`Compiler`] owns all state derived from the model text: the finder
//! cache, the slot table and the resolved declaration types. It decides when
//! an analysis pass is needed and writes the resulting diagnostics into the
//! element log.

use efs_core::element::ElementId;
use efs_core::log::{Level, Origin};
use efs_core::model::Model;
use efs_core::types::TypeTable;
use tracing::{debug, info};

use crate::analyzer::{Analysis, Analyzer};
use crate::cache::{CacheStats, FinderCache};
use crate::error::{CompileError, Result};
use crate::slots::SlotTable;

/// How a compile was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompileRequest {
    /// Run now instead of at the next [`Compiler::tick`].
    pub synchronous: bool,
    /// Run a full pass even when bindings are current.
    pub force: bool,
}

impl CompileRequest {
    pub fn synchronous() -> Self {
        Self {
            synchronous: true,
            force: false,
        }
    }

    pub fn forced() -> Self {
        Self {
            synchronous: true,
            force: true,
        }
    }

    pub fn deferred() -> Self {
        Self::default()
    }
}

/// Summary of one analysis pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileReport {
    pub incremental: bool,
    pub visited: usize,
    pub analyzed_slots: usize,
    pub errors: usize,
    pub warnings: usize,
    /// Binding revision of the model the pass ran against.
    pub binding_revision: u64,
    pub cache: CacheStats,
}

impl CompileReport {
    fn build(analysis: &Analysis, incremental: bool, binding_revision: u64, cache: CacheStats) -> Self {
        let count = |level: Level| {
            analysis
                .diagnostics
                .iter()
                .filter(|d| d.message.level == level)
                .count()
        };
        Self {
            incremental,
            visited: analysis.visited.len(),
            analyzed_slots: analysis.analyzed_slots,
            errors: count(Level::Error),
            warnings: count(Level::Warning),
            binding_revision,
            cache,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompileOutcome {
    /// Queued for the next [`Compiler::tick`].
    Deferred,
    /// Bindings were current; nothing ran.
    UpToDate,
    Compiled(CompileReport),
}

impl CompileOutcome {
    pub fn report(&self) -> Option<&CompileReport> {
        match self {
            CompileOutcome::Compiled(report) => Some(report),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Compiler {
    cache: FinderCache,
    slots: SlotTable,
    types: TypeTable,
    compiled_binding_revision: Option<u64>,
    pending: Option<CompileRequest>,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    pub fn cache_statistics(&self) -> CacheStats {
        self.cache.statistics()
    }

    /// Binding revision of the model at the last successful pass.
    pub fn compiled_binding_revision(&self) -> Option<u64> {
        self.compiled_binding_revision
    }

    pub fn is_stale(&self, model: &Model) -> bool {
        self.compiled_binding_revision != Some(model.binding_revision())
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Compile now or queue the request, depending on `request.synchronous`.
    pub fn compile(&mut self, model: &mut Model, request: CompileRequest) -> CompileOutcome {
        if !request.synchronous {
            let force = request.force || self.pending.is_some_and(|p| p.force);
            self.pending = Some(CompileRequest {
                synchronous: false,
                force,
            });
            debug!(force, "compile deferred");
            return CompileOutcome::Deferred;
        }
        self.pending = None;
        if !request.force && !self.is_stale(model) {
            return CompileOutcome::UpToDate;
        }
        CompileOutcome::Compiled(self.compile_full(model))
    }

    /// Serve a deferred request, if any.
    pub fn tick(&mut self, model: &mut Model) -> Option<CompileOutcome> {
        let pending = self.pending.take()?;
        Some(self.compile(
            model,
            CompileRequest {
                synchronous: true,
                force: pending.force,
            },
        ))
    }

    /// Run a synchronous compile when bindings are stale.
    pub fn ensure_current(&mut self, model: &mut Model) -> CompileOutcome {
        self.compile(model, CompileRequest::synchronous())
    }

    fn compile_full(&mut self, model: &mut Model) -> CompileReport {
        let analysis = Analyzer::analyze(model, &mut self.slots, &mut self.types, &mut self.cache);
        model.clear_all_messages(Origin::Parse);
        model.clear_all_messages(Origin::Analysis);
        self.apply(model, analysis, false)
    }

    /// Re-analyse only what is reachable from `changed`. Falls back to a full
    /// pass when nothing has been compiled yet.
    pub fn compile_incremental(&mut self, model: &mut Model, changed: &[ElementId]) -> CompileReport {
        if self.compiled_binding_revision.is_none() {
            return self.compile_full(model);
        }
        let analysis = Analyzer::analyze_incremental(
            model,
            &mut self.slots,
            &mut self.types,
            &mut self.cache,
            changed,
        );
        if analysis.fatal {
            model.clear_all_messages(Origin::Parse);
            model.clear_all_messages(Origin::Analysis);
        }
        for id in &analysis.visited {
            model.clear_messages(*id, Origin::Parse);
            model.clear_messages(*id, Origin::Analysis);
        }
        self.apply(model, analysis, true)
    }

    fn apply(&mut self, model: &mut Model, analysis: Analysis, incremental: bool) -> CompileReport {
        let binding_revision = model.binding_revision();
        self.compiled_binding_revision = (!analysis.fatal).then_some(binding_revision);
        let report = CompileReport::build(
            &analysis,
            incremental,
            binding_revision,
            self.cache.statistics(),
        );
        for diagnostic in analysis.diagnostics {
            model.add_message(diagnostic.element, diagnostic.message);
        }
        info!(
            incremental,
            visited = report.visited,
            slots = report.analyzed_slots,
            errors = report.errors,
            warnings = report.warnings,
            "analysis finished"
        );
        report
    }

    /// Fail unless bindings were computed against the current model.
    pub(crate) fn require_fresh(&self, model: &Model) -> Result<()> {
        if self.is_stale(model) {
            return Err(CompileError::StaleBindings {
                compiled: self.compiled_binding_revision,
                current: model.binding_revision(),
            });
        }
        Ok(())
    }

    pub(crate) fn cache_mut(&mut self) -> &mut FinderCache {
        &mut self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use efs_core::builder::ModelBuilder;
    use efs_core::element::{Mode, RulePriority};
    use efs_core::log::ErrorKind;

    fn model() -> Model {
        let mut b = ModelBuilder::new();
        let n = b.namespace("N").unwrap();
        b.variable(n, "x", "Integer", Mode::Internal, Some("1")).unwrap();
        b.simple_rule(n, "R", RulePriority::Processing, &["x < 3"], &["x <- x + 1"])
            .unwrap();
        b.build()
    }

    #[test]
    fn compile_only_when_stale() {
        let mut model = model();
        let mut compiler = Compiler::new();
        assert!(compiler.is_stale(&model));

        let outcome = compiler.compile(&mut model, CompileRequest::synchronous());
        let report = outcome.report().unwrap();
        assert_eq!(report.errors, 0);
        assert!(!compiler.is_stale(&model));

        assert_eq!(
            compiler.compile(&mut model, CompileRequest::synchronous()),
            CompileOutcome::UpToDate
        );
        assert!(compiler
            .compile(&mut model, CompileRequest::forced())
            .report()
            .is_some());
    }

    #[test]
    fn deferred_requests_run_on_tick() {
        let mut model = model();
        let mut compiler = Compiler::new();
        assert_eq!(
            compiler.compile(&mut model, CompileRequest::deferred()),
            CompileOutcome::Deferred
        );
        assert!(compiler.has_pending());
        assert!(compiler.is_stale(&model));

        let outcome = compiler.tick(&mut model).unwrap();
        assert!(outcome.report().is_some());
        assert!(!compiler.has_pending());
        assert!(compiler.tick(&mut model).is_none());
    }

    #[test]
    fn diagnostics_are_replaced_not_accumulated() {
        let mut model = model();
        let x = model.lookup("N.x").unwrap();
        model.set_slot_text(x, "True").unwrap();

        let mut compiler = Compiler::new();
        compiler.compile(&mut model, CompileRequest::forced());
        compiler.compile(&mut model, CompileRequest::forced());
        let messages = model.messages(x);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, ErrorKind::TypeMismatch);

        model.set_slot_text(x, "2").unwrap();
        let report = compiler.compile_incremental(&mut model, &[x]);
        assert!(report.incremental);
        assert!(model.messages(x).is_empty());
        assert!(!compiler.is_stale(&model));
    }

    #[test]
    fn stale_bindings_are_detected() {
        let mut model = model();
        let mut compiler = Compiler::new();
        compiler.compile(&mut model, CompileRequest::synchronous());
        assert!(compiler.require_fresh(&model).is_ok());

        let x = model.lookup("N.x").unwrap();
        model.set_slot_text(x, "5").unwrap();
        assert!(matches!(
            compiler.require_fresh(&model),
            Err(CompileError::StaleBindings { .. })
        ));
    }
}
