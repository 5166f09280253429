//! Refactoring: keeping slot text in step with renamed and moved elements.
//!
//! References are bound by id, so a rename or a move never changes what a
//! slot means; only its text goes out of date. Refactoring walks the bound
//! trees of every slot and rewrites the text so that it resolves to the same
//! elements again:
//!
//! 1. designators bound into the edited subtree take the current simple name;
//! 2. every name chain is checked against the finder from its own scope, and
//!    a chain that no longer resolves to its bound target is replaced by the
//!    shortest dotted suffix of the target's qualified name that does.
//!
//! Only the static prefix of a chain is requalified: namespaces, types and
//! callables up to and including the first value. Field accesses after it
//! are kept.

use std::collections::HashSet;

use efs_core::element::{ElementId, ElementKind};
use efs_core::model::Model;
use efs_core::types::{Type, TypeTable};
use efs_lang::{Designator, ExprKind, Expression, Ref, Statement, StmtKind};
use tracing::{debug, info};

use crate::cache::FinderCache;
use crate::compiler::{CompileRequest, Compiler};
use crate::error::{CompileError, Result};
use crate::finder::{self, Filter};
use crate::slots::SlotTree;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefactorReport {
    pub rewritten_slots: usize,
    pub unchanged_slots: usize,
    /// Declarations whose type or interface names were requalified.
    pub rewritten_declarations: usize,
}

impl Compiler {
    /// Rename an element and rewrite every reference to it.
    pub fn rename(&mut self, model: &mut Model, id: ElementId, new_name: &str) -> Result<RefactorReport> {
        if !model.contains(id) {
            return Err(CompileError::UnknownElement(id));
        }
        self.ensure_current(model);
        let old = model.rename(id, new_name)?;
        debug!(%id, old = %old, new = new_name, "renamed element");
        self.refactor(model, id)
    }

    /// Rewrite slot text after `id` was renamed.
    pub fn refactor(&mut self, model: &mut Model, id: ElementId) -> Result<RefactorReport> {
        let report = self.requalify(model, id)?;
        info!(
            %id,
            rewritten = report.rewritten_slots,
            unchanged = report.unchanged_slots,
            "refactored references"
        );
        Ok(report)
    }

    /// Move an element under `new_parent` and requalify references.
    pub fn relocate(
        &mut self,
        model: &mut Model,
        id: ElementId,
        new_parent: ElementId,
    ) -> Result<RefactorReport> {
        if !model.contains(id) {
            return Err(CompileError::UnknownElement(id));
        }
        self.ensure_current(model);
        model.relocate(id, new_parent)?;
        debug!(%id, parent = %new_parent, "relocated element");
        self.refactor_and_relocate(model, id)
    }

    /// Requalify references to and from `id` after it was moved.
    pub fn refactor_and_relocate(&mut self, model: &mut Model, id: ElementId) -> Result<RefactorReport> {
        let report = self.requalify(model, id)?;
        info!(
            %id,
            rewritten = report.rewritten_slots,
            unchanged = report.unchanged_slots,
            "requalified references after move"
        );
        Ok(report)
    }

    fn requalify(&mut self, model: &mut Model, id: ElementId) -> Result<RefactorReport> {
        self.require_fresh(model)?;
        if !model.contains(id) {
            return Err(CompileError::UnknownElement(id));
        }
        let edited: HashSet<ElementId> = model.descendants(id).into_iter().collect();
        let declarations = declared_types(model, self.types());
        let trees: Vec<(ElementId, SlotTree)> = self
            .slots()
            .iter()
            .filter(|(_, slot)| !matches!(slot.tree, SlotTree::Invalid))
            .map(|(owner, slot)| (owner, slot.tree.clone()))
            .collect();

        let mut report = RefactorReport::default();
        let mut slot_rewrites = Vec::new();
        let mut type_rewrites = Vec::new();
        {
            let model: &Model = model;
            let cache = self.cache_mut();
            cache.clear();

            for (owner, names) in declarations {
                let mut requalifier = Requalifier {
                    model,
                    cache: &mut *cache,
                    owner,
                    iterators: HashSet::new(),
                };
                let rewritten: Vec<String> = names
                    .iter()
                    .map(|(text, target, filter)| requalifier.type_name(text, *target, *filter))
                    .collect();
                if rewritten.iter().zip(&names).any(|(new, (old, _, _))| new != old) {
                    type_rewrites.push((owner, rewritten));
                }
            }

            let mut rename = |d: &mut Designator| {
                if let Some(Ref::Element(target)) = d.reference {
                    if edited.contains(&target) && model.contains(target) {
                        d.name = model.name(target).to_string();
                    }
                }
            };
            for (owner, mut tree) in trees {
                let before = tree_text(&tree);
                let mut requalifier = Requalifier {
                    model,
                    cache: &mut *cache,
                    owner,
                    iterators: iterator_names(&tree),
                };
                match &mut tree {
                    SlotTree::Expression(expr) => {
                        expr.walk_designators_mut(&mut rename);
                        requalifier.expression(expr, Filter::IsValue);
                    }
                    SlotTree::Statement(stmt) => {
                        stmt.walk_designators_mut(&mut rename);
                        requalifier.statement(stmt);
                    }
                    SlotTree::Invalid => {}
                }
                let after = tree_text(&tree);
                if after != before {
                    slot_rewrites.push((owner, after));
                    report.rewritten_slots += 1;
                } else {
                    report.unchanged_slots += 1;
                }
            }
        }

        report.rewritten_declarations = type_rewrites.len();
        for (owner, names) in type_rewrites {
            debug!(%owner, names = ?names, "rewrote type names");
            model.update_kind(owner, |kind| set_type_names(kind, names))?;
        }
        for (owner, text) in slot_rewrites {
            debug!(%owner, text = %text, "rewrote slot");
            model.rewrite_slot_text(owner, &text)?;
        }
        self.cache_mut().clear();
        self.compile(model, CompileRequest::forced());
        Ok(report)
    }
}

fn tree_text(tree: &SlotTree) -> String {
    match tree {
        SlotTree::Expression(e) => e.to_string(),
        SlotTree::Statement(s) => s.to_string(),
        SlotTree::Invalid => String::new(),
    }
}

fn declaration_id(ty: &Type) -> Option<ElementId> {
    match ty {
        Type::Range(id)
        | Type::Enum(id)
        | Type::Structure(id)
        | Type::Collection(id)
        | Type::StateMachine(id) => Some(*id),
        _ => None,
    }
}

/// Type names written in declarations with the declarations they resolved
/// to. Elements whose names did not all resolve are left out.
fn declared_types(model: &Model, types: &TypeTable) -> Vec<(ElementId, Vec<(String, ElementId, Filter)>)> {
    let mut out = Vec::new();
    for id in model.ids_in_order() {
        let Some(element) = model.get(id) else {
            continue;
        };
        let names: Vec<(String, Option<ElementId>, Filter)> = match &element.kind {
            ElementKind::Structure { interfaces } => {
                let resolved = types.interfaces(id);
                if resolved.len() != interfaces.len() {
                    continue;
                }
                interfaces
                    .iter()
                    .zip(resolved)
                    .map(|(name, target)| (name.clone(), Some(*target), Filter::IsStructure))
                    .collect()
            }
            kind => match type_text(kind) {
                Some(text) => {
                    let target = types.get(id).and_then(declaration_id);
                    vec![(text.to_string(), target, Filter::IsType)]
                }
                None => continue,
            },
        };
        let resolved: Option<Vec<_>> = names
            .into_iter()
            .map(|(text, target, filter)| target.map(|t| (text, t, filter)))
            .collect();
        if let Some(names) = resolved.filter(|n| !n.is_empty()) {
            out.push((id, names));
        }
    }
    out
}

fn type_text(kind: &ElementKind) -> Option<&str> {
    match kind {
        ElementKind::Variable(slot) | ElementKind::StructureElement(slot) => Some(&slot.type_name),
        ElementKind::Parameter { type_name } => Some(type_name),
        ElementKind::Function { return_type, .. } => Some(return_type),
        ElementKind::Collection { element_type, .. } => Some(element_type),
        _ => None,
    }
}

fn set_type_names(kind: &mut ElementKind, mut names: Vec<String>) {
    match kind {
        ElementKind::Structure { interfaces } => *interfaces = names,
        ElementKind::Variable(slot) | ElementKind::StructureElement(slot) => {
            slot.type_name = names.remove(0)
        }
        ElementKind::Parameter { type_name } => *type_name = names.remove(0),
        ElementKind::Function { return_type, .. } => *return_type = names.remove(0),
        ElementKind::Collection { element_type, .. } => *element_type = names.remove(0),
        _ => {}
    }
}

/// Names declared as iterators anywhere in the tree.
fn iterator_names(tree: &SlotTree) -> HashSet<String> {
    fn from_expr(e: &Expression, names: &mut HashSet<String>) {
        e.walk(&mut |node| {
            if let ExprKind::Quantifier { iterator, .. } = &node.kind {
                names.insert(iterator.name.clone());
            }
        });
    }
    let mut names = HashSet::new();
    match tree {
        SlotTree::Expression(e) => from_expr(e, &mut names),
        SlotTree::Statement(s) => {
            let mut current = Some(s);
            while let Some(stmt) = current {
                current = None;
                match &stmt.kind {
                    StmtKind::Remove { iterator, .. } | StmtKind::Replace { iterator, .. } => {
                        names.insert(iterator.name.clone());
                    }
                    StmtKind::Apply { iterator, body, .. } => {
                        names.insert(iterator.name.clone());
                        current = Some(body);
                    }
                    _ => {}
                }
            }
            for e in s.expressions() {
                from_expr(e, &mut names);
            }
        }
        SlotTree::Invalid => {}
    }
    names
}

struct Requalifier<'a, 'c> {
    model: &'a Model,
    cache: &'c mut FinderCache,
    owner: ElementId,
    iterators: HashSet<String>,
}

impl Requalifier<'_, '_> {
    fn statement(&mut self, stmt: &mut Statement) {
        stmt.for_each_expression_mut(&mut |e| self.expression(e, Filter::IsValue));
    }

    /// `filter` is the lookup filter of the position `expr` occupies.
    fn expression(&mut self, expr: &mut Expression, filter: Filter) {
        if expr.designator_path().is_some() {
            self.chain(expr, filter);
            return;
        }
        match &mut expr.kind {
            ExprKind::Literal(_) | ExprKind::Name(_) | ExprKind::This | ExprKind::Empty => {}
            ExprKind::Member { target, .. } => self.expression(target, Filter::Any),
            ExprKind::Unary { operand, .. } => self.expression(operand, Filter::IsValue),
            ExprKind::Binary { left, right, .. } => {
                self.expression(left, Filter::IsValue);
                self.expression(right, Filter::IsValue);
            }
            ExprKind::Call { callee, args } => {
                self.expression(callee, Filter::IsCallable);
                for arg in args {
                    self.expression(&mut arg.value, Filter::IsValue);
                }
            }
            ExprKind::Struct { ty, associations } => {
                self.expression(ty, Filter::IsStructure);
                for assoc in associations {
                    self.expression(&mut assoc.value, Filter::IsValue);
                }
            }
            ExprKind::List(items) => {
                for item in items {
                    self.expression(item, Filter::IsValue);
                }
            }
            ExprKind::Quantifier {
                collection,
                condition,
                using,
                ..
            } => {
                self.expression(collection, Filter::IsValue);
                if let Some(c) = condition {
                    self.expression(c, Filter::IsValue);
                }
                if let Some(u) = using {
                    self.expression(u, Filter::IsValue);
                }
            }
        }
    }

    /// A dotted type name, requalified when it no longer denotes `target`.
    fn type_name(&mut self, text: &str, target: ElementId, filter: Filter) -> String {
        let current: Vec<&str> = text.split('.').map(str::trim).collect();
        if self.resolves_to(&current, filter, target) {
            return text.to_string();
        }
        self.shortest_path(target, filter).join(".")
    }

    fn resolves_to(&mut self, path: &[&str], filter: Filter, target: ElementId) -> bool {
        let Some(head) = path.first() else {
            return false;
        };
        !self.iterators.contains(*head)
            && finder::resolve_path(self.model, self.owner, path, filter, self.cache)
                == Ok(Ref::Element(target))
    }

    /// The shortest suffix of the target's qualified name that resolves to it.
    fn shortest_path(&mut self, target: ElementId, filter: Filter) -> Vec<String> {
        let mut names: Vec<String> = self
            .model
            .ancestors(target)
            .into_iter()
            .rev()
            .map(|a| self.model.name(a).to_string())
            .collect();
        names.push(self.model.name(target).to_string());
        for start in (0..names.len()).rev() {
            let candidate: Vec<&str> = names[start..].iter().map(String::as_str).collect();
            if self.resolves_to(&candidate, filter, target) {
                return names[start..].to_vec();
            }
        }
        names
    }

    fn chain(&mut self, expr: &mut Expression, filter: Filter) {
        let Some(path) = expr.designator_path() else {
            return;
        };
        if path[0].reference == Some(Ref::Iterator) {
            return;
        }
        let end = path
            .iter()
            .position(|d| match d.reference {
                Some(Ref::Element(id)) => self.model.tag(id).is_some_and(|t| t.is_value()),
                _ => false,
            })
            .unwrap_or(path.len() - 1);
        let Some(Ref::Element(target)) = path[end].reference else {
            return;
        };
        if path[..end].iter().any(|d| d.reference.is_none()) || !self.model.contains(target) {
            return;
        }
        let prefix_filter = if end + 1 == path.len() { filter } else { Filter::Any };
        let current: Vec<&str> = path[..=end].iter().map(|d| d.name.as_str()).collect();
        if self.resolves_to(&current, prefix_filter, target) {
            return;
        }
        let names = self.shortest_path(target, prefix_filter);
        let span = expr.span;
        let tail: Vec<Designator> = path[end + 1..].iter().map(|d| (*d).clone()).collect();
        let Some(mut rebuilt) = Expression::path(&names, Some(Ref::Element(target)), span) else {
            return;
        };
        for member in tail {
            rebuilt = Expression::new(
                ExprKind::Member {
                    target: Box::new(rebuilt),
                    member,
                },
                span,
            );
        }
        debug!(owner = %self.owner, to = %rebuilt, "requalified name chain");
        *expr = rebuilt;
    }
}
