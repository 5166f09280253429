//! Semantic analysis: name binding, type inference and checking.
//!
//! A pass runs in two steps. The declaration step resolves the type names of
//! typed elements into the [`TypeTable`]. The visit step then checks every
//! visited element once: structural rules on the element itself, then its
//! expression or statement slot, which is parsed, bound and type checked.
//! Errors are recorded as diagnostics and never stop the pass, except a
//! cycle in the element hierarchy, which aborts it.

use std::collections::{BTreeSet, HashMap, HashSet};

use efs_core::element::{ElementId, ElementKind, Interpolation, KindTag, SlotKind};
use efs_core::log::{ErrorKind, Message, Origin, Span};
use efs_core::model::Model;
use efs_core::types::{Type, TypeEnv, TypeTable};
use efs_lang::{
    parse_expression, parse_statement, Argument, Association, BinaryOp, Builtin, Designator,
    ExprKind, Expression, Literal, QuantifierKind, Ref, Statement, StmtKind, UnaryOp,
};
use tracing::{debug, warn};

use crate::cache::FinderCache;
use crate::error::ResolveError;
use crate::finder::{self, Filter};
use crate::slots::{Slot, SlotTable, SlotTree};

/// A message produced for an element.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub element: ElementId,
    pub message: Message,
}

/// Result of an analysis pass.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    pub diagnostics: Vec<Diagnostic>,
    /// Elements whose Parse/Analysis messages are replaced by this pass.
    pub visited: Vec<ElementId>,
    pub analyzed_slots: usize,
    /// The pass was aborted by a corrupted hierarchy.
    pub fatal: bool,
}

impl Analysis {
    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.message.level == efs_core::log::Level::Error)
            .count()
    }
}

pub struct Analyzer;

impl Analyzer {
    /// Analyse the whole model.
    pub fn analyze(
        model: &Model,
        slots: &mut SlotTable,
        types: &mut TypeTable,
        cache: &mut FinderCache,
    ) -> Analysis {
        cache.clear();
        slots.clear();
        types.clear();
        if let Some(fatal) = check_hierarchy(model) {
            return fatal;
        }
        let order = model.ids_in_order();
        let declarations = resolve_declarations(model, &order, types, cache);
        debug!(elements = order.len(), "full analysis");
        visit_all(model, &order, &declarations, slots, types, cache)
    }

    /// Re-analyse the slots affected by a change to `changed`: slots owned by
    /// the changed subtrees and slots referencing any element in them.
    /// Removed elements may be listed in `changed`.
    pub fn analyze_incremental(
        model: &Model,
        slots: &mut SlotTable,
        types: &mut TypeTable,
        cache: &mut FinderCache,
        changed: &[ElementId],
    ) -> Analysis {
        cache.clear();
        if let Some(fatal) = check_hierarchy(model) {
            slots.clear();
            types.clear();
            return fatal;
        }

        let mut targets: HashSet<ElementId> = HashSet::new();
        for id in changed {
            targets.insert(*id);
            if model.contains(*id) {
                targets.extend(model.descendants(*id));
            }
        }
        for (_, slot) in slots.iter() {
            targets.extend(slot.references.iter().filter(|r| !model.contains(**r)));
        }
        slots.retain(|owner| model.contains(owner));

        let previous = types.clone();
        types.clear();
        let order = model.ids_in_order();
        let declarations = resolve_declarations(model, &order, types, cache);

        let mut affected: BTreeSet<ElementId> = targets
            .iter()
            .copied()
            .filter(|id| model.contains(*id))
            .collect();
        affected.extend(slots.referencing(&targets));
        for id in &order {
            if previous.get(*id) != types.get(*id) {
                affected.insert(*id);
            }
        }
        let visit: Vec<ElementId> = order.into_iter().filter(|id| affected.contains(id)).collect();
        debug!(changed = changed.len(), visited = visit.len(), "incremental analysis");
        visit_all(model, &visit, &declarations, slots, types, cache)
    }
}

fn check_hierarchy(model: &Model) -> Option<Analysis> {
    let err = model.check_hierarchy().err()?;
    let element = match err {
        efs_core::error::ModelError::CyclicHierarchy(id) => id,
        _ => return None,
    };
    warn!(%element, "element hierarchy is cyclic; analysis aborted");
    Some(Analysis {
        diagnostics: vec![Diagnostic {
            element,
            message: Message::error(
                ErrorKind::CyclicDependency,
                Origin::Analysis,
                format!("element hierarchy contains a cycle at {}", model.name(element)),
            ),
        }],
        visited: Vec::new(),
        analyzed_slots: 0,
        fatal: true,
    })
}

// === Declarations ===

fn resolve_type_name(
    model: &Model,
    scope: ElementId,
    text: &str,
    cache: &mut FinderCache,
) -> Result<Type, String> {
    let segments: Vec<&str> = text.split('.').map(str::trim).collect();
    match finder::resolve_path(model, scope, &segments, Filter::IsType, cache) {
        Ok(Ref::Element(id)) => {
            Type::of_declaration(model, id).ok_or_else(|| format!("'{text}' is not a type"))
        }
        Ok(Ref::Builtin(Builtin::Boolean)) => Ok(Type::Boolean),
        Ok(Ref::Builtin(Builtin::Integer)) => Ok(Type::Integer),
        Ok(Ref::Builtin(Builtin::Double)) => Ok(Type::Double),
        Ok(Ref::Builtin(Builtin::String)) => Ok(Type::String),
        Ok(_) => Err(format!("'{text}' is not a type")),
        Err(ResolveError::Ambiguous { candidates, .. }) => Err(format!(
            "ambiguous type '{text}': candidates {}",
            candidates.join(", ")
        )),
        Err(_) => Err(format!("unknown type '{text}'")),
    }
}

fn resolve_declarations(
    model: &Model,
    order: &[ElementId],
    types: &mut TypeTable,
    cache: &mut FinderCache,
) -> HashMap<ElementId, Vec<Message>> {
    let mut out: HashMap<ElementId, Vec<Message>> = HashMap::new();
    let mut report = |id: ElementId, kind: ErrorKind, text: String| {
        out.entry(id)
            .or_default()
            .push(Message::error(kind, Origin::Analysis, text));
    };
    for &id in order {
        let Some(element) = model.get(id) else {
            continue;
        };
        let type_text = match &element.kind {
            ElementKind::Variable(slot) | ElementKind::StructureElement(slot) => {
                Some(slot.type_name.as_str())
            }
            ElementKind::Parameter { type_name } => Some(type_name.as_str()),
            ElementKind::Function { return_type, .. } => Some(return_type.as_str()),
            ElementKind::Collection { element_type, .. } => Some(element_type.as_str()),
            ElementKind::Structure { interfaces } => {
                let mut resolved = Vec::new();
                for name in interfaces {
                    let segments: Vec<&str> = name.split('.').collect();
                    match finder::resolve_path(model, id, &segments, Filter::IsStructure, cache) {
                        Ok(Ref::Element(s)) if s != id => resolved.push(s),
                        Ok(_) => report(
                            id,
                            ErrorKind::TypeMismatch,
                            format!("structure cannot implement '{name}'"),
                        ),
                        Err(_) => report(
                            id,
                            ErrorKind::UnresolvedReference,
                            format!("unknown interface '{name}'"),
                        ),
                    }
                }
                types.set_interfaces(id, resolved);
                None
            }
            ElementKind::Range { min, max, .. } => {
                if min > max {
                    report(
                        id,
                        ErrorKind::TypeMismatch,
                        format!("range is empty: min {min} is greater than max {max}"),
                    );
                }
                None
            }
            ElementKind::StateMachine { initial_state } => {
                if model.find_child(id, initial_state, KindTag::State).is_none() {
                    report(
                        id,
                        ErrorKind::UnresolvedReference,
                        format!("unknown initial state '{initial_state}'"),
                    );
                }
                None
            }
            _ => None,
        };
        if let Some(text) = type_text {
            match resolve_type_name(model, id, text, cache) {
                Ok(ty) => types.insert(id, ty),
                Err(msg) => report(id, ErrorKind::UnresolvedReference, msg),
            }
        }
    }
    out
}

// === Visits ===

fn visit_all(
    model: &Model,
    order: &[ElementId],
    declarations: &HashMap<ElementId, Vec<Message>>,
    slots: &mut SlotTable,
    types: &TypeTable,
    cache: &mut FinderCache,
) -> Analysis {
    let mut analysis = Analysis::default();
    for &id in order {
        let Some(element) = model.get(id) else {
            continue;
        };
        analysis.visited.push(id);
        let mut messages: Vec<Message> = declarations.get(&id).cloned().unwrap_or_default();
        check_structure(model, types, id, &mut messages);

        match element.kind.slot_text() {
            Some((text, kind)) if !text.trim().is_empty() => {
                let slot = analyze_slot(model, types, cache, id, text, kind, &mut messages);
                analysis.analyzed_slots += 1;
                slots.insert(id, slot);
            }
            _ => {
                slots.remove(id);
            }
        }

        analysis
            .diagnostics
            .extend(messages.into_iter().map(|message| Diagnostic { element: id, message }));
    }
    analysis
}

/// Checks on the element itself rather than on its slot.
fn check_structure(model: &Model, types: &TypeTable, id: ElementId, messages: &mut Vec<Message>) {
    let Some(element) = model.get(id) else {
        return;
    };
    let env = TypeEnv::new(model, types);
    match &element.kind {
        ElementKind::Rule { .. } => {
            let has_content = model
                .children(id)
                .iter()
                .any(|cond| !model.children(*cond).is_empty());
            if !has_content {
                messages.push(Message::warning(
                    Origin::Analysis,
                    format!("rule '{}' has no pre-conditions or actions", element.name),
                ));
            }
        }
        ElementKind::Function { interpolation, .. } => {
            let params = parameters(model, id);
            match interpolation {
                Some(interpolation) => {
                    let expected = match interpolation {
                        Interpolation::Graph(_) => 1,
                        Interpolation::Surface(_) => 2,
                    };
                    if params.len() != expected {
                        messages.push(Message::error(
                            ErrorKind::TypeMismatch,
                            Origin::Analysis,
                            format!(
                                "interpolated function needs {expected} parameter(s), has {}",
                                params.len()
                            ),
                        ));
                    }
                    if params.iter().any(|p| !env.type_of(*p).is_numeric()) {
                        messages.push(Message::error(
                            ErrorKind::TypeMismatch,
                            Origin::Analysis,
                            "interpolated function parameters must be numeric",
                        ));
                    }
                    let returns = env.type_of(id);
                    if !returns.is_numeric() || returns.is_integral(model) {
                        messages.push(Message::error(
                            ErrorKind::TypeMismatch,
                            Origin::Analysis,
                            "interpolated function must return a non-integral numeric type",
                        ));
                    }
                }
                None => {
                    let has_case = model
                        .children(id)
                        .iter()
                        .any(|c| model.tag(*c) == Some(KindTag::Case));
                    if !has_case {
                        messages.push(Message::warning(
                            Origin::Analysis,
                            format!("function '{}' has no cases", element.name),
                        ));
                    }
                }
            }
        }
        _ => {}
    }
}

/// Parameters of a function or procedure in declaration order.
pub(crate) fn parameters(model: &Model, callable: ElementId) -> Vec<ElementId> {
    model
        .children(callable)
        .iter()
        .copied()
        .filter(|c| model.tag(*c) == Some(KindTag::Parameter))
        .collect()
}

/// The type `THIS` denotes inside slots owned by `owner`.
pub(crate) fn this_type(model: &Model, owner: ElementId) -> Option<Type> {
    let container = model.enclosing(owner, |t| {
        matches!(t, KindTag::Structure | KindTag::StateMachine)
    })?;
    match model.tag(container)? {
        KindTag::Structure => Some(Type::Structure(container)),
        _ => Some(Type::StateMachine(container)),
    }
}

fn analyze_slot(
    model: &Model,
    types: &TypeTable,
    cache: &mut FinderCache,
    owner: ElementId,
    text: &str,
    kind: SlotKind,
    messages: &mut Vec<Message>,
) -> Slot {
    let env = TypeEnv::new(model, types);
    let mut checker = SlotChecker {
        model,
        types,
        cache,
        owner,
        this: this_type(model, owner),
        iterators: Vec::new(),
        messages: Vec::new(),
    };

    let parsed = match kind {
        SlotKind::Expression => parse_expression(text).map(SlotTree::Expression),
        SlotKind::Statement => parse_statement(text).map(SlotTree::Statement),
    };
    let (tree, ty) = match parsed {
        Err(err) => {
            messages.push(Message::error(ErrorKind::Parse, Origin::Parse, err.message.clone()).at(err.span));
            (SlotTree::Invalid, None)
        }
        Ok(SlotTree::Expression(mut expr)) => {
            let actual = checker.infer(&mut expr);
            let expected = match model.tag(owner) {
                Some(KindTag::PreCondition) => Some(Type::Boolean),
                Some(KindTag::Case) => model.parent(owner).map(|f| env.type_of(f)),
                _ => Some(env.type_of(owner)),
            };
            if let Some(expected) = expected {
                if !expected.is_assignable_from(&env, &actual) {
                    checker.error(
                        ErrorKind::TypeMismatch,
                        format!(
                            "expected {}, found {}",
                            expected.display(model),
                            actual.display(model)
                        ),
                        expr.span,
                    );
                }
            }
            (SlotTree::Expression(expr), Some(actual))
        }
        Ok(SlotTree::Statement(mut stmt)) => {
            checker.statement(&mut stmt);
            (SlotTree::Statement(stmt), None)
        }
        Ok(SlotTree::Invalid) => (SlotTree::Invalid, None),
    };

    let references: HashSet<ElementId> = match &tree {
        SlotTree::Expression(e) => e.references().into_iter().collect(),
        SlotTree::Statement(s) => s.references().into_iter().collect(),
        SlotTree::Invalid => HashSet::new(),
    };
    let has_errors = matches!(tree, SlotTree::Invalid)
        || checker
            .messages
            .iter()
            .any(|m| m.level == efs_core::log::Level::Error);
    messages.append(&mut checker.messages);
    Slot {
        kind,
        text: text.to_string(),
        tree,
        references,
        ty,
        has_errors,
    }
}

// === Slot checking ===

/// What a name chain denotes.
#[derive(Debug, Clone)]
enum Item {
    Value(Type),
    NameSpace(ElementId),
    TypeDecl(ElementId),
    Callable(Ref),
    BuiltinType,
    /// Already reported.
    Error,
}

struct SlotChecker<'a, 'c> {
    model: &'a Model,
    types: &'a TypeTable,
    cache: &'c mut FinderCache,
    owner: ElementId,
    this: Option<Type>,
    /// Quantifier iterators in scope, innermost last.
    iterators: Vec<(String, Type)>,
    messages: Vec<Message>,
}

impl<'a> SlotChecker<'a, '_> {
    fn env(&self) -> TypeEnv<'a> {
        TypeEnv::new(self.model, self.types)
    }

    fn error(&mut self, kind: ErrorKind, text: impl Into<String>, span: Span) {
        self.messages
            .push(Message::error(kind, Origin::Analysis, text).at(span));
    }

    fn resolve_error(&mut self, err: ResolveError, span: Span) {
        let kind = match err {
            ResolveError::Ambiguous { .. } => ErrorKind::AmbiguousReference,
            _ => ErrorKind::UnresolvedReference,
        };
        self.error(kind, err.to_string(), span);
    }

    fn show(&self, ty: &Type) -> String {
        ty.display(self.model).to_string()
    }

    fn mismatch(&mut self, text: String, span: Span) {
        self.error(ErrorKind::TypeMismatch, text, span);
    }

    fn classify(&self, r: Ref) -> Item {
        match r {
            Ref::Builtin(b) if b.is_type() => Item::BuiltinType,
            Ref::Builtin(_) => Item::Callable(r),
            Ref::Iterator => Item::Error,
            Ref::Element(id) => {
                let Some(tag) = self.model.tag(id) else {
                    return Item::Error;
                };
                match tag {
                    KindTag::NameSpace => Item::NameSpace(id),
                    t if t.is_type() => Item::TypeDecl(id),
                    t if t.is_callable() => Item::Callable(r),
                    KindTag::Variable | KindTag::StructureElement | KindTag::Parameter => {
                        Item::Value(self.env().type_of(id))
                    }
                    KindTag::EnumValue | KindTag::State => self
                        .model
                        .parent(id)
                        .and_then(|p| Type::of_declaration(self.model, p))
                        .map(Item::Value)
                        .unwrap_or(Item::Error),
                    _ => Item::Error,
                }
            }
        }
    }

    fn iterator_type(&self, name: &str) -> Option<Type> {
        self.iterators
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t.clone())
    }

    fn bind(&mut self, designator: &mut Designator, result: Result<Ref, ResolveError>) -> Item {
        match result {
            Ok(r) => {
                designator.reference = Some(r);
                self.classify(r)
            }
            Err(err) => {
                self.resolve_error(err, designator.span);
                Item::Error
            }
        }
    }

    /// Resolve a name chain (or any expression) to the item it denotes. The
    /// last segment is looked up with `last`.
    fn item(&mut self, expr: &mut Expression, last: Filter) -> Item {
        if !matches!(
            expr.kind,
            ExprKind::Name(_) | ExprKind::Member { .. } | ExprKind::This
        ) {
            return Item::Value(self.infer(expr));
        }
        let span = expr.span;
        match &mut expr.kind {
            ExprKind::Name(d) => {
                if matches!(last, Filter::Any | Filter::IsValue) {
                    if let Some(ty) = self.iterator_type(&d.name) {
                        d.reference = Some(Ref::Iterator);
                        return Item::Value(ty);
                    }
                }
                let result = finder::resolve(self.model, self.owner, &d.name, last, self.cache);
                self.bind(d, result)
            }
            ExprKind::This => match self.this.clone() {
                Some(ty) => Item::Value(ty),
                None => {
                    self.error(
                        ErrorKind::UnresolvedReference,
                        "THIS is only available inside a structure or state machine",
                        span,
                    );
                    Item::Error
                }
            },
            ExprKind::Member { target, member } => {
                let base = self.item(target, Filter::Any);
                self.member(base, member, last)
            }
            _ => Item::Error,
        }
    }

    fn member(&mut self, base: Item, member: &mut Designator, last: Filter) -> Item {
        match base {
            Item::NameSpace(owner) => {
                let result = finder::resolve_member(self.model, owner, &member.name, last);
                self.bind(member, result)
            }
            Item::TypeDecl(owner) => {
                let result = finder::resolve_member(self.model, owner, &member.name, last);
                let item = self.bind(member, result);
                if matches!(member.reference, Some(Ref::Element(e)) if self.model.tag(e) == Some(KindTag::StructureElement))
                {
                    self.error(
                        ErrorKind::TypeMismatch,
                        format!("structure element '{}' needs an instance", member.name),
                        member.span,
                    );
                    return Item::Error;
                }
                item
            }
            Item::Value(Type::Structure(s)) => {
                let result = finder::resolve_member(self.model, s, &member.name, Filter::IsValue);
                self.bind(member, result)
            }
            Item::Value(Type::Unknown) | Item::Error => Item::Error,
            Item::Value(other) => {
                let shown = self.show(&other);
                self.mismatch(format!("{shown} has no member '{}'", member.name), member.span);
                Item::Error
            }
            Item::Callable(_) | Item::BuiltinType => {
                self.mismatch(format!("'{}' is not accessible here", member.name), member.span);
                Item::Error
            }
        }
    }

    fn value_of(&mut self, expr: &mut Expression) -> Type {
        let span = expr.span;
        match self.item(expr, Filter::IsValue) {
            Item::Value(ty) => ty,
            Item::Error => Type::Unknown,
            _ => {
                self.mismatch(format!("'{expr}' is not a value"), span);
                Type::Unknown
            }
        }
    }

    fn require_boolean(&mut self, ty: &Type, span: Span) {
        if !ty.is_boolean() {
            let shown = self.show(ty);
            self.mismatch(format!("expected Boolean, found {shown}"), span);
        }
    }

    fn require_numeric(&mut self, ty: &Type, span: Span) {
        if !ty.is_numeric() {
            let shown = self.show(ty);
            self.mismatch(format!("expected a number, found {shown}"), span);
        }
    }

    fn numeric_result(&self, a: &Type, b: &Type) -> Type {
        if *a == Type::Unknown || *b == Type::Unknown {
            Type::Unknown
        } else if a.is_integral(self.model) && b.is_integral(self.model) {
            Type::Integer
        } else {
            Type::Double
        }
    }

    fn comparable(&self, a: &Type, b: &Type) -> bool {
        let env = self.env();
        (a.is_numeric() && b.is_numeric())
            || a.is_assignable_from(&env, b)
            || b.is_assignable_from(&env, a)
            || a.is_structurally_equal(&env, b)
    }

    fn element_of(&mut self, ty: &Type, span: Span) -> Type {
        match ty.element_type(&self.env()) {
            Some(elem) => elem,
            None => {
                let shown = self.show(ty);
                self.mismatch(format!("expected a collection, found {shown}"), span);
                Type::Unknown
            }
        }
    }

    fn infer(&mut self, expr: &mut Expression) -> Type {
        if matches!(
            expr.kind,
            ExprKind::Name(_) | ExprKind::Member { .. } | ExprKind::This
        ) {
            return self.value_of(expr);
        }
        let span = expr.span;
        match &mut expr.kind {
            ExprKind::Literal(Literal::Bool(_)) => Type::Boolean,
            ExprKind::Literal(Literal::Int(_)) => Type::Integer,
            ExprKind::Literal(Literal::Double(_)) => Type::Double,
            ExprKind::Literal(Literal::String(_)) => Type::String,
            ExprKind::Empty => Type::EmptyCollection,
            ExprKind::Unary { op, operand } => {
                let ty = self.infer(operand);
                match op {
                    UnaryOp::Not => {
                        self.require_boolean(&ty, operand.span);
                        Type::Boolean
                    }
                    UnaryOp::Neg => {
                        self.require_numeric(&ty, operand.span);
                        self.numeric_result(&ty, &Type::Integer)
                    }
                }
            }
            ExprKind::Binary { op, left, right } => {
                let op = *op;
                let lt = self.infer(left);
                let rt = self.infer(right);
                self.binary(op, &lt, &rt, left.span, right.span, span)
            }
            ExprKind::Call { callee, args } => {
                let callee_item = self.item(callee, Filter::IsCallable);
                let callee_text = callee.to_string();
                self.call(callee_item, &callee_text, args, span, false)
            }
            ExprKind::Struct { ty, associations } => {
                let item = self.item(ty, Filter::IsStructure);
                self.structure(item, associations, span)
            }
            ExprKind::List(items) => {
                let mut elem: Option<Type> = None;
                for item in items.iter_mut() {
                    let t = self.infer(item);
                    let env = self.env();
                    elem = match elem {
                        None => Some(t),
                        Some(e) if e.is_assignable_from(&env, &t) => Some(e),
                        Some(e) if t.is_assignable_from(&env, &e) => Some(t),
                        Some(e) => {
                            let (shown_e, shown_t) = (self.show(&e), self.show(&t));
                            self.mismatch(
                                format!("list mixes {shown_e} and {shown_t}"),
                                item.span,
                            );
                            Some(e)
                        }
                    };
                }
                match elem {
                    Some(e) => Type::AnyList(Box::new(e)),
                    None => Type::EmptyCollection,
                }
            }
            ExprKind::Quantifier {
                kind,
                iterator,
                collection,
                condition,
                using,
            } => {
                let kind = *kind;
                let ct = self.infer(collection);
                let elem = self.element_of(&ct, collection.span);
                self.iterators.push((iterator.name.clone(), elem.clone()));
                if let Some(condition) = condition {
                    let t = self.infer(condition);
                    self.require_boolean(&t, condition.span);
                }
                let using_type = match using {
                    Some(using) => {
                        let t = self.infer(using);
                        if kind == QuantifierKind::Sum {
                            self.require_numeric(&t, using.span);
                        }
                        Some(t)
                    }
                    None => None,
                };
                self.iterators.pop();
                match kind {
                    QuantifierKind::ForAll | QuantifierKind::ThereIs => Type::Boolean,
                    QuantifierKind::First | QuantifierKind::Last => elem,
                    QuantifierKind::Count => Type::Integer,
                    QuantifierKind::Filter => Type::AnyList(Box::new(elem)),
                    QuantifierKind::Sum => {
                        let t = using_type.unwrap_or(Type::Unknown);
                        self.numeric_result(&t, &Type::Integer)
                    }
                    QuantifierKind::Map => {
                        Type::AnyList(Box::new(using_type.unwrap_or(Type::Unknown)))
                    }
                }
            }
            ExprKind::Name(_) | ExprKind::Member { .. } | ExprKind::This => Type::Unknown,
        }
    }

    fn binary(&mut self, op: BinaryOp, lt: &Type, rt: &Type, ls: Span, rs: Span, span: Span) -> Type {
        match op {
            BinaryOp::Or | BinaryOp::And => {
                self.require_boolean(lt, ls);
                self.require_boolean(rt, rs);
                Type::Boolean
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                if !self.comparable(lt, rt) {
                    let (a, b) = (self.show(lt), self.show(rt));
                    self.mismatch(format!("cannot compare {a} with {b}"), span);
                }
                Type::Boolean
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let strings = *lt == Type::String && *rt == Type::String;
                if !strings {
                    self.require_numeric(lt, ls);
                    self.require_numeric(rt, rs);
                }
                Type::Boolean
            }
            BinaryOp::In | BinaryOp::NotIn => {
                let elem = self.element_of(rt, rs);
                if !self.comparable(&elem, lt) {
                    let (a, b) = (self.show(lt), self.show(rt));
                    self.mismatch(format!("{a} cannot be an element of {b}"), span);
                }
                Type::Boolean
            }
            BinaryOp::Add if *lt == Type::String && *rt == Type::String => Type::String,
            _ => {
                self.require_numeric(lt, ls);
                self.require_numeric(rt, rs);
                self.numeric_result(lt, rt)
            }
        }
    }

    fn call(
        &mut self,
        callee: Item,
        callee_text: &str,
        args: &mut [Argument],
        span: Span,
        statement: bool,
    ) -> Type {
        match callee {
            Item::Callable(Ref::Element(id)) => {
                let is_procedure = self.model.tag(id) == Some(KindTag::Procedure);
                self.arguments(id, args, span);
                if is_procedure && !statement {
                    self.mismatch(
                        format!("procedure '{callee_text}' cannot be used in an expression"),
                        span,
                    );
                    return Type::Unknown;
                }
                if !is_procedure && statement {
                    self.mismatch(
                        format!("function '{callee_text}' cannot be called as a statement"),
                        span,
                    );
                }
                self.env().type_of(id)
            }
            Item::Callable(Ref::Builtin(builtin)) => {
                let arity = if builtin == Builtin::Abs { 1 } else { 2 };
                let mut arg_types = Vec::new();
                for arg in args.iter_mut() {
                    if let Some(name) = &arg.name {
                        self.mismatch(
                            format!("'{}' takes no named arguments", builtin.name()),
                            name.span,
                        );
                    }
                    let t = self.infer(&mut arg.value);
                    self.require_numeric(&t, arg.value.span);
                    arg_types.push(t);
                }
                if arg_types.len() != arity || statement {
                    self.mismatch(
                        format!(
                            "'{}' expects {arity} argument(s), found {}",
                            builtin.name(),
                            arg_types.len()
                        ),
                        span,
                    );
                    return Type::Unknown;
                }
                let first = arg_types[0].clone();
                let second = arg_types.get(1).cloned().unwrap_or(Type::Integer);
                self.numeric_result(&first, &second)
            }
            other => {
                if !matches!(other, Item::Error) {
                    self.mismatch(format!("'{callee_text}' is not callable"), span);
                }
                for arg in args.iter_mut() {
                    self.infer(&mut arg.value);
                }
                Type::Unknown
            }
        }
    }

    fn arguments(&mut self, callable: ElementId, args: &mut [Argument], span: Span) {
        let params = parameters(self.model, callable);
        let mut bound: Vec<bool> = vec![false; params.len()];
        let mut next_positional = 0;
        let mut seen_named = false;
        for arg in args.iter_mut() {
            let actual = self.infer(&mut arg.value);
            let index = match &mut arg.name {
                Some(name) => {
                    seen_named = true;
                    let result =
                        finder::resolve_member(self.model, callable, &name.name, Filter::IsValue);
                    self.bind(name, result);
                    match name.reference.and_then(Ref::element) {
                        Some(p) => params.iter().position(|q| *q == p),
                        None => continue,
                    }
                }
                None => {
                    if seen_named {
                        self.mismatch(
                            "positional argument after named argument".into(),
                            arg.value.span,
                        );
                        continue;
                    }
                    next_positional += 1;
                    (next_positional <= params.len()).then_some(next_positional - 1)
                }
            };
            let Some(index) = index else {
                self.mismatch(
                    format!("too many arguments: expected {}", params.len()),
                    arg.value.span,
                );
                continue;
            };
            if std::mem::replace(&mut bound[index], true) {
                let name = self.model.name(params[index]).to_string();
                self.mismatch(format!("parameter '{name}' given twice"), arg.value.span);
            }
            let expected = self.env().type_of(params[index]);
            if !expected.is_assignable_from(&self.env(), &actual) {
                let (e, a) = (self.show(&expected), self.show(&actual));
                self.mismatch(format!("argument expects {e}, found {a}"), arg.value.span);
            }
        }
        for (i, param) in params.iter().enumerate() {
            if !bound[i] {
                let name = self.model.name(*param).to_string();
                self.mismatch(format!("missing argument for parameter '{name}'"), span);
            }
        }
    }

    fn structure(&mut self, item: Item, associations: &mut [Association], span: Span) -> Type {
        let structure = match item {
            Item::TypeDecl(id) if self.model.tag(id) == Some(KindTag::Structure) => Some(id),
            Item::Error => None,
            _ => {
                self.mismatch("structure value must name a structure type".into(), span);
                None
            }
        };
        let mut seen = HashSet::new();
        for assoc in associations.iter_mut() {
            let actual = self.infer(&mut assoc.value);
            let Some(s) = structure else {
                continue;
            };
            let result = finder::resolve_member(self.model, s, &assoc.element.name, Filter::IsValue);
            self.bind(&mut assoc.element, result);
            let Some(element) = assoc.element.reference.and_then(Ref::element) else {
                continue;
            };
            if !seen.insert(element) {
                self.mismatch(
                    format!("element '{}' associated twice", assoc.element.name),
                    assoc.element.span,
                );
            }
            let expected = self.env().type_of(element);
            if !expected.is_assignable_from(&self.env(), &actual) {
                let (e, a) = (self.show(&expected), self.show(&actual));
                self.mismatch(
                    format!("element '{}' expects {e}, found {a}", assoc.element.name),
                    assoc.value.span,
                );
            }
        }
        structure.map(Type::Structure).unwrap_or(Type::Unknown)
    }

    // --- Statements ---

    /// Type of an assignable location; reports non-writable paths.
    fn target(&mut self, expr: &mut Expression) -> Type {
        let span = expr.span;
        let item = self.item(expr, Filter::IsValue);
        let mut designators = Vec::new();
        collect_location(expr, &mut designators);
        for d in designators {
            let problem = match d.reference {
                Some(Ref::Element(id)) => match self.model.get(id).map(|e| (&e.kind, e.tag())) {
                    Some((kind, KindTag::Variable | KindTag::StructureElement)) => kind
                        .mode()
                        .filter(|m| !m.is_writable())
                        .map(|m| format!("'{}' is {m} and cannot be assigned", d.name)),
                    Some((_, KindTag::Parameter)) => {
                        Some(format!("parameter '{}' cannot be assigned", d.name))
                    }
                    Some((_, tag)) if tag.is_value() => {
                        Some(format!("'{}' is a constant and cannot be assigned", d.name))
                    }
                    _ => None,
                },
                Some(Ref::Iterator) => Some(format!("iterator '{}' cannot be assigned", d.name)),
                _ => None,
            };
            if let Some(problem) = problem {
                self.error(ErrorKind::InvalidAssignment, problem, d.span);
            }
        }
        match item {
            Item::Value(ty) => ty,
            Item::Error => Type::Unknown,
            _ => {
                self.error(
                    ErrorKind::InvalidAssignment,
                    format!("'{expr}' is not a variable"),
                    span,
                );
                Type::Unknown
            }
        }
    }

    fn collection_target(&mut self, target: &mut Expression) -> Type {
        let ty = self.target(target);
        match ty {
            Type::Collection(_) | Type::Unknown => self.element_of(&ty, target.span),
            other => {
                let shown = self.show(&other);
                self.mismatch(format!("expected a collection, found {shown}"), target.span);
                Type::Unknown
            }
        }
    }

    fn assignable(&mut self, expected: &Type, actual: &Type, span: Span) {
        if !expected.is_assignable_from(&self.env(), actual) {
            let (e, a) = (self.show(expected), self.show(actual));
            self.mismatch(format!("cannot assign {a} to {e}"), span);
        }
    }

    fn condition(&mut self, condition: &mut Option<Expression>) {
        if let Some(c) = condition {
            let t = self.infer(c);
            self.require_boolean(&t, c.span);
        }
    }

    fn statement(&mut self, stmt: &mut Statement) {
        let span = stmt.span;
        match &mut stmt.kind {
            StmtKind::Update { target, value } => {
                let expected = self.target(target);
                let actual = self.infer(value);
                self.assignable(&expected, &actual, value.span);
            }
            StmtKind::Insert { value, target } => {
                let elem = self.collection_target(target);
                let actual = self.infer(value);
                self.assignable(&elem, &actual, value.span);
            }
            StmtKind::Remove {
                iterator,
                target,
                condition,
                ..
            } => {
                let elem = self.collection_target(target);
                self.iterators.push((iterator.name.clone(), elem));
                self.condition(condition);
                self.iterators.pop();
            }
            StmtKind::Replace {
                iterator,
                target,
                condition,
                value,
            } => {
                let elem = self.collection_target(target);
                self.iterators.push((iterator.name.clone(), elem.clone()));
                self.condition(condition);
                let actual = self.infer(value);
                self.assignable(&elem, &actual, value.span);
                self.iterators.pop();
            }
            StmtKind::Apply {
                iterator,
                collection,
                condition,
                body,
            } => {
                let ct = self.infer(collection);
                let elem = self.element_of(&ct, collection.span);
                self.iterators.push((iterator.name.clone(), elem));
                self.condition(condition);
                self.statement(body);
                self.iterators.pop();
            }
            StmtKind::Call(call) => {
                if let ExprKind::Call { callee, args } = &mut call.kind {
                    let item = self.item(callee, Filter::IsCallable);
                    let text = callee.to_string();
                    self.call(item, &text, args, span, true);
                }
            }
        }
    }
}

/// Designators along an assignable path, outermost first.
fn collect_location<'e>(expr: &'e Expression, out: &mut Vec<&'e Designator>) {
    match &expr.kind {
        ExprKind::Name(d) => out.push(d),
        ExprKind::Member { target, member } => {
            collect_location(target, out);
            out.push(member);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use efs_core::builder::ModelBuilder;
    use efs_core::element::{Mode, RulePriority};
    use efs_core::log::Level;

    fn run(model: &Model) -> (Analysis, SlotTable, TypeTable) {
        let mut slots = SlotTable::new();
        let mut types = TypeTable::new();
        let mut cache = FinderCache::new();
        let analysis = Analyzer::analyze(model, &mut slots, &mut types, &mut cache);
        (analysis, slots, types)
    }

    fn kinds_for(analysis: &Analysis, element: ElementId) -> Vec<ErrorKind> {
        analysis
            .diagnostics
            .iter()
            .filter(|d| d.element == element && d.message.level == Level::Error)
            .map(|d| d.message.kind)
            .collect()
    }

    #[test]
    fn clean_model_binds_references() {
        let mut b = ModelBuilder::new();
        let n = b.namespace("N").unwrap();
        b.range(n, "R", 0.0, 10.0).unwrap();
        let v = b.variable(n, "v", "R", Mode::Internal, Some("0")).unwrap();
        let rule = b
            .simple_rule(n, "Inc", RulePriority::Processing, &["v < 10"], &["v <- v + 1"])
            .unwrap();
        let model = b.build();
        let (analysis, slots, types) = run(&model);

        assert_eq!(analysis.error_count(), 0, "{:?}", analysis.diagnostics);
        assert!(matches!(types.get(v), Some(Type::Range(_))));
        let cond = model.children(rule)[0];
        let action = model.children(cond)[1];
        let slot = slots.get(action).unwrap();
        assert!(slot.references.contains(&v));
        assert!(slots.statement(action).is_some());
    }

    #[test]
    fn every_element_visited_once() {
        let mut b = ModelBuilder::new();
        let n = b.namespace("N").unwrap();
        b.variable(n, "a", "Integer", Mode::Internal, Some("1")).unwrap();
        b.simple_rule(n, "R", RulePriority::Processing, &["a > 0"], &["a <- 0"])
            .unwrap();
        let model = b.build();
        let (analysis, _, _) = run(&model);
        let mut seen = analysis.visited.clone();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), analysis.visited.len());
        assert_eq!(seen.len(), model.element_count());
    }

    #[test]
    fn parse_errors_are_reported_with_position() {
        let mut b = ModelBuilder::new();
        let n = b.namespace("N").unwrap();
        let v = b.variable(n, "v", "Integer", Mode::Internal, Some("1 +")).unwrap();
        let model = b.build();
        let (analysis, slots, _) = run(&model);
        let diag = analysis.diagnostics.iter().find(|d| d.element == v).unwrap();
        assert_eq!(diag.message.kind, ErrorKind::Parse);
        assert_eq!(diag.message.origin, Origin::Parse);
        assert!(diag.message.span.is_some());
        assert!(slots.get(v).unwrap().has_errors);
    }

    #[test]
    fn type_errors() {
        let mut b = ModelBuilder::new();
        let n = b.namespace("N").unwrap();
        b.variable(n, "flag", "Boolean", Mode::Internal, None).unwrap();
        b.variable(n, "count", "Integer", Mode::Internal, None).unwrap();
        let rule = b
            .simple_rule(
                n,
                "Bad",
                RulePriority::Processing,
                &["count"],
                &["count <- flag", "flag <- count + 1.5 > 2"],
            )
            .unwrap();
        let model = b.build();
        let (analysis, _, _) = run(&model);
        let cond = model.children(rule)[0];
        let [pre, bad, good] = model.children(cond) else {
            panic!("expected three children");
        };
        assert_eq!(kinds_for(&analysis, *pre), vec![ErrorKind::TypeMismatch]);
        assert_eq!(kinds_for(&analysis, *bad), vec![ErrorKind::TypeMismatch]);
        assert!(kinds_for(&analysis, *good).is_empty());
    }

    #[test]
    fn incoming_and_constant_are_not_writable() {
        let mut b = ModelBuilder::new();
        let n = b.namespace("N").unwrap();
        b.variable(n, "input", "Integer", Mode::Incoming, None).unwrap();
        b.variable(n, "k", "Integer", Mode::Constant, Some("3")).unwrap();
        let rule = b
            .simple_rule(n, "W", RulePriority::Processing, &[], &["input <- 1", "k <- 2"])
            .unwrap();
        let model = b.build();
        let (analysis, _, _) = run(&model);
        let cond = model.children(rule)[0];
        for action in model.children(cond) {
            assert_eq!(kinds_for(&analysis, *action), vec![ErrorKind::InvalidAssignment]);
        }
    }

    #[test]
    fn unresolved_and_ambiguous_references() {
        let mut b = ModelBuilder::new();
        let n = b.namespace("N").unwrap();
        b.sub_namespace(n, "Dup").unwrap();
        b.variable(n, "Dup", "Integer", Mode::Internal, None).unwrap();
        b.variable(n, "out", "Integer", Mode::Internal, None).unwrap();
        let rule = b
            .simple_rule(n, "R", RulePriority::Processing, &[], &["out <- missing", "out <- Dup.x"])
            .unwrap();
        let model = b.build();
        let (analysis, _, _) = run(&model);
        let cond = model.children(rule)[0];
        assert_eq!(
            kinds_for(&analysis, model.children(cond)[0]),
            vec![ErrorKind::UnresolvedReference]
        );
        assert_eq!(
            kinds_for(&analysis, model.children(cond)[1]),
            vec![ErrorKind::AmbiguousReference]
        );
    }

    #[test]
    fn structures_calls_and_quantifiers() {
        let mut b = ModelBuilder::new();
        let n = b.namespace("N").unwrap();
        let point = b.structure(n, "Point").unwrap();
        b.element(point, "X", "Integer", Mode::Internal).unwrap();
        b.element(point, "Y", "Integer", Mode::Internal).unwrap();
        b.collection(n, "Points", "Point", 4).unwrap();
        b.variable(n, "ps", "Points", Mode::Internal, None).unwrap();
        b.variable(n, "total", "Integer", Mode::Internal, None).unwrap();
        let f = b.function(n, "Double2", "Integer", true).unwrap();
        b.parameter(f, "V", "Integer").unwrap();
        b.case(f, "Always", &[], "V * 2").unwrap();
        let rule = b
            .simple_rule(
                n,
                "R",
                RulePriority::Processing,
                &["FORALL P IN ps | P.X >= 0"],
                &[
                    "INSERT Point { X => 1, Y => Double2(V => 2) } IN ps",
                    "total <- SUM P IN ps USING P.X + P.Y",
                    "REMOVE ALL P IN ps | P.Y > Max(total, 3)",
                ],
            )
            .unwrap();
        let model = b.build();
        let (analysis, _, _) = run(&model);
        assert_eq!(analysis.error_count(), 0, "{:?}", analysis.diagnostics);
        assert!(model.children(rule).len() == 1);
    }

    #[test]
    fn association_errors() {
        let mut b = ModelBuilder::new();
        let n = b.namespace("N").unwrap();
        let point = b.structure(n, "Point").unwrap();
        b.element(point, "X", "Integer", Mode::Internal).unwrap();
        let p = b
            .variable(n, "p", "Point", Mode::Internal, Some("Point { X => 1, X => 2, Z => 3 }"))
            .unwrap();
        let model = b.build();
        let (analysis, _, _) = run(&model);
        assert_eq!(
            kinds_for(&analysis, p),
            vec![ErrorKind::TypeMismatch, ErrorKind::UnresolvedReference]
        );
    }

    #[test]
    fn call_arity_is_checked() {
        let mut b = ModelBuilder::new();
        let n = b.namespace("N").unwrap();
        let f = b.function(n, "F", "Integer", false).unwrap();
        b.parameter(f, "A", "Integer").unwrap();
        b.parameter(f, "B", "Integer").unwrap();
        b.case(f, "C", &[], "A + B").unwrap();
        let v = b.variable(n, "v", "Integer", Mode::Internal, Some("F(1)")).unwrap();
        let model = b.build();
        let (analysis, _, _) = run(&model);
        let diag = analysis
            .diagnostics
            .iter()
            .find(|d| d.element == v)
            .unwrap();
        assert!(diag.message.text.contains("missing argument for parameter 'B'"));
    }

    #[test]
    fn declaration_errors_and_warnings() {
        let mut b = ModelBuilder::new();
        let n = b.namespace("N").unwrap();
        let v = b.variable(n, "v", "Nope", Mode::Internal, None).unwrap();
        let s = b.structure(n, "S").unwrap();
        b.implements(s, "Missing").unwrap();
        let rule = b.rule(n, "Empty", RulePriority::CleanUp).unwrap();
        b.condition(rule, "C").unwrap();
        let model = b.build();
        let (analysis, _, _) = run(&model);
        assert_eq!(kinds_for(&analysis, v), vec![ErrorKind::UnresolvedReference]);
        assert_eq!(kinds_for(&analysis, s), vec![ErrorKind::UnresolvedReference]);
        let warning = analysis
            .diagnostics
            .iter()
            .find(|d| d.element == rule)
            .unwrap();
        assert_eq!(warning.message.level, Level::Warning);
    }

    #[test]
    fn interpolated_functions_return_doubles() {
        use efs_core::element::{Graph, Interpolation, Precision};

        let graph = || Interpolation::Graph(Graph::new(vec![(0.0, 0.0), (10.0, 5.0)]));
        let mut b = ModelBuilder::new();
        let n = b.namespace("N").unwrap();
        b.range(n, "Steps", 0.0, 10.0).unwrap();
        b.range_with_precision(n, "Level", 0.0, 10.0, Precision::Double).unwrap();
        let mut curves = Vec::new();
        for (name, returns) in [("A", "Integer"), ("B", "Steps"), ("C", "Double"), ("D", "Level")] {
            let f = b.function(n, name, returns, false).unwrap();
            b.parameter(f, "x", "Double").unwrap();
            b.interpolation(f, graph()).unwrap();
            curves.push(f);
        }
        let model = b.build();
        let (analysis, _, _) = run(&model);
        assert_eq!(kinds_for(&analysis, curves[0]), vec![ErrorKind::TypeMismatch]);
        assert_eq!(kinds_for(&analysis, curves[1]), vec![ErrorKind::TypeMismatch]);
        assert!(kinds_for(&analysis, curves[2]).is_empty());
        assert!(kinds_for(&analysis, curves[3]).is_empty());
    }

    #[test]
    fn this_in_structure_rules() {
        let mut b = ModelBuilder::new();
        let n = b.namespace("N").unwrap();
        let counter = b.structure(n, "Counter").unwrap();
        b.element(counter, "value", "Integer", Mode::Internal).unwrap();
        b.simple_rule(
            counter,
            "Tick",
            RulePriority::Processing,
            &["value < 5"],
            &["THIS.value <- value + 1"],
        )
        .unwrap();
        let outside = b
            .simple_rule(n, "Outside", RulePriority::Processing, &[], &["THIS.value <- 1"])
            .unwrap();
        let model = b.build();
        let (analysis, _, _) = run(&model);
        let cond = model.children(outside)[0];
        assert_eq!(
            kinds_for(&analysis, model.children(cond)[0]),
            vec![ErrorKind::UnresolvedReference]
        );
        assert_eq!(analysis.error_count(), 1);
    }

    #[test]
    fn incremental_reanalyses_dependents() {
        let mut b = ModelBuilder::new();
        let n = b.namespace("N").unwrap();
        let x = b.variable(n, "x", "Integer", Mode::Internal, None).unwrap();
        b.variable(n, "y", "Integer", Mode::Internal, Some("x + 1")).unwrap();
        b.variable(n, "z", "Integer", Mode::Internal, Some("2")).unwrap();
        let mut model = b.build();

        let mut slots = SlotTable::new();
        let mut types = TypeTable::new();
        let mut cache = FinderCache::new();
        let full = Analyzer::analyze(&model, &mut slots, &mut types, &mut cache);
        assert_eq!(full.error_count(), 0);

        model.remove(x).unwrap();
        let inc = Analyzer::analyze_incremental(&model, &mut slots, &mut types, &mut cache, &[x]);
        let y = model.lookup("N.y").unwrap();
        let z = model.lookup("N.z").unwrap();
        assert!(inc.visited.contains(&y));
        assert!(!inc.visited.contains(&z));
        assert_eq!(kinds_for(&inc, y), vec![ErrorKind::UnresolvedReference]);
    }
}
