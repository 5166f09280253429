//! Expression and statement evaluation.
//!
//! An [`Evaluator`] reads the [`VariableStore`] through a stack of staged
//! change layers. Writes go to the top layer only; the engine decides what
//! reaches the store. Nested rules get a layer of their own that is merged
//! into the enclosing one on success and dropped on failure.

use std::collections::{BTreeMap, HashMap};

use efs_compiler::SlotTable;
use efs_core::element::{ElementId, ElementKind, KindTag};
use efs_core::log::{ErrorKind, Message, Origin};
use efs_core::model::Model;
use efs_core::types::{Type, TypeEnv, TypeTable};
use efs_core::value::Value;
use efs_lang::{
    Argument, Association, BinaryOp, Builtin, Designator, ExprKind, Expression, Literal,
    QuantifierKind, Ref, RemoveKind, Statement, StmtKind, UnaryOp,
};
use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::config::EngineConfig;
use crate::error::{EvalError, EvalResult};
use crate::functions::{children_tagged, interpolate, parameters, FunctionCache};
use crate::store::{value_at, value_at_mut, Location, VariableStore};

const MAX_NESTING: usize = 16;

/// Bindings visible to one rule, function case or procedure body.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    /// The instance `THIS` denotes.
    pub this: Option<Location>,
    pub params: HashMap<ElementId, Value>,
    /// Quantifier and collection-statement iterators, innermost last.
    iterators: Vec<(String, Value)>,
}

impl Frame {
    pub fn new(this: Option<Location>) -> Self {
        Self {
            this,
            ..Self::default()
        }
    }

    fn callee(&self, params: HashMap<ElementId, Value>) -> Frame {
        Frame {
            this: self.this.clone(),
            params,
            iterators: Vec::new(),
        }
    }

    fn iterator(&self, name: &str) -> Option<&Value> {
        self.iterators
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

/// Result of running one rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    Fired,
    /// No condition was active.
    Unmatched,
}

/// Staged changes and the diagnostics collected while producing them.
#[derive(Debug, Default)]
pub struct Changes {
    pub values: BTreeMap<ElementId, Value>,
    pub diagnostics: Vec<(ElementId, Message)>,
}

pub struct Evaluator<'a> {
    model: &'a Model,
    slots: &'a SlotTable,
    env: TypeEnv<'a>,
    config: &'a EngineConfig,
    store: &'a VariableStore,
    cache: &'a mut FunctionCache,
    layers: Vec<BTreeMap<ElementId, Value>>,
    depth: usize,
    diagnostics: Vec<(ElementId, Message)>,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        model: &'a Model,
        slots: &'a SlotTable,
        types: &'a TypeTable,
        config: &'a EngineConfig,
        store: &'a VariableStore,
        cache: &'a mut FunctionCache,
    ) -> Self {
        Self {
            model,
            slots,
            env: TypeEnv::new(model, types),
            config,
            store,
            cache,
            layers: vec![BTreeMap::new()],
            depth: 0,
            diagnostics: Vec::new(),
        }
    }

    /// Consume the evaluator, returning everything staged so far.
    pub fn finish(mut self) -> Changes {
        let mut values = BTreeMap::new();
        for layer in self.layers.drain(..) {
            values.extend(layer);
        }
        Changes {
            values,
            diagnostics: self.diagnostics,
        }
    }

    // --- Rules ---

    /// Run `rule` with `THIS` bound to `this`.
    pub fn run_rule(&mut self, this: Option<Location>, rule: ElementId) -> EvalResult<RuleOutcome> {
        self.rule(&Frame::new(this), rule)
    }

    fn rule(&mut self, frame: &Frame, rule: ElementId) -> EvalResult<RuleOutcome> {
        let Some(condition) = self.active_condition(frame, rule)? else {
            if self.config.warn_on_unmatched_rule {
                self.diagnostics.push((
                    rule,
                    Message::warning(Origin::Runtime, "no rule condition was active"),
                ));
            }
            return Ok(RuleOutcome::Unmatched);
        };
        trace!(rule = %self.model.qualified_name(rule), "rule fired");
        let slots = self.slots;
        for action in children_tagged(self.model, condition, KindTag::Action) {
            let statement = slots
                .statement(action)
                .ok_or_else(|| self.not_compiled(action))?;
            self.execute(&mut frame.clone(), statement)?;
        }
        for sub_rule in children_tagged(self.model, condition, KindTag::Rule) {
            self.nested(frame, sub_rule);
        }
        Ok(RuleOutcome::Fired)
    }

    fn active_condition(&mut self, frame: &Frame, rule: ElementId) -> EvalResult<Option<ElementId>> {
        for condition in children_tagged(self.model, rule, KindTag::RuleCondition) {
            if self.preconditions_hold(&mut frame.clone(), condition)? {
                return Ok(Some(condition));
            }
        }
        Ok(None)
    }

    /// Run a sub-rule or procedure rule in its own layer.
    fn nested(&mut self, frame: &Frame, rule: ElementId) {
        self.layers.push(BTreeMap::new());
        let result = self.rule(frame, rule);
        let layer = self.layers.pop().unwrap_or_default();
        match result {
            Ok(_) => match self.layers.last_mut() {
                Some(parent) => parent.extend(layer),
                None => self.layers.push(layer),
            },
            Err(err) => {
                debug!(rule = %self.model.qualified_name(rule), error = %err, "nested rule failed");
                self.diagnostics.push((
                    rule,
                    Message::error(ErrorKind::RuntimeEvaluation, Origin::Runtime, err.to_string()),
                ));
            }
        }
    }

    fn preconditions_hold(&mut self, frame: &mut Frame, owner: ElementId) -> EvalResult<bool> {
        let slots = self.slots;
        for pre in children_tagged(self.model, owner, KindTag::PreCondition) {
            let expr = slots.expression(pre).ok_or_else(|| self.not_compiled(pre))?;
            let value = self.evaluate(frame, expr)?;
            if !self.truth(&value)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // --- Values and locations ---

    fn variable(&self, id: ElementId) -> Option<&Value> {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| layer.get(&id))
            .or_else(|| self.store.get(id))
    }

    fn read(&self, location: &Location) -> EvalResult<Value> {
        self.variable(location.variable)
            .and_then(|v| value_at(v, &location.fields))
            .cloned()
            .ok_or_else(|| self.unbound_location(location))
    }

    fn write(&mut self, location: &Location, value: Value) -> EvalResult<()> {
        let value = location.type_in(&self.env).coerce(self.model, value);
        let mut whole = self
            .variable(location.variable)
            .cloned()
            .ok_or_else(|| self.unbound_location(location))?;
        let slot = value_at_mut(&mut whole, &location.fields)
            .ok_or_else(|| self.unbound_location(location))?;
        *slot = value;
        match self.layers.last_mut() {
            Some(layer) => {
                layer.insert(location.variable, whole);
            }
            None => self.layers.push(BTreeMap::from([(location.variable, whole)])),
        }
        Ok(())
    }

    /// Location of a structure element named without a prefix: the nearest
    /// enclosing instance that has the field.
    fn this_field(&self, frame: &Frame, name: &str) -> EvalResult<Location> {
        let mut location = frame.this.clone().ok_or(EvalError::NoInstance)?;
        loop {
            let holds = self
                .variable(location.variable)
                .and_then(|v| value_at(v, &location.fields))
                .is_some_and(|v| v.field(name).is_some());
            if holds {
                return Ok(location.field(name));
            }
            location = location.parent().ok_or_else(|| EvalError::Unbound {
                name: name.to_string(),
            })?;
        }
    }

    /// The location an assignable expression denotes.
    pub fn location(&self, frame: &Frame, expr: &Expression) -> EvalResult<Location> {
        match &expr.kind {
            ExprKind::This => frame.this.clone().ok_or(EvalError::NoInstance),
            ExprKind::Name(d) => match self.element_ref(d)? {
                (id, KindTag::Variable) => Ok(Location::variable(id)),
                (_, KindTag::StructureElement) => self.this_field(frame, &d.name),
                _ => Err(unbound(d)),
            },
            ExprKind::Member { target, member } => match self.element_ref(member)? {
                (id, KindTag::Variable) => Ok(Location::variable(id)),
                (_, KindTag::StructureElement) => {
                    Ok(self.location(frame, target)?.field(&member.name))
                }
                _ => Err(unbound(member)),
            },
            _ => Err(EvalError::Unbound {
                name: expr.to_string(),
            }),
        }
    }

    fn element_ref(&self, d: &Designator) -> EvalResult<(ElementId, KindTag)> {
        d.reference
            .and_then(Ref::element)
            .and_then(|id| Some((id, self.model.tag(id)?)))
            .ok_or_else(|| unbound(d))
    }

    /// Value of a bound element that does not need an instance.
    fn element_value(&self, frame: &Frame, d: &Designator) -> EvalResult<Value> {
        let (id, tag) = self.element_ref(d)?;
        match tag {
            KindTag::Variable => self.variable(id).cloned().ok_or_else(|| unbound(d)),
            KindTag::Parameter => frame.params.get(&id).cloned().ok_or_else(|| unbound(d)),
            KindTag::StructureElement => self.read(&self.this_field(frame, &d.name)?),
            KindTag::EnumValue => Ok(self.enum_value(id)),
            KindTag::State => Ok(Value::State(id)),
            _ => Err(unbound(d)),
        }
    }

    /// Range special values evaluate to their number, enum values to
    /// themselves.
    fn enum_value(&self, id: ElementId) -> Value {
        let number = match self.model.get(id).map(|e| &e.kind) {
            Some(ElementKind::EnumValue { value: Some(v) }) => Some(*v),
            _ => None,
        };
        let range = self
            .model
            .parent(id)
            .filter(|p| self.model.tag(*p) == Some(KindTag::Range))
            .map(Type::Range);
        match (number, range) {
            (Some(v), Some(range)) if range.is_integral(self.model) => Value::Int(v as i64),
            (Some(v), Some(_)) => Value::Double(v),
            _ => Value::EnumValue(id),
        }
    }

    /// Value a fresh slot of `ty` starts with: structure elements take their
    /// default expressions where they have one.
    pub fn initial_value(&mut self, ty: &Type) -> EvalResult<Value> {
        self.initial_at(ty, 0)
    }

    fn initial_at(&mut self, ty: &Type, depth: usize) -> EvalResult<Value> {
        let Type::Structure(structure) = ty else {
            return Ok(ty.default_value(&self.env));
        };
        if depth > MAX_NESTING {
            return Ok(ty.default_value(&self.env));
        }
        let slots = self.slots;
        let mut fields = IndexMap::new();
        for element in self.env.structure_elements(*structure) {
            let element_type = self.env.type_of(element);
            let value = match slots.expression(element) {
                Some(expr) => {
                    let value = self.evaluate(&mut Frame::default(), expr)?;
                    element_type.coerce(self.model, value)
                }
                None => self.initial_at(&element_type, depth + 1)?,
            };
            fields.insert(self.model.name(element).to_string(), value);
        }
        Ok(Value::Structure {
            ty: *structure,
            fields,
        })
    }

    // --- Expressions ---

    pub fn evaluate(&mut self, frame: &mut Frame, expr: &Expression) -> EvalResult<Value> {
        match &expr.kind {
            ExprKind::Literal(literal) => Ok(match literal {
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Double(d) => Value::Double(*d),
                Literal::String(s) => Value::String(s.clone()),
            }),
            ExprKind::Name(d) => match d.reference {
                Some(Ref::Iterator) => frame.iterator(&d.name).cloned().ok_or_else(|| unbound(d)),
                _ => self.element_value(frame, d),
            },
            ExprKind::This => {
                let this = frame.this.clone().ok_or(EvalError::NoInstance)?;
                self.read(&this)
            }
            ExprKind::Empty => Ok(Value::List(Vec::new())),
            ExprKind::Member { target, member } => match self.element_ref(member)? {
                (_, KindTag::StructureElement) => {
                    let base = self.evaluate(frame, target)?;
                    base.field(&member.name).cloned().ok_or_else(|| unbound(member))
                }
                _ => self.element_value(frame, member),
            },
            ExprKind::Unary { op, operand } => {
                let value = self.evaluate(frame, operand)?;
                match (op, value) {
                    (UnaryOp::Not, v) => Ok(Value::Bool(!self.truth(&v)?)),
                    (UnaryOp::Neg, Value::Int(i)) => i
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or(EvalError::Overflow { op: "-" }),
                    (UnaryOp::Neg, Value::Double(d)) => Ok(Value::Double(-d)),
                    (UnaryOp::Neg, v) => Err(self.type_error("a number", &v)),
                }
            }
            ExprKind::Binary { op, left, right } => self.binary(frame, *op, left, right),
            ExprKind::Call { callee, args } => self.call(frame, callee, args),
            ExprKind::Struct { ty, associations } => self.structure(frame, ty, associations),
            ExprKind::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.evaluate(frame, item)?);
                }
                Ok(Value::List(values))
            }
            ExprKind::Quantifier {
                kind,
                iterator,
                collection,
                condition,
                using,
            } => self.quantifier(
                frame,
                *kind,
                iterator,
                collection,
                condition.as_deref(),
                using.as_deref(),
            ),
        }
    }

    fn truth(&self, value: &Value) -> EvalResult<bool> {
        value
            .as_bool()
            .ok_or_else(|| self.type_error("Boolean", value))
    }

    fn binary(
        &mut self,
        frame: &mut Frame,
        op: BinaryOp,
        left: &Expression,
        right: &Expression,
    ) -> EvalResult<Value> {
        let l = self.evaluate(frame, left)?;
        match op {
            BinaryOp::And | BinaryOp::Or => {
                let l = self.truth(&l)?;
                if l == (op == BinaryOp::Or) {
                    return Ok(Value::Bool(l));
                }
                let r = self.evaluate(frame, right)?;
                Ok(Value::Bool(self.truth(&r)?))
            }
            _ => {
                let r = self.evaluate(frame, right)?;
                self.apply(op, l, r)
            }
        }
    }

    fn apply(&self, op: BinaryOp, l: Value, r: Value) -> EvalResult<Value> {
        match op {
            BinaryOp::Eq => Ok(Value::Bool(l.loosely_equals(&r))),
            BinaryOp::Ne => Ok(Value::Bool(!l.loosely_equals(&r))),
            BinaryOp::In | BinaryOp::NotIn => {
                let Value::List(items) = &r else {
                    return Err(self.type_error("a collection", &r));
                };
                let found = items.iter().any(|i| i.loosely_equals(&l));
                Ok(Value::Bool(found == (op == BinaryOp::In)))
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let ordering = match (&l, &r) {
                    (Value::Int(a), Value::Int(b)) => a.cmp(b),
                    (Value::String(a), Value::String(b)) => a.cmp(b),
                    _ => self
                        .number(&l)?
                        .partial_cmp(&self.number(&r)?)
                        .ok_or(EvalError::Overflow { op: op.symbol() })?,
                };
                Ok(Value::Bool(match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::Le => ordering.is_le(),
                    BinaryOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                }))
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Pow => {
                self.arithmetic(op, l, r)
            }
            BinaryOp::And | BinaryOp::Or => {
                Ok(Value::Bool(match op {
                    BinaryOp::And => self.truth(&l)? && self.truth(&r)?,
                    _ => self.truth(&l)? || self.truth(&r)?,
                }))
            }
        }
    }

    fn arithmetic(&self, op: BinaryOp, l: Value, r: Value) -> EvalResult<Value> {
        let overflow = EvalError::Overflow { op: op.symbol() };
        match (l, r) {
            (Value::Int(a), Value::Int(b)) => {
                let result = match op {
                    BinaryOp::Add => a.checked_add(b),
                    BinaryOp::Sub => a.checked_sub(b),
                    BinaryOp::Mul => a.checked_mul(b),
                    BinaryOp::Div | BinaryOp::Mod if b == 0 => {
                        return Err(EvalError::DivisionByZero)
                    }
                    BinaryOp::Div => a.checked_div(b),
                    BinaryOp::Mod => a.checked_rem(b),
                    BinaryOp::Pow if b < 0 => {
                        return Err(EvalError::NegativeExponent { exponent: b })
                    }
                    BinaryOp::Pow => u32::try_from(b).ok().and_then(|e| a.checked_pow(e)),
                    _ => None,
                };
                result.map(Value::Int).ok_or(overflow)
            }
            (Value::String(a), Value::String(b)) if op == BinaryOp::Add => {
                Ok(Value::String(a + &b))
            }
            (l, r) => {
                let (a, b) = (self.number(&l)?, self.number(&r)?);
                let result = match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div | BinaryOp::Mod if b == 0.0 => {
                        return Err(EvalError::DivisionByZero)
                    }
                    BinaryOp::Div => a / b,
                    BinaryOp::Mod => a % b,
                    _ => a.powf(b),
                };
                if result.is_finite() {
                    Ok(Value::Double(result))
                } else {
                    Err(overflow)
                }
            }
        }
    }

    fn number(&self, value: &Value) -> EvalResult<f64> {
        value
            .as_f64()
            .ok_or_else(|| self.type_error("a number", value))
    }

    fn call(&mut self, frame: &mut Frame, callee: &Expression, args: &[Argument]) -> EvalResult<Value> {
        let reference = callee.last_designator().and_then(|d| d.reference);
        match reference {
            Some(Ref::Builtin(builtin)) if builtin.is_function() => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.evaluate(frame, &arg.value)?);
                }
                self.builtin(builtin, &values)
            }
            Some(Ref::Element(id)) if self.model.tag(id) == Some(KindTag::Function) => {
                self.call_function(frame, id, args)
            }
            _ => Err(EvalError::Unbound {
                name: callee.to_string(),
            }),
        }
    }

    fn builtin(&self, builtin: Builtin, values: &[Value]) -> EvalResult<Value> {
        match (builtin, values) {
            (Builtin::Abs, [Value::Int(i)]) => i
                .checked_abs()
                .map(Value::Int)
                .ok_or(EvalError::Overflow { op: "Abs" }),
            (Builtin::Abs, [v]) => Ok(Value::Double(self.number(v)?.abs())),
            (Builtin::Min, [Value::Int(a), Value::Int(b)]) => Ok(Value::Int(*a.min(b))),
            (Builtin::Max, [Value::Int(a), Value::Int(b)]) => Ok(Value::Int(*a.max(b))),
            (Builtin::Min, [a, b]) => Ok(Value::Double(self.number(a)?.min(self.number(b)?))),
            (Builtin::Max, [a, b]) => Ok(Value::Double(self.number(a)?.max(self.number(b)?))),
            _ => Err(EvalError::Unbound {
                name: builtin.name().to_string(),
            }),
        }
    }

    fn bind_arguments(
        &mut self,
        frame: &mut Frame,
        callable: ElementId,
        args: &[Argument],
    ) -> EvalResult<(Vec<ElementId>, HashMap<ElementId, Value>)> {
        let params = parameters(self.model, callable);
        let mut bound = HashMap::new();
        let mut positional = params.iter();
        for arg in args {
            let value = self.evaluate(frame, &arg.value)?;
            let param = match &arg.name {
                Some(name) => name.reference.and_then(Ref::element),
                None => positional.next().copied(),
            }
            .ok_or_else(|| EvalError::Unbound {
                name: arg.value.to_string(),
            })?;
            let value = self.env.type_of(param).coerce(self.model, value);
            bound.insert(param, value);
        }
        if let Some(missing) = params.iter().find(|p| !bound.contains_key(*p)) {
            return Err(EvalError::Unbound {
                name: self.model.name(*missing).to_string(),
            });
        }
        Ok((params, bound))
    }

    fn enter(&mut self) -> EvalResult<()> {
        if self.depth >= self.config.max_call_depth {
            return Err(EvalError::CallDepth {
                limit: self.config.max_call_depth,
            });
        }
        self.depth += 1;
        Ok(())
    }

    fn call_function(&mut self, frame: &mut Frame, function: ElementId, args: &[Argument]) -> EvalResult<Value> {
        let (params, bound) = self.bind_arguments(frame, function, args)?;
        let ordered: Vec<Value> = params.iter().filter_map(|p| bound.get(p).cloned()).collect();
        let cacheable = self.config.function_cache && Type::Function(function).cacheable(self.model);
        let key = if cacheable {
            FunctionCache::key(function, frame.this.as_ref(), &ordered)
        } else {
            None
        };
        if let Some(hit) = key.as_ref().and_then(|k| self.cache.get(k)) {
            return Ok(hit);
        }

        self.enter()?;
        let result = self.function_body(&mut frame.callee(bound), function, &ordered);
        self.depth -= 1;
        let value = self.env.type_of(function).coerce(self.model, result?);
        if let Some(key) = key {
            self.cache.insert(key, value.clone());
        }
        Ok(value)
    }

    fn function_body(&mut self, frame: &mut Frame, function: ElementId, args: &[Value]) -> EvalResult<Value> {
        let cases = children_tagged(self.model, function, KindTag::Case);
        if cases.is_empty() {
            return match interpolate(self.model, function, args)? {
                Some(v) => Ok(Value::Double(v)),
                None => Err(EvalError::NoDefinition {
                    function: self.model.qualified_name(function),
                }),
            };
        }
        let slots = self.slots;
        for case in cases {
            if self.preconditions_hold(frame, case)? {
                let expr = slots.expression(case).ok_or_else(|| self.not_compiled(case))?;
                return self.evaluate(frame, expr);
            }
        }
        Err(EvalError::NoMatchingCase {
            function: self.model.qualified_name(function),
        })
    }

    fn structure(
        &mut self,
        frame: &mut Frame,
        ty: &Expression,
        associations: &[Association],
    ) -> EvalResult<Value> {
        let structure = ty
            .last_designator()
            .and_then(|d| d.reference)
            .and_then(Ref::element)
            .filter(|id| self.model.tag(*id) == Some(KindTag::Structure))
            .ok_or_else(|| EvalError::Unbound { name: ty.to_string() })?;
        let mut value = self.initial_value(&Type::Structure(structure))?;
        for association in associations {
            let (element, _) = self.element_ref(&association.element)?;
            let v = self.evaluate(frame, &association.value)?;
            let v = self.env.type_of(element).coerce(self.model, v);
            let slot = value
                .field_mut(&association.element.name)
                .ok_or_else(|| unbound(&association.element))?;
            *slot = v;
        }
        Ok(value)
    }

    fn list(&mut self, frame: &mut Frame, expr: &Expression) -> EvalResult<Vec<Value>> {
        match self.evaluate(frame, expr)? {
            Value::List(items) => Ok(items),
            other => Err(self.type_error("a collection", &other)),
        }
    }

    fn with_iterator<T>(
        &mut self,
        frame: &mut Frame,
        name: &str,
        item: Value,
        body: impl FnOnce(&mut Self, &mut Frame) -> EvalResult<T>,
    ) -> EvalResult<T> {
        frame.iterators.push((name.to_string(), item));
        let result = body(self, frame);
        frame.iterators.pop();
        result
    }

    /// Indices of the items for which `condition` holds.
    fn selection(
        &mut self,
        frame: &mut Frame,
        iterator: &str,
        items: &[Value],
        condition: Option<&Expression>,
    ) -> EvalResult<Vec<usize>> {
        let Some(condition) = condition else {
            return Ok((0..items.len()).collect());
        };
        let mut hits = Vec::new();
        for (index, item) in items.iter().enumerate() {
            let hit = self.with_iterator(frame, iterator, item.clone(), |ev, fr| {
                let v = ev.evaluate(fr, condition)?;
                ev.truth(&v)
            })?;
            if hit {
                hits.push(index);
            }
        }
        Ok(hits)
    }

    fn quantifier(
        &mut self,
        frame: &mut Frame,
        kind: QuantifierKind,
        iterator: &Designator,
        collection: &Expression,
        condition: Option<&Expression>,
        using: Option<&Expression>,
    ) -> EvalResult<Value> {
        let items = self.list(frame, collection)?;
        let hits = self.selection(frame, &iterator.name, &items, condition)?;
        let mut mapped = Vec::new();
        if kind.requires_using() {
            for &index in &hits {
                let item = items[index].clone();
                let value = match using {
                    Some(using) => self.with_iterator(frame, &iterator.name, item, |ev, fr| {
                        ev.evaluate(fr, using)
                    })?,
                    None => item,
                };
                mapped.push(value);
            }
        }
        match kind {
            QuantifierKind::ForAll => Ok(Value::Bool(hits.len() == items.len())),
            QuantifierKind::ThereIs => Ok(Value::Bool(!hits.is_empty())),
            QuantifierKind::First => hits
                .first()
                .map(|i| items[*i].clone())
                .ok_or(EvalError::NoSelection),
            QuantifierKind::Last => hits
                .last()
                .map(|i| items[*i].clone())
                .ok_or(EvalError::NoSelection),
            QuantifierKind::Count => Ok(Value::Int(hits.len() as i64)),
            QuantifierKind::Filter => Ok(Value::List(hits.iter().map(|i| items[*i].clone()).collect())),
            QuantifierKind::Sum => mapped
                .into_iter()
                .try_fold(Value::Int(0), |sum, v| self.arithmetic(BinaryOp::Add, sum, v)),
            QuantifierKind::Map => Ok(Value::List(mapped)),
        }
    }

    // --- Statements ---

    pub fn execute(&mut self, frame: &mut Frame, statement: &Statement) -> EvalResult<()> {
        match &statement.kind {
            StmtKind::Update { target, value } => {
                let value = self.evaluate(frame, value)?;
                let location = self.location(frame, target)?;
                self.write(&location, value)
            }
            StmtKind::Insert { value, target } => {
                let location = self.location(frame, target)?;
                let value = self.evaluate(frame, value)?;
                let ty = location.type_in(&self.env);
                let mut items = self.collection_at(&location)?;
                if let Some(max) = max_size(self.model, &ty) {
                    if items.len() >= max {
                        return Err(EvalError::CollectionFull {
                            collection: self.describe(&location),
                            max,
                        });
                    }
                }
                let element = ty.element_type(&self.env).unwrap_or(Type::Unknown);
                items.push(element.coerce(self.model, value));
                self.write(&location, Value::List(items))
            }
            StmtKind::Remove {
                kind,
                iterator,
                target,
                condition,
            } => {
                let location = self.location(frame, target)?;
                let items = self.collection_at(&location)?;
                let hits = self.selection(frame, &iterator.name, &items, condition.as_ref())?;
                let doomed: Vec<usize> = match kind {
                    RemoveKind::First => hits.first().copied().into_iter().collect(),
                    RemoveKind::Last => hits.last().copied().into_iter().collect(),
                    RemoveKind::All => hits,
                };
                let kept = items
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| !doomed.contains(i))
                    .map(|(_, v)| v)
                    .collect();
                self.write(&location, Value::List(kept))
            }
            StmtKind::Replace {
                iterator,
                target,
                condition,
                value,
            } => {
                let location = self.location(frame, target)?;
                let mut items = self.collection_at(&location)?;
                let hits = self.selection(frame, &iterator.name, &items, condition.as_ref())?;
                let element = location
                    .type_in(&self.env)
                    .element_type(&self.env)
                    .unwrap_or(Type::Unknown);
                for index in hits {
                    let replacement = self.with_iterator(frame, &iterator.name, items[index].clone(), |ev, fr| {
                        ev.evaluate(fr, value)
                    })?;
                    items[index] = element.coerce(self.model, replacement);
                }
                self.write(&location, Value::List(items))
            }
            StmtKind::Apply {
                iterator,
                collection,
                condition,
                body,
            } => {
                let items = self.list(frame, collection)?;
                let hits = self.selection(frame, &iterator.name, &items, condition.as_ref())?;
                for index in hits {
                    self.with_iterator(frame, &iterator.name, items[index].clone(), |ev, fr| {
                        ev.execute(fr, body)
                    })?;
                }
                Ok(())
            }
            StmtKind::Call(call) => {
                let ExprKind::Call { callee, args } = &call.kind else {
                    return Err(EvalError::Unbound {
                        name: call.to_string(),
                    });
                };
                let procedure = callee
                    .last_designator()
                    .and_then(|d| d.reference)
                    .and_then(Ref::element)
                    .filter(|id| self.model.tag(*id) == Some(KindTag::Procedure))
                    .ok_or_else(|| EvalError::Unbound {
                        name: callee.to_string(),
                    })?;
                self.call_procedure(frame, procedure, args)
            }
        }
    }

    fn call_procedure(&mut self, frame: &mut Frame, procedure: ElementId, args: &[Argument]) -> EvalResult<()> {
        let (_, bound) = self.bind_arguments(frame, procedure, args)?;
        self.enter()?;
        let callee = frame.callee(bound);
        for rule in children_tagged(self.model, procedure, KindTag::Rule) {
            self.nested(&callee, rule);
        }
        self.depth -= 1;
        Ok(())
    }

    fn collection_at(&self, location: &Location) -> EvalResult<Vec<Value>> {
        match self.read(location)? {
            Value::List(items) => Ok(items),
            other => Err(self.type_error("a collection", &other)),
        }
    }

    // --- Errors ---

    fn describe(&self, location: &Location) -> String {
        let mut text = self.model.qualified_name(location.variable);
        for field in &location.fields {
            text.push('.');
            text.push_str(field);
        }
        text
    }

    fn unbound_location(&self, location: &Location) -> EvalError {
        EvalError::Unbound {
            name: self.describe(location),
        }
    }

    fn not_compiled(&self, element: ElementId) -> EvalError {
        EvalError::NotCompiled {
            element: self.model.qualified_name(element),
        }
    }

    fn type_error(&self, expected: &'static str, found: &Value) -> EvalError {
        EvalError::Type {
            expected,
            found: found.display(self.model).to_string(),
        }
    }
}

fn unbound(d: &Designator) -> EvalError {
    EvalError::Unbound {
        name: d.name.clone(),
    }
}

fn max_size(model: &Model, ty: &Type) -> Option<usize> {
    match ty {
        Type::Collection(id) => match model.get(*id).map(|e| &e.kind) {
            Some(ElementKind::Collection { max_size, .. }) => Some(*max_size),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use efs_compiler::{CompileRequest, Compiler};
    use efs_core::builder::ModelBuilder;
    use efs_core::element::{Element, Mode, RulePriority};

    struct Fixture {
        model: Model,
        compiler: Compiler,
        store: VariableStore,
        config: EngineConfig,
        cache: FunctionCache,
    }

    impl Fixture {
        fn new(build: impl FnOnce(&mut ModelBuilder, ElementId)) -> Self {
            let mut b = ModelBuilder::new();
            let n = b.namespace("N").unwrap();
            build(&mut b, n);
            let mut model = b.build();
            let mut compiler = Compiler::new();
            compiler.compile(&mut model, CompileRequest::synchronous());
            assert_eq!(model.error_count(), 0, "{:?}", model.all_messages());
            let mut store = VariableStore::new();
            let types = compiler.types().clone();
            let env = TypeEnv::new(&model, &types);
            for id in store.materialize(&env) {
                store.set(id, env.type_of(id).default_value(&env));
            }
            Self {
                model,
                compiler,
                store,
                config: EngineConfig::default(),
                cache: FunctionCache::new(),
            }
        }

        /// Evaluate the default expression of variable `name`.
        fn eval(&mut self, name: &str) -> EvalResult<Value> {
            let id = self.model.lookup(name).unwrap();
            let expr = self.compiler.slots().expression(id).unwrap();
            let mut ev = Evaluator::new(
                &self.model,
                self.compiler.slots(),
                self.compiler.types(),
                &self.config,
                &self.store,
                &mut self.cache,
            );
            ev.evaluate(&mut Frame::default(), expr)
        }
    }

    #[test]
    fn arithmetic_is_checked() {
        let mut f = Fixture::new(|b, n| {
            b.variable(n, "div", "Integer", Mode::Internal, Some("7 / 2")).unwrap();
            b.variable(n, "zero", "Integer", Mode::Internal, Some("1 / 0")).unwrap();
            b.variable(n, "big", "Integer", Mode::Internal, Some("2 ^ 70")).unwrap();
            b.variable(n, "neg", "Integer", Mode::Internal, Some("2 ^ (0 - 1)")).unwrap();
            b.variable(n, "mix", "Double", Mode::Internal, Some("1 + 0.5")).unwrap();
            b.variable(n, "text", "String", Mode::Internal, Some("'a' + 'b'")).unwrap();
        });
        assert_eq!(f.eval("N.div"), Ok(Value::Int(3)));
        assert_eq!(f.eval("N.zero"), Err(EvalError::DivisionByZero));
        assert_eq!(f.eval("N.big"), Err(EvalError::Overflow { op: "^" }));
        assert_eq!(f.eval("N.neg"), Err(EvalError::NegativeExponent { exponent: -1 }));
        assert_eq!(f.eval("N.mix"), Ok(Value::Double(1.5)));
        assert_eq!(f.eval("N.text"), Ok(Value::String("ab".into())));
    }

    #[test]
    fn quantifiers_and_builtins() {
        let mut f = Fixture::new(|b, n| {
            b.variable(n, "all", "Boolean", Mode::Internal, Some("FORALL X IN [1, 2, 3] | X > 0"))
                .unwrap();
            b.variable(n, "count", "Integer", Mode::Internal, Some("COUNT X IN [1, 2, 3] | X > 1"))
                .unwrap();
            b.variable(n, "sum", "Integer", Mode::Internal, Some("SUM X IN [1, 2, 3] USING X * X"))
                .unwrap();
            b.variable(n, "first", "Integer", Mode::Internal, Some("FIRST X IN [1, 2, 3] | X > 5"))
                .unwrap();
            b.variable(n, "low", "Integer", Mode::Internal, Some("Min(4, Abs(0 - 9))")).unwrap();
            b.variable(n, "member", "Boolean", Mode::Internal, Some("2 IN [1, 2.0]")).unwrap();
        });
        assert_eq!(f.eval("N.all"), Ok(Value::Bool(true)));
        assert_eq!(f.eval("N.count"), Ok(Value::Int(2)));
        assert_eq!(f.eval("N.sum"), Ok(Value::Int(14)));
        assert_eq!(f.eval("N.first"), Err(EvalError::NoSelection));
        assert_eq!(f.eval("N.low"), Ok(Value::Int(4)));
        assert_eq!(f.eval("N.member"), Ok(Value::Bool(true)));
    }

    #[test]
    fn functions_pick_the_first_matching_case() {
        let mut f = Fixture::new(|b, n| {
            let sign = b.function(n, "Sign", "Integer", true).unwrap();
            b.parameter(sign, "v", "Integer").unwrap();
            b.case(sign, "Neg", &["v < 0"], "0 - 1").unwrap();
            b.case(sign, "Zero", &["v == 0"], "0").unwrap();
            let partial = b.function(n, "Partial", "Integer", false).unwrap();
            b.parameter(partial, "v", "Integer").unwrap();
            b.case(partial, "Pos", &["v > 0"], "v").unwrap();
            b.variable(n, "a", "Integer", Mode::Internal, Some("Sign(0 - 5)")).unwrap();
            b.variable(n, "b", "Integer", Mode::Internal, Some("Sign(v => 0)")).unwrap();
            b.variable(n, "c", "Integer", Mode::Internal, Some("Partial(0)")).unwrap();
        });
        assert_eq!(f.eval("N.a"), Ok(Value::Int(-1)));
        assert_eq!(f.eval("N.b"), Ok(Value::Int(0)));
        assert!(matches!(f.eval("N.c"), Err(EvalError::NoMatchingCase { .. })));
        assert_eq!(f.cache.len(), 2);
    }

    #[test]
    fn recursion_is_bounded() {
        let mut f = Fixture::new(|b, n| {
            let loop_fn = b.function(n, "Loop", "Integer", false).unwrap();
            b.parameter(loop_fn, "v", "Integer").unwrap();
            b.case(loop_fn, "Again", &[], "Loop(v + 1)").unwrap();
            b.variable(n, "x", "Integer", Mode::Internal, Some("Loop(0)")).unwrap();
        });
        f.config.max_call_depth = 8;
        assert_eq!(f.eval("N.x"), Err(EvalError::CallDepth { limit: 8 }));
    }

    #[test]
    fn structures_and_special_values() {
        let mut f = Fixture::new(|b, n| {
            let point = b.structure(n, "Point").unwrap();
            b.element(point, "X", "Integer", Mode::Internal).unwrap();
            b.element(point, "Y", "Integer", Mode::Internal).unwrap();
            let r = b.range(n, "Level", 0.0, 10.0).unwrap();
            b.special_value(r, "Unset", -1.0).unwrap();
            b.variable(n, "p", "Point", Mode::Internal, Some("Point { Y => 4 }")).unwrap();
            b.variable(n, "l", "Level", Mode::Internal, Some("Level.Unset")).unwrap();
        });
        let p = f.eval("N.p").unwrap();
        assert_eq!(p.field("X"), Some(&Value::Int(0)));
        assert_eq!(p.field("Y"), Some(&Value::Int(4)));
        assert_eq!(f.eval("N.l"), Ok(Value::Int(-1)));
    }

    #[test]
    fn statements_stage_changes() {
        let f = Fixture::new(|b, n| {
            b.collection(n, "Bag", "Integer", 3).unwrap();
            b.variable(n, "bag", "Bag", Mode::Internal, None).unwrap();
            b.variable(n, "total", "Integer", Mode::Internal, None).unwrap();
        });
        let bag = f.model.lookup("N.bag").unwrap();
        let total = f.model.lookup("N.total").unwrap();
        let mut store = f.store.clone();
        store.set(bag, Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));

        let statements = [
            "REMOVE FIRST X IN bag | X > 1",
            "REPLACE X IN bag | X == 3 BY 30",
            "APPLY X IN bag DO total <- total + X",
            "INSERT 5 IN bag",
        ];
        let mut compiled = Vec::new();
        for text in statements {
            let mut model = f.model.clone();
            let n = model.lookup("N").unwrap();
            let rule = model
                .add(n, Element::new("R", ElementKind::Rule { priority: RulePriority::Processing }))
                .unwrap();
            let cond = model.add(rule, Element::new("C", ElementKind::RuleCondition)).unwrap();
            let action = model
                .add(cond, Element::new("A", ElementKind::Action { statement: text.into() }))
                .unwrap();
            let mut compiler = Compiler::new();
            compiler.compile(&mut model, CompileRequest::synchronous());
            assert_eq!(model.error_count(), 0, "{text}: {:?}", model.all_messages());
            compiled.push((model, compiler, action));
        }

        let config = EngineConfig::default();
        let mut cache = FunctionCache::new();
        for (model, compiler, action) in &compiled {
            let statement = compiler.slots().statement(*action).unwrap();
            let mut ev = Evaluator::new(model, compiler.slots(), compiler.types(), &config, &store, &mut cache);
            ev.execute(&mut Frame::default(), statement).unwrap();
            let changes = ev.finish();
            for (id, value) in changes.values {
                store.set(id, value);
            }
        }
        assert_eq!(
            store.get(bag),
            Some(&Value::List(vec![Value::Int(1), Value::Int(30), Value::Int(5)]))
        );
        assert_eq!(store.get(total), Some(&Value::Int(31)));

        let (model, compiler, action) = &compiled[3];
        let statement = compiler.slots().statement(*action).unwrap();
        store.set(bag, Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
        let mut ev = Evaluator::new(model, compiler.slots(), compiler.types(), &config, &store, &mut cache);
        assert!(matches!(
            ev.execute(&mut Frame::default(), statement),
            Err(EvalError::CollectionFull { max: 3, .. })
        ));
    }
}
