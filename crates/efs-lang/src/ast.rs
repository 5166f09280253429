//! Abstract syntax trees for EFS expressions and statements.
//!
//! Trees are closed tagged unions. Every node carries the span of the text it
//! was parsed from; designators additionally carry the declaration they were
//! bound to by the compiler. Equality is structural: spans and bindings are
//! ignored so that trees parsed from differently formatted text compare equal.

use efs_core::element::ElementId;
use efs_core::log::Span;

/// Functions and types available without a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Boolean,
    Integer,
    Double,
    String,
    Min,
    Max,
    Abs,
}

impl Builtin {
    pub const ALL: [Builtin; 7] = [
        Builtin::Boolean,
        Builtin::Integer,
        Builtin::Double,
        Builtin::String,
        Builtin::Min,
        Builtin::Max,
        Builtin::Abs,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Boolean => "Boolean",
            Builtin::Integer => "Integer",
            Builtin::Double => "Double",
            Builtin::String => "String",
            Builtin::Min => "Min",
            Builtin::Max => "Max",
            Builtin::Abs => "Abs",
        }
    }

    pub fn from_name(name: &str) -> Option<Builtin> {
        Builtin::ALL.into_iter().find(|b| b.name() == name)
    }

    pub fn is_type(self) -> bool {
        matches!(
            self,
            Builtin::Boolean | Builtin::Integer | Builtin::Double | Builtin::String
        )
    }

    pub fn is_function(self) -> bool {
        !self.is_type()
    }
}

/// What a designator was bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ref {
    Element(ElementId),
    Builtin(Builtin),
    /// The iterator of an enclosing quantifier or collection statement.
    Iterator,
}

impl Ref {
    pub fn element(self) -> Option<ElementId> {
        match self {
            Ref::Element(id) => Some(id),
            _ => None,
        }
    }
}

/// A name occurring in source text.
#[derive(Debug, Clone)]
pub struct Designator {
    pub name: String,
    pub span: Span,
    pub reference: Option<Ref>,
}

impl Designator {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            span,
            reference: None,
        }
    }
}

impl PartialEq for Designator {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "OR",
            BinaryOp::And => "AND",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "IN",
            BinaryOp::NotIn => "NOT IN",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::In
                | BinaryOp::NotIn
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::Or | BinaryOp::And)
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Pow
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantifierKind {
    ForAll,
    ThereIs,
    First,
    Last,
    Count,
    Filter,
    Sum,
    Map,
}

impl QuantifierKind {
    pub fn keyword(self) -> &'static str {
        match self {
            QuantifierKind::ForAll => "FORALL",
            QuantifierKind::ThereIs => "THERE_IS",
            QuantifierKind::First => "FIRST",
            QuantifierKind::Last => "LAST",
            QuantifierKind::Count => "COUNT",
            QuantifierKind::Filter => "FILTER",
            QuantifierKind::Sum => "SUM",
            QuantifierKind::Map => "MAP",
        }
    }

    /// `SUM` and `MAP` require a `USING` clause.
    pub fn requires_using(self) -> bool {
        matches!(self, QuantifierKind::Sum | QuantifierKind::Map)
    }
}

/// A call argument, optionally named (`X => 1`).
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: Option<Designator>,
    pub value: Expression,
}

/// A structure field association (`X => 1`).
#[derive(Debug, Clone, PartialEq)]
pub struct Association {
    pub element: Designator,
    pub value: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Name(Designator),
    This,
    Empty,
    Member {
        target: Box<Expression>,
        member: Designator,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Call {
        callee: Box<Expression>,
        args: Vec<Argument>,
    },
    Struct {
        ty: Box<Expression>,
        associations: Vec<Association>,
    },
    List(Vec<Expression>),
    Quantifier {
        kind: QuantifierKind,
        iterator: Designator,
        collection: Box<Expression>,
        condition: Option<Box<Expression>>,
        using: Option<Box<Expression>>,
    },
}

#[derive(Debug, Clone)]
pub struct Expression {
    pub kind: ExprKind,
    pub span: Span,
}

impl PartialEq for Expression {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Expression {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// A dotted name chain `a.b.c` bound to `reference` on its last segment.
    pub fn path(names: &[String], reference: Option<Ref>, span: Span) -> Option<Expression> {
        let (first, rest) = names.split_first()?;
        let mut expr = Expression::new(ExprKind::Name(Designator::new(first.clone(), span)), span);
        for name in rest {
            expr = Expression::new(
                ExprKind::Member {
                    target: Box::new(expr),
                    member: Designator::new(name.clone(), span),
                },
                span,
            );
        }
        if let Some(last) = expr.last_designator_mut() {
            last.reference = reference;
        }
        Some(expr)
    }

    /// Designators of a name chain (`a.b.c`), outermost first. `None` for
    /// anything else, including chains rooted at `THIS`.
    pub fn designator_path(&self) -> Option<Vec<&Designator>> {
        match &self.kind {
            ExprKind::Name(d) => Some(vec![d]),
            ExprKind::Member { target, member } => {
                let mut path = target.designator_path()?;
                path.push(member);
                Some(path)
            }
            _ => None,
        }
    }

    /// The final designator of a name or member chain.
    pub fn last_designator(&self) -> Option<&Designator> {
        match &self.kind {
            ExprKind::Name(d) => Some(d),
            ExprKind::Member { member, .. } => Some(member),
            _ => None,
        }
    }

    pub fn last_designator_mut(&mut self) -> Option<&mut Designator> {
        match &mut self.kind {
            ExprKind::Name(d) => Some(d),
            ExprKind::Member { member, .. } => Some(member),
            _ => None,
        }
    }

    /// Whether this expression is an assignable location: `x`, `a.b`,
    /// `THIS.x`.
    pub fn is_location(&self) -> bool {
        match &self.kind {
            ExprKind::Name(_) | ExprKind::This => true,
            ExprKind::Member { target, .. } => target.is_location(),
            _ => false,
        }
    }

    fn for_each_child<'a>(&'a self, f: &mut impl FnMut(&'a Expression)) {
        match &self.kind {
            ExprKind::Literal(_) | ExprKind::Name(_) | ExprKind::This | ExprKind::Empty => {}
            ExprKind::Member { target, .. } => f(target),
            ExprKind::Unary { operand, .. } => f(operand),
            ExprKind::Binary { left, right, .. } => {
                f(left);
                f(right);
            }
            ExprKind::Call { callee, args } => {
                f(callee);
                args.iter().for_each(|a| f(&a.value));
            }
            ExprKind::Struct { ty, associations } => {
                f(ty);
                associations.iter().for_each(|a| f(&a.value));
            }
            ExprKind::List(items) => items.iter().for_each(f),
            ExprKind::Quantifier {
                collection,
                condition,
                using,
                ..
            } => {
                f(collection);
                if let Some(c) = condition {
                    f(c);
                }
                if let Some(u) = using {
                    f(u);
                }
            }
        }
    }

    /// Pre-order traversal of this expression and all sub-expressions.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expression)) {
        f(self);
        self.for_each_child(&mut |child| child.walk(f));
    }

    /// Visit every designator that names a declaration (iterator
    /// declarations excluded), in source order.
    pub fn walk_designators<'a>(&'a self, f: &mut impl FnMut(&'a Designator)) {
        match &self.kind {
            ExprKind::Name(d) => f(d),
            ExprKind::Member { target, member } => {
                target.walk_designators(f);
                f(member);
            }
            ExprKind::Call { callee, args } => {
                callee.walk_designators(f);
                for arg in args {
                    if let Some(name) = &arg.name {
                        f(name);
                    }
                    arg.value.walk_designators(f);
                }
            }
            ExprKind::Struct { ty, associations } => {
                ty.walk_designators(f);
                for assoc in associations {
                    f(&assoc.element);
                    assoc.value.walk_designators(f);
                }
            }
            _ => self.for_each_child(&mut |child| child.walk_designators(f)),
        }
    }

    /// Mutable counterpart of [`Expression::walk_designators`].
    pub fn walk_designators_mut(&mut self, f: &mut impl FnMut(&mut Designator)) {
        match &mut self.kind {
            ExprKind::Literal(_) | ExprKind::This | ExprKind::Empty => {}
            ExprKind::Name(d) => f(d),
            ExprKind::Member { target, member } => {
                target.walk_designators_mut(f);
                f(member);
            }
            ExprKind::Unary { operand, .. } => operand.walk_designators_mut(f),
            ExprKind::Binary { left, right, .. } => {
                left.walk_designators_mut(f);
                right.walk_designators_mut(f);
            }
            ExprKind::Call { callee, args } => {
                callee.walk_designators_mut(f);
                for arg in args {
                    if let Some(name) = &mut arg.name {
                        f(name);
                    }
                    arg.value.walk_designators_mut(f);
                }
            }
            ExprKind::Struct { ty, associations } => {
                ty.walk_designators_mut(f);
                for assoc in associations {
                    f(&mut assoc.element);
                    assoc.value.walk_designators_mut(f);
                }
            }
            ExprKind::List(items) => items.iter_mut().for_each(|i| i.walk_designators_mut(f)),
            ExprKind::Quantifier {
                collection,
                condition,
                using,
                ..
            } => {
                collection.walk_designators_mut(f);
                if let Some(c) = condition {
                    c.walk_designators_mut(f);
                }
                if let Some(u) = using {
                    u.walk_designators_mut(f);
                }
            }
        }
    }

    /// Pre-order traversal with mutable access, used to rewrite name chains
    /// in place. The callback returns `false` to skip a node's children.
    pub fn rewrite(&mut self, f: &mut impl FnMut(&mut Expression) -> bool) {
        if !f(self) {
            return;
        }
        match &mut self.kind {
            ExprKind::Literal(_) | ExprKind::Name(_) | ExprKind::This | ExprKind::Empty => {}
            ExprKind::Member { target, .. } => target.rewrite(f),
            ExprKind::Unary { operand, .. } => operand.rewrite(f),
            ExprKind::Binary { left, right, .. } => {
                left.rewrite(f);
                right.rewrite(f);
            }
            ExprKind::Call { callee, args } => {
                callee.rewrite(f);
                args.iter_mut().for_each(|a| a.value.rewrite(f));
            }
            ExprKind::Struct { ty, associations } => {
                ty.rewrite(f);
                associations.iter_mut().for_each(|a| a.value.rewrite(f));
            }
            ExprKind::List(items) => items.iter_mut().for_each(|i| i.rewrite(f)),
            ExprKind::Quantifier {
                collection,
                condition,
                using,
                ..
            } => {
                collection.rewrite(f);
                if let Some(c) = condition {
                    c.rewrite(f);
                }
                if let Some(u) = using {
                    u.rewrite(f);
                }
            }
        }
    }

    /// Ids of all elements this expression is bound to.
    pub fn references(&self) -> Vec<ElementId> {
        let mut out = Vec::new();
        self.walk_designators(&mut |d| {
            if let Some(Ref::Element(id)) = d.reference {
                out.push(id);
            }
        });
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveKind {
    First,
    Last,
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `target <- value`
    Update { target: Expression, value: Expression },
    /// `INSERT value IN target`
    Insert { value: Expression, target: Expression },
    /// `REMOVE FIRST|LAST|ALL X IN target | condition`
    Remove {
        kind: RemoveKind,
        iterator: Designator,
        target: Expression,
        condition: Option<Expression>,
    },
    /// `REPLACE X IN target | condition BY value`
    Replace {
        iterator: Designator,
        target: Expression,
        condition: Option<Expression>,
        value: Expression,
    },
    /// `APPLY X IN collection | condition DO body`
    Apply {
        iterator: Designator,
        collection: Expression,
        condition: Option<Expression>,
        body: Box<Statement>,
    },
    /// Procedure call.
    Call(Expression),
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub kind: StmtKind,
    pub span: Span,
}

impl PartialEq for Statement {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Statement {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// The top-level expressions of this statement (nested statement
    /// expressions included), in source order.
    pub fn expressions(&self) -> Vec<&Expression> {
        let mut out = Vec::new();
        self.collect_expressions(&mut out);
        out
    }

    fn collect_expressions<'a>(&'a self, out: &mut Vec<&'a Expression>) {
        match &self.kind {
            StmtKind::Update { target, value } => out.extend([target, value]),
            StmtKind::Insert { value, target } => out.extend([value, target]),
            StmtKind::Remove {
                target, condition, ..
            } => {
                out.push(target);
                out.extend(condition.iter());
            }
            StmtKind::Replace {
                target,
                condition,
                value,
                ..
            } => {
                out.push(target);
                out.extend(condition.iter());
                out.push(value);
            }
            StmtKind::Apply {
                collection,
                condition,
                body,
                ..
            } => {
                out.push(collection);
                out.extend(condition.iter());
                body.collect_expressions(out);
            }
            StmtKind::Call(call) => out.push(call),
        }
    }

    /// Mutable access to every top-level expression of this statement.
    pub fn for_each_expression_mut(&mut self, f: &mut impl FnMut(&mut Expression)) {
        match &mut self.kind {
            StmtKind::Update { target, value } => {
                f(target);
                f(value);
            }
            StmtKind::Insert { value, target } => {
                f(value);
                f(target);
            }
            StmtKind::Remove {
                target, condition, ..
            } => {
                f(target);
                if let Some(c) = condition {
                    f(c);
                }
            }
            StmtKind::Replace {
                target,
                condition,
                value,
                ..
            } => {
                f(target);
                if let Some(c) = condition {
                    f(c);
                }
                f(value);
            }
            StmtKind::Apply {
                collection,
                condition,
                body,
                ..
            } => {
                f(collection);
                if let Some(c) = condition {
                    f(c);
                }
                body.for_each_expression_mut(f);
            }
            StmtKind::Call(call) => f(call),
        }
    }

    pub fn walk_designators<'a>(&'a self, f: &mut impl FnMut(&'a Designator)) {
        for expr in self.expressions() {
            expr.walk_designators(f);
        }
    }

    pub fn walk_designators_mut(&mut self, f: &mut impl FnMut(&mut Designator)) {
        self.for_each_expression_mut(&mut |e| e.walk_designators_mut(f));
    }

    pub fn references(&self) -> Vec<ElementId> {
        self.expressions()
            .into_iter()
            .flat_map(|e| e.references())
            .collect()
    }
}
