//! The EFS type universe.
//!
//! Types are structural views over declarations in the model. Named types
//! (ranges, enums, structures, collections, state machines, functions) are
//! identified by the id of their declaring element; the types of typed
//! elements are resolved by the compiler into a [`TypeTable`].

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::element::{ElementId, ElementKind, KindTag, Precision};
use crate::model::Model;
use crate::value::Value;

/// Nesting limit for structural recursion (structures containing structures).
const MAX_DEPTH: usize = 16;

/// The core type representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Type {
    Boolean,
    Integer,
    Double,
    String,
    Range(ElementId),
    Enum(ElementId),
    Structure(ElementId),
    Collection(ElementId),
    StateMachine(ElementId),
    Function(ElementId),
    /// An anonymous list literal whose elements have the given type.
    AnyList(Box<Type>),
    /// `EMPTY` or `[]`: assignable to every collection.
    EmptyCollection,
    /// Type of an erroneous node; compatible with everything to avoid
    /// cascading diagnostics.
    Unknown,
}

/// A value outside the bounds of its range type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{value} is outside range {name} [{min}, {max}]")]
pub struct RangeViolation {
    pub name: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

/// Resolved types of typed declarations.
///
/// Keys: variables, structure elements and parameters map to their declared
/// type; functions map to their return type; collections map to their
/// element type.
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    declared: HashMap<ElementId, Type>,
    /// Resolved interfaces of each structure.
    interfaces: HashMap<ElementId, Vec<ElementId>>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ElementId) -> Option<&Type> {
        self.declared.get(&id)
    }

    pub fn insert(&mut self, id: ElementId, ty: Type) {
        self.declared.insert(id, ty);
    }

    pub fn set_interfaces(&mut self, structure: ElementId, interfaces: Vec<ElementId>) {
        self.interfaces.insert(structure, interfaces);
    }

    pub fn interfaces(&self, structure: ElementId) -> &[ElementId] {
        self.interfaces
            .get(&structure)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn clear(&mut self) {
        self.declared.clear();
        self.interfaces.clear();
    }

    pub fn len(&self) -> usize {
        self.declared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }
}

/// Lookup context for type operations.
#[derive(Clone, Copy)]
pub struct TypeEnv<'a> {
    pub model: &'a Model,
    pub types: &'a TypeTable,
}

impl<'a> TypeEnv<'a> {
    pub fn new(model: &'a Model, types: &'a TypeTable) -> Self {
        Self { model, types }
    }

    /// Declared type of a typed element, `Unknown` when unresolved.
    pub fn type_of(&self, id: ElementId) -> Type {
        self.types.get(id).cloned().unwrap_or(Type::Unknown)
    }

    /// Structure elements of a structure, in declaration order.
    pub fn structure_elements(&self, structure: ElementId) -> Vec<ElementId> {
        self.model
            .children(structure)
            .iter()
            .copied()
            .filter(|c| self.model.tag(*c) == Some(KindTag::StructureElement))
            .collect()
    }

    fn implements(&self, structure: ElementId, interface: ElementId, depth: usize) -> bool {
        if structure == interface {
            return true;
        }
        if depth > MAX_DEPTH {
            return false;
        }
        self.types
            .interfaces(structure)
            .iter()
            .any(|i| self.implements(*i, interface, depth + 1))
    }
}

impl Type {
    /// The type denoted by a type declaration element.
    pub fn of_declaration(model: &Model, id: ElementId) -> Option<Type> {
        match model.tag(id)? {
            KindTag::Range => Some(Type::Range(id)),
            KindTag::Enum => Some(Type::Enum(id)),
            KindTag::Structure => Some(Type::Structure(id)),
            KindTag::Collection => Some(Type::Collection(id)),
            KindTag::StateMachine => Some(Type::StateMachine(id)),
            KindTag::Function => Some(Type::Function(id)),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Integer | Type::Double | Type::Range(_) | Type::Unknown)
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, Type::Boolean | Type::Unknown)
    }

    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            Type::Collection(_) | Type::AnyList(_) | Type::EmptyCollection | Type::Unknown
        )
    }

    /// Bounds and precision of a range type.
    pub fn range_bounds(&self, model: &Model) -> Option<(f64, f64, Precision)> {
        match self {
            Type::Range(id) => match &model.get(*id)?.kind {
                ElementKind::Range {
                    min,
                    max,
                    precision,
                } => Some((*min, *max, *precision)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Whether values of this type are integral.
    pub fn is_integral(&self, model: &Model) -> bool {
        match self {
            Type::Integer => true,
            Type::Range(_) => matches!(self.range_bounds(model), Some((_, _, Precision::Integer))),
            _ => false,
        }
    }

    /// Element type of a collection or list type.
    pub fn element_type(&self, env: &TypeEnv<'_>) -> Option<Type> {
        match self {
            Type::Collection(id) => Some(env.type_of(*id)),
            Type::AnyList(inner) => Some((**inner).clone()),
            Type::EmptyCollection | Type::Unknown => Some(Type::Unknown),
            _ => None,
        }
    }

    /// Whether a function type's results may be memoized within a cycle.
    pub fn cacheable(&self, model: &Model) -> bool {
        match self {
            Type::Function(id) => matches!(
                model.get(*id).map(|e| &e.kind),
                Some(ElementKind::Function { cacheable: true, .. })
            ),
            _ => false,
        }
    }

    /// Special values declared on a range: `(element, numeric value)`.
    pub fn special_values(&self, model: &Model) -> Vec<(ElementId, f64)> {
        match self {
            Type::Range(id) => model
                .children(*id)
                .iter()
                .filter_map(|c| match model.get(*c).map(|e| &e.kind) {
                    Some(ElementKind::EnumValue { value: Some(v) }) => Some((*c, *v)),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Convert a value into this type's representation: integers widen to
    /// doubles, whole doubles narrow to integers. Values that need no
    /// conversion, or cannot be converted, are returned unchanged.
    pub fn coerce(&self, model: &Model, value: Value) -> Value {
        match (self, value) {
            (Type::Double, Value::Int(i)) => Value::Double(i as f64),
            (Type::Integer, Value::Double(d)) if is_whole(d) => Value::Int(d as i64),
            (Type::Range(_), Value::Int(i)) if !self.is_integral(model) => Value::Double(i as f64),
            (Type::Range(_), Value::Double(d)) if self.is_integral(model) && is_whole(d) => {
                Value::Int(d as i64)
            }
            (_, v) => v,
        }
    }

    /// Check a numeric value against the bounds of a range type.
    pub fn check_range(&self, model: &Model, value: &Value) -> Result<(), RangeViolation> {
        let Some((min, max, _)) = self.range_bounds(model) else {
            return Ok(());
        };
        let Some(v) = value.as_f64() else {
            return Ok(());
        };
        if (min..=max).contains(&v) || self.special_values(model).iter().any(|(_, s)| *s == v) {
            return Ok(());
        }
        let name = match self {
            Type::Range(id) => model.qualified_name(*id),
            _ => String::new(),
        };
        Err(RangeViolation {
            name,
            value: v,
            min,
            max,
        })
    }

    /// Whether `value` is a member of this type.
    pub fn accepts(&self, env: &TypeEnv<'_>, value: &Value) -> bool {
        self.accepts_at(env, value, 0)
    }

    fn accepts_at(&self, env: &TypeEnv<'_>, value: &Value, depth: usize) -> bool {
        if depth > MAX_DEPTH {
            return false;
        }
        let model = env.model;
        match (self, value) {
            (Type::Unknown, _) => true,
            (Type::Boolean, Value::Bool(_)) => true,
            (Type::Integer, Value::Int(_)) => true,
            (Type::Double, Value::Int(_) | Value::Double(_)) => true,
            (Type::String, Value::String(_)) => true,
            (Type::Range(_), Value::Int(_)) => self.check_range(model, value).is_ok(),
            (Type::Range(_), Value::Double(d)) => {
                (!self.is_integral(model) || d.fract() == 0.0)
                    && self.check_range(model, value).is_ok()
            }
            (Type::Enum(id), Value::EnumValue(v)) => model.parent(*v) == Some(*id),
            (Type::StateMachine(id), Value::State(s)) => model.parent(*s) == Some(*id),
            (Type::Structure(id), Value::Structure { ty, fields }) => {
                if !env.implements(*ty, *id, 0) {
                    return false;
                }
                env.structure_elements(*ty).iter().all(|e| {
                    fields
                        .get(model.name(*e))
                        .is_some_and(|v| env.type_of(*e).accepts_at(env, v, depth + 1))
                })
            }
            (Type::Collection(id), Value::List(items)) => {
                let max_size = match model.get(*id).map(|e| &e.kind) {
                    Some(ElementKind::Collection { max_size, .. }) => *max_size,
                    _ => usize::MAX,
                };
                let element = env.type_of(*id);
                items.len() <= max_size
                    && items.iter().all(|v| element.accepts_at(env, v, depth + 1))
            }
            (Type::AnyList(inner), Value::List(items)) => {
                items.iter().all(|v| inner.accepts_at(env, v, depth + 1))
            }
            (Type::EmptyCollection, Value::List(items)) => items.is_empty(),
            _ => false,
        }
    }

    /// The value a slot of this type holds before any assignment.
    pub fn default_value(&self, env: &TypeEnv<'_>) -> Value {
        self.default_at(env, 0)
    }

    fn default_at(&self, env: &TypeEnv<'_>, depth: usize) -> Value {
        let model = env.model;
        match self {
            Type::Boolean => Value::Bool(false),
            Type::Integer => Value::Int(0),
            Type::Double => Value::Double(0.0),
            Type::String => Value::String(String::new()),
            Type::Range(_) => {
                let Some((min, max, precision)) = self.range_bounds(model) else {
                    return Value::Int(0);
                };
                let v = 0.0_f64.clamp(min.min(max), max.max(min));
                match precision {
                    Precision::Integer => Value::Int(v.ceil() as i64),
                    Precision::Double => Value::Double(v),
                }
            }
            Type::Enum(id) => model
                .children(*id)
                .first()
                .map(|v| Value::EnumValue(*v))
                .unwrap_or(Value::Int(0)),
            Type::StateMachine(id) => {
                let initial = match model.get(*id).map(|e| &e.kind) {
                    Some(ElementKind::StateMachine { initial_state }) => {
                        model.find_child(*id, initial_state, KindTag::State)
                    }
                    _ => None,
                };
                let first = model
                    .children(*id)
                    .iter()
                    .copied()
                    .find(|c| model.tag(*c) == Some(KindTag::State));
                initial
                    .or(first)
                    .map(Value::State)
                    .unwrap_or(Value::Int(0))
            }
            Type::Structure(id) => {
                let mut fields = IndexMap::new();
                if depth < MAX_DEPTH {
                    for element in env.structure_elements(*id) {
                        fields.insert(
                            model.name(element).to_string(),
                            env.type_of(element).default_at(env, depth + 1),
                        );
                    }
                }
                Value::Structure { ty: *id, fields }
            }
            Type::Collection(_) | Type::AnyList(_) | Type::EmptyCollection => Value::List(Vec::new()),
            Type::Function(_) | Type::Unknown => Value::Int(0),
        }
    }

    /// Structural equality: structures and collections with the same shape
    /// are equal even when declared separately.
    pub fn is_structurally_equal(&self, env: &TypeEnv<'_>, other: &Type) -> bool {
        self.structurally_equal_at(env, other, 0)
    }

    fn structurally_equal_at(&self, env: &TypeEnv<'_>, other: &Type, depth: usize) -> bool {
        if depth > MAX_DEPTH {
            return true;
        }
        match (self, other) {
            (Type::Structure(a), Type::Structure(b)) => {
                if a == b {
                    return true;
                }
                let ea = env.structure_elements(*a);
                let eb = env.structure_elements(*b);
                ea.len() == eb.len()
                    && ea.iter().zip(&eb).all(|(x, y)| {
                        env.model.name(*x) == env.model.name(*y)
                            && env
                                .type_of(*x)
                                .structurally_equal_at(env, &env.type_of(*y), depth + 1)
                    })
            }
            (Type::Collection(a), Type::Collection(b)) => {
                a == b
                    || env
                        .type_of(*a)
                        .structurally_equal_at(env, &env.type_of(*b), depth + 1)
            }
            (Type::Range(a), Type::Range(b)) => {
                a == b || (self.range_bounds(env.model) == other.range_bounds(env.model))
            }
            (Type::AnyList(a), Type::AnyList(b)) => a.structurally_equal_at(env, b, depth + 1),
            _ => self == other,
        }
    }

    /// Whether a value of type `source` may be stored in a slot of this type.
    pub fn is_assignable_from(&self, env: &TypeEnv<'_>, source: &Type) -> bool {
        let model = env.model;
        match (self, source) {
            (Type::Unknown, _) | (_, Type::Unknown) => true,
            (Type::Double, s) => s.is_numeric(),
            (Type::Integer, s) => s.is_integral(model),
            (Type::Range(_), s) => {
                if self.is_integral(model) {
                    s.is_integral(model)
                } else {
                    s.is_numeric()
                }
            }
            (Type::Structure(target), Type::Structure(s)) => {
                env.implements(*s, *target, 0) || self.is_structurally_equal(env, source)
            }
            (Type::Collection(_), Type::EmptyCollection) => true,
            (Type::Collection(_), Type::Collection(_)) => self.is_structurally_equal(env, source),
            (Type::Collection(id), Type::AnyList(inner)) => {
                env.type_of(*id).is_assignable_from(env, inner)
            }
            (Type::AnyList(a), Type::AnyList(b)) => a.is_assignable_from(env, b),
            (Type::AnyList(_), Type::EmptyCollection) => true,
            _ => self == source,
        }
    }

    /// Display the type using declaration names from `model`.
    pub fn display<'a>(&'a self, model: &'a Model) -> TypeDisplay<'a> {
        TypeDisplay { ty: self, model }
    }
}

/// Formats a [`Type`] with declaration names resolved against a model.
pub struct TypeDisplay<'a> {
    ty: &'a Type,
    model: &'a Model,
}

impl fmt::Display for TypeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ty {
            Type::Boolean => write!(f, "Boolean"),
            Type::Integer => write!(f, "Integer"),
            Type::Double => write!(f, "Double"),
            Type::String => write!(f, "String"),
            Type::Range(id)
            | Type::Enum(id)
            | Type::Structure(id)
            | Type::Collection(id)
            | Type::StateMachine(id)
            | Type::Function(id) => write!(f, "{}", self.model.qualified_name(*id)),
            Type::AnyList(inner) => write!(f, "[{}]", inner.display(self.model)),
            Type::EmptyCollection => write!(f, "EMPTY"),
            Type::Unknown => write!(f, "<unknown>"),
        }
    }
}

/// Whether `d` converts to an `i64` without loss.
fn is_whole(d: f64) -> bool {
    d.fract() == 0.0 && d.is_finite() && d >= i64::MIN as f64 && d < i64::MAX as f64
}
