//! Runtime values held by variables.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::element::ElementId;
use crate::model::Model;

/// A typed runtime value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    /// A value of an enum type (or a range special value), by element id.
    EnumValue(ElementId),
    /// The current state of a state machine, by element id.
    State(ElementId),
    /// A structure instance; fields keep the structure's element order.
    Structure {
        ty: ElementId,
        fields: IndexMap<String, Value>,
    },
    List(Vec<Value>),
}

impl Value {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Double(_))
    }

    /// Numeric-aware equality: `Int(1)` equals `Double(1.0)`.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Double(b)) | (Value::Double(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_equals(y))
            }
            (
                Value::Structure { ty: ta, fields: fa },
                Value::Structure { ty: tb, fields: fb },
            ) => {
                ta == tb
                    && fa.len() == fb.len()
                    && fa
                        .iter()
                        .all(|(k, v)| fb.get(k).is_some_and(|w| v.loosely_equals(w)))
            }
            _ => self == other,
        }
    }

    /// Field of a structure value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Structure { fields, .. } => fields.get(name),
            _ => None,
        }
    }

    /// Mutable field of a structure value.
    pub fn field_mut(&mut self, name: &str) -> Option<&mut Value> {
        match self {
            Value::Structure { fields, .. } => fields.get_mut(name),
            _ => None,
        }
    }

    /// Render the value using element names from `model`.
    pub fn display<'a>(&'a self, model: &'a Model) -> ValueDisplay<'a> {
        ValueDisplay { value: self, model }
    }
}

/// Formats a [`Value`] with element names resolved against a model.
pub struct ValueDisplay<'a> {
    value: &'a Value,
    model: &'a Model,
}

impl fmt::Display for ValueDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Double(d) => {
                if d.fract() == 0.0 && d.is_finite() {
                    write!(f, "{d:.1}")
                } else {
                    write!(f, "{d}")
                }
            }
            Value::String(s) => write!(f, "'{s}'"),
            Value::EnumValue(id) | Value::State(id) => {
                write!(f, "{}", self.model.qualified_name(*id))
            }
            Value::Structure { ty, fields } => {
                write!(f, "{} {{ ", self.model.qualified_name(*ty))?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name} => {}", value.display(self.model))?;
                }
                write!(f, " }}")
            }
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item.display(self.model))?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_views() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Double(2.5).as_f64(), Some(2.5));
        assert_eq!(Value::Bool(true).as_f64(), None);
    }

    #[test]
    fn loose_equality_crosses_numeric_kinds() {
        assert!(Value::Int(1).loosely_equals(&Value::Double(1.0)));
        assert!(!Value::Int(1).loosely_equals(&Value::Double(1.5)));
        assert!(Value::List(vec![Value::Int(2)]).loosely_equals(&Value::List(vec![Value::Double(2.0)])));
        assert!(!Value::Int(1).loosely_equals(&Value::Bool(true)));
    }

    #[test]
    fn display_without_model_elements() {
        let model = Model::new();
        let v = Value::List(vec![Value::Int(1), Value::Double(2.0), Value::Bool(true)]);
        assert_eq!(v.display(&model).to_string(), "[1, 2.0, True]");
    }
}
