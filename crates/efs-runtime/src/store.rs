//! The variable store: current values of all variables.

use std::collections::BTreeMap;

use efs_core::element::{ElementId, KindTag};
use efs_core::model::Model;
use efs_core::types::{Type, TypeEnv};
use efs_core::value::Value;
use indexmap::IndexMap;
use sha2::{Digest, Sha256};

/// A variable, or a field path inside a structure-valued variable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    pub variable: ElementId,
    pub fields: Vec<String>,
}

impl Location {
    pub fn variable(variable: ElementId) -> Self {
        Self {
            variable,
            fields: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Location {
        let mut fields = self.fields.clone();
        fields.push(name.to_string());
        Location {
            variable: self.variable,
            fields,
        }
    }

    /// The enclosing location, if this is a field.
    pub fn parent(&self) -> Option<Location> {
        let mut fields = self.fields.clone();
        fields.pop()?;
        Some(Location {
            variable: self.variable,
            fields,
        })
    }

    /// Type stored at this location.
    pub fn type_in(&self, env: &TypeEnv<'_>) -> Type {
        let mut ty = env.type_of(self.variable);
        for name in &self.fields {
            ty = match ty {
                Type::Structure(s) => env
                    .structure_elements(s)
                    .into_iter()
                    .find(|e| env.model.name(*e) == name)
                    .map(|e| env.type_of(e))
                    .unwrap_or(Type::Unknown),
                _ => Type::Unknown,
            };
        }
        ty
    }
}

/// Values by variable name, for display and fingerprinting.
pub type Snapshot = BTreeMap<String, Value>;

pub(crate) fn value_at<'v>(mut value: &'v Value, fields: &[String]) -> Option<&'v Value> {
    for name in fields {
        value = value.field(name)?;
    }
    Some(value)
}

pub(crate) fn value_at_mut<'v>(mut value: &'v mut Value, fields: &[String]) -> Option<&'v mut Value> {
    for name in fields {
        value = value.field_mut(name)?;
    }
    Some(value)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableStore {
    values: BTreeMap<ElementId, Value>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, variable: ElementId) -> Option<&Value> {
        self.values.get(&variable)
    }

    pub fn read(&self, location: &Location) -> Option<&Value> {
        value_at(self.values.get(&location.variable)?, &location.fields)
    }

    pub fn set(&mut self, variable: ElementId, value: Value) {
        self.values.insert(variable, value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ElementId, &Value)> {
        self.values.iter().map(|(id, v)| (*id, v))
    }

    /// Bring the store in line with the model: drop values of variables that
    /// no longer exist and rebuild values whose type changed shape. Returns
    /// the variables that still need an initial value, in declaration order.
    pub fn materialize(&mut self, env: &TypeEnv<'_>) -> Vec<ElementId> {
        let model = env.model;
        let variables = variables(model);
        self.values
            .retain(|id, _| model.tag(*id) == Some(KindTag::Variable));

        let mut missing = Vec::new();
        for id in variables {
            let ty = env.type_of(id);
            match self.values.get_mut(&id) {
                None => missing.push(id),
                Some(value) if !ty.accepts(env, value) => {
                    let old = std::mem::replace(value, Value::Bool(false));
                    *value = reshape(env, &ty, old);
                }
                Some(_) => {}
            }
        }
        missing
    }

    /// Values keyed by qualified variable name.
    pub fn snapshot(&self, model: &Model) -> Snapshot {
        self.values
            .iter()
            .map(|(id, v)| (model.qualified_name(*id), v.clone()))
            .collect()
    }

    /// SHA-256 over the JSON form of the snapshot, as hex.
    pub fn fingerprint(&self, model: &Model) -> String {
        let json = serde_json::to_vec(&self.snapshot(model)).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&json);
        let digest: [u8; 32] = hasher.finalize().into();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// All variables of the model in declaration order.
pub fn variables(model: &Model) -> Vec<ElementId> {
    model
        .ids_in_order()
        .into_iter()
        .filter(|id| model.tag(*id) == Some(KindTag::Variable))
        .collect()
}

/// Convert `old` to a value of `ty`, keeping whatever still fits: structure
/// fields with the same name and acceptable values survive.
fn reshape(env: &TypeEnv<'_>, ty: &Type, old: Value) -> Value {
    if ty.accepts(env, &old) {
        return old;
    }
    match (ty, old) {
        (Type::Structure(s), Value::Structure { fields: mut old_fields, .. }) => {
            let mut fields = IndexMap::new();
            for element in env.structure_elements(*s) {
                let name = env.model.name(element).to_string();
                let element_type = env.type_of(element);
                let value = match old_fields.shift_remove(&name) {
                    Some(v) => reshape(env, &element_type, v),
                    None => element_type.default_value(env),
                };
                fields.insert(name, value);
            }
            Value::Structure { ty: *s, fields }
        }
        (_, old) => {
            let coerced = ty.coerce(env.model, old);
            if ty.accepts(env, &coerced) {
                coerced
            } else {
                ty.default_value(env)
            }
        }
    }
}
