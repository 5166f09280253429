//! Function definitions: parameters, interpolation and the per-cycle cache.

use std::collections::HashMap;

use efs_core::element::{ElementId, ElementKind, Interpolation, KindTag};
use efs_core::model::Model;
use efs_core::value::Value;
use tracing::trace;

use crate::error::{EvalError, EvalResult};
use crate::store::Location;

/// Parameters of a function or procedure, in declaration order.
pub fn parameters(model: &Model, callable: ElementId) -> Vec<ElementId> {
    children_tagged(model, callable, KindTag::Parameter)
}

pub(crate) fn children_tagged(model: &Model, parent: ElementId, tag: KindTag) -> Vec<ElementId> {
    model
        .children(parent)
        .iter()
        .copied()
        .filter(|c| model.tag(*c) == Some(tag))
        .collect()
}

/// Evaluate the graph or surface of `function` at the numeric arguments.
/// `Ok(None)` when the function has no interpolation.
pub(crate) fn interpolate(model: &Model, function: ElementId, args: &[Value]) -> EvalResult<Option<f64>> {
    let interpolation = match model.get(function).map(|e| &e.kind) {
        Some(ElementKind::Function {
            interpolation: Some(i),
            ..
        }) => i,
        _ => return Ok(None),
    };
    let domain = || EvalError::Domain {
        function: model.qualified_name(function),
    };
    let number = |index: usize| -> EvalResult<f64> {
        let value = args.get(index).ok_or_else(domain)?;
        value.as_f64().ok_or_else(|| EvalError::Type {
            expected: "a number",
            found: value.display(model).to_string(),
        })
    };
    let result = match interpolation {
        Interpolation::Graph(graph) => graph.evaluate(number(0)?),
        Interpolation::Surface(surface) => surface.evaluate(number(0)?, number(1)?),
    };
    result.map(Some).ok_or_else(domain)
}

/// Results of cacheable functions, keyed by function and argument tuple.
/// Cleared at the start of every cycle.
/// A call as seen by the cache: function, the `THIS` instance of the
/// caller and the serialized argument values.
pub type CallKey = (ElementId, Option<Location>, String);

#[derive(Debug, Default)]
pub struct FunctionCache {
    entries: HashMap<CallKey, Value>,
    hits: u64,
    misses: u64,
}

impl FunctionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key for a call; `None` when the arguments cannot be serialized.
    pub fn key(function: ElementId, this: Option<&Location>, args: &[Value]) -> Option<CallKey> {
        serde_json::to_string(args)
            .ok()
            .map(|s| (function, this.cloned(), s))
    }

    pub fn get(&mut self, key: &CallKey) -> Option<Value> {
        match self.entries.get(key) {
            Some(value) => {
                self.hits += 1;
                Some(value.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: CallKey, value: Value) {
        self.entries.insert(key, value);
    }

    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            trace!(entries = self.entries.len(), "function cache cleared");
        }
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use efs_core::builder::ModelBuilder;
    use efs_core::element::Graph;

    #[test]
    fn cache_counts_hits_and_misses() {
        let f = ElementId::new_v4();
        let mut cache = FunctionCache::new();
        let key = FunctionCache::key(f, None, &[Value::Int(1)]).unwrap();
        assert!(cache.get(&key).is_none());
        cache.insert(key.clone(), Value::Int(2));
        assert_eq!(cache.get(&key), Some(Value::Int(2)));
        assert_ne!(Some(key.clone()), FunctionCache::key(f, None, &[Value::Double(1.0)]));

        let instance = Location::variable(ElementId::new_v4());
        let own = FunctionCache::key(f, Some(&instance), &[Value::Int(1)]).unwrap();
        assert_ne!(own, key);
        assert!(cache.get(&own).is_none());
        assert_eq!((cache.hits(), cache.misses()), (1, 2));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn graphs_report_domain_errors() {
        let mut b = ModelBuilder::new();
        let n = b.namespace("N").unwrap();
        let f = b.function(n, "Curve", "Double", false).unwrap();
        b.parameter(f, "x", "Double").unwrap();
        b.interpolation(f, Interpolation::Graph(Graph::new(vec![(0.0, 0.0), (10.0, 100.0)])))
            .unwrap();
        let model = b.build();

        assert_eq!(interpolate(&model, f, &[Value::Double(2.5)]), Ok(Some(25.0)));
        assert!(matches!(
            interpolate(&model, f, &[Value::Int(11)]),
            Err(EvalError::Domain { .. })
        ));
        assert_eq!(parameters(&model, f).len(), 1);
    }
}
