//! Model construction API for building specifications programmatically.
//!
//! # Example
//!
//! ```rust
//! use efs_core::builder::ModelBuilder;
//! use efs_core::element::{Mode, RulePriority};
//!
//! let mut b = ModelBuilder::new();
//! let n = b.namespace("N").unwrap();
//! b.range(n, "R", 0.0, 10.0).unwrap();
//! b.variable(n, "v", "R", Mode::Internal, Some("0")).unwrap();
//! let rule = b.rule(n, "Increment", RulePriority::Processing).unwrap();
//! let cond = b.condition(rule, "Always").unwrap();
//! b.pre_condition(cond, "True").unwrap();
//! b.action(cond, "v <- v + 1").unwrap();
//!
//! let model = b.build();
//! assert!(model.lookup("N.v").is_some());
//! ```

use crate::element::{
    Element, ElementId, ElementKind, Interpolation, Mode, Precision, RulePriority, TypedSlot,
};
use crate::error::Result;
use crate::model::Model;

/// A builder for constructing EFS models.
///
/// Names of generated children (pre-conditions, actions, cases) are derived
/// from their position so callers only name the declarations they reference.
pub struct ModelBuilder {
    model: Model,
}

impl ModelBuilder {
    /// Create a new empty builder.
    pub fn new() -> Self {
        Self {
            model: Model::new(),
        }
    }

    /// Continue building on an existing model.
    pub fn from_model(model: Model) -> Self {
        Self { model }
    }

    /// Access the model under construction.
    pub fn model(&self) -> &Model {
        &self.model
    }

    fn add(&mut self, parent: ElementId, name: &str, kind: ElementKind) -> Result<ElementId> {
        self.model.add(parent, Element::new(name, kind))
    }

    fn positional_name(&self, parent: ElementId, prefix: &str) -> String {
        format!("{prefix}{}", self.model.children(parent).len() + 1)
    }

    /// Add a root namespace.
    pub fn namespace(&mut self, name: &str) -> Result<ElementId> {
        self.model.add_root(Element::new(name, ElementKind::NameSpace))
    }

    /// Add a nested namespace.
    pub fn sub_namespace(&mut self, parent: ElementId, name: &str) -> Result<ElementId> {
        self.add(parent, name, ElementKind::NameSpace)
    }

    /// Add an integer range `[min, max]`.
    pub fn range(&mut self, parent: ElementId, name: &str, min: f64, max: f64) -> Result<ElementId> {
        self.range_with_precision(parent, name, min, max, Precision::Integer)
    }

    pub fn range_with_precision(
        &mut self,
        parent: ElementId,
        name: &str,
        min: f64,
        max: f64,
        precision: Precision,
    ) -> Result<ElementId> {
        self.add(
            parent,
            name,
            ElementKind::Range {
                min,
                max,
                precision,
            },
        )
    }

    /// Add a named special value to a range.
    pub fn special_value(&mut self, range: ElementId, name: &str, value: f64) -> Result<ElementId> {
        self.add(range, name, ElementKind::EnumValue { value: Some(value) })
    }

    /// Add an enum with the given values.
    pub fn enumeration(&mut self, parent: ElementId, name: &str, values: &[&str]) -> Result<ElementId> {
        let id = self.add(parent, name, ElementKind::Enum)?;
        for value in values {
            self.add(id, value, ElementKind::EnumValue { value: None })?;
        }
        Ok(id)
    }

    pub fn structure(&mut self, parent: ElementId, name: &str) -> Result<ElementId> {
        self.add(parent, name, ElementKind::Structure { interfaces: vec![] })
    }

    /// Declare that `structure` implements the named interface structure.
    pub fn implements(&mut self, structure: ElementId, interface: &str) -> Result<()> {
        self.model.update_kind(structure, |kind| {
            if let ElementKind::Structure { interfaces } = kind {
                interfaces.push(interface.to_string());
            }
        })
    }

    pub fn element(
        &mut self,
        structure: ElementId,
        name: &str,
        type_name: &str,
        mode: Mode,
    ) -> Result<ElementId> {
        self.add(
            structure,
            name,
            ElementKind::StructureElement(TypedSlot::new(type_name, mode)),
        )
    }

    pub fn collection(
        &mut self,
        parent: ElementId,
        name: &str,
        element_type: &str,
        max_size: usize,
    ) -> Result<ElementId> {
        self.add(
            parent,
            name,
            ElementKind::Collection {
                element_type: element_type.to_string(),
                max_size,
            },
        )
    }

    /// Add a state machine with the given states; the first is initial.
    pub fn state_machine(&mut self, parent: ElementId, name: &str, states: &[&str]) -> Result<ElementId> {
        let initial_state = states.first().copied().unwrap_or_default().to_string();
        let id = self.add(parent, name, ElementKind::StateMachine { initial_state })?;
        for state in states {
            self.add(id, state, ElementKind::State)?;
        }
        Ok(id)
    }

    pub fn variable(
        &mut self,
        parent: ElementId,
        name: &str,
        type_name: &str,
        mode: Mode,
        default: Option<&str>,
    ) -> Result<ElementId> {
        let mut slot = TypedSlot::new(type_name, mode);
        slot.default = default.map(str::to_string);
        self.add(parent, name, ElementKind::Variable(slot))
    }

    pub fn function(
        &mut self,
        parent: ElementId,
        name: &str,
        return_type: &str,
        cacheable: bool,
    ) -> Result<ElementId> {
        self.add(
            parent,
            name,
            ElementKind::Function {
                return_type: return_type.to_string(),
                cacheable,
                interpolation: None,
            },
        )
    }

    /// Attach a graph or surface to a function without cases.
    pub fn interpolation(&mut self, function: ElementId, interpolation: Interpolation) -> Result<()> {
        self.model.update_kind(function, |kind| {
            if let ElementKind::Function {
                interpolation: slot,
                ..
            } = kind
            {
                *slot = Some(interpolation);
            }
        })
    }

    pub fn parameter(&mut self, owner: ElementId, name: &str, type_name: &str) -> Result<ElementId> {
        self.add(
            owner,
            name,
            ElementKind::Parameter {
                type_name: type_name.to_string(),
            },
        )
    }

    /// Add a case to a function: guarded by `pre_conditions`, yielding `expression`.
    pub fn case(
        &mut self,
        function: ElementId,
        name: &str,
        pre_conditions: &[&str],
        expression: &str,
    ) -> Result<ElementId> {
        let id = self.add(
            function,
            name,
            ElementKind::Case {
                expression: expression.to_string(),
            },
        )?;
        for pre in pre_conditions {
            self.pre_condition(id, pre)?;
        }
        Ok(id)
    }

    pub fn procedure(&mut self, parent: ElementId, name: &str) -> Result<ElementId> {
        self.add(parent, name, ElementKind::Procedure)
    }

    pub fn rule(&mut self, parent: ElementId, name: &str, priority: RulePriority) -> Result<ElementId> {
        self.add(parent, name, ElementKind::Rule { priority })
    }

    pub fn condition(&mut self, rule: ElementId, name: &str) -> Result<ElementId> {
        self.add(rule, name, ElementKind::RuleCondition)
    }

    pub fn pre_condition(&mut self, owner: ElementId, expression: &str) -> Result<ElementId> {
        let name = self.positional_name(owner, "Pre");
        self.add(
            owner,
            &name,
            ElementKind::PreCondition {
                expression: expression.to_string(),
            },
        )
    }

    pub fn action(&mut self, condition: ElementId, statement: &str) -> Result<ElementId> {
        let name = self.positional_name(condition, "Act");
        self.add(
            condition,
            &name,
            ElementKind::Action {
                statement: statement.to_string(),
            },
        )
    }

    /// Convenience: a rule with a single condition holding the given
    /// pre-conditions and actions. Returns the rule id.
    pub fn simple_rule(
        &mut self,
        parent: ElementId,
        name: &str,
        priority: RulePriority,
        pre_conditions: &[&str],
        actions: &[&str],
    ) -> Result<ElementId> {
        let rule = self.rule(parent, name, priority)?;
        let cond = self.condition(rule, name)?;
        for pre in pre_conditions {
            self.pre_condition(cond, pre)?;
        }
        for action in actions {
            self.action(cond, action)?;
        }
        Ok(rule)
    }

    /// Finish building.
    pub fn build(self) -> Model {
        self.model
    }
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::KindTag;

    #[test]
    fn builds_nested_model() {
        let mut b = ModelBuilder::new();
        let n = b.namespace("N").unwrap();
        b.enumeration(n, "Colors", &["Red", "Green"]).unwrap();
        let sm = b.state_machine(n, "Modes", &["Idle", "Running"]).unwrap();
        let f = b.function(n, "F", "Integer", true).unwrap();
        b.parameter(f, "X", "Integer").unwrap();
        b.case(f, "Negative", &["X < 0"], "0 - X").unwrap();
        let rule = b
            .simple_rule(n, "R", RulePriority::Processing, &["True"], &["x <- 1", "y <- 2"])
            .unwrap();
        let model = b.build();

        assert_eq!(model.children(model.lookup("N.Colors").unwrap()).len(), 2);
        assert_eq!(model.tag(sm), Some(KindTag::StateMachine));
        let cond = model.children(rule)[0];
        let names: Vec<&str> = model.children(cond).iter().map(|c| model.name(*c)).collect();
        assert_eq!(names, vec!["Pre1", "Act2", "Act3"]);
    }
}
