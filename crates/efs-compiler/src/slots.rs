//! Parsed and bound trees of every expression and statement slot.
//!
//! The model stores slot text only; the compiler keeps the trees here, keyed
//! by the id of the owning element.

use std::collections::{BTreeMap, HashSet};

use efs_core::element::{ElementId, SlotKind};
use efs_core::types::Type;
use efs_lang::{Expression, Statement};

/// The parsed form of a slot.
#[derive(Debug, Clone)]
pub enum SlotTree {
    Expression(Expression),
    Statement(Statement),
    /// The text did not parse.
    Invalid,
}

/// One compiled slot.
#[derive(Debug, Clone)]
pub struct Slot {
    pub kind: SlotKind,
    /// The text the tree was parsed from.
    pub text: String,
    pub tree: SlotTree,
    /// Elements the tree is bound to.
    pub references: HashSet<ElementId>,
    /// Inferred type of an expression slot.
    pub ty: Option<Type>,
    /// Whether analysis reported an error for this slot.
    pub has_errors: bool,
}

impl Slot {
    pub fn expression(&self) -> Option<&Expression> {
        match &self.tree {
            SlotTree::Expression(e) if !self.has_errors => Some(e),
            _ => None,
        }
    }

    pub fn statement(&self) -> Option<&Statement> {
        match &self.tree {
            SlotTree::Statement(s) if !self.has_errors => Some(s),
            _ => None,
        }
    }
}

/// All compiled slots, with the slot-to-reference dependency index.
#[derive(Debug, Clone, Default)]
pub struct SlotTable {
    slots: BTreeMap<ElementId, Slot>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, owner: ElementId) -> Option<&Slot> {
        self.slots.get(&owner)
    }

    pub fn get_mut(&mut self, owner: ElementId) -> Option<&mut Slot> {
        self.slots.get_mut(&owner)
    }

    /// Bound expression of an error-free expression slot.
    pub fn expression(&self, owner: ElementId) -> Option<&Expression> {
        self.slots.get(&owner).and_then(Slot::expression)
    }

    /// Bound statement of an error-free statement slot.
    pub fn statement(&self, owner: ElementId) -> Option<&Statement> {
        self.slots.get(&owner).and_then(Slot::statement)
    }

    pub fn insert(&mut self, owner: ElementId, slot: Slot) {
        self.slots.insert(owner, slot);
    }

    pub fn remove(&mut self, owner: ElementId) -> Option<Slot> {
        self.slots.remove(&owner)
    }

    pub fn retain(&mut self, keep: impl Fn(ElementId) -> bool) {
        self.slots.retain(|id, _| keep(*id));
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn owners(&self) -> impl Iterator<Item = ElementId> + '_ {
        self.slots.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ElementId, &Slot)> {
        self.slots.iter().map(|(id, slot)| (*id, slot))
    }

    /// Owners of slots that reference any of `targets`.
    pub fn referencing(&self, targets: &HashSet<ElementId>) -> Vec<ElementId> {
        self.slots
            .iter()
            .filter(|(_, slot)| !slot.references.is_disjoint(targets))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Number of slots that failed to parse or analyse.
    pub fn error_count(&self) -> usize {
        self.slots.values().filter(|s| s.has_errors).count()
    }
}
