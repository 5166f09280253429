//! The model arena: elements keyed by id, ordered children, id back-references.
//!
//! All structural edits go through [`Model`] methods so that the invariants
//! (per-kind unique names, valid containment, acyclic parent chain) hold and
//! the revision counters stay meaningful to the compiler.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::element::{Element, ElementId, ElementKind, KindTag};
use crate::error::{ModelError, Result};
use crate::log::{Level, Message, Origin};

/// The element tree of a specification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Model {
    elements: HashMap<ElementId, Element>,
    roots: Vec<ElementId>,
    #[serde(skip)]
    revision: u64,
    #[serde(skip)]
    binding_revision: u64,
}

impl Model {
    /// Create an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every edit bumps this counter.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Bumped by edits that may change what a name resolves to (add, remove,
    /// type or text changes). Renames and moves keep id-based references
    /// valid and leave it untouched.
    pub fn binding_revision(&self) -> u64 {
        self.binding_revision
    }

    fn touch(&mut self, affects_bindings: bool) {
        self.revision += 1;
        if affects_bindings {
            self.binding_revision += 1;
        }
    }

    // --- Queries ---

    pub fn get(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(&id)
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.elements.contains_key(&id)
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Root namespaces in declaration order.
    pub fn roots(&self) -> &[ElementId] {
        &self.roots
    }

    pub fn children(&self, id: ElementId) -> &[ElementId] {
        self.elements
            .get(&id)
            .map(|e| e.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn parent(&self, id: ElementId) -> Option<ElementId> {
        self.elements.get(&id).and_then(|e| e.parent)
    }

    pub fn name(&self, id: ElementId) -> &str {
        self.elements.get(&id).map(|e| e.name.as_str()).unwrap_or("")
    }

    pub fn tag(&self, id: ElementId) -> Option<KindTag> {
        self.elements.get(&id).map(|e| e.tag())
    }

    /// Child of `parent` with the given name and kind.
    pub fn find_child(&self, parent: ElementId, name: &str, tag: KindTag) -> Option<ElementId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|c| self.elements.get(c).is_some_and(|e| e.name == name && e.tag() == tag))
    }

    /// Children of `parent` named `name`, any kind, in declaration order.
    pub fn children_named(&self, parent: ElementId, name: &str) -> Vec<ElementId> {
        self.children(parent)
            .iter()
            .copied()
            .filter(|c| self.elements.get(c).is_some_and(|e| e.name == name))
            .collect()
    }

    /// Ancestors of `id`, nearest first, excluding `id`. Stops on a cycle.
    pub fn ancestors(&self, id: ElementId) -> Vec<ElementId> {
        let mut out = Vec::new();
        let mut seen = HashSet::from([id]);
        let mut current = self.parent(id);
        while let Some(p) = current {
            if !seen.insert(p) {
                break;
            }
            out.push(p);
            current = self.parent(p);
        }
        out
    }

    /// Nearest ancestor (or `id` itself) whose kind satisfies `pred`.
    pub fn enclosing(&self, id: ElementId, pred: impl Fn(KindTag) -> bool) -> Option<ElementId> {
        if self.tag(id).is_some_and(&pred) {
            return Some(id);
        }
        self.ancestors(id)
            .into_iter()
            .find(|a| self.tag(*a).is_some_and(&pred))
    }

    /// Whether `ancestor` is `id` or one of its ancestors.
    pub fn is_ancestor_or_self(&self, ancestor: ElementId, id: ElementId) -> bool {
        ancestor == id || self.ancestors(id).contains(&ancestor)
    }

    /// Dotted name from the root, e.g. `Kernel.Speed.Max`.
    pub fn qualified_name(&self, id: ElementId) -> String {
        let mut parts: Vec<&str> = self
            .ancestors(id)
            .iter()
            .rev()
            .map(|a| self.name(*a))
            .collect();
        parts.push(self.name(id));
        parts.join(".")
    }

    /// Look up an element by its qualified name, following the first child
    /// of any kind at each step.
    pub fn lookup(&self, qualified: &str) -> Option<ElementId> {
        let mut parts = qualified.split('.');
        let first = parts.next()?;
        let mut current = self
            .roots
            .iter()
            .copied()
            .find(|r| self.name(*r) == first)?;
        for part in parts {
            current = self.children_named(current, part).into_iter().next()?;
        }
        Some(current)
    }

    /// Pre-order traversal of the subtree rooted at `id` in declaration order.
    /// Each element is visited at most once even if the arena is corrupted.
    pub fn walk_from(&self, id: ElementId, visit: &mut impl FnMut(&Element)) {
        let mut seen = HashSet::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if !seen.insert(next) {
                continue;
            }
            let Some(element) = self.elements.get(&next) else {
                continue;
            };
            visit(element);
            stack.extend(element.children.iter().rev().copied());
        }
    }

    /// Pre-order traversal of the whole model in declaration order.
    pub fn walk(&self, visit: &mut impl FnMut(&Element)) {
        for root in &self.roots {
            self.walk_from(*root, visit);
        }
    }

    /// Ids of the subtree rooted at `id` (pre-order, including `id`).
    pub fn descendants(&self, id: ElementId) -> Vec<ElementId> {
        let mut out = Vec::new();
        self.walk_from(id, &mut |e| out.push(e.id));
        out
    }

    /// All element ids in declaration order.
    pub fn ids_in_order(&self) -> Vec<ElementId> {
        let mut out = Vec::with_capacity(self.elements.len());
        self.walk(&mut |e| out.push(e.id));
        out
    }

    /// Verify that the parent chain is acyclic and parent/child links agree.
    pub fn check_hierarchy(&self) -> Result<()> {
        let limit = self.elements.len();
        for element in self.elements.values() {
            let mut steps = 0;
            let mut current = element.parent;
            while let Some(p) = current {
                steps += 1;
                if steps > limit || p == element.id {
                    return Err(ModelError::CyclicHierarchy(element.id));
                }
                current = self.parent(p);
            }
            for child in &element.children {
                match self.elements.get(child) {
                    Some(c) if c.parent == Some(element.id) => {}
                    _ => return Err(ModelError::CyclicHierarchy(*child)),
                }
            }
        }
        Ok(())
    }

    // --- Edits ---

    fn validate_name(name: &str) -> Result<()> {
        let mut chars = name.chars();
        let valid_start = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            Ok(())
        } else {
            Err(ModelError::InvalidName(name.to_string()))
        }
    }

    fn check_unique(&self, parent: ElementId, name: &str, tag: KindTag, except: Option<ElementId>) -> Result<()> {
        let clash = self.children(parent).iter().any(|c| {
            Some(*c) != except
                && self
                    .elements
                    .get(c)
                    .is_some_and(|e| e.name == name && e.tag() == tag)
        });
        if clash {
            return Err(ModelError::DuplicateName {
                parent,
                kind: tag,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Insert a root namespace.
    pub fn add_root(&mut self, mut element: Element) -> Result<ElementId> {
        if element.tag() != KindTag::NameSpace {
            return Err(ModelError::InvalidRoot(element.tag()));
        }
        Self::validate_name(&element.name)?;
        let clash = self.roots.iter().any(|r| self.name(*r) == element.name);
        if clash {
            return Err(ModelError::DuplicateName {
                parent: uuid::Uuid::nil(),
                kind: KindTag::NameSpace,
                name: element.name,
            });
        }
        let id = element.id;
        element.parent = None;
        element.children.clear();
        self.roots.push(id);
        self.elements.insert(id, element);
        self.touch(true);
        Ok(id)
    }

    /// Insert `element` as the last child of `parent`.
    pub fn add(&mut self, parent: ElementId, mut element: Element) -> Result<ElementId> {
        let parent_kind = self
            .elements
            .get(&parent)
            .map(|p| p.kind.clone())
            .ok_or(ModelError::NotFound(parent))?;
        let tag = element.tag();
        if !parent_kind.accepts_child(tag) {
            return Err(ModelError::InvalidContainment {
                parent: parent_kind.tag(),
                child: tag,
            });
        }
        Self::validate_name(&element.name)?;
        self.check_unique(parent, &element.name, tag, None)?;

        let id = element.id;
        element.parent = Some(parent);
        element.children.clear();
        self.elements.insert(id, element);
        if let Some(p) = self.elements.get_mut(&parent) {
            p.children.push(id);
        }
        self.touch(true);
        Ok(id)
    }

    /// Remove an element and its whole subtree.
    pub fn remove(&mut self, id: ElementId) -> Result<Element> {
        if !self.elements.contains_key(&id) {
            return Err(ModelError::NotFound(id));
        }
        let subtree = self.descendants(id);
        match self.parent(id) {
            Some(parent) => {
                if let Some(p) = self.elements.get_mut(&parent) {
                    p.children.retain(|c| *c != id);
                }
            }
            None => self.roots.retain(|r| *r != id),
        }
        let mut removed = None;
        for d in subtree {
            let element = self.elements.remove(&d);
            if d == id {
                removed = element;
            }
        }
        self.touch(true);
        removed.ok_or(ModelError::NotFound(id))
    }

    /// Change the simple name of an element. Returns the previous name.
    pub fn rename(&mut self, id: ElementId, new_name: &str) -> Result<String> {
        Self::validate_name(new_name)?;
        let (tag, parent) = {
            let e = self.elements.get(&id).ok_or(ModelError::NotFound(id))?;
            (e.tag(), e.parent)
        };
        match parent {
            Some(parent) => self.check_unique(parent, new_name, tag, Some(id))?,
            None => {
                if self
                    .roots
                    .iter()
                    .any(|r| *r != id && self.name(*r) == new_name)
                {
                    return Err(ModelError::DuplicateName {
                        parent: uuid::Uuid::nil(),
                        kind: tag,
                        name: new_name.to_string(),
                    });
                }
            }
        }
        let element = self.elements.get_mut(&id).ok_or(ModelError::NotFound(id))?;
        let old = std::mem::replace(&mut element.name, new_name.to_string());
        self.touch(false);
        Ok(old)
    }

    /// Move an element (with its subtree) to the end of `new_parent`'s children.
    pub fn relocate(&mut self, id: ElementId, new_parent: ElementId) -> Result<()> {
        let (tag, name, old_parent) = {
            let e = self.elements.get(&id).ok_or(ModelError::NotFound(id))?;
            (e.tag(), e.name.clone(), e.parent)
        };
        let parent_kind = self
            .elements
            .get(&new_parent)
            .map(|p| p.kind.clone())
            .ok_or(ModelError::NotFound(new_parent))?;
        if self.is_ancestor_or_self(id, new_parent) {
            return Err(ModelError::CyclicMove {
                element: id,
                target: new_parent,
            });
        }
        if !parent_kind.accepts_child(tag) {
            return Err(ModelError::InvalidContainment {
                parent: parent_kind.tag(),
                child: tag,
            });
        }
        if old_parent == Some(new_parent) {
            return Ok(());
        }
        self.check_unique(new_parent, &name, tag, Some(id))?;

        match old_parent {
            Some(p) => {
                if let Some(p) = self.elements.get_mut(&p) {
                    p.children.retain(|c| *c != id);
                }
            }
            None => self.roots.retain(|r| *r != id),
        }
        if let Some(p) = self.elements.get_mut(&new_parent) {
            p.children.push(id);
        }
        if let Some(e) = self.elements.get_mut(&id) {
            e.parent = Some(new_parent);
        }
        self.touch(false);
        Ok(())
    }

    /// Replace the expression or statement text owned by `id`.
    pub fn set_slot_text(&mut self, id: ElementId, text: &str) -> Result<()> {
        let element = self.elements.get_mut(&id).ok_or(ModelError::NotFound(id))?;
        if !element.kind.set_slot_text(text) {
            return Err(ModelError::NoSlot(id));
        }
        self.touch(true);
        Ok(())
    }

    /// Rewrite slot text without invalidating bindings. Used by refactoring,
    /// where the new text denotes the same elements as the old one.
    pub fn rewrite_slot_text(&mut self, id: ElementId, text: &str) -> Result<()> {
        let element = self.elements.get_mut(&id).ok_or(ModelError::NotFound(id))?;
        if !element.kind.set_slot_text(text) {
            return Err(ModelError::NoSlot(id));
        }
        self.touch(false);
        Ok(())
    }

    /// Apply an edit to an element's kind payload (type names, bounds, ...).
    /// The kind itself must not change.
    pub fn update_kind(&mut self, id: ElementId, edit: impl FnOnce(&mut ElementKind)) -> Result<()> {
        let element = self.elements.get_mut(&id).ok_or(ModelError::NotFound(id))?;
        let before = element.tag();
        let mut kind = element.kind.clone();
        edit(&mut kind);
        if kind.tag() != before {
            return Err(ModelError::InvalidContainment {
                parent: before,
                child: kind.tag(),
            });
        }
        element.kind = kind;
        self.touch(true);
        Ok(())
    }

    pub fn set_comment(&mut self, id: ElementId, comment: Option<&str>) -> Result<()> {
        let element = self.elements.get_mut(&id).ok_or(ModelError::NotFound(id))?;
        element.comment = comment.map(str::to_string);
        self.touch(false);
        Ok(())
    }

    // --- Element log ---

    pub fn messages(&self, id: ElementId) -> &[Message] {
        self.elements
            .get(&id)
            .map(|e| e.messages.as_slice())
            .unwrap_or(&[])
    }

    pub fn add_message(&mut self, id: ElementId, message: Message) {
        if let Some(e) = self.elements.get_mut(&id) {
            e.messages.push(message);
        }
    }

    /// Drop the messages of one origin from a single element.
    pub fn clear_messages(&mut self, id: ElementId, origin: Origin) {
        if let Some(e) = self.elements.get_mut(&id) {
            e.messages.retain(|m| m.origin != origin);
        }
    }

    /// Drop the messages of one origin from every element.
    pub fn clear_all_messages(&mut self, origin: Origin) {
        for e in self.elements.values_mut() {
            e.messages.retain(|m| m.origin != origin);
        }
    }

    /// Highest message level in the subtree of `id`, used to highlight the
    /// path from a root to the elements carrying diagnostics.
    pub fn message_path_info(&self, id: ElementId) -> Option<Level> {
        let mut highest = None;
        self.walk_from(id, &mut |e| {
            for m in &e.messages {
                highest = highest.max(Some(m.level));
            }
        });
        highest
    }

    /// Every (element, message) pair in declaration order.
    pub fn all_messages(&self) -> Vec<(ElementId, &Message)> {
        let mut out = Vec::new();
        for id in self.ids_in_order() {
            for m in self.messages(id) {
                out.push((id, m));
            }
        }
        out
    }

    /// Number of error-level messages in the model.
    pub fn error_count(&self) -> usize {
        self.elements
            .values()
            .flat_map(|e| e.messages.iter())
            .filter(|m| m.level == Level::Error)
            .count()
    }

    /// Used by tests that need to corrupt the arena.
    #[cfg(test)]
    pub(crate) fn force_parent(&mut self, id: ElementId, parent: ElementId) {
        if let Some(e) = self.elements.get_mut(&id) {
            e.parent = Some(parent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Mode, Precision, RulePriority, TypedSlot};
    use crate::log::ErrorKind;

    fn namespace(model: &mut Model, name: &str) -> ElementId {
        model
            .add_root(Element::new(name, ElementKind::NameSpace))
            .unwrap()
    }

    fn variable(model: &mut Model, parent: ElementId, name: &str) -> ElementId {
        model
            .add(
                parent,
                Element::new(name, ElementKind::Variable(TypedSlot::new("Integer", Mode::Internal))),
            )
            .unwrap()
    }

    #[test]
    fn add_and_lookup() {
        let mut m = Model::new();
        let n = namespace(&mut m, "N");
        let v = variable(&mut m, n, "v");
        assert_eq!(m.lookup("N.v"), Some(v));
        assert_eq!(m.qualified_name(v), "N.v");
        assert_eq!(m.parent(v), Some(n));
        assert_eq!(m.children(n), &[v]);
    }

    #[test]
    fn duplicate_name_same_kind_rejected() {
        let mut m = Model::new();
        let n = namespace(&mut m, "N");
        variable(&mut m, n, "v");
        let dup = m.add(
            n,
            Element::new("v", ElementKind::Variable(TypedSlot::new("Integer", Mode::Internal))),
        );
        assert!(matches!(dup, Err(ModelError::DuplicateName { .. })));
    }

    #[test]
    fn same_name_different_kind_allowed() {
        let mut m = Model::new();
        let n = namespace(&mut m, "N");
        variable(&mut m, n, "X");
        let range = m.add(
            n,
            Element::new(
                "X",
                ElementKind::Range {
                    min: 0.0,
                    max: 1.0,
                    precision: Precision::Integer,
                },
            ),
        );
        assert!(range.is_ok());
        assert_eq!(m.children_named(n, "X").len(), 2);
    }

    #[test]
    fn invalid_containment_rejected() {
        let mut m = Model::new();
        let n = namespace(&mut m, "N");
        let action = m.add(
            n,
            Element::new(
                "a",
                ElementKind::Action {
                    statement: "x <- 1".into(),
                },
            ),
        );
        assert!(matches!(action, Err(ModelError::InvalidContainment { .. })));
    }

    #[test]
    fn remove_drops_subtree() {
        let mut m = Model::new();
        let n = namespace(&mut m, "N");
        let inner = m.add(n, Element::new("Inner", ElementKind::NameSpace)).unwrap();
        let v = variable(&mut m, inner, "v");
        m.remove(inner).unwrap();
        assert!(!m.contains(v));
        assert!(m.children(n).is_empty());
    }

    #[test]
    fn rename_keeps_binding_revision() {
        let mut m = Model::new();
        let n = namespace(&mut m, "N");
        let v = variable(&mut m, n, "v");
        let before = m.binding_revision();
        let old = m.rename(v, "w").unwrap();
        assert_eq!(old, "v");
        assert_eq!(m.binding_revision(), before);
        assert!(m.revision() > before);
        assert_eq!(m.lookup("N.w"), Some(v));
    }

    #[test]
    fn relocate_into_descendant_rejected() {
        let mut m = Model::new();
        let n = namespace(&mut m, "N");
        let a = m.add(n, Element::new("A", ElementKind::NameSpace)).unwrap();
        let b = m.add(a, Element::new("B", ElementKind::NameSpace)).unwrap();
        assert!(matches!(m.relocate(a, b), Err(ModelError::CyclicMove { .. })));
        assert!(matches!(m.relocate(a, a), Err(ModelError::CyclicMove { .. })));
    }

    #[test]
    fn relocate_moves_subtree() {
        let mut m = Model::new();
        let n = namespace(&mut m, "N");
        let a = m.add(n, Element::new("A", ElementKind::NameSpace)).unwrap();
        let b = m.add(n, Element::new("B", ElementKind::NameSpace)).unwrap();
        let v = variable(&mut m, a, "v");
        m.relocate(v, b).unwrap();
        assert_eq!(m.qualified_name(v), "N.B.v");
        assert!(m.children(a).is_empty());
    }

    #[test]
    fn sub_rule_cannot_contain_its_ancestor() {
        let mut m = Model::new();
        let n = namespace(&mut m, "N");
        let rule = m
            .add(
                n,
                Element::new(
                    "R",
                    ElementKind::Rule {
                        priority: RulePriority::Processing,
                    },
                ),
            )
            .unwrap();
        let cond = m.add(rule, Element::new("C", ElementKind::RuleCondition)).unwrap();
        let sub = m
            .add(
                cond,
                Element::new(
                    "Sub",
                    ElementKind::Rule {
                        priority: RulePriority::Processing,
                    },
                ),
            )
            .unwrap();
        let sub_cond = m.add(sub, Element::new("C", ElementKind::RuleCondition)).unwrap();
        assert!(matches!(m.relocate(rule, sub_cond), Err(ModelError::CyclicMove { .. })));
    }

    #[test]
    fn corrupted_hierarchy_detected() {
        let mut m = Model::new();
        let n = namespace(&mut m, "N");
        let a = m.add(n, Element::new("A", ElementKind::NameSpace)).unwrap();
        let b = m.add(a, Element::new("B", ElementKind::NameSpace)).unwrap();
        m.force_parent(a, b);
        assert!(matches!(m.check_hierarchy(), Err(ModelError::CyclicHierarchy(_))));
        // Traversal still terminates.
        assert!(m.ancestors(b).len() <= 2);
    }

    #[test]
    fn message_path_info_aggregates_subtree() {
        let mut m = Model::new();
        let n = namespace(&mut m, "N");
        let v = variable(&mut m, n, "v");
        assert_eq!(m.message_path_info(n), None);
        m.add_message(v, Message::warning(Origin::Analysis, "unused"));
        m.add_message(
            v,
            Message::error(ErrorKind::TypeMismatch, Origin::Analysis, "bad"),
        );
        assert_eq!(m.message_path_info(n), Some(Level::Error));
        m.clear_messages(v, Origin::Analysis);
        assert_eq!(m.message_path_info(n), None);
    }

    #[test]
    fn serde_round_trip_preserves_tree() {
        let mut m = Model::new();
        let n = namespace(&mut m, "N");
        let v = variable(&mut m, n, "v");
        let json = serde_json::to_string(&m).unwrap();
        let back: Model = serde_json::from_str(&json).unwrap();
        assert_eq!(back.lookup("N.v"), Some(v));
        assert!(back.check_hierarchy().is_ok());
    }
}
