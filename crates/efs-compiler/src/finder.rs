//! Name resolution over the model's scope chain.
//!
//! A simple name is looked up innermost scope first. At each scope the
//! declarations visible there are filtered by name and by a [`Filter`]:
//! exactly one match resolves, several matches are ambiguous, none moves on
//! to the enclosing scope. Root namespaces and then the predefined names are
//! searched last.

use efs_core::element::{ElementId, KindTag};
use efs_core::model::Model;
use efs_lang::{Builtin, Ref};
use tracing::trace;

use crate::cache::FinderCache;
use crate::error::ResolveError;

/// Restricts which declarations a lookup may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    Any,
    IsType,
    IsCallable,
    IsValue,
    IsStructure,
    IsNameSpace,
    IsStateMachineState,
}

impl Filter {
    pub fn accepts(self, tag: KindTag) -> bool {
        match self {
            Filter::Any => is_nameable(tag),
            Filter::IsType => tag.is_type(),
            Filter::IsCallable => tag.is_callable(),
            Filter::IsValue => tag.is_value(),
            Filter::IsStructure => tag == KindTag::Structure,
            Filter::IsNameSpace => tag == KindTag::NameSpace,
            Filter::IsStateMachineState => tag == KindTag::State,
        }
    }

    pub fn accepts_builtin(self, builtin: Builtin) -> bool {
        match self {
            Filter::Any => true,
            Filter::IsType => builtin.is_type(),
            Filter::IsCallable => builtin.is_function(),
            _ => false,
        }
    }

    /// The narrowest filter that accepts an element of kind `tag`.
    pub fn for_tag(tag: KindTag) -> Filter {
        match tag {
            KindTag::NameSpace => Filter::IsNameSpace,
            KindTag::Structure => Filter::IsStructure,
            KindTag::State => Filter::IsValue,
            t if t.is_callable() => Filter::IsCallable,
            t if t.is_type() => Filter::IsType,
            t if t.is_value() => Filter::IsValue,
            _ => Filter::Any,
        }
    }
}

/// Kinds that can be referenced by name at all.
fn is_nameable(tag: KindTag) -> bool {
    !matches!(
        tag,
        KindTag::Rule | KindTag::RuleCondition | KindTag::PreCondition | KindTag::Action | KindTag::Case
    )
}

/// Members reachable through `owner.name`.
pub fn member_space(model: &Model, owner: ElementId) -> Vec<ElementId> {
    let Some(owner_tag) = model.tag(owner) else {
        return Vec::new();
    };
    let keep = |tag: KindTag| match owner_tag {
        KindTag::NameSpace => is_nameable(tag),
        KindTag::Range | KindTag::Enum => tag == KindTag::EnumValue,
        KindTag::Structure => matches!(
            tag,
            KindTag::StructureElement | KindTag::Procedure | KindTag::StateMachine
        ),
        KindTag::StateMachine => tag == KindTag::State,
        KindTag::Function | KindTag::Procedure => tag == KindTag::Parameter,
        _ => false,
    };
    model
        .children(owner)
        .iter()
        .copied()
        .filter(|c| model.tag(*c).is_some_and(keep))
        .collect()
}

fn matches_in(
    model: &Model,
    candidates: impl IntoIterator<Item = ElementId>,
    name: &str,
    filter: Filter,
) -> Vec<ElementId> {
    candidates
        .into_iter()
        .filter(|c| {
            model
                .get(*c)
                .is_some_and(|e| e.name == name && filter.accepts(e.tag()))
        })
        .collect()
}

fn pick(model: &Model, name: &str, found: Vec<ElementId>) -> Option<Result<Ref, ResolveError>> {
    match found.len() {
        0 => None,
        1 => Some(Ok(Ref::Element(found[0]))),
        _ => Some(Err(ResolveError::Ambiguous {
            name: name.to_string(),
            candidates: found.iter().map(|c| model.qualified_name(*c)).collect(),
        })),
    }
}

/// Resolve `name` as seen from `scope`.
pub fn resolve(
    model: &Model,
    scope: ElementId,
    name: &str,
    filter: Filter,
    cache: &mut FinderCache,
) -> Result<Ref, ResolveError> {
    if let Some(found) = cache.lookup(scope, name, filter) {
        return found;
    }
    let result = resolve_uncached(model, scope, name, filter);
    trace!(name, ?filter, ok = result.is_ok(), "resolved name");
    cache.store(scope, name, filter, result.clone());
    result
}

fn resolve_uncached(model: &Model, scope: ElementId, name: &str, filter: Filter) -> Result<Ref, ResolveError> {
    let mut chain = vec![scope];
    chain.extend(model.ancestors(scope));
    for level in chain {
        let visible = match model.tag(level) {
            Some(KindTag::NameSpace) => model
                .children(level)
                .iter()
                .copied()
                .filter(|c| model.tag(*c).is_some_and(is_nameable))
                .collect(),
            _ => member_space(model, level),
        };
        if let Some(result) = pick(model, name, matches_in(model, visible, name, filter)) {
            return result;
        }
    }
    let roots = model.roots().iter().copied();
    if let Some(result) = pick(model, name, matches_in(model, roots, name, filter)) {
        return result;
    }
    match Builtin::from_name(name) {
        Some(builtin) if filter.accepts_builtin(builtin) => Ok(Ref::Builtin(builtin)),
        _ => Err(ResolveError::Unresolved {
            name: name.to_string(),
        }),
    }
}

/// Resolve `name` in the member space of `owner`.
pub fn resolve_member(
    model: &Model,
    owner: ElementId,
    name: &str,
    filter: Filter,
) -> Result<Ref, ResolveError> {
    let found = matches_in(model, member_space(model, owner), name, filter);
    pick(model, name, found).unwrap_or_else(|| {
        Err(ResolveError::NoMember {
            owner: model.qualified_name(owner),
            name: name.to_string(),
        })
    })
}

/// Resolve a dotted path: the head through the scope chain, the rest as
/// members. The last segment uses `last`; earlier segments accept anything
/// nameable.
pub fn resolve_path(
    model: &Model,
    scope: ElementId,
    path: &[&str],
    last: Filter,
    cache: &mut FinderCache,
) -> Result<Ref, ResolveError> {
    let Some((head, rest)) = path.split_first() else {
        return Err(ResolveError::Unresolved { name: String::new() });
    };
    let head_filter = if rest.is_empty() { last } else { Filter::Any };
    let mut current = resolve(model, scope, head, head_filter, cache)?;
    for (i, segment) in rest.iter().enumerate() {
        let filter = if i + 1 == rest.len() { last } else { Filter::Any };
        current = match current {
            Ref::Element(owner) => resolve_member(model, owner, segment, filter)?,
            _ => {
                return Err(ResolveError::NoMember {
                    owner: path[..=i].join("."),
                    name: segment.to_string(),
                })
            }
        };
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use efs_core::builder::ModelBuilder;
    use efs_core::element::{Mode, RulePriority};

    #[test]
    fn innermost_scope_wins() {
        let mut b = ModelBuilder::new();
        let n = b.namespace("N").unwrap();
        let outer = b.variable(n, "x", "Integer", Mode::Internal, None).unwrap();
        let inner_ns = b.sub_namespace(n, "Inner").unwrap();
        let inner = b.variable(inner_ns, "x", "Integer", Mode::Internal, None).unwrap();
        let rule = b
            .simple_rule(inner_ns, "R", RulePriority::Processing, &[], &["x <- 1"])
            .unwrap();
        let top_rule = b
            .simple_rule(n, "T", RulePriority::Processing, &[], &["x <- 1"])
            .unwrap();
        let model = b.build();
        let mut cache = FinderCache::new();

        let got = resolve(&model, rule, "x", Filter::IsValue, &mut cache).unwrap();
        assert_eq!(got, Ref::Element(inner));
        let got = resolve(&model, top_rule, "x", Filter::IsValue, &mut cache).unwrap();
        assert_eq!(got, Ref::Element(outer));
    }

    #[test]
    fn filter_separates_same_named_kinds() {
        let mut b = ModelBuilder::new();
        let n = b.namespace("N").unwrap();
        let var = b.variable(n, "Speed", "Integer", Mode::Internal, None).unwrap();
        let func = b.function(n, "Speed", "Integer", false).unwrap();
        let model = b.build();
        let mut cache = FinderCache::new();

        assert_eq!(
            resolve(&model, n, "Speed", Filter::IsValue, &mut cache),
            Ok(Ref::Element(var))
        );
        assert_eq!(
            resolve(&model, n, "Speed", Filter::IsCallable, &mut cache),
            Ok(Ref::Element(func))
        );
        let err = resolve(&model, n, "Speed", Filter::Any, &mut cache).unwrap_err();
        let ResolveError::Ambiguous { candidates, .. } = err else {
            panic!("expected ambiguity");
        };
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn builtins_are_searched_last() {
        let mut b = ModelBuilder::new();
        let n = b.namespace("N").unwrap();
        let model = b.build();
        let mut cache = FinderCache::new();
        assert_eq!(
            resolve(&model, n, "Min", Filter::IsCallable, &mut cache),
            Ok(Ref::Builtin(Builtin::Min))
        );
        assert_eq!(
            resolve(&model, n, "Integer", Filter::IsType, &mut cache),
            Ok(Ref::Builtin(Builtin::Integer))
        );
        assert!(resolve(&model, n, "Min", Filter::IsValue, &mut cache).is_err());
    }

    #[test]
    fn dotted_paths_and_members() {
        let mut b = ModelBuilder::new();
        let n = b.namespace("N").unwrap();
        let colors = b.enumeration(n, "Colors", &["Red", "Green"]).unwrap();
        let other = b.namespace("Other").unwrap();
        let model = b.build();
        let green = model.children(colors)[1];
        let mut cache = FinderCache::new();

        let got = resolve_path(&model, other, &["N", "Colors", "Green"], Filter::IsValue, &mut cache);
        assert_eq!(got, Ok(Ref::Element(green)));
        let err = resolve_member(&model, colors, "Blue", Filter::IsValue).unwrap_err();
        assert!(matches!(err, ResolveError::NoMember { .. }));
    }

    #[test]
    fn lookups_are_cached() {
        let mut b = ModelBuilder::new();
        let n = b.namespace("N").unwrap();
        b.variable(n, "x", "Integer", Mode::Internal, None).unwrap();
        let model = b.build();
        let mut cache = FinderCache::new();
        resolve(&model, n, "x", Filter::IsValue, &mut cache).unwrap();
        resolve(&model, n, "x", Filter::IsValue, &mut cache).unwrap();
        let stats = cache.statistics();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }
}
