//! Memo table for scope-chain name lookups.

use std::collections::HashMap;

use efs_core::element::ElementId;
use efs_lang::Ref;

use crate::error::ResolveError;
use crate::finder::Filter;

/// Statistics about cache usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub entries: usize,
    /// Number of times the cache was emptied.
    pub clears: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    scope: ElementId,
    name: String,
    filter: Filter,
}

/// Resolution results keyed by `(scope, name, filter)`.
///
/// Entries are only valid for the model state they were computed against;
/// the compiler clears the cache before every analysis and refactoring.
#[derive(Debug, Clone, Default)]
pub struct FinderCache {
    entries: HashMap<CacheKey, Result<Ref, ResolveError>>,
    hits: usize,
    misses: usize,
    clears: usize,
}

impl FinderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(
        &mut self,
        scope: ElementId,
        name: &str,
        filter: Filter,
    ) -> Option<Result<Ref, ResolveError>> {
        let key = CacheKey {
            scope,
            name: name.to_string(),
            filter,
        };
        match self.entries.get(&key) {
            Some(found) => {
                self.hits += 1;
                Some(found.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn store(
        &mut self,
        scope: ElementId,
        name: &str,
        filter: Filter,
        result: Result<Ref, ResolveError>,
    ) {
        let key = CacheKey {
            scope,
            name: name.to_string(),
            filter,
        };
        self.entries.insert(key, result);
    }

    /// Drop every entry. Statistics are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.clears += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn statistics(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
            clears: self.clears,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use efs_core::element::ElementId;

    #[test]
    fn store_and_retrieve() {
        let mut cache = FinderCache::new();
        let scope = ElementId::new_v4();
        let target = ElementId::new_v4();

        assert!(cache.lookup(scope, "x", Filter::Any).is_none());
        cache.store(scope, "x", Filter::Any, Ok(Ref::Element(target)));
        assert_eq!(
            cache.lookup(scope, "x", Filter::Any),
            Some(Ok(Ref::Element(target)))
        );
        // A different filter is a different key.
        assert!(cache.lookup(scope, "x", Filter::IsType).is_none());

        let stats = cache.statistics();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn clear_empties_but_keeps_stats() {
        let mut cache = FinderCache::new();
        let scope = ElementId::new_v4();
        cache.store(
            scope,
            "y",
            Filter::IsValue,
            Err(ResolveError::Unresolved { name: "y".into() }),
        );
        assert!(cache.lookup(scope, "y", Filter::IsValue).is_some());
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.lookup(scope, "y", Filter::IsValue).is_none());
        let stats = cache.statistics();
        assert_eq!((stats.hits, stats.misses, stats.clears), (1, 1, 1));
    }
}
