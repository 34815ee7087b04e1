// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Transaction-scoped relation name cache
//!
//! The first name seen for a relation is kept for the rest of the
//! transaction. A rename inside the same transaction is not picked up.

use ahash::AHashMap;
use relaccess_core::{RelationId, RelationName};

/// Looks up the current name of a relation in the host catalog
pub trait RelationNameResolver {
    fn relation_name(&self, relation_id: RelationId) -> Option<String>;
}

impl<F> RelationNameResolver for F
where
    F: Fn(RelationId) -> Option<String>,
{
    fn relation_name(&self, relation_id: RelationId) -> Option<String> {
        self(relation_id)
    }
}

/// Resolver that knows no names
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNames;

impl RelationNameResolver for NoNames {
    fn relation_name(&self, _relation_id: RelationId) -> Option<String> {
        None
    }
}

#[derive(Debug, Default)]
pub struct NameCache {
    names: AHashMap<RelationId, RelationName>,
}

impl NameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached name of `relation_id`, resolving and caching it on first use.
    ///
    /// `known` is used when the caller already has the name (truncate
    /// statements); otherwise `resolver` is asked. A relation the resolver
    /// cannot name caches the empty name.
    pub fn resolve_and_cache<R>(
        &mut self,
        relation_id: RelationId,
        known: Option<&str>,
        resolver: &R,
    ) -> &RelationName
    where
        R: RelationNameResolver + ?Sized,
    {
        self.names.entry(relation_id).or_insert_with(|| match known {
            Some(name) => RelationName::new(name),
            None => resolver
                .relation_name(relation_id)
                .map(RelationName::from)
                .unwrap_or_default(),
        })
    }

    pub fn get(&self, relation_id: RelationId) -> Option<&RelationName> {
        self.names.get(&relation_id)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn clear(&mut self) {
        self.names.clear();
    }
}
