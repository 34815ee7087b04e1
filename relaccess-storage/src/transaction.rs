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

//! Transaction context
//!
//! Everything a transaction accumulates before commit: the staging buffer
//! and the name cache. The context is created at transaction start, passed
//! to every event-recording call and consumed by commit or abort.
//!
//! Only top-level transaction boundaries are tracked. Rolling back to a
//! savepoint does not remove events staged after it.

use crate::name_cache::{NameCache, RelationNameResolver};
use crate::staging::StagingBuffer;
use relaccess_core::{ActorId, DatabaseId, Permissions, RelationId, RelationName, Timestamp};
use std::fmt;

/// Lifecycle of a transaction context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting events
    Open,
    Committing,
    /// Staged facts merged into the store (terminal)
    Merged,
    Aborting,
    /// Staged facts thrown away (terminal)
    Discarded,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionState::Merged | TransactionState::Discarded)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionState::Open => "open",
            TransactionState::Committing => "committing",
            TransactionState::Merged => "merged",
            TransactionState::Aborting => "aborting",
            TransactionState::Discarded => "discarded",
        };
        f.write_str(s)
    }
}

/// Per-transaction staging state
#[derive(Debug)]
pub struct TransactionContext {
    database_id: DatabaseId,
    state: TransactionState,
    pub(crate) staging: StagingBuffer,
    pub(crate) names: NameCache,
}

impl TransactionContext {
    pub fn new(database_id: DatabaseId) -> Self {
        Self {
            database_id,
            state: TransactionState::Open,
            staging: StagingBuffer::new(),
            names: NameCache::new(),
        }
    }

    pub fn database_id(&self) -> DatabaseId {
        self.database_id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: TransactionState) {
        self.state = state;
    }

    /// Stage an access event for the current statement
    pub fn record_access(
        &mut self,
        relation_id: RelationId,
        permissions: Permissions,
        actor_id: ActorId,
        at: Timestamp,
    ) -> bool {
        debug_assert_eq!(self.state, TransactionState::Open);
        self.staging.record_access(relation_id, permissions, actor_id, at)
    }

    /// Name of `relation_id` for this transaction, see [`NameCache`]
    pub fn resolve_name<R>(
        &mut self,
        relation_id: RelationId,
        known: Option<&str>,
        resolver: &R,
    ) -> &RelationName
    where
        R: RelationNameResolver + ?Sized,
    {
        self.names.resolve_and_cache(relation_id, known, resolver)
    }

    pub fn end_statement(&mut self) {
        self.staging.end_statement();
    }

    pub fn statement_sequence(&self) -> u64 {
        self.staging.statement_sequence()
    }

    /// Number of staged (relation, statement) facts
    pub fn staged_len(&self) -> usize {
        self.staging.len()
    }

    pub fn staging(&self) -> &StagingBuffer {
        &self.staging
    }

    pub fn names(&self) -> &NameCache {
        &self.names
    }

    /// Drop staged state and enter a terminal state
    pub(crate) fn finish(&mut self, state: TransactionState) {
        self.staging.clear();
        self.names.clear();
        self.state = state;
    }
}
