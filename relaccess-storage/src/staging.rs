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

//! Per-transaction staging of access events
//!
//! Events are folded per (relation, statement): touching the same relation
//! several times inside one statement yields one staged fact, so a commit
//! counts each statement exactly once per relation.

use ahash::AHashMap;
use relaccess_core::{ActorId, Permissions, RelationId, Timestamp, INVALID_ID};

/// Staging key: one relation within one statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StagingKey {
    pub relation_id: RelationId,
    pub statement: u64,
}

/// Access facts of one relation within one statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingEntry {
    pub permissions: Permissions,
    pub last_reader_id: ActorId,
    pub last_writer_id: ActorId,
    pub last_read_time: Timestamp,
    pub last_write_time: Timestamp,
}

impl Default for StagingEntry {
    fn default() -> Self {
        Self {
            permissions: Permissions::NONE,
            last_reader_id: INVALID_ID,
            last_writer_id: INVALID_ID,
            last_read_time: 0,
            last_write_time: 0,
        }
    }
}

/// Transaction-local staging buffer
#[derive(Debug, Default)]
pub struct StagingBuffer {
    entries: AHashMap<StagingKey, StagingEntry>,
    statement: u64,
}

impl StagingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage one access event for the current statement.
    ///
    /// Returns `false` if the event was ignored because its permission set
    /// is neither a read nor a write.
    pub fn record_access(
        &mut self,
        relation_id: RelationId,
        permissions: Permissions,
        actor_id: ActorId,
        at: Timestamp,
    ) -> bool {
        let is_write = permissions.is_write();
        let is_read = permissions.is_read();
        if !is_write && !is_read {
            return false;
        }

        let key = StagingKey {
            relation_id,
            statement: self.statement,
        };
        let entry = self.entries.entry(key).or_default();
        entry.permissions |= permissions;

        if is_write && at >= entry.last_write_time {
            entry.last_write_time = at;
            entry.last_writer_id = actor_id;
        }
        if is_read && at >= entry.last_read_time {
            entry.last_read_time = at;
            entry.last_reader_id = actor_id;
        }
        true
    }

    /// Close the current statement; later events stage under a new key
    pub fn end_statement(&mut self) {
        self.statement = self.statement.wrapping_add(1);
    }

    /// Sequence number of the statement currently being staged
    pub fn statement_sequence(&self) -> u64 {
        self.statement
    }

    pub fn get(&self, relation_id: RelationId, statement: u64) -> Option<&StagingEntry> {
        self.entries.get(&StagingKey {
            relation_id,
            statement,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Staged facts ordered by statement, then relation
    pub fn sorted(&self) -> Vec<(StagingKey, StagingEntry)> {
        let mut staged: Vec<_> = self.entries.iter().map(|(k, e)| (*k, *e)).collect();
        staged.sort_unstable_by_key(|(k, _)| (k.statement, k.relation_id));
        staged
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_same_statement_folds() {
        let mut buffer = StagingBuffer::new();
        buffer.record_access(10, Permissions::SELECT, 1, 100);
        buffer.record_access(10, Permissions::SELECT, 2, 90);
        buffer.record_access(10, Permissions::UPDATE, 3, 120);

        assert_eq!(buffer.len(), 1);
        let entry = buffer.get(10, 0).unwrap();
        assert_eq!(entry.permissions, Permissions::SELECT | Permissions::UPDATE);
        assert_eq!(entry.last_reader_id, 1);
        assert_eq!(entry.last_read_time, 100);
        assert_eq!(entry.last_writer_id, 3);
        assert_eq!(entry.last_write_time, 120);
    }

    #[test]
    fn test_statements_stage_separately() {
        let mut buffer = StagingBuffer::new();
        buffer.record_access(10, Permissions::SELECT, 1, 100);
        buffer.end_statement();
        buffer.record_access(10, Permissions::SELECT, 1, 200);

        assert_eq!(buffer.statement_sequence(), 1);
        assert_eq!(buffer.len(), 2);
        let staged = buffer.sorted();
        assert_eq!(staged[0].0.statement, 0);
        assert_eq!(staged[1].1.last_read_time, 200);
    }

    #[test]
    fn test_write_never_counts_as_read() {
        let mut buffer = StagingBuffer::new();
        buffer.record_access(10, Permissions::SELECT | Permissions::DELETE, 4, 50);
        let entry = buffer.get(10, 0).unwrap();
        assert_eq!(entry.last_read_time, 0);
        assert_eq!(entry.last_reader_id, INVALID_ID);
        assert_eq!(entry.last_writer_id, 4);
    }

    #[test]
    fn test_empty_permissions_ignored() {
        let mut buffer = StagingBuffer::new();
        assert!(!buffer.record_access(10, Permissions::NONE, 1, 100));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut buffer = StagingBuffer::new();
        buffer.record_access(1, Permissions::INSERT, 1, 1);
        buffer.record_access(2, Permissions::INSERT, 1, 1);
        buffer.clear();
        assert!(buffer.is_empty());
    }

    fn permissions() -> impl Strategy<Value = Permissions> {
        (1u8..32).prop_map(Permissions::from_bits_truncate)
    }

    proptest! {
        #[test]
        fn prop_statement_entry_is_or_and_max(
            events in prop::collection::vec((permissions(), 1u32..100, 1i64..1_000_000), 1..50)
        ) {
            let mut buffer = StagingBuffer::new();
            for (perms, actor, at) in &events {
                buffer.record_access(7, *perms, *actor, *at);
            }

            let expected_perms = events
                .iter()
                .fold(Permissions::NONE, |acc, (p, _, _)| acc | *p);
            let max_read = events
                .iter()
                .filter(|(p, _, _)| p.is_read())
                .map(|(_, _, at)| *at)
                .max()
                .unwrap_or(0);
            let max_write = events
                .iter()
                .filter(|(p, _, _)| p.is_write())
                .map(|(_, _, at)| *at)
                .max()
                .unwrap_or(0);

            let entry = buffer.get(7, 0).unwrap();
            prop_assert_eq!(buffer.len(), 1);
            prop_assert_eq!(entry.permissions, expected_perms);
            prop_assert_eq!(entry.last_read_time, max_read);
            prop_assert_eq!(entry.last_write_time, max_write);
        }
    }
}
