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

//! Commit-time merge of staged facts into the shared store
//!
//! ## Protocol
//! ```text
//! Open ──commit──▶ Committing ──▶ Merged
//!   └───abort───▶ Aborting ───▶ Discarded
//! ```
//! A commit holds the store's write lock for the whole batch. For each
//! staged fact the (database, relation) entry is found or created; when the
//! store is full the fact is either made room for by spilling every
//! database to disk (then retried once) or dropped. Dropped facts produce
//! one warning per overflow episode.

use crate::dump::DumpDirectory;
use crate::spill::{spill_to_disk, SpillScope};
use crate::staging::StagingEntry;
use crate::store::SharedAggregateStore;
use crate::transaction::{TransactionContext, TransactionState};
use relaccess_core::{AccessKey, AggregateEntry, DatabaseId, RelationName};
use tracing::{debug, warn};

/// Outcome of committing or aborting one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    pub database_id: DatabaseId,
    /// Staged facts folded into the store
    pub merged: usize,
    /// Staged facts lost because the store was full
    pub dropped: usize,
    /// Spill passes triggered by this commit
    pub spills: usize,
    /// Entries moved to disk by those passes
    pub spilled_entries: usize,
    /// Databases whose dump file failed during those passes
    pub spill_failures: usize,
    pub state: TransactionState,
}

impl MergeReport {
    fn new(database_id: DatabaseId) -> Self {
        Self {
            database_id,
            merged: 0,
            dropped: 0,
            spills: 0,
            spilled_entries: 0,
            spill_failures: 0,
            state: TransactionState::Committing,
        }
    }

    pub fn spilled(&self) -> bool {
        self.spills > 0
    }
}

/// Merge every staged fact of `ctx` into `store`, consuming the context
pub fn merge_transaction(
    mut ctx: TransactionContext,
    store: &SharedAggregateStore,
    dumps: &DumpDirectory,
    dump_on_overflow: bool,
) -> MergeReport {
    ctx.set_state(TransactionState::Committing);
    let database_id = ctx.database_id();
    let mut report = MergeReport::new(database_id);

    if !ctx.staging.is_empty() {
        let mut map = store.write();

        for (staging_key, staged) in ctx.staging.sorted() {
            let key = AccessKey::new(database_id, staging_key.relation_id);

            if dump_on_overflow && map.is_full() && map.find(&key).is_none() {
                let spill = spill_to_disk(&mut map, dumps, SpillScope::AllDatabases);
                report.spills += 1;
                report.spilled_entries += spill.written;
                report.spill_failures += spill.failures.len();
            }

            match map.find_or_insert(key) {
                Some((entry, _)) => {
                    apply_staged(entry, &staged, ctx.names.get(staging_key.relation_id));
                    report.merged += 1;
                }
                None => {
                    report.dropped += 1;
                    if map.note_overflow() {
                        if dump_on_overflow {
                            warn!(
                                database_id,
                                relation_id = key.relation_id,
                                capacity = map.capacity(),
                                "access statistics store still full after spilling to disk; dropping updates"
                            );
                        } else {
                            warn!(
                                database_id,
                                relation_id = key.relation_id,
                                capacity = map.capacity(),
                                "access statistics store is full; dropping updates (enable dump_on_overflow to spill instead)"
                            );
                        }
                    }
                }
            }
        }
    }

    ctx.finish(TransactionState::Merged);
    report.state = ctx.state();
    debug!(
        database_id,
        merged = report.merged,
        dropped = report.dropped,
        spills = report.spills,
        "merged transaction access statistics"
    );
    report
}

/// Discard every staged fact of `ctx` without touching the store
pub fn abort_transaction(mut ctx: TransactionContext) -> MergeReport {
    ctx.set_state(TransactionState::Aborting);
    let mut report = MergeReport::new(ctx.database_id());
    let discarded = ctx.staged_len();
    ctx.finish(TransactionState::Discarded);
    report.state = ctx.state();
    debug!(database_id = report.database_id, discarded, "discarded transaction access statistics");
    report
}

fn apply_staged(entry: &mut AggregateEntry, staged: &StagingEntry, name: Option<&RelationName>) {
    entry.count_permissions(staged.permissions);
    entry.observe_read(staged.last_reader_id, staged.last_read_time);
    entry.observe_write(staged.last_writer_id, staged.last_write_time);
    if let Some(name) = name {
        entry.relation_name = name.clone();
    }
}
