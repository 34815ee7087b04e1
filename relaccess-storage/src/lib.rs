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

//! Relaccess Storage Layer
//!
//! Aggregation engine for relation access statistics.
//!
//! ## Architecture
//!
//! - **Staging**: per-transaction buffer of (relation, statement) facts plus
//!   a first-write-wins relation name cache, bundled in a
//!   [`TransactionContext`]
//! - **Shared store**: fixed-capacity map of (database, relation) aggregates
//!   behind one process-wide lock
//! - **Merge**: commit folds staged facts into the store; abort drops them
//! - **Spill**: moves store entries to per-database dump files when the
//!   store is full, on flush and at shutdown
//! - **Collector**: the process-wide entry point tying these together
//!
//! ## Lock order
//!
//! Store lock first, dump file lock second. Nothing takes them the other
//! way around.

pub mod collector;
pub mod dump;
pub mod ingest;
pub mod merge;
pub mod name_cache;
pub mod spill;
pub mod staging;
pub mod store;
pub mod transaction;

pub use collector::{AccessStatsCollector, DropReport, FlushReport};
pub use dump::{
    dump_file_path, list_dump_files, parse_dump_file_name, read_dump_file, DumpDirectory,
    DumpFileInfo, DumpFiles, DumpWriter, DUMP_FILE_EXTENSION, DUMP_FILE_PREFIX,
};
pub use ingest::{DiscardIngestor, StatsIngestor};
pub use merge::{abort_transaction, merge_transaction, MergeReport};
pub use name_cache::{NameCache, NoNames, RelationNameResolver};
pub use spill::{spill_to_disk, SpillFailure, SpillReport, SpillScope};
pub use staging::{StagingBuffer, StagingEntry, StagingKey};
pub use store::{AggregateMap, SharedAggregateStore};
pub use transaction::{TransactionContext, TransactionState};
