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

//! Access statistics collector
//!
//! Process-wide entry point. Owns the shared store, the dump directory and
//! the ingestion collaborator, and exposes:
//!
//! - **event hooks**: `begin_transaction`, `on_relation_access`,
//!   `on_truncate`, `end_statement`, `commit`, `abort`
//! - **administrative operations**: `flush_and_ingest`, `dump`,
//!   `fill_ratio`, `read_dump`, `database_stats`
//! - **lifecycle**: `drop_database`, `shutdown`
//!
//! ## Example
//! ```no_run
//! use relaccess_core::{now_micros, Permissions, RelaccessConfig};
//! use relaccess_storage::{AccessStatsCollector, DiscardIngestor, NoNames};
//!
//! let mut config = RelaccessConfig::default();
//! config.enabled = true;
//! let collector = AccessStatsCollector::new(&config, DiscardIngestor)?;
//!
//! let mut txn = collector.begin_transaction(16384);
//! collector.on_relation_access(&mut txn, 24576, Permissions::SELECT, 10, now_micros(), &NoNames);
//! collector.end_statement(&mut txn);
//! collector.commit(txn);
//! # Ok::<(), relaccess_core::RelaccessError>(())
//! ```

use crate::dump::DumpDirectory;
use crate::ingest::StatsIngestor;
use crate::merge::{abort_transaction, merge_transaction, MergeReport};
use crate::name_cache::{NoNames, RelationNameResolver};
use crate::spill::{spill_to_disk, SpillReport, SpillScope};
use crate::store::SharedAggregateStore;
use crate::transaction::TransactionContext;
use relaccess_core::{
    ActorId, AggregateEntry, DatabaseId, Permissions, RelaccessConfig, RelaccessError,
    RelationId, Result, Timestamp,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of [`AccessStatsCollector::flush_and_ingest`]
#[derive(Debug)]
pub struct FlushReport {
    pub database_id: DatabaseId,
    pub spill: SpillReport,
    /// Dump file handed to the ingestor and then deleted
    pub dump_path: PathBuf,
}

/// Outcome of [`AccessStatsCollector::drop_database`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropReport {
    pub database_id: DatabaseId,
    pub entries_removed: usize,
    pub dump_file_removed: bool,
}

pub struct AccessStatsCollector {
    store: Arc<SharedAggregateStore>,
    dumps: Arc<DumpDirectory>,
    ingestor: Arc<dyn StatsIngestor>,
    enabled: AtomicBool,
    dump_on_overflow: AtomicBool,
}

impl AccessStatsCollector {
    /// Create a collector from a validated configuration
    pub fn new<I>(config: &RelaccessConfig, ingestor: I) -> Result<Self>
    where
        I: StatsIngestor + 'static,
    {
        config.validate()?;
        Ok(Self::with_config(config, ingestor))
    }

    /// Create a collector without validating the configuration.
    ///
    /// Accepts capacities below the configured minimum.
    #[doc(hidden)]
    pub fn with_config<I>(config: &RelaccessConfig, ingestor: I) -> Self
    where
        I: StatsIngestor + 'static,
    {
        info!(
            max_tables = config.max_tables,
            dump_on_overflow = config.dump_on_overflow,
            enabled = config.enabled,
            stats_dir = ?config.stats_dir,
            "starting access statistics collector"
        );
        Self {
            store: Arc::new(SharedAggregateStore::new(config.max_tables)),
            dumps: Arc::new(DumpDirectory::new(&config.stats_dir)),
            ingestor: Arc::new(ingestor),
            enabled: AtomicBool::new(config.enabled),
            dump_on_overflow: AtomicBool::new(config.dump_on_overflow),
        }
    }

    pub fn store(&self) -> &Arc<SharedAggregateStore> {
        &self.store
    }

    pub fn dumps(&self) -> &Arc<DumpDirectory> {
        &self.dumps
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn dump_on_overflow(&self) -> bool {
        self.dump_on_overflow.load(Ordering::Relaxed)
    }

    pub fn set_dump_on_overflow(&self, dump_on_overflow: bool) {
        self.dump_on_overflow.store(dump_on_overflow, Ordering::Relaxed);
    }

    // ========================================================================
    // Event hooks
    // ========================================================================

    pub fn begin_transaction(&self, database_id: DatabaseId) -> TransactionContext {
        TransactionContext::new(database_id)
    }

    /// A statement referenced a relation with the given permissions
    pub fn on_relation_access<R>(
        &self,
        ctx: &mut TransactionContext,
        relation_id: RelationId,
        permissions: Permissions,
        actor_id: ActorId,
        at: Timestamp,
        resolver: &R,
    ) where
        R: RelationNameResolver + ?Sized,
    {
        if !self.is_enabled() {
            return;
        }
        if ctx.record_access(relation_id, permissions, actor_id, at) {
            ctx.resolve_name(relation_id, None, resolver);
        }
    }

    /// A statement truncated a relation; the name comes from the statement
    pub fn on_truncate(
        &self,
        ctx: &mut TransactionContext,
        relation_id: RelationId,
        relation_name: &str,
        actor_id: ActorId,
        at: Timestamp,
    ) {
        if !self.is_enabled() {
            return;
        }
        ctx.record_access(relation_id, Permissions::TRUNCATE, actor_id, at);
        ctx.resolve_name(relation_id, Some(relation_name), &NoNames);
    }

    pub fn end_statement(&self, ctx: &mut TransactionContext) {
        ctx.end_statement();
    }

    /// Merge the transaction's staged facts into the shared store.
    ///
    /// With collection disabled the staged facts are discarded instead.
    pub fn commit(&self, ctx: TransactionContext) -> MergeReport {
        if !self.is_enabled() {
            return abort_transaction(ctx);
        }
        merge_transaction(ctx, &self.store, &self.dumps, self.dump_on_overflow())
    }

    pub fn abort(&self, ctx: TransactionContext) -> MergeReport {
        abort_transaction(ctx)
    }

    // ========================================================================
    // Administrative operations
    // ========================================================================

    /// Spill one database to its dump file, hand the file to the ingestor
    /// and delete it once ingested.
    ///
    /// On ingestion failure the file is kept so a later flush retries it.
    pub fn flush_and_ingest(&self, database_id: DatabaseId) -> Result<FlushReport> {
        let spill = self.dump(database_id);

        let files = self.dumps.lock();
        let dump_path = files.path_for(database_id);
        if let Err(source) = self.ingestor.ingest(database_id, &dump_path) {
            warn!(database_id, path = ?dump_path, error = %source, "ingestion failed; keeping dump file");
            return Err(RelaccessError::Ingestion {
                database_id,
                source,
            });
        }
        files.remove(database_id)?;
        drop(files);

        info!(
            database_id,
            entries = spill.written,
            path = ?dump_path,
            "flushed access statistics"
        );
        Ok(FlushReport {
            database_id,
            spill,
            dump_path,
        })
    }

    /// Spill one database to its dump file without ingesting it
    pub fn dump(&self, database_id: DatabaseId) -> SpillReport {
        let mut map = self.store.write();
        spill_to_disk(&mut map, &self.dumps, SpillScope::Database(database_id))
    }

    /// Used store capacity as an integer percentage
    pub fn fill_ratio(&self) -> u16 {
        self.store.fill_ratio()
    }

    /// Records currently in a database's dump file; the file is left alone
    pub fn read_dump(&self, database_id: DatabaseId) -> Result<Vec<AggregateEntry>> {
        self.dumps.lock().read(database_id)
    }

    /// In-memory entries of one database
    pub fn database_stats(&self, database_id: DatabaseId) -> Vec<AggregateEntry> {
        self.store.snapshot_database(database_id)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Forget a destroyed database: its store entries and its dump file
    pub fn drop_database(&self, database_id: DatabaseId) -> Result<DropReport> {
        let mut map = self.store.write();
        let entries_removed = map.remove_database(database_id);
        let dump_file_removed = self.dumps.lock().remove(database_id)?;
        drop(map);

        info!(
            database_id,
            entries = entries_removed,
            dump_file_removed,
            "dropped access statistics of database"
        );
        Ok(DropReport {
            database_id,
            entries_removed,
            dump_file_removed,
        })
    }

    /// Spill every database to disk; nothing is ingested
    pub fn shutdown(&self) -> SpillReport {
        let mut map = self.store.write();
        let report = spill_to_disk(&mut map, &self.dumps, SpillScope::AllDatabases);
        debug!(
            written = report.written,
            failures = report.failures.len(),
            "access statistics collector shut down"
        );
        report
    }
}

impl std::fmt::Debug for AccessStatsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessStatsCollector")
            .field("capacity", &self.store.capacity())
            .field("entries", &self.store.len())
            .field("stats_dir", &self.dumps.dir())
            .field("enabled", &self.is_enabled())
            .field("dump_on_overflow", &self.dump_on_overflow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::DiscardIngestor;
    use crate::name_cache::NoNames;
    use crate::transaction::TransactionState;
    use relaccess_core::AccessKey;
    use tempfile::tempdir;

    fn config(dir: &std::path::Path) -> RelaccessConfig {
        RelaccessConfig {
            enabled: true,
            stats_dir: dir.to_path_buf(),
            ..RelaccessConfig::default()
        }
    }

    #[test]
    fn test_new_validates_config() {
        let dir = tempdir().unwrap();
        let small = config(dir.path()).with_capacity_unchecked(2);
        assert!(AccessStatsCollector::new(&small, DiscardIngestor).is_err());
        assert!(AccessStatsCollector::new(&config(dir.path()), DiscardIngestor).is_ok());
    }

    #[test]
    fn test_disabled_collector_ignores_events() {
        let dir = tempdir().unwrap();
        let collector = AccessStatsCollector::new(&config(dir.path()), DiscardIngestor).unwrap();
        collector.set_enabled(false);

        let mut txn = collector.begin_transaction(1);
        collector.on_relation_access(&mut txn, 5, Permissions::SELECT, 1, 100, &NoNames);
        assert_eq!(txn.staged_len(), 0);

        // staged while enabled, committed after disabling
        collector.set_enabled(true);
        collector.on_relation_access(&mut txn, 5, Permissions::SELECT, 1, 100, &NoNames);
        collector.set_enabled(false);
        let report = collector.commit(txn);
        assert_eq!(report.state, TransactionState::Discarded);
        assert!(collector.store().is_empty());
    }

    #[test]
    fn test_truncate_uses_statement_name() {
        let dir = tempdir().unwrap();
        let collector = AccessStatsCollector::new(&config(dir.path()), DiscardIngestor).unwrap();

        let mut txn = collector.begin_transaction(1);
        collector.on_truncate(&mut txn, 8, "audit_log", 3, 500);
        collector.commit(txn);

        let entry = collector.store().get(&AccessKey::new(1, 8)).unwrap();
        assert_eq!(entry.n_truncate, 1);
        assert_eq!(entry.last_writer_id, 3);
        assert_eq!(entry.relation_name.as_str(), "audit_log");
    }

    #[test]
    fn test_dump_then_read() {
        let dir = tempdir().unwrap();
        let collector = AccessStatsCollector::new(&config(dir.path()), DiscardIngestor).unwrap();

        let mut txn = collector.begin_transaction(4);
        collector.on_relation_access(&mut txn, 1, Permissions::INSERT, 2, 10, &NoNames);
        collector.commit(txn);
        let before = collector.database_stats(4);

        let report = collector.dump(4);
        assert_eq!(report.written, 1);
        assert!(collector.database_stats(4).is_empty());
        assert_eq!(collector.read_dump(4).unwrap(), before);
        // reading does not consume the file
        assert_eq!(collector.read_dump(4).unwrap().len(), 1);
    }

    #[test]
    fn test_debug_format() {
        let dir = tempdir().unwrap();
        let collector = AccessStatsCollector::new(&config(dir.path()), DiscardIngestor).unwrap();
        let debug = format!("{:?}", collector);
        assert!(debug.contains("capacity: 65536"));
    }
}
