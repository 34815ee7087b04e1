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

//! Spill of store entries to per-database dump files
//!
//! A spill pass moves entries out of the store: each entry is appended to
//! its database's dump file and removed from the store only once the write
//! succeeded. A database whose file cannot be opened or written is skipped
//! for the rest of the pass and keeps its entries in memory.

use crate::dump::{DumpDirectory, DumpFiles, DumpWriter};
use crate::store::AggregateMap;
use ahash::AHashMap;
use relaccess_core::{AccessKey, DatabaseId, RelaccessError};
use tracing::{debug, info, warn};

/// Which entries a spill pass moves to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpillScope {
    /// Only this database; its dump file is created even when it has no
    /// entries
    Database(DatabaseId),
    /// Every database in the store
    AllDatabases,
}

impl SpillScope {
    pub fn includes(&self, key: &AccessKey) -> bool {
        match self {
            SpillScope::Database(id) => key.database_id == *id,
            SpillScope::AllDatabases => true,
        }
    }
}

/// A database whose dump file was abandoned during a pass
#[derive(Debug)]
pub struct SpillFailure {
    pub database_id: DatabaseId,
    pub error: RelaccessError,
}

/// Outcome of one spill pass
#[derive(Debug, Default)]
pub struct SpillReport {
    /// Entries written to disk and removed from the store
    pub written: usize,
    /// Dump files opened during the pass
    pub files: usize,
    pub failures: Vec<SpillFailure>,
}

impl SpillReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed(&self, database_id: DatabaseId) -> bool {
        self.failures.iter().any(|f| f.database_id == database_id)
    }
}

enum WriterSlot {
    Open(DumpWriter),
    Failed,
}

/// Move the entries selected by `scope` from `map` to their dump files.
///
/// The caller holds the store's write lock (that is how it got `map`);
/// the dump file lock is taken here, nested inside it.
pub fn spill_to_disk(map: &mut AggregateMap, dumps: &DumpDirectory, scope: SpillScope) -> SpillReport {
    let files = dumps.lock();
    let mut report = SpillReport::default();
    let mut writers: AHashMap<DatabaseId, WriterSlot> = AHashMap::new();

    if let SpillScope::Database(database_id) = scope {
        open_slot(&files, database_id, &mut writers, &mut report);
    }

    for key in map.keys_where(|key| scope.includes(key)) {
        if !writers.contains_key(&key.database_id) {
            open_slot(&files, key.database_id, &mut writers, &mut report);
        }
        let Some(WriterSlot::Open(writer)) = writers.get_mut(&key.database_id) else {
            continue;
        };
        let Some(entry) = map.find(&key) else {
            continue;
        };

        if let Err(error) = writer.append(entry) {
            warn!(
                database_id = key.database_id,
                path = ?writer.path(),
                error = %error,
                "could not write dump file; keeping remaining entries in memory"
            );
            report.failures.push(SpillFailure {
                database_id: key.database_id,
                error,
            });
            writers.insert(key.database_id, WriterSlot::Failed);
            continue;
        }
        map.remove(&key);
        report.written += 1;
    }

    for (database_id, slot) in writers {
        if let WriterSlot::Open(writer) = slot {
            let path = writer.path().to_path_buf();
            let appended = writer.appended();
            if let Err(error) = writer.finish() {
                warn!(database_id, path = ?path, error = %error, "could not sync dump file");
                report.failures.push(SpillFailure { database_id, error });
            } else {
                debug!(database_id, path = ?path, entries = appended, "dump file written");
            }
        }
    }

    info!(
        scope = ?scope,
        entries = report.written,
        files = report.files,
        failures = report.failures.len(),
        remaining = map.len(),
        "spilled access statistics to disk"
    );
    report
}

fn open_slot(
    files: &DumpFiles<'_>,
    database_id: DatabaseId,
    writers: &mut AHashMap<DatabaseId, WriterSlot>,
    report: &mut SpillReport,
) {
    let slot = match files.open_append(database_id) {
        Ok(writer) => {
            report.files += 1;
            WriterSlot::Open(writer)
        }
        Err(error) => {
            warn!(database_id, error = %error, "could not open dump file");
            report.failures.push(SpillFailure { database_id, error });
            WriterSlot::Failed
        }
    };
    writers.insert(database_id, slot);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SharedAggregateStore;
    use relaccess_core::Permissions;
    use std::fs;
    use tempfile::tempdir;

    fn fill(store: &SharedAggregateStore, keys: &[(DatabaseId, u32)]) {
        let mut map = store.write();
        for &(db, rel) in keys {
            let (entry, _) = map.find_or_insert(AccessKey::new(db, rel)).unwrap();
            entry.count_permissions(Permissions::SELECT);
        }
    }

    #[test]
    fn test_spill_all_databases() {
        let dir = tempdir().unwrap();
        let dumps = DumpDirectory::new(dir.path());
        let store = SharedAggregateStore::new(8);
        fill(&store, &[(1, 10), (1, 11), (2, 10)]);

        let report = spill_to_disk(&mut store.write(), &dumps, SpillScope::AllDatabases);
        assert!(report.is_complete());
        assert_eq!(report.written, 3);
        assert_eq!(report.files, 2);
        assert!(store.is_empty());

        let files = dumps.lock();
        assert_eq!(files.read(1).unwrap().len(), 2);
        assert_eq!(files.read(2).unwrap().len(), 1);
    }

    #[test]
    fn test_spill_one_database_leaves_others() {
        let dir = tempdir().unwrap();
        let dumps = DumpDirectory::new(dir.path());
        let store = SharedAggregateStore::new(8);
        fill(&store, &[(1, 10), (2, 10), (2, 11)]);

        let report = spill_to_disk(&mut store.write(), &dumps, SpillScope::Database(2));
        assert_eq!(report.written, 2);
        assert_eq!(store.len(), 1);
        assert!(store.get(&AccessKey::new(1, 10)).is_some());
        assert!(!dumps.path_for(1).exists());
    }

    #[test]
    fn test_database_scope_creates_empty_file() {
        let dir = tempdir().unwrap();
        let dumps = DumpDirectory::new(dir.path());
        let store = SharedAggregateStore::new(8);

        let report = spill_to_disk(&mut store.write(), &dumps, SpillScope::Database(7));
        assert_eq!(report.written, 0);
        assert_eq!(report.files, 1);
        assert_eq!(fs::metadata(dumps.path_for(7)).unwrap().len(), 0);

        // all-databases scope with nothing to spill creates nothing
        spill_to_disk(&mut store.write(), &dumps, SpillScope::AllDatabases);
        assert_eq!(dumps.lock().list().unwrap().len(), 1);
    }

    #[test]
    fn test_open_failure_keeps_entries() {
        let dir = tempdir().unwrap();
        // a regular file where the directory should be makes every open fail
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, b"").unwrap();
        let dumps = DumpDirectory::new(&blocker);

        let store = SharedAggregateStore::new(8);
        fill(&store, &[(1, 10), (1, 11), (2, 10)]);

        let report = spill_to_disk(&mut store.write(), &dumps, SpillScope::AllDatabases);
        assert_eq!(report.written, 0);
        assert!(report.failed(1));
        assert!(report.failed(2));
        // one failure per database, not per entry
        assert_eq!(report.failures.len(), 2);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_failed_database_does_not_stop_others() {
        let dir = tempdir().unwrap();
        let dumps = DumpDirectory::new(dir.path());
        // a directory where database 1's dump file belongs
        fs::create_dir_all(dumps.path_for(1)).unwrap();

        let store = SharedAggregateStore::new(8);
        fill(&store, &[(1, 10), (1, 11), (2, 10), (2, 11)]);

        let report = spill_to_disk(&mut store.write(), &dumps, SpillScope::AllDatabases);
        assert_eq!(report.written, 2);
        assert!(report.failed(1));
        assert!(!report.failed(2));
        assert_eq!(report.failures.len(), 1);

        assert_eq!(store.snapshot_database(1).len(), 2);
        assert!(store.snapshot_database(2).is_empty());
        assert_eq!(dumps.lock().read(2).unwrap().len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_write_failure_keeps_entries_in_memory() {
        let dir = tempdir().unwrap();
        let dumps = DumpDirectory::new(dir.path());
        // opens fine, every write fails with ENOSPC
        std::os::unix::fs::symlink("/dev/full", dumps.path_for(1)).unwrap();

        let store = SharedAggregateStore::new(8);
        fill(&store, &[(1, 10), (1, 11), (2, 10)]);

        let report = spill_to_disk(&mut store.write(), &dumps, SpillScope::AllDatabases);
        assert_eq!(report.written, 1);
        assert_eq!(report.files, 2);
        assert!(report.failed(1));
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            report.failures[0].error,
            RelaccessError::DumpWrite { .. }
        ));

        assert_eq!(store.snapshot_database(1).len(), 2);
        assert!(store.snapshot_database(2).is_empty());
        assert_eq!(dumps.lock().read(2).unwrap().len(), 1);
    }
}
