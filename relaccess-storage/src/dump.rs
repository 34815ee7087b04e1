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

//! Per-database dump files
//!
//! **File Structure:**
//! ```text
//! <stats_dir>/relaccess_stats_dump_<database_id>.dump
//! ┌─────────────────────────────┐
//! │ record 0 (136 bytes)        │
//! ├─────────────────────────────┤
//! │ record 1 (136 bytes)        │
//! ├─────────────────────────────┤
//! │ ...                         │
//! └─────────────────────────────┘
//! ```
//! Writers only append; readers consume records until end of file. All
//! access goes through [`DumpDirectory::lock`], which serializes spills,
//! ingestion and cleanup across threads. The file lock always nests inside
//! the store lock, never the other way around.

use parking_lot::{Mutex, MutexGuard};
use relaccess_core::{AggregateEntry, DatabaseId, RelaccessError, Result, RECORD_SIZE};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name prefix of dump files
pub const DUMP_FILE_PREFIX: &str = "relaccess_stats_dump_";

/// File extension of dump files
pub const DUMP_FILE_EXTENSION: &str = "dump";

/// Directory of dump files plus the lock serializing access to them
#[derive(Debug)]
pub struct DumpDirectory {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl DumpDirectory {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the dump file of one database
    pub fn path_for(&self, database_id: DatabaseId) -> PathBuf {
        dump_file_path(&self.dir, database_id)
    }

    /// Take the file lock; blocks until no other thread holds it
    pub fn lock(&self) -> DumpFiles<'_> {
        DumpFiles {
            dir: &self.dir,
            _guard: self.lock.lock(),
        }
    }
}

/// Path of the dump file of `database_id` inside `dir`
pub fn dump_file_path(dir: &Path, database_id: DatabaseId) -> PathBuf {
    dir.join(format!(
        "{}{}.{}",
        DUMP_FILE_PREFIX, database_id, DUMP_FILE_EXTENSION
    ))
}

/// Database id encoded in a dump file name, if it is one
pub fn parse_dump_file_name(name: &str) -> Option<DatabaseId> {
    name.strip_prefix(DUMP_FILE_PREFIX)?
        .strip_suffix(DUMP_FILE_EXTENSION)?
        .strip_suffix('.')?
        .parse()
        .ok()
}

/// Description of one dump file on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpFileInfo {
    pub database_id: DatabaseId,
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Complete records in the file
    pub records: u64,
    /// Bytes of a torn trailing record, if any
    pub trailing_bytes: u64,
}

/// Dump file operations; exists only while the file lock is held
pub struct DumpFiles<'a> {
    dir: &'a Path,
    _guard: MutexGuard<'a, ()>,
}

impl DumpFiles<'_> {
    pub fn path_for(&self, database_id: DatabaseId) -> PathBuf {
        dump_file_path(self.dir, database_id)
    }

    /// Open (create-or-append) the dump file of one database
    pub fn open_append(&self, database_id: DatabaseId) -> Result<DumpWriter> {
        let path = self.path_for(database_id);
        let open = || -> io::Result<(File, u64)> {
            fs::create_dir_all(self.dir)?;
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let len = file.metadata()?.len();
            Ok((file, len))
        };
        match open() {
            Ok((file, len)) => Ok(DumpWriter {
                database_id,
                path,
                file,
                len,
                appended: 0,
            }),
            Err(source) => Err(RelaccessError::DumpWrite { path, source }),
        }
    }

    /// Every complete record of one database's dump file, in file order.
    ///
    /// A missing file reads as empty. A record of another database means
    /// the file was not written by a spill of this one.
    pub fn read(&self, database_id: DatabaseId) -> Result<Vec<AggregateEntry>> {
        let path = self.path_for(database_id);
        let records = read_dump_file(&path)?;
        if let Some(stray) = records.iter().find(|e| e.key.database_id != database_id) {
            return Err(RelaccessError::InvalidRecord(format!(
                "{:?}: record {} does not belong to database {}",
                path, stray.key, database_id
            )));
        }
        Ok(records)
    }

    /// Delete the dump file of one database; `false` if there was none
    pub fn remove(&self, database_id: DatabaseId) -> Result<bool> {
        let path = self.path_for(database_id);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(database_id, path = ?path, "removed dump file");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// All dump files in the directory, ordered by database id
    pub fn list(&self) -> Result<Vec<DumpFileInfo>> {
        list_dump_files(self.dir)
    }
}

/// Append handle for one database's dump file
#[derive(Debug)]
pub struct DumpWriter {
    database_id: DatabaseId,
    path: PathBuf,
    file: File,
    len: u64,
    appended: usize,
}

impl DumpWriter {
    pub fn database_id(&self) -> DatabaseId {
        self.database_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended through this handle
    pub fn appended(&self) -> usize {
        self.appended
    }

    /// Append one record.
    ///
    /// On failure the file is cut back to its previous length so a torn
    /// record never shifts the records appended after it.
    pub fn append(&mut self, entry: &AggregateEntry) -> Result<()> {
        match self.file.write_all(&entry.to_bytes()) {
            Ok(()) => {
                self.len += RECORD_SIZE as u64;
                self.appended += 1;
                Ok(())
            }
            Err(source) => {
                if let Err(e) = self.file.set_len(self.len) {
                    warn!(path = ?self.path, error = %e, "could not truncate torn dump record");
                }
                Err(RelaccessError::DumpWrite {
                    path: self.path.clone(),
                    source,
                })
            }
        }
    }

    /// Flush appended records to stable storage
    pub fn finish(self) -> Result<()> {
        self.file
            .sync_data()
            .map_err(|source| RelaccessError::DumpWrite {
                path: self.path,
                source,
            })
    }
}

/// Read a dump file without taking the file lock.
///
/// For offline tools that run while no server owns the directory.
pub fn read_dump_file(path: &Path) -> Result<Vec<AggregateEntry>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut buf = [0u8; RECORD_SIZE];

    loop {
        let filled = fill_record(&mut reader, &mut buf)?;
        if filled == 0 {
            break;
        }
        if filled < RECORD_SIZE {
            warn!(
                path = ?path,
                trailing_bytes = filled,
                "ignoring torn record at end of dump file"
            );
            break;
        }
        records.push(AggregateEntry::from_bytes(&buf));
    }

    Ok(records)
}

/// List dump files in `dir` without taking the file lock
pub fn list_dump_files(dir: &Path) -> Result<Vec<DumpFileInfo>> {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for dir_entry in read_dir {
        let dir_entry = dir_entry?;
        let name = dir_entry.file_name();
        let Some(database_id) = name.to_str().and_then(parse_dump_file_name) else {
            continue;
        };
        let size_bytes = dir_entry.metadata()?.len();
        files.push(DumpFileInfo {
            database_id,
            path: dir_entry.path(),
            size_bytes,
            records: size_bytes / RECORD_SIZE as u64,
            trailing_bytes: size_bytes % RECORD_SIZE as u64,
        });
    }
    files.sort_by_key(|f| f.database_id);
    Ok(files)
}

/// Read up to one record; returns the number of bytes filled
fn fill_record<R: Read>(reader: &mut R, buf: &mut [u8; RECORD_SIZE]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < RECORD_SIZE {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaccess_core::{AccessKey, Permissions, RelationName};
    use tempfile::tempdir;

    fn entry(database_id: DatabaseId, relation_id: u32) -> AggregateEntry {
        let mut entry = AggregateEntry::new(AccessKey::new(database_id, relation_id));
        entry.relation_name = RelationName::new(&format!("t{}", relation_id));
        entry.count_permissions(Permissions::SELECT);
        entry.observe_read(10, 1_000 + relation_id as i64);
        entry
    }

    #[test]
    fn test_file_name_round_trip() {
        let path = dump_file_path(Path::new("/stats"), 16384);
        assert_eq!(
            path,
            PathBuf::from("/stats/relaccess_stats_dump_16384.dump")
        );
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(parse_dump_file_name(name), Some(16384));
        assert_eq!(parse_dump_file_name("relaccess_stats_dump_x.dump"), None);
        assert_eq!(parse_dump_file_name("relaccess_stats_dump_1.csv"), None);
        assert_eq!(parse_dump_file_name("pgstat.stat"), None);
    }

    #[test]
    fn test_append_and_read() {
        let dir = tempdir().unwrap();
        let dumps = DumpDirectory::new(dir.path().join("pg_stat"));

        let files = dumps.lock();
        let mut writer = files.open_append(5).unwrap();
        writer.append(&entry(5, 1)).unwrap();
        writer.append(&entry(5, 2)).unwrap();
        assert_eq!(writer.appended(), 2);
        writer.finish().unwrap();

        // second pass appends after the first
        let mut writer = files.open_append(5).unwrap();
        writer.append(&entry(5, 1)).unwrap();
        writer.finish().unwrap();

        let records = files.read(5).unwrap();
        assert_eq!(records, vec![entry(5, 1), entry(5, 2), entry(5, 1)]);
        assert!(files.read(6).unwrap().is_empty());
    }

    #[test]
    fn test_torn_trailing_record_ignored() {
        let dir = tempdir().unwrap();
        let dumps = DumpDirectory::new(dir.path());
        let path = dumps.path_for(9);

        let mut bytes = entry(9, 1).to_bytes().to_vec();
        bytes.extend_from_slice(&entry(9, 2).to_bytes()[..40]);
        fs::write(&path, &bytes).unwrap();

        assert_eq!(dumps.lock().read(9).unwrap(), vec![entry(9, 1)]);

        let listed = dumps.lock().list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].records, 1);
        assert_eq!(listed[0].trailing_bytes, 40);
    }

    #[test]
    fn test_foreign_record_rejected() {
        let dir = tempdir().unwrap();
        let dumps = DumpDirectory::new(dir.path());
        fs::write(dumps.path_for(4), entry(5, 1).to_bytes()).unwrap();

        let err = dumps.lock().read(4).unwrap_err();
        assert!(matches!(err, RelaccessError::InvalidRecord(_)));
    }

    #[test]
    fn test_remove_and_list() {
        let dir = tempdir().unwrap();
        let dumps = DumpDirectory::new(dir.path());
        let files = dumps.lock();

        for db in [3, 1, 2] {
            let mut writer = files.open_append(db).unwrap();
            writer.append(&entry(db, 1)).unwrap();
            writer.finish().unwrap();
        }
        fs::write(dir.path().join("unrelated.txt"), b"x").unwrap();

        let ids: Vec<_> = files.list().unwrap().iter().map(|f| f.database_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        assert!(files.remove(2).unwrap());
        assert!(!files.remove(2).unwrap());
        assert_eq!(files.list().unwrap().len(), 2);
    }

    #[test]
    fn test_list_missing_directory() {
        let dir = tempdir().unwrap();
        assert!(list_dump_files(&dir.path().join("absent")).unwrap().is_empty());
    }
}
