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

//! Durable-storage ingestion of dump files

use relaccess_core::{CollaboratorError, DatabaseId};
use std::path::Path;

/// Folds a database's dump file into permanent storage.
///
/// Implementations must be idempotent upserts: a flush whose ingestion
/// failed keeps the file, and the next flush hands the same records over
/// again, possibly with more appended.
pub trait StatsIngestor: Send + Sync {
    fn ingest(&self, database_id: DatabaseId, dump_path: &Path) -> Result<(), CollaboratorError>;
}

impl<F> StatsIngestor for F
where
    F: Fn(DatabaseId, &Path) -> Result<(), CollaboratorError> + Send + Sync,
{
    fn ingest(&self, database_id: DatabaseId, dump_path: &Path) -> Result<(), CollaboratorError> {
        self(database_id, dump_path)
    }
}

/// Ingestor for deployments without permanent storage; flushes only
/// remove the dump file
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardIngestor;

impl StatsIngestor for DiscardIngestor {
    fn ingest(&self, _database_id: DatabaseId, _dump_path: &Path) -> Result<(), CollaboratorError> {
        Ok(())
    }
}
