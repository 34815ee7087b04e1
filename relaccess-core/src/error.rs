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

//! Relaccess error types

use crate::access::DatabaseId;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for relaccess operations
pub type Result<T> = std::result::Result<T, RelaccessError>;

/// Boxed error returned by external collaborators (ingestion sinks)
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while collecting or persisting access statistics
#[derive(Debug, Error)]
pub enum RelaccessError {
    /// IO error outside of a spill pass (reading dumps, deleting files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A dump file could not be opened or appended to
    #[error("could not write relaccess dump file {path:?}: {source}")]
    DumpWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external ingestion collaborator rejected a dump file
    #[error("ingestion of dump for database {database_id} failed: {source}")]
    Ingestion {
        database_id: DatabaseId,
        #[source]
        source: CollaboratorError,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A dump record could not be decoded
    #[error("Invalid dump record: {0}")]
    InvalidRecord(String),
}

impl From<toml::de::Error> for RelaccessError {
    fn from(e: toml::de::Error) -> Self {
        RelaccessError::Config(e.to_string())
    }
}
