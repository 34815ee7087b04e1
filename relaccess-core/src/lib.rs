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

//! Relaccess Core
//!
//! Fundamental types for relation access statistics: identifiers,
//! permission bits, the aggregate entry with its dump record codec,
//! configuration and errors.

pub mod access;
pub mod config;
pub mod entry;
pub mod error;

pub use access::{
    now_micros, AccessKey, ActorId, DatabaseId, Permissions, RelationId, Timestamp, INVALID_ID,
};
pub use config::{RelaccessConfig, DEFAULT_MAX_TABLES, DEFAULT_STATS_DIR, MIN_MAX_TABLES};
pub use entry::{AggregateEntry, RelationName, MAX_NAME_LEN, RECORD_SIZE};
pub use error::{CollaboratorError, RelaccessError, Result};
