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

//! Aggregate access entry and its fixed-size dump record
//!
//! **Record layout (136 bytes, little-endian):**
//! ```text
//! ┌────────┬──────┬─────────────────────────────────────────┐
//! │ offset │ size │ field                                   │
//! ├────────┼──────┼─────────────────────────────────────────┤
//! │      0 │    4 │ relation_id                             │
//! │      4 │    4 │ database_id                             │
//! │      8 │   64 │ relation_name (NUL padded)              │
//! │     72 │    4 │ last_reader_id                          │
//! │     76 │    4 │ last_writer_id                          │
//! │     80 │    8 │ last_read_time                          │
//! │     88 │    8 │ last_write_time                         │
//! │     96 │   40 │ n_select n_insert n_update n_delete     │
//! │        │      │ n_truncate                              │
//! └────────┴──────┴─────────────────────────────────────────┘
//! ```
//! No header, no count, no checksum: dump files are plain record sequences.

use crate::access::{AccessKey, ActorId, Permissions, Timestamp, INVALID_ID};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of the on-disk name slot, including the terminating NUL
pub const NAME_SLOT_LEN: usize = 64;

/// Longest relation name kept, in bytes
pub const MAX_NAME_LEN: usize = NAME_SLOT_LEN - 1;

/// Size of one dump record in bytes
pub const RECORD_SIZE: usize = 136;

const NAME_OFFSET: usize = 8;
const COUNTERS_OFFSET: usize = 96;

/// Relation name bounded to [`MAX_NAME_LEN`] bytes
///
/// Longer names are cut at the last UTF-8 character boundary that fits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct RelationName(String);

impl RelationName {
    pub fn new(name: &str) -> Self {
        let mut end = name.len().min(MAX_NAME_LEN);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        // An embedded NUL would end the name on disk anyway
        let name = &name[..end];
        let name = name.split('\0').next().unwrap_or_default();
        RelationName(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn encode_into(&self, slot: &mut [u8]) {
        slot.fill(0);
        slot[..self.0.len()].copy_from_slice(self.0.as_bytes());
    }

    fn decode(slot: &[u8]) -> Self {
        let len = slot.iter().position(|b| *b == 0).unwrap_or(slot.len());
        RelationName::new(&String::from_utf8_lossy(&slot[..len]))
    }
}

impl From<String> for RelationName {
    fn from(name: String) -> Self {
        RelationName::new(&name)
    }
}

impl From<&str> for RelationName {
    fn from(name: &str) -> Self {
        RelationName::new(name)
    }
}

impl From<RelationName> for String {
    fn from(name: RelationName) -> Self {
        name.0
    }
}

impl fmt::Display for RelationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cumulative access statistics of one relation in one database
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateEntry {
    pub key: AccessKey,
    pub relation_name: RelationName,
    pub last_reader_id: ActorId,
    pub last_writer_id: ActorId,
    pub last_read_time: Timestamp,
    pub last_write_time: Timestamp,
    pub n_select: u64,
    pub n_insert: u64,
    pub n_update: u64,
    pub n_delete: u64,
    pub n_truncate: u64,
}

impl AggregateEntry {
    /// Zeroed entry for a key that has not been seen yet
    pub fn new(key: AccessKey) -> Self {
        Self {
            key,
            last_reader_id: INVALID_ID,
            last_writer_id: INVALID_ID,
            ..Default::default()
        }
    }

    /// Add one to every counter whose permission bit is set
    pub fn count_permissions(&mut self, perms: Permissions) {
        let bump = |counter: &mut u64, perm: Permissions| {
            if perms.contains(perm) {
                *counter = counter.saturating_add(1);
            }
        };
        bump(&mut self.n_select, Permissions::SELECT);
        bump(&mut self.n_insert, Permissions::INSERT);
        bump(&mut self.n_update, Permissions::UPDATE);
        bump(&mut self.n_delete, Permissions::DELETE);
        bump(&mut self.n_truncate, Permissions::TRUNCATE);
    }

    /// Record a read if it is strictly newer than the last one
    pub fn observe_read(&mut self, reader: ActorId, at: Timestamp) -> bool {
        if at > self.last_read_time {
            self.last_read_time = at;
            self.last_reader_id = reader;
            true
        } else {
            false
        }
    }

    /// Record a write if it is strictly newer than the last one
    pub fn observe_write(&mut self, writer: ActorId, at: Timestamp) -> bool {
        if at > self.last_write_time {
            self.last_write_time = at;
            self.last_writer_id = writer;
            true
        } else {
            false
        }
    }

    /// Fold a later record of the same key into this one.
    ///
    /// Counters add up, the newest read and write win, and a non-empty name
    /// of `later` replaces ours since it was observed after it.
    pub fn absorb(&mut self, later: &AggregateEntry) {
        debug_assert_eq!(self.key, later.key);
        self.n_select = self.n_select.saturating_add(later.n_select);
        self.n_insert = self.n_insert.saturating_add(later.n_insert);
        self.n_update = self.n_update.saturating_add(later.n_update);
        self.n_delete = self.n_delete.saturating_add(later.n_delete);
        self.n_truncate = self.n_truncate.saturating_add(later.n_truncate);
        self.observe_read(later.last_reader_id, later.last_read_time);
        self.observe_write(later.last_writer_id, later.last_write_time);
        if !later.relation_name.is_empty() {
            self.relation_name = later.relation_name.clone();
        }
    }

    /// Total number of statements counted for this relation
    pub fn total_accesses(&self) -> u64 {
        self.n_select
            .saturating_add(self.n_insert)
            .saturating_add(self.n_update)
            .saturating_add(self.n_delete)
            .saturating_add(self.n_truncate)
    }

    /// Serialize to a fixed-size dump record
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.key.relation_id);
        LittleEndian::write_u32(&mut buf[4..8], self.key.database_id);
        self.relation_name
            .encode_into(&mut buf[NAME_OFFSET..NAME_OFFSET + NAME_SLOT_LEN]);
        LittleEndian::write_u32(&mut buf[72..76], self.last_reader_id);
        LittleEndian::write_u32(&mut buf[76..80], self.last_writer_id);
        LittleEndian::write_i64(&mut buf[80..88], self.last_read_time);
        LittleEndian::write_i64(&mut buf[88..96], self.last_write_time);
        LittleEndian::write_u64_into(
            &[
                self.n_select,
                self.n_insert,
                self.n_update,
                self.n_delete,
                self.n_truncate,
            ],
            &mut buf[COUNTERS_OFFSET..],
        );
        buf
    }

    /// Deserialize a fixed-size dump record
    pub fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Self {
        let mut counters = [0u64; 5];
        LittleEndian::read_u64_into(&bytes[COUNTERS_OFFSET..], &mut counters);
        let [n_select, n_insert, n_update, n_delete, n_truncate] = counters;

        Self {
            key: AccessKey {
                relation_id: LittleEndian::read_u32(&bytes[0..4]),
                database_id: LittleEndian::read_u32(&bytes[4..8]),
            },
            relation_name: RelationName::decode(
                &bytes[NAME_OFFSET..NAME_OFFSET + NAME_SLOT_LEN],
            ),
            last_reader_id: LittleEndian::read_u32(&bytes[72..76]),
            last_writer_id: LittleEndian::read_u32(&bytes[76..80]),
            last_read_time: LittleEndian::read_i64(&bytes[80..88]),
            last_write_time: LittleEndian::read_i64(&bytes[88..96]),
            n_select,
            n_insert,
            n_update,
            n_delete,
            n_truncate,
        }
    }
}
