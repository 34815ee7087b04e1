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

//! Access identifiers and permission bits
//!
//! Every access event carries a permission set describing what a statement
//! did to a relation. The set is split into a *write* side
//! (insert, update, delete, truncate) and a *read* side (select with no write
//! bit). A permission set with any write bit never counts as a read.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Database object identifier
pub type DatabaseId = u32;

/// Relation (table or view) object identifier
pub type RelationId = u32;

/// Role identifier of the reader or writer
pub type ActorId = u32;

/// Microseconds since the Unix epoch. `0` means "never".
pub type Timestamp = i64;

/// Identifier value meaning "no actor recorded yet"
pub const INVALID_ID: u32 = 0;

/// Current wall-clock time in microseconds since the Unix epoch
pub fn now_micros() -> Timestamp {
    chrono::Utc::now().timestamp_micros()
}

/// Key of the shared aggregate store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccessKey {
    pub database_id: DatabaseId,
    pub relation_id: RelationId,
}

impl AccessKey {
    pub fn new(database_id: DatabaseId, relation_id: RelationId) -> Self {
        Self {
            database_id,
            relation_id,
        }
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.database_id, self.relation_id)
    }
}

/// Set of permissions used by a statement on one relation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permissions(u8);

impl Permissions {
    pub const NONE: Permissions = Permissions(0);
    pub const SELECT: Permissions = Permissions(1 << 0);
    pub const INSERT: Permissions = Permissions(1 << 1);
    pub const UPDATE: Permissions = Permissions(1 << 2);
    pub const DELETE: Permissions = Permissions(1 << 3);
    pub const TRUNCATE: Permissions = Permissions(1 << 4);

    const WRITE_MASK: u8 =
        Self::INSERT.0 | Self::UPDATE.0 | Self::DELETE.0 | Self::TRUNCATE.0;
    const ALL_MASK: u8 = Self::SELECT.0 | Self::WRITE_MASK;

    /// Build from raw bits, dropping bits that are not tracked
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Permissions(bits & Self::ALL_MASK)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    /// Any of insert, update, delete or truncate
    pub const fn is_write(self) -> bool {
        self.0 & Self::WRITE_MASK != 0
    }

    /// Select without any write bit
    pub const fn is_read(self) -> bool {
        !self.is_write() && self.0 & Self::SELECT.0 != 0
    }
}

impl BitOr for Permissions {
    type Output = Permissions;

    fn bitor(self, rhs: Self) -> Self::Output {
        Permissions(self.0 | rhs.0)
    }
}

impl BitOrAssign for Permissions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Permissions, &str); 5] = [
            (Permissions::SELECT, "select"),
            (Permissions::INSERT, "insert"),
            (Permissions::UPDATE, "update"),
            (Permissions::DELETE, "delete"),
            (Permissions::TRUNCATE, "truncate"),
        ];
        let mut first = true;
        for (perm, name) in NAMES {
            if self.contains(perm) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("none")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_classification() {
        assert!(Permissions::SELECT.is_read());
        assert!(!Permissions::SELECT.is_write());

        // UPDATE ... WHERE needs select too, but it is a write only
        let update_where = Permissions::SELECT | Permissions::UPDATE;
        assert!(update_where.is_write());
        assert!(!update_where.is_read());

        assert!(Permissions::TRUNCATE.is_write());
        assert!(!Permissions::NONE.is_read());
        assert!(!Permissions::NONE.is_write());
    }

    #[test]
    fn test_from_bits_truncate_drops_unknown_bits() {
        let perms = Permissions::from_bits_truncate(0xFF);
        assert_eq!(perms.bits(), 0b1_1111);
        assert!(Permissions::from_bits_truncate(0b1110_0000).is_empty());
    }

    #[test]
    fn test_display() {
        let perms = Permissions::SELECT | Permissions::DELETE;
        assert_eq!(perms.to_string(), "select|delete");
        assert_eq!(Permissions::NONE.to_string(), "none");
    }
}
