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

//! Configuration for access statistics collection
//!
//! Settings come from a TOML file, environment variables, or both
//! (environment wins). `max_tables` sizes the shared store once at startup;
//! `enabled` and `dump_on_overflow` may be changed on a running collector.

use crate::error::{RelaccessError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// Default capacity of the shared aggregate store
pub const DEFAULT_MAX_TABLES: usize = 65_536;

/// Smallest accepted capacity of the shared aggregate store
pub const MIN_MAX_TABLES: usize = 128;

/// Default directory for dump files
pub const DEFAULT_STATS_DIR: &str = "pg_stat";

pub const ENV_MAX_TABLES: &str = "RELACCESS_MAX_TABLES";
pub const ENV_DUMP_ON_OVERFLOW: &str = "RELACCESS_DUMP_ON_OVERFLOW";
pub const ENV_ENABLED: &str = "RELACCESS_ENABLED";
pub const ENV_STATS_DIR: &str = "RELACCESS_STATS_DIR";

/// Access statistics configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaccessConfig {
    /// Maximum number of (database, relation) entries kept in memory.
    /// Fixed for the lifetime of the process.
    pub max_tables: usize,

    /// Spill the store to dump files when it is full instead of dropping
    /// updates for new relations
    pub dump_on_overflow: bool,

    /// Collect access events at all
    pub enabled: bool,

    /// Directory holding one dump file per database
    pub stats_dir: PathBuf,
}

impl Default for RelaccessConfig {
    fn default() -> Self {
        Self {
            max_tables: DEFAULT_MAX_TABLES,
            dump_on_overflow: false,
            enabled: false,
            stats_dir: PathBuf::from(DEFAULT_STATS_DIR),
        }
    }
}

impl RelaccessConfig {
    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: RelaccessConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file and apply environment overrides on top
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            RelaccessError::Config(format!("cannot read {:?}: {}", path.as_ref(), e))
        })?;
        let mut config = Self::from_toml_str(&source)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults with environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `RELACCESS_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = env::var(ENV_MAX_TABLES) {
            self.max_tables = value.trim().parse().map_err(|_| {
                RelaccessError::Config(format!("{ENV_MAX_TABLES}: invalid number {value:?}"))
            })?;
        }
        if let Ok(value) = env::var(ENV_DUMP_ON_OVERFLOW) {
            self.dump_on_overflow = parse_bool(ENV_DUMP_ON_OVERFLOW, &value)?;
        }
        if let Ok(value) = env::var(ENV_ENABLED) {
            self.enabled = parse_bool(ENV_ENABLED, &value)?;
        }
        if let Ok(value) = env::var(ENV_STATS_DIR) {
            self.stats_dir = PathBuf::from(value);
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_tables < MIN_MAX_TABLES {
            return Err(RelaccessError::Config(format!(
                "max_tables must be at least {}, got {}",
                MIN_MAX_TABLES, self.max_tables
            )));
        }
        if self.stats_dir.as_os_str().is_empty() {
            return Err(RelaccessError::Config("stats_dir must not be empty".into()));
        }
        Ok(())
    }

    /// Same configuration without the minimum capacity check.
    ///
    /// Small stores make overflow easy to reproduce in tests.
    #[doc(hidden)]
    pub fn with_capacity_unchecked(mut self, max_tables: usize) -> Self {
        self.max_tables = max_tables.max(1);
        self
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => Err(RelaccessError::Config(format!(
            "{name}: expected a boolean, got {value:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelaccessConfig::default();
        assert_eq!(config.max_tables, DEFAULT_MAX_TABLES);
        assert!(!config.dump_on_overflow);
        assert!(!config.enabled);
        assert_eq!(config.stats_dir, PathBuf::from("pg_stat"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = RelaccessConfig::from_toml_str(
            r#"
            max_tables = 1024
            dump_on_overflow = true
            "#,
        )
        .unwrap();
        assert_eq!(config.max_tables, 1024);
        assert!(config.dump_on_overflow);
        assert!(!config.enabled);
    }

    #[test]
    fn test_rejects_small_capacity() {
        let err = RelaccessConfig::from_toml_str("max_tables = 16").unwrap_err();
        assert!(matches!(err, RelaccessError::Config(_)));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        assert!(RelaccessConfig::from_toml_str("max_tables = \"lots\"").is_err());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relaccess.toml");
        std::fs::write(&path, "enabled = true\nstats_dir = \"/var/lib/stats\"\n").unwrap();

        let config = RelaccessConfig::load(&path).unwrap();
        assert!(config.enabled);
        assert_eq!(config.stats_dir, PathBuf::from("/var/lib/stats"));
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("X", "on").unwrap());
        assert!(!parse_bool("X", "FALSE").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }

    #[test]
    fn test_capacity_unchecked() {
        let config = RelaccessConfig::default().with_capacity_unchecked(2);
        assert_eq!(config.max_tables, 2);
        assert!(config.validate().is_err());
    }
}
