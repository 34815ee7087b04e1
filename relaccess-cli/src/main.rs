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

//! Relaccess CLI
//!
//! Operator tool for the dump files of a statistics directory.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relaccess_core::{
    AccessKey, AggregateEntry, DatabaseId, RelaccessConfig, Timestamp, DEFAULT_STATS_DIR,
};
use relaccess_storage::{list_dump_files, read_dump_file, DumpDirectory};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relaccess")]
#[command(about = "Relaccess - relation access statistics dump files", long_about = None)]
struct Cli {
    /// Statistics directory (defaults to the configured one)
    #[arg(short, long, env = "RELACCESS_STATS_DIR")]
    stats_dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose mode
    #[arg(short, long)]
    verbose: bool,

    /// Output as JSON (machine-readable)
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List dump files in the statistics directory
    List,

    /// Print the records of one database's dump file without removing it
    Show {
        /// Database ID
        database_id: DatabaseId,

        /// Fold records of the same relation into one
        #[arg(long)]
        merge: bool,
    },

    /// Delete one database's dump file
    Purge {
        /// Database ID
        database_id: DatabaseId,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let stats_dir = resolve_stats_dir(cli.stats_dir, cli.config.as_deref())?;
    debug!(stats_dir = ?stats_dir, "using statistics directory");

    match cli.command {
        Commands::List => {
            let files = list_dump_files(&stats_dir)
                .with_context(|| format!("Failed to list {:?}", stats_dir))?;

            if cli.json {
                let files: Vec<_> = files
                    .iter()
                    .map(|f| {
                        serde_json::json!({
                            "database_id": f.database_id,
                            "path": f.path.to_string_lossy(),
                            "size_bytes": f.size_bytes,
                            "records": f.records,
                            "trailing_bytes": f.trailing_bytes,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&files)?);
            } else if files.is_empty() {
                println!("No dump files in {:?}", stats_dir);
            } else {
                println!("{:>12}  {:>10}  {:>12}  PATH", "DATABASE", "RECORDS", "BYTES");
                for f in &files {
                    let torn = if f.trailing_bytes > 0 { " (torn tail)" } else { "" };
                    println!(
                        "{:>12}  {:>10}  {:>12}  {}{}",
                        f.database_id,
                        f.records,
                        f.size_bytes,
                        f.path.display(),
                        torn
                    );
                }
            }
        }

        Commands::Show { database_id, merge } => {
            let dumps = DumpDirectory::new(&stats_dir);
            let path = dumps.path_for(database_id);
            let mut records = read_dump_file(&path)
                .with_context(|| format!("Failed to read dump file {:?}", path))?;
            if merge {
                records = merge_records(records);
            }

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No records for database {}", database_id);
            } else {
                print_records(&records);
            }
        }

        Commands::Purge { database_id } => {
            let dumps = DumpDirectory::new(&stats_dir);
            let removed = dumps
                .lock()
                .remove(database_id)
                .with_context(|| format!("Failed to remove dump file of database {}", database_id))?;

            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({"database_id": database_id, "removed": removed})
                );
            } else if removed {
                info!(database_id, "dump file removed");
                println!("✓ Removed {:?}", dumps.path_for(database_id));
            } else {
                println!("No dump file for database {}", database_id);
            }
        }
    }

    Ok(())
}

/// `--stats-dir` (or `RELACCESS_STATS_DIR`), else the config file's, else
/// the default
fn resolve_stats_dir(explicit: Option<PathBuf>, config: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }
    match config {
        Some(path) => {
            let config = RelaccessConfig::load(path)
                .with_context(|| format!("Failed to load config {:?}", path))?;
            Ok(config.stats_dir)
        }
        None => Ok(PathBuf::from(DEFAULT_STATS_DIR)),
    }
}

/// Fold records of the same relation, in file order, into one per relation
fn merge_records(records: Vec<AggregateEntry>) -> Vec<AggregateEntry> {
    let mut merged: BTreeMap<AccessKey, AggregateEntry> = BTreeMap::new();
    for record in records {
        match merged.get_mut(&record.key) {
            Some(existing) => existing.absorb(&record),
            None => {
                merged.insert(record.key, record);
            }
        }
    }
    merged.into_values().collect()
}

fn print_records(records: &[AggregateEntry]) {
    println!(
        "{:>10}  {:<24} {:>8} {:>8} {:>8} {:>8} {:>8}  {:<26} {:<26}",
        "RELATION", "NAME", "SELECT", "INSERT", "UPDATE", "DELETE", "TRUNC", "LAST READ", "LAST WRITE"
    );
    for r in records {
        println!(
            "{:>10}  {:<24} {:>8} {:>8} {:>8} {:>8} {:>8}  {:<26} {:<26}",
            r.key.relation_id,
            r.relation_name.as_str(),
            r.n_select,
            r.n_insert,
            r.n_update,
            r.n_delete,
            r.n_truncate,
            format_access(r.last_read_time, r.last_reader_id),
            format_access(r.last_write_time, r.last_writer_id),
        );
    }
}

fn format_access(at: Timestamp, actor: u32) -> String {
    if at == 0 {
        return "-".to_string();
    }
    match chrono::DateTime::from_timestamp_micros(at) {
        Some(time) => format!("{} by {}", time.format("%Y-%m-%d %H:%M:%S"), actor),
        None => format!("{}us by {}", at, actor),
    }
}
