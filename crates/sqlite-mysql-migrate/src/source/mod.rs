//! SQLite source database operations.

mod export;
mod introspect;

pub use export::{ExportOptions, RowBatch, TableStream};

use crate::config::SourceConfig;
use crate::error::{MigrateError, Result};
use crate::schema::Table;
use rusqlite::{Connection, OpenFlags};
use std::path::PathBuf;
use tracing::info;

/// Handle to the source SQLite file.
///
/// The file is opened read-only; each catalog pass and each table export
/// opens its own connection, which is what makes per-table export
/// restartable. The file must not be written by another process for the
/// run's duration — an operational precondition, not something enforced
/// here.
pub struct SqliteSource {
    path: PathBuf,
}

impl SqliteSource {
    /// Open the source, verifying that the file is a readable database.
    pub fn open(config: &SourceConfig) -> Result<Self> {
        let source = Self {
            path: config.path.clone(),
        };

        // Probe: a bad path or a non-database file fails here, before
        // anything touches the target.
        let conn = source.connect()?;
        let schema_version: i64 = conn
            .query_row("PRAGMA schema_version", [], |row| row.get(0))
            .map_err(|e| {
                MigrateError::schema_read(format!(
                    "cannot read {}: {}",
                    source.path.display(),
                    e
                ))
            })?;

        info!(
            "Connected to SQLite source: {} (schema version {})",
            source.path.display(),
            schema_version
        );
        Ok(source)
    }

    /// Open a fresh read-only connection.
    pub(crate) fn connect(&self) -> Result<Connection> {
        Ok(Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?)
    }

    /// Read the catalog into the table model.
    ///
    /// Covers every user table; system artifacts (`sqlite_sequence`,
    /// `sqlite_autoindex_*` and friends) are excluded. No side effects
    /// beyond reads.
    pub fn introspect(&self) -> Result<Vec<Table>> {
        let conn = self.connect()?;
        introspect::introspect(&conn)
    }

    /// Start streaming a table's rows.
    ///
    /// Rows are read in pages on a dedicated blocking task that owns its
    /// own connection, and delivered through a bounded channel. Every
    /// call restarts the table from the beginning.
    pub fn export(&self, table: &Table, opts: ExportOptions) -> TableStream {
        export::export(self.path.clone(), table.clone(), opts)
    }

    /// Current row count of a table.
    pub fn row_count(&self, table: &str) -> Result<i64> {
        let conn = self.connect()?;
        let count = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", introspect::quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
