//! Paged row export from the source.
//!
//! Each export runs on a dedicated blocking task that owns its own
//! read-only connection and feeds a bounded channel, so source reads
//! overlap target writes without unbounded buffering. Rows are read in
//! rowid order (declared primary key order for WITHOUT ROWID tables),
//! which makes the sequence deterministic and each table restartable
//! from scratch.

use super::introspect::quote_ident;
use crate::config::ValueErrorPolicy;
use crate::error::{MigrateError, Result};
use crate::schema::{Column, Table};
use crate::value::{Row, SqlValue};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Options for a table export.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Rows per page (and per delivered batch).
    pub batch_size: usize,

    /// Policy for values that cannot be coerced.
    pub on_value_error: ValueErrorPolicy,
}

/// A page of converted rows.
#[derive(Debug)]
pub struct RowBatch {
    /// Converted rows, aligned to the table's column order.
    pub rows: Vec<Row>,

    /// Zero-based offset of the first row of this batch within the
    /// table's read order (skipped rows included).
    pub first_offset: u64,

    /// Rows dropped from this page under the skip_row policy.
    pub skipped: u64,
}

/// Receiver side of a table export.
pub struct TableStream {
    rx: mpsc::Receiver<Result<RowBatch>>,
}

impl TableStream {
    /// Next page, or `None` when the table is exhausted.
    pub async fn next_batch(&mut self) -> Option<Result<RowBatch>> {
        self.rx.recv().await
    }
}

/// Start an export task for one table.
pub(crate) fn export(path: PathBuf, table: Table, opts: ExportOptions) -> TableStream {
    let (tx, rx) = mpsc::channel(2);

    tokio::task::spawn_blocking(move || {
        let conn = match Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        ) {
            Ok(conn) => conn,
            Err(e) => {
                let _ = tx.blocking_send(Err(e.into()));
                return;
            }
        };

        if let Err(e) = read_pages(&conn, &table, &opts, &tx) {
            let _ = tx.blocking_send(Err(e));
        }
    });

    TableStream { rx }
}

/// Read all pages of a table and push them into the channel.
///
/// Returns early (Ok) if the receiver goes away.
fn read_pages(
    conn: &Connection,
    table: &Table,
    opts: &ExportOptions,
    tx: &mpsc::Sender<Result<RowBatch>>,
) -> Result<()> {
    let col_list: Vec<String> = table.columns.iter().map(|c| quote_ident(&c.name)).collect();
    let quoted_table = quote_ident(&table.name);

    // Keyset pagination over rowid; WITHOUT ROWID tables fall back to
    // OFFSET paging in primary-key order.
    let sql = if table.without_rowid {
        let pk_order: Vec<String> = table.primary_key.iter().map(|c| quote_ident(c)).collect();
        format!(
            "SELECT 0, {} FROM {} ORDER BY {} LIMIT ?1 OFFSET ?2",
            col_list.join(", "),
            quoted_table,
            pk_order.join(", ")
        )
    } else {
        format!(
            "SELECT rowid, {} FROM {} WHERE rowid > ?2 ORDER BY rowid LIMIT ?1",
            col_list.join(", "),
            quoted_table
        )
    };

    let mut stmt = conn.prepare(&sql)?;
    let mut cursor: i64 = 0;
    let mut offset: u64 = 0;

    loop {
        let mut rows = stmt.query(rusqlite::params![opts.batch_size as i64, cursor])?;
        let mut batch = RowBatch {
            rows: Vec::with_capacity(opts.batch_size),
            first_offset: offset,
            skipped: 0,
        };
        let mut page_len: u64 = 0;

        while let Some(row) = rows.next()? {
            let key: i64 = row.get(0)?;
            page_len += 1;

            match convert_row(table, row, offset) {
                Ok(values) => batch.rows.push(values),
                Err(e) => match opts.on_value_error {
                    ValueErrorPolicy::SkipRow => {
                        warn!("skipping row: {}", e);
                        batch.skipped += 1;
                    }
                    ValueErrorPolicy::AbortTable | ValueErrorPolicy::AbortRun => {
                        return Err(e);
                    }
                },
            }

            offset += 1;
            if !table.without_rowid {
                cursor = key;
            }
        }

        if table.without_rowid {
            cursor += page_len as i64;
        }

        let exhausted = page_len < opts.batch_size as u64;
        if !batch.rows.is_empty() || batch.skipped > 0 {
            debug!(
                "{}: read page of {} rows ({} skipped)",
                table.name,
                batch.rows.len(),
                batch.skipped
            );
            if tx.blocking_send(Ok(batch)).is_err() {
                return Ok(());
            }
        }
        if exhausted {
            return Ok(());
        }
    }
}

/// Convert one source row to the committed target types.
fn convert_row(table: &Table, row: &rusqlite::Row<'_>, offset: u64) -> Result<Row> {
    let mut values = Vec::with_capacity(table.columns.len());
    for (i, col) in table.columns.iter().enumerate() {
        // Column 0 is the pagination key.
        let raw = row.get_ref(i + 1)?;
        values.push(convert_value(&table.name, col, raw, offset)?);
    }
    Ok(values)
}

/// Coerce a raw source value to a column's target type.
///
/// NULLs pass through untouched. Anything that does not fit the committed
/// type is an error carrying enough context to locate the offending cell;
/// nothing is silently reinterpreted.
fn convert_value(table: &str, col: &Column, raw: ValueRef<'_>, offset: u64) -> Result<SqlValue> {
    if matches!(raw, ValueRef::Null) {
        return Ok(SqlValue::Null);
    }

    let target = col.target_type.as_deref().unwrap_or("TEXT");
    let fail = |value: SqlValue| -> MigrateError {
        MigrateError::ValueConversion {
            table: table.to_string(),
            column: col.name.clone(),
            row_offset: offset,
            value: value.render(),
            target_type: target.to_string(),
        }
    };

    if target.starts_with("TINYINT") {
        return coerce_integer(raw, -128, 127, fail);
    }
    if target.starts_with("SMALLINT") {
        return coerce_integer(raw, i16::MIN as i64, i16::MAX as i64, fail);
    }
    if target.starts_with("BIGINT") {
        return coerce_integer(raw, i64::MIN, i64::MAX, fail);
    }
    if target.starts_with("INT") {
        return coerce_integer(raw, i32::MIN as i64, i32::MAX as i64, fail);
    }

    if let Some(max_len) = bounded_length(target, "VARCHAR(") {
        return match raw {
            ValueRef::Text(bytes) => {
                let text = utf8_text(bytes, &fail)?;
                if text.chars().count() > max_len {
                    Err(fail(SqlValue::Text(text)))
                } else {
                    Ok(SqlValue::Text(text))
                }
            }
            ValueRef::Integer(i) => Ok(SqlValue::Text(i.to_string())),
            ValueRef::Real(f) => Ok(SqlValue::Text(f.to_string())),
            ValueRef::Blob(b) => Err(fail(SqlValue::Blob(b.to_vec()))),
            ValueRef::Null => unreachable!(),
        };
    }

    if target == "TEXT" {
        return match raw {
            ValueRef::Text(bytes) => Ok(SqlValue::Text(utf8_text(bytes, &fail)?)),
            ValueRef::Integer(i) => Ok(SqlValue::Text(i.to_string())),
            ValueRef::Real(f) => Ok(SqlValue::Text(f.to_string())),
            ValueRef::Blob(b) => Err(fail(SqlValue::Blob(b.to_vec()))),
            ValueRef::Null => unreachable!(),
        };
    }

    if let Some(max_len) = bounded_length(target, "VARBINARY(") {
        return match raw {
            ValueRef::Blob(b) if b.len() <= max_len => Ok(SqlValue::Blob(b.to_vec())),
            ValueRef::Text(b) if b.len() <= max_len => Ok(SqlValue::Blob(b.to_vec())),
            other => Err(fail(owned(other))),
        };
    }

    if target == "BLOB" {
        return match raw {
            ValueRef::Blob(b) => Ok(SqlValue::Blob(b.to_vec())),
            ValueRef::Text(b) => Ok(SqlValue::Blob(b.to_vec())),
            other => Err(fail(owned(other))),
        };
    }

    if target == "DOUBLE" {
        return match raw {
            ValueRef::Real(f) => Ok(SqlValue::Real(f)),
            ValueRef::Integer(i) => Ok(SqlValue::Real(i as f64)),
            ValueRef::Text(bytes) => {
                let text = utf8_text(bytes, &fail)?;
                text.trim()
                    .parse::<f64>()
                    .map(SqlValue::Real)
                    .map_err(|_| fail(SqlValue::Text(text)))
            }
            other => Err(fail(owned(other))),
        };
    }

    if target.starts_with("DECIMAL") {
        return match raw {
            ValueRef::Integer(i) => Ok(SqlValue::Integer(i)),
            ValueRef::Real(f) => Ok(SqlValue::Real(f)),
            ValueRef::Text(bytes) => {
                let text = utf8_text(bytes, &fail)?;
                if text.trim().parse::<f64>().is_ok() {
                    Ok(SqlValue::Text(text))
                } else {
                    Err(fail(SqlValue::Text(text)))
                }
            }
            other => Err(fail(owned(other))),
        };
    }

    if target == "DATETIME" {
        return match raw {
            ValueRef::Text(bytes) => Ok(SqlValue::Text(utf8_text(bytes, &fail)?)),
            ValueRef::Integer(i) => epoch_to_datetime(i).ok_or_else(|| fail(SqlValue::Integer(i))),
            other => Err(fail(owned(other))),
        };
    }

    if target == "TIME" {
        return match raw {
            ValueRef::Text(bytes) => Ok(SqlValue::Text(utf8_text(bytes, &fail)?)),
            other => Err(fail(owned(other))),
        };
    }

    // Unrecognized target types take the value as-is.
    Ok(owned(raw))
}

fn coerce_integer(
    raw: ValueRef<'_>,
    min: i64,
    max: i64,
    fail: impl Fn(SqlValue) -> MigrateError,
) -> Result<SqlValue> {
    match raw {
        ValueRef::Integer(i) if (min..=max).contains(&i) => Ok(SqlValue::Integer(i)),
        ValueRef::Integer(i) => Err(fail(SqlValue::Integer(i))),
        ValueRef::Text(bytes) => {
            let text = utf8_text(bytes, &fail)?;
            let parsed = text.trim().parse::<i64>();
            match parsed {
                Ok(i) if (min..=max).contains(&i) => Ok(SqlValue::Integer(i)),
                _ => Err(fail(SqlValue::Text(text))),
            }
        }
        other => Err(fail(owned(other))),
    }
}

fn utf8_text(bytes: &[u8], fail: &impl Fn(SqlValue) -> MigrateError) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| fail(SqlValue::Blob(e.into_bytes())))
}

fn owned(raw: ValueRef<'_>) -> SqlValue {
    match raw {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(f) => SqlValue::Real(f),
        ValueRef::Text(b) => match String::from_utf8(b.to_vec()) {
            Ok(s) => SqlValue::Text(s),
            Err(e) => SqlValue::Blob(e.into_bytes()),
        },
        ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
    }
}

/// Parse the bound out of targets like "VARCHAR(255)".
fn bounded_length(target: &str, prefix: &str) -> Option<usize> {
    let rest = target.strip_prefix(prefix)?;
    rest.strip_suffix(')')?.trim().parse().ok()
}

/// Normalize an epoch integer into a timestamp.
///
/// Values past the year-2096 sentinel are taken as milliseconds.
fn epoch_to_datetime(epoch: i64) -> Option<SqlValue> {
    const MILLIS_SENTINEL: i64 = 4_000_000_000;
    let secs = if epoch.abs() > MILLIS_SENTINEL {
        epoch / 1000
    } else {
        epoch
    };
    chrono::DateTime::from_timestamp(secs, 0).map(|dt| SqlValue::DateTime(dt.naive_utc()))
}
