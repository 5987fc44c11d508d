//! Type mapping between SQLite and MySQL.
//!
//! The mapper commits to exactly one MySQL type per column, derived from
//! the declared affinity, the declared type text, column name heuristics,
//! and the observed value ranges collected during introspection. It never
//! inspects individual rows; per-row disagreement with the committed type
//! is handled downstream during export.

use crate::error::{MigrateError, Result};
use crate::schema::{Affinity, Column, Table};
use tracing::warn;

/// Maximum length for VARCHAR/VARBINARY on indexed columns.
///
/// 191 utf8mb4 characters keep a single-column index under InnoDB's
/// 767-byte key length limit.
pub const INDEXED_VARCHAR_MAX: u32 = 191;

/// Maximum length for bounded VARCHAR columns.
pub const DEFAULT_VARCHAR_MAX: u32 = 255;

/// Result of mapping a column to its target type.
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    /// Target MySQL type string (e.g. "BIGINT", "VARCHAR(255)").
    pub target_type: String,

    /// Warning message if the mapping is lossy or surprising.
    pub warning: Option<String>,
}

impl ColumnMapping {
    fn plain(target_type: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            warning: None,
        }
    }

    fn with_warning(target_type: impl Into<String>, warning: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            warning: Some(warning.into()),
        }
    }
}

/// Map a single column to its MySQL target type.
///
/// Deterministic and side-effect free; `table` is only used for error and
/// warning context.
pub fn map_column(table: &str, col: &Column) -> Result<ColumnMapping> {
    if col.is_autoincrement && col.affinity != Affinity::Integer {
        return Err(MigrateError::TypeMapping {
            table: table.to_string(),
            column: col.name.clone(),
            message: format!(
                "AUTOINCREMENT on non-integer declared type '{}'",
                col.declared_type
            ),
        });
    }

    let mapping = match col.affinity {
        Affinity::Integer => map_integer(col),
        Affinity::Text => map_text(col),
        Affinity::Real => ColumnMapping::plain("DOUBLE"),
        Affinity::Blob => map_blob(col),
        Affinity::Numeric | Affinity::Unknown => map_declared(table, col),
    };

    Ok(mapping)
}

/// Assign a target type to every column of one table.
///
/// Warnings are logged; a failure means the table's schema cannot be
/// created at all.
pub fn apply_table(table: &mut Table) -> Result<()> {
    let name = table.name.clone();
    for col in &mut table.columns {
        let mapping = map_column(&name, col)?;
        if let Some(w) = &mapping.warning {
            warn!("{}.{}: {}", name, col.name, w);
        }
        col.target_type = Some(mapping.target_type);
    }
    Ok(())
}

/// Assign target types across a whole model.
pub fn apply(tables: &mut [Table]) -> Result<()> {
    for table in tables {
        apply_table(table)?;
    }
    Ok(())
}

fn map_integer(col: &Column) -> ColumnMapping {
    // Primary keys widen to BIGINT unconditionally: rowid aliases can
    // exceed 32 bits regardless of currently observed values, and the
    // identity must survive follow-on inserts.
    if col.is_primary_key {
        return ColumnMapping::plain("BIGINT");
    }
    if col.declared_type.to_uppercase().contains("BIGINT") {
        return ColumnMapping::plain("BIGINT");
    }
    if timestamp_heuristic(col) {
        return ColumnMapping::with_warning(
            "DATETIME",
            "integer column named like a timestamp; epoch values will be \
             normalized to DATETIME",
        );
    }

    match (col.stats.min_int, col.stats.max_int) {
        (Some(min), Some(max)) if min >= i32::MIN as i64 && max <= i32::MAX as i64 => {
            ColumnMapping::plain("INT")
        }
        (None, None) => ColumnMapping::plain("INT"),
        _ => ColumnMapping::plain("BIGINT"),
    }
}

fn map_text(col: &Column) -> ColumnMapping {
    if col.is_primary_key || col.is_unique {
        return ColumnMapping::with_warning(
            format!("VARCHAR({})", INDEXED_VARCHAR_MAX),
            format!(
                "indexed text column bounded to VARCHAR({}) for index compatibility",
                INDEXED_VARCHAR_MAX
            ),
        );
    }

    // A declared length bounds the column; otherwise the observed maximum
    // decides between bounded VARCHAR and unbounded TEXT.
    if let Some(len) = declared_length(&col.declared_type) {
        return ColumnMapping::plain(format!("VARCHAR({})", len.min(DEFAULT_VARCHAR_MAX)));
    }
    match col.stats.max_text_len {
        Some(len) if len <= DEFAULT_VARCHAR_MAX as i64 => {
            ColumnMapping::plain(format!("VARCHAR({})", DEFAULT_VARCHAR_MAX))
        }
        _ => ColumnMapping::plain("TEXT"),
    }
}

fn map_blob(col: &Column) -> ColumnMapping {
    if col.is_primary_key || col.is_unique {
        return ColumnMapping::with_warning(
            format!("VARBINARY({})", INDEXED_VARCHAR_MAX),
            format!(
                "indexed blob column bounded to VARBINARY({}) for index compatibility",
                INDEXED_VARCHAR_MAX
            ),
        );
    }
    ColumnMapping::plain("BLOB")
}

/// NUMERIC and UNKNOWN affinities: the declared type text decides.
fn map_declared(table: &str, col: &Column) -> ColumnMapping {
    let upper = col.declared_type.to_uppercase();

    if upper.contains("BOOL") {
        return ColumnMapping::plain("TINYINT(1)");
    }
    if upper.contains("DEC") || upper.contains("NUM") {
        return match declared_precision(&col.declared_type) {
            Some((p, s)) => ColumnMapping::plain(format!("DECIMAL({},{})", p, s)),
            None => ColumnMapping::plain("DECIMAL(10,2)"),
        };
    }
    if upper == "TIME" {
        return ColumnMapping::plain("TIME");
    }
    if upper.contains("DATE") || upper.contains("TIME") {
        return ColumnMapping::plain("DATETIME");
    }
    if upper.is_empty() && timestamp_heuristic(col) {
        return ColumnMapping::with_warning(
            "DATETIME",
            "untyped column named like a timestamp; epoch values will be \
             normalized to DATETIME",
        );
    }
    if upper.is_empty() {
        return ColumnMapping::plain("TEXT");
    }

    ColumnMapping::with_warning(
        "TEXT",
        format!(
            "unrecognized declared type '{}' in {}.{}; falling back to TEXT",
            col.declared_type, table, col.name
        ),
    )
}

/// Columns conventionally holding epoch timestamps.
fn timestamp_heuristic(col: &Column) -> bool {
    if col.is_primary_key || col.is_unique || col.is_autoincrement {
        return false;
    }
    let name = col.name.to_lowercase();
    name == "timestamp" || name.ends_with("_at") || name.ends_with("_time")
}

/// Parse a length out of a declared type like "VARCHAR(30)".
fn declared_length(declared: &str) -> Option<u32> {
    let open = declared.find('(')?;
    let close = declared[open..].find(')')? + open;
    declared[open + 1..close].trim().parse().ok()
}

/// Parse precision and scale out of a declared type like "DECIMAL(12,4)".
fn declared_precision(declared: &str) -> Option<(u32, u32)> {
    let open = declared.find('(')?;
    let close = declared[open..].find(')')? + open;
    let inner = &declared[open + 1..close];
    let (p, s) = inner.split_once(',')?;
    Some((p.trim().parse().ok()?, s.trim().parse().ok()?))
}
