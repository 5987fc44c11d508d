//! MySQL DDL rendering.
//!
//! Pure statement generation in two phases: table creation (columns and
//! primary key only), then constraints (secondary indexes and foreign
//! keys). Phase two statements must only ever be executed after every
//! table's data load has completed; unique indexes and foreign keys can
//! reject bulk-loaded data mid-flight if enforced during load.

use crate::error::{MigrateError, Result};
use crate::schema::{Column, Table};
use crate::typemap::INDEXED_VARCHAR_MAX;
use tracing::warn;

/// Quote a MySQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Order tables for creation and load: referenced tables before their
/// referents, ties and cycles resolved by introspection order.
pub fn dependency_order(tables: &[Table]) -> Vec<&Table> {
    let mut ordered: Vec<&Table> = Vec::with_capacity(tables.len());
    let mut placed = vec![false; tables.len()];

    loop {
        let mut progressed = false;
        for (i, table) in tables.iter().enumerate() {
            if placed[i] {
                continue;
            }
            let ready = table.foreign_keys.iter().all(|fk| {
                fk.ref_table == table.name
                    || tables
                        .iter()
                        .position(|t| t.name == fk.ref_table)
                        .map(|j| placed[j])
                        // References outside the migrated set don't gate.
                        .unwrap_or(true)
            });
            if ready {
                ordered.push(table);
                placed[i] = true;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    // Cyclic remainder: stable introspection order.
    for (i, table) in tables.iter().enumerate() {
        if !placed[i] {
            ordered.push(table);
        }
    }

    ordered
}

/// Emit one CREATE TABLE statement per table, in dependency order.
///
/// Statements contain only columns, single-column UNIQUE constraints and
/// the primary key; indexes and foreign keys are deferred to
/// [`constraint_statements`].
pub fn create_table_statements(tables: &[Table]) -> Result<Vec<String>> {
    dependency_order(tables)
        .into_iter()
        .map(create_table_sql)
        .collect()
}

/// DROP statement for idempotent re-creation against a fresh target.
pub fn drop_table_sql(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(table))
}

/// Render the CREATE TABLE statement for a single table.
pub fn create_table_sql(table: &Table) -> Result<String> {
    let mut defs: Vec<String> = Vec::with_capacity(table.columns.len() + 2);

    for col in &table.columns {
        defs.push(column_def(table, col)?);
    }

    for col in &table.columns {
        if col.is_unique && !col.is_primary_key {
            defs.push(format!("UNIQUE ({})", quote_ident(&col.name)));
        }
    }

    if !table.primary_key.is_empty() {
        let pk_cols: Vec<String> = table.primary_key.iter().map(|c| quote_ident(c)).collect();
        defs.push(format!("PRIMARY KEY ({})", pk_cols.join(", ")));
    }

    Ok(format!(
        "CREATE TABLE {} (\n    {}\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci",
        quote_ident(&table.name),
        defs.join(",\n    ")
    ))
}

/// Emit index and foreign key statements for all tables.
///
/// To be executed only after every table is fully loaded.
pub fn constraint_statements(
    tables: &[Table],
    create_indexes: bool,
    create_foreign_keys: bool,
) -> Vec<String> {
    let mut statements = Vec::new();

    if create_indexes {
        for table in tables {
            for idx in &table.indexes {
                statements.push(create_index_sql(table, idx));
            }
        }
    }

    if create_foreign_keys {
        for table in tables {
            for (i, fk) in table.foreign_keys.iter().enumerate() {
                statements.push(create_foreign_key_sql(table, i, fk));
            }
        }
    }

    statements
}

fn create_index_sql(table: &Table, idx: &crate::schema::Index) -> String {
    // TEXT/BLOB targets need a prefix length to be indexable.
    let idx_cols: Vec<String> = idx
        .columns
        .iter()
        .map(|col_name| {
            let quoted = quote_ident(col_name);
            if let Some(col) = table.column(col_name) {
                let target = col.target_type.as_deref().unwrap_or_default();
                if target == "TEXT" || target == "BLOB" {
                    return format!("{}({})", quoted, INDEXED_VARCHAR_MAX);
                }
            }
            quoted
        })
        .collect();

    let unique = if idx.is_unique { "UNIQUE " } else { "" };

    format!(
        "CREATE {}INDEX {} ON {} ({})",
        unique,
        quote_ident(&idx.name),
        quote_ident(&table.name),
        idx_cols.join(", ")
    )
}

fn create_foreign_key_sql(table: &Table, ordinal: usize, fk: &crate::schema::ForeignKey) -> String {
    let fk_cols: Vec<String> = fk.columns.iter().map(|c| quote_ident(c)).collect();
    let ref_cols: Vec<String> = fk.ref_columns.iter().map(|c| quote_ident(c)).collect();

    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
        quote_ident(&table.name),
        quote_ident(&format!("fk_{}_{}", table.name, ordinal)),
        fk_cols.join(", "),
        quote_ident(&fk.ref_table),
        ref_cols.join(", "),
        referential_action(&fk.on_delete),
        referential_action(&fk.on_update)
    )
}

/// Normalize a referential action to MySQL syntax.
fn referential_action(action: &str) -> &str {
    match action.to_uppercase().as_str() {
        "CASCADE" => "CASCADE",
        "SET NULL" | "SET_NULL" => "SET NULL",
        "SET DEFAULT" | "SET_DEFAULT" => "SET DEFAULT",
        "RESTRICT" => "RESTRICT",
        _ => "NO ACTION",
    }
}

fn column_def(table: &Table, col: &Column) -> Result<String> {
    let mut target_type = col
        .target_type
        .clone()
        .ok_or_else(|| MigrateError::TypeMapping {
            table: table.name.clone(),
            column: col.name.clone(),
            message: "no target type assigned before emission".into(),
        })?;

    let auto_increment = table
        .auto_increment_target()
        .is_some_and(|ai| ai.name == col.name);

    // AUTO_INCREMENT implies NOT NULL on the MySQL side.
    let not_null = if auto_increment {
        if col.is_nullable {
            warn!(
                "primary key {}.{} is nullable in the source; AUTO_INCREMENT forces NOT NULL",
                table.name, col.name
            );
        }
        " NOT NULL"
    } else if !col.is_nullable {
        " NOT NULL"
    } else {
        ""
    };

    let default_sql = match &col.default_value {
        Some(default) => {
            let (clause, promoted) = default_clause(default, &target_type, &table.name, &col.name);
            if let Some(promoted) = promoted {
                target_type = promoted;
            }
            clause
        }
        None => String::new(),
    };

    Ok(format!(
        "{} {}{}{}{}",
        quote_ident(&col.name),
        target_type,
        not_null,
        default_sql,
        if auto_increment { " AUTO_INCREMENT" } else { "" }
    ))
}

/// Build a DEFAULT clause from a SQLite default expression.
///
/// Returns the clause (with leading space, or empty) and an optional
/// promoted column type when the default cannot fit the mapped one.
fn default_clause(
    default_value: &str,
    target_type: &str,
    table: &str,
    column: &str,
) -> (String, Option<String>) {
    let upper = default_value.to_uppercase().replace('"', "'");

    if upper == "CURRENT_TIMESTAMP"
        || upper == "'CURRENT_TIMESTAMP'"
        || upper.contains("DATETIME('NOW')")
    {
        return (" DEFAULT CURRENT_TIMESTAMP".to_string(), None);
    }

    if upper == "NULL" || upper == "'NULL'" {
        return (" DEFAULT NULL".to_string(), None);
    }

    if let Ok(numeric) = default_value.parse::<f64>() {
        // A numeric default outside TINYINT range promotes the column.
        if target_type.contains("TINYINT") && !(-128.0..=127.0).contains(&numeric) {
            warn!(
                "default value {} for TINYINT column {}.{} exceeds range; promoting to SMALLINT",
                default_value, table, column
            );
            let promoted = target_type.replace("TINYINT", "SMALLINT");
            return (format!(" DEFAULT {}", default_value), Some(promoted));
        }
        return (format!(" DEFAULT {}", default_value), None);
    }

    // MySQL rejects DEFAULT on TEXT/BLOB columns.
    if target_type == "TEXT" || target_type == "BLOB" {
        warn!(
            "dropping default {} on {}.{}: {} columns cannot carry defaults",
            default_value, table, column, target_type
        );
        return (String::new(), None);
    }

    let cleaned = default_value
        .trim_matches(|c| c == '\'' || c == '"')
        .replace('\'', "''");
    (format!(" DEFAULT '{}'", cleaned), None)
}
