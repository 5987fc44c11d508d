//! SQLite catalog introspection.
//!
//! Builds the table model from `sqlite_master` and the table-shaped
//! PRAGMAs, and runs the observed-value pre-pass that feeds the type
//! mapper's widening rules.

use crate::error::{MigrateError, Result};
use crate::schema::{Affinity, Column, ColumnStats, ForeignKey, Index, Table};
use rusqlite::Connection;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Quote a SQLite identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Read every user table from the catalog, in creation order.
pub fn introspect(conn: &Connection) -> Result<Vec<Table>> {
    let mut stmt = conn.prepare(
        "SELECT name, sql FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY rowid",
    )?;
    let entries = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut tables = Vec::with_capacity(entries.len());
    for (name, sql) in entries {
        tables.push(introspect_table(conn, &name, &sql)?);
    }

    resolve_foreign_keys(&mut tables);

    debug!("Introspected {} tables", tables.len());
    Ok(tables)
}

/// Build the model for one table.
fn introspect_table(conn: &Connection, name: &str, create_sql: &str) -> Result<Table> {
    let upper_sql = create_sql.to_uppercase();
    let without_rowid = upper_sql.contains("WITHOUT ROWID");

    let mut table = Table {
        name: name.to_string(),
        columns: load_columns(conn, name)?,
        primary_key: Vec::new(),
        indexes: Vec::new(),
        foreign_keys: Vec::new(),
        row_count: 0,
        without_rowid,
    };

    if table.columns.is_empty() {
        return Err(MigrateError::schema_read(format!(
            "table '{}' has no columns",
            name
        )));
    }

    // pk ordinal from table_info is carried in declaration order already;
    // reorder by the key position recorded during the column load.
    let mut pk_positions: Vec<(i64, String)> = conn
        .prepare(&format!("PRAGMA table_info({})", quote_ident(name)))?
        .query_map([], |row| {
            Ok((row.get::<_, i64>(5)?, row.get::<_, String>(1)?))
        })?
        .filter_map(|r| r.ok())
        .filter(|(pk, _)| *pk > 0)
        .collect();
    pk_positions.sort_by_key(|(pk, _)| *pk);
    table.primary_key = pk_positions.into_iter().map(|(_, c)| c).collect();

    // The AUTOINCREMENT keyword only ever applies to a single-column
    // INTEGER PRIMARY KEY.
    if upper_sql.contains("AUTOINCREMENT") && table.primary_key.len() == 1 {
        let pk_name = table.primary_key[0].clone();
        if let Some(col) = table.columns.iter_mut().find(|c| c.name == pk_name) {
            if col.affinity == Affinity::Integer {
                col.is_autoincrement = true;
            }
        }
    }

    load_indexes(conn, &mut table)?;
    load_foreign_keys(conn, &mut table)?;

    table.row_count = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", quote_ident(name)),
        [],
        |row| row.get(0),
    )?;

    load_stats(conn, &mut table)?;

    debug!(
        "Introspected table '{}': {} columns, {} indexes, {} foreign keys, {} rows",
        table.name,
        table.columns.len(),
        table.indexes.len(),
        table.foreign_keys.len(),
        table.row_count
    );
    Ok(table)
}

/// Load column definitions from `PRAGMA table_info`.
fn load_columns(conn: &Connection, table: &str) -> Result<Vec<Column>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| {
            let declared_type: String = row.get(2)?;
            let not_null: i64 = row.get(3)?;
            let pk: i64 = row.get(5)?;
            Ok(Column {
                name: row.get(1)?,
                affinity: Affinity::from_declared_type(&declared_type),
                declared_type,
                target_type: None,
                is_nullable: not_null == 0,
                default_value: row.get(4)?,
                is_primary_key: pk > 0,
                is_autoincrement: false,
                is_unique: false,
                stats: ColumnStats::default(),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// Load secondary indexes and mark single-column unique constraints.
///
/// The implicit primary-key index is skipped. A single-column unique
/// index collapses onto the column itself (rendered as a UNIQUE column
/// constraint, and bounding its mapped type); everything else survives
/// as a named index.
fn load_indexes(conn: &Connection, table: &mut Table) -> Result<()> {
    let index_list: Vec<(String, bool, String)> = conn
        .prepare(&format!("PRAGMA index_list({})", quote_ident(&table.name)))?
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)? == 1,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for (seq, (idx_name, is_unique, origin)) in index_list.into_iter().enumerate() {
        if origin == "pk" {
            continue;
        }

        let columns: Vec<String> = conn
            .prepare(&format!("PRAGMA index_info({})", quote_ident(&idx_name)))?
            .query_map([], |row| row.get::<_, Option<String>>(2))?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            // Expression index members have no column name; nothing to
            // carry over for those.
            .flatten()
            .collect();

        if columns.is_empty() {
            warn!(
                "skipping expression index '{}' on '{}': not portable",
                idx_name, table.name
            );
            continue;
        }

        if is_unique && columns.len() == 1 {
            let col_name = columns[0].clone();
            if let Some(col) = table.columns.iter_mut().find(|c| c.name == col_name) {
                col.is_unique = true;
            }
            continue;
        }

        // Unique-constraint autoindexes have no portable name.
        let name = if idx_name.starts_with("sqlite_autoindex_") {
            format!("uq_{}_{}", table.name, seq)
        } else {
            idx_name
        };

        table.indexes.push(Index {
            name,
            columns,
            is_unique,
        });
    }

    Ok(())
}

/// Load foreign keys from `PRAGMA foreign_key_list`, grouping composite
/// keys by constraint id.
fn load_foreign_keys(conn: &Connection, table: &mut Table) -> Result<()> {
    struct FkRow {
        id: i64,
        seq: i64,
        ref_table: String,
        from: String,
        to: Option<String>,
        on_update: String,
        on_delete: String,
    }

    let rows: Vec<FkRow> = conn
        .prepare(&format!(
            "PRAGMA foreign_key_list({})",
            quote_ident(&table.name)
        ))?
        .query_map([], |row| {
            Ok(FkRow {
                id: row.get(0)?,
                seq: row.get(1)?,
                ref_table: row.get(2)?,
                from: row.get(3)?,
                to: row.get(4)?,
                on_update: row.get(5)?,
                on_delete: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut grouped: BTreeMap<i64, Vec<FkRow>> = BTreeMap::new();
    for row in rows {
        grouped.entry(row.id).or_default().push(row);
    }

    for (_, mut parts) in grouped {
        parts.sort_by_key(|p| p.seq);

        for part in &parts {
            if table.column(&part.from).is_none() {
                return Err(MigrateError::schema_read(format!(
                    "table '{}' declares a foreign key on non-existent column '{}'",
                    table.name, part.from
                )));
            }
        }

        let first = &parts[0];
        table.foreign_keys.push(ForeignKey {
            columns: parts.iter().map(|p| p.from.clone()).collect(),
            ref_table: first.ref_table.clone(),
            ref_columns: parts.iter().filter_map(|p| p.to.clone()).collect(),
            on_delete: first.on_delete.clone(),
            on_update: first.on_update.clone(),
        });
    }

    Ok(())
}

/// Post-pass over the whole model: drop foreign keys whose target is not
/// part of it, and fill implicit referenced columns with the referenced
/// table's primary key.
fn resolve_foreign_keys(tables: &mut [Table]) {
    let pk_by_table: BTreeMap<String, Vec<String>> = tables
        .iter()
        .map(|t| (t.name.clone(), t.primary_key.clone()))
        .collect();

    for table in tables.iter_mut() {
        let owner = table.name.clone();
        table.foreign_keys.retain_mut(|fk| {
            let Some(ref_pk) = pk_by_table.get(&fk.ref_table) else {
                warn!(
                    "dropping foreign key on '{}': referenced table '{}' does not exist",
                    owner, fk.ref_table
                );
                return false;
            };
            if fk.ref_columns.is_empty() {
                fk.ref_columns = ref_pk.clone();
            }
            if fk.ref_columns.len() != fk.columns.len() {
                warn!(
                    "dropping foreign key on '{}': column count mismatch against '{}'",
                    owner, fk.ref_table
                );
                return false;
            }
            true
        });
    }
}

/// Observed-value pre-pass: integer ranges and text lengths.
fn load_stats(conn: &Connection, table: &mut Table) -> Result<()> {
    if table.row_count == 0 {
        return Ok(());
    }

    let table_name = quote_ident(&table.name);
    for col in &mut table.columns {
        let col_name = quote_ident(&col.name);
        match col.affinity {
            Affinity::Integer => {
                // A dynamically-typed column can hold text; MAX then fails
                // to read back as an integer and the stats stay unknown,
                // which widens the mapping.
                let range = conn.query_row(
                    &format!(
                        "SELECT MAX({}), MIN({}) FROM {}",
                        col_name, col_name, table_name
                    ),
                    [],
                    |row| {
                        Ok((
                            row.get::<_, Option<i64>>(0)?,
                            row.get::<_, Option<i64>>(1)?,
                        ))
                    },
                );
                if let Ok((max, min)) = range {
                    col.stats.max_int = max;
                    col.stats.min_int = min;
                }
            }
            Affinity::Text => {
                let len: Option<i64> = conn.query_row(
                    &format!("SELECT MAX(LENGTH({})) FROM {}", col_name, table_name),
                    [],
                    |row| row.get(0),
                )?;
                col.stats.max_text_len = len;
            }
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                email TEXT UNIQUE,
                score REAL,
                created_date DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE heartbeat (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                status BOOLEAN DEFAULT 0,
                payload BLOB,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_heartbeat_user ON heartbeat(user_id);
            INSERT INTO users (name, email, score) VALUES ('a', 'a@x', 1.5);
            INSERT INTO users (name, email, score) VALUES ('b', 'b@x', NULL);
            INSERT INTO heartbeat (user_id, status) VALUES (1, 1);
            "#,
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_introspects_user_tables_in_order() {
        let conn = fixture();
        let tables = introspect(&conn).unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        // sqlite_sequence exists because of AUTOINCREMENT; it must not
        // appear in the model.
        assert_eq!(names, vec!["users", "heartbeat"]);
    }

    #[test]
    fn test_column_model() {
        let conn = fixture();
        let tables = introspect(&conn).unwrap();
        let users = &tables[0];

        assert_eq!(users.primary_key, vec!["id".to_string()]);
        assert_eq!(users.row_count, 2);
        assert!(!users.without_rowid);

        let id = users.column("id").unwrap();
        assert_eq!(id.affinity, Affinity::Integer);
        assert!(id.is_primary_key);
        assert!(id.is_autoincrement);

        let name = users.column("name").unwrap();
        assert!(!name.is_nullable);
        assert_eq!(name.affinity, Affinity::Text);

        let email = users.column("email").unwrap();
        assert!(email.is_unique);

        let created = users.column("created_date").unwrap();
        assert_eq!(created.affinity, Affinity::Numeric);
        assert_eq!(created.default_value.as_deref(), Some("CURRENT_TIMESTAMP"));
    }

    #[test]
    fn test_unique_index_collapses_onto_column() {
        let conn = fixture();
        let tables = introspect(&conn).unwrap();
        // email's unique autoindex became a column flag, not an index.
        assert!(tables[0].indexes.is_empty());
        assert_eq!(tables[1].indexes.len(), 1);
        assert_eq!(tables[1].indexes[0].name, "idx_heartbeat_user");
        assert!(!tables[1].indexes[0].is_unique);
    }

    #[test]
    fn test_foreign_keys() {
        let conn = fixture();
        let tables = introspect(&conn).unwrap();
        let hb = &tables[1];
        assert_eq!(hb.foreign_keys.len(), 1);
        let fk = &hb.foreign_keys[0];
        assert_eq!(fk.columns, vec!["user_id".to_string()]);
        assert_eq!(fk.ref_table, "users");
        assert_eq!(fk.ref_columns, vec!["id".to_string()]);
        assert_eq!(fk.on_delete, "CASCADE");
        assert_eq!(fk.on_update, "NO ACTION");
    }

    #[test]
    fn test_stats_pre_pass() {
        let conn = fixture();
        let tables = introspect(&conn).unwrap();
        let users = &tables[0];
        assert_eq!(users.column("id").unwrap().stats.max_int, Some(2));
        assert_eq!(users.column("name").unwrap().stats.max_text_len, Some(1));
        assert_eq!(users.column("email").unwrap().stats.max_text_len, Some(3));
    }

    #[test]
    fn test_dangling_foreign_key_dropped() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE orphan (id INTEGER PRIMARY KEY, \
             parent_id INTEGER REFERENCES missing(id));",
        )
        .unwrap();
        let tables = introspect(&conn).unwrap();
        assert!(tables[0].foreign_keys.is_empty());
    }

    #[test]
    fn test_composite_primary_key_order() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE tag (b TEXT, a TEXT, PRIMARY KEY (a, b));",
        )
        .unwrap();
        let tables = introspect(&conn).unwrap();
        assert_eq!(
            tables[0].primary_key,
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_without_rowid_flag() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE kv (k TEXT PRIMARY KEY, v TEXT) WITHOUT ROWID;",
        )
        .unwrap();
        let tables = introspect(&conn).unwrap();
        assert!(tables[0].without_rowid);
    }

    #[test]
    fn test_reserved_word_table_name() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE \"group\" (id INTEGER PRIMARY KEY, v TEXT);")
            .unwrap();
        let tables = introspect(&conn).unwrap();
        assert_eq!(tables[0].name, "group");
        assert_eq!(tables[0].columns.len(), 2);
    }
}
