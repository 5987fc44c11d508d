//! Pipeline integration tests against real SQLite databases.
//!
//! These cover the source-side pipeline end to end: introspection, type
//! mapping, DDL emission and paged export. The MySQL side is exercised
//! up to the statement/parameter boundary in unit tests; no live server
//! is required here.

use rusqlite::Connection;
use sqlite_mysql_migrate::source::{ExportOptions, SqliteSource};
use sqlite_mysql_migrate::{
    emitter, typemap, MigrateError, SourceConfig, SqlValue, Table, ValueErrorPolicy,
};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    source: SqliteSource,
}

/// Create a temporary SQLite database and open it as a source.
fn fixture(setup: &str) -> Fixture {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("source.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(setup).unwrap();
    drop(conn);

    let source = SqliteSource::open(&SourceConfig { path }).unwrap();
    Fixture { _dir: dir, source }
}

fn mapped_tables(source: &SqliteSource) -> Vec<Table> {
    let mut tables = source.introspect().unwrap();
    typemap::apply(&mut tables).unwrap();
    tables
}

fn opts(policy: ValueErrorPolicy) -> ExportOptions {
    ExportOptions {
        batch_size: 500,
        on_value_error: policy,
    }
}

async fn collect_rows(
    source: &SqliteSource,
    table: &Table,
    policy: ValueErrorPolicy,
) -> (Vec<Vec<SqlValue>>, u64) {
    let mut stream = source.export(table, opts(policy));
    let mut rows = Vec::new();
    let mut skipped = 0;
    while let Some(batch) = stream.next_batch().await {
        let batch = batch.unwrap();
        rows.extend(batch.rows);
        skipped += batch.skipped;
    }
    (rows, skipped)
}

#[tokio::test]
async fn users_scenario_schema_and_values() {
    let f = fixture(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, score REAL);
         INSERT INTO users VALUES (1, 'a', 1.5);
         INSERT INTO users VALUES (2, 'b', NULL);",
    );
    let tables = mapped_tables(&f.source);
    assert_eq!(tables.len(), 1);
    let users = &tables[0];

    // Same column count and order as the source.
    let names: Vec<&str> = users.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "name", "score"]);

    assert_eq!(users.column("id").unwrap().target_type.as_deref(), Some("BIGINT"));
    assert_eq!(
        users.column("name").unwrap().target_type.as_deref(),
        Some("VARCHAR(255)")
    );
    assert_eq!(
        users.column("score").unwrap().target_type.as_deref(),
        Some("DOUBLE")
    );

    let ddl = emitter::create_table_sql(users).unwrap();
    assert!(ddl.contains("`id` BIGINT NOT NULL AUTO_INCREMENT"));
    assert!(ddl.contains("PRIMARY KEY (`id`)"));

    let (rows, skipped) = collect_rows(&f.source, users, ValueErrorPolicy::AbortTable).await;
    assert_eq!(skipped, 0);
    assert_eq!(rows.len(), 2);
    assert_eq!(
        rows[0],
        vec![
            SqlValue::Integer(1),
            SqlValue::Text("a".into()),
            SqlValue::Real(1.5)
        ]
    );
    // NULL score preserved for row 2.
    assert_eq!(rows[1][2], SqlValue::Null);
}

#[tokio::test]
async fn integer_beyond_32_bits_widens_and_survives() {
    let max_plus_one = i32::MAX as i64 + 1;
    let f = fixture(&format!(
        "CREATE TABLE metrics (id INTEGER PRIMARY KEY, v INTEGER);
         INSERT INTO metrics VALUES (1, {});
         INSERT INTO metrics VALUES (2, {});
         INSERT INTO metrics VALUES (3, {});",
        i32::MAX,
        max_plus_one,
        i32::MIN as i64 - 1,
    ));
    let tables = mapped_tables(&f.source);
    let v = tables[0].column("v").unwrap();
    assert_eq!(v.target_type.as_deref(), Some("BIGINT"));
    assert_eq!(v.stats.max_int, Some(max_plus_one));

    let (rows, _) = collect_rows(&f.source, &tables[0], ValueErrorPolicy::AbortTable).await;
    // Max observed value inserts without truncation.
    assert_eq!(rows[1][1], SqlValue::Integer(max_plus_one));
    assert_eq!(rows[2][1], SqlValue::Integer(i32::MIN as i64 - 1));
}

#[tokio::test]
async fn value_fidelity_round_trip_shapes() {
    let long_text = "héllo wörld ".repeat(50);
    let f = fixture(&format!(
        "CREATE TABLE vals (id INTEGER PRIMARY KEY, t TEXT, e TEXT, b BLOB, n TEXT);
         INSERT INTO vals VALUES (1, '{}', '', x'00ff10', NULL);",
        long_text
    ));
    let tables = mapped_tables(&f.source);
    let vals = &tables[0];
    // Long text pushed past the VARCHAR bound.
    assert_eq!(vals.column("t").unwrap().target_type.as_deref(), Some("TEXT"));

    let (rows, _) = collect_rows(&f.source, vals, ValueErrorPolicy::AbortTable).await;
    assert_eq!(rows[0][1], SqlValue::Text(long_text));
    assert_eq!(rows[0][2], SqlValue::Text(String::new()));
    assert_eq!(rows[0][3], SqlValue::Blob(vec![0x00, 0xff, 0x10]));
    assert_eq!(rows[0][4], SqlValue::Null);
}

#[tokio::test]
async fn mixed_typed_column_skip_row_policy() {
    // SQLite lets a declared-INTEGER column hold text.
    let f = fixture(
        "CREATE TABLE mixed (id INTEGER PRIMARY KEY, v INTEGER);
         INSERT INTO mixed VALUES (1, 10);
         INSERT INTO mixed VALUES (2, 'not a number');
         INSERT INTO mixed VALUES (3, 30);",
    );
    let tables = mapped_tables(&f.source);

    let (rows, skipped) = collect_rows(&f.source, &tables[0], ValueErrorPolicy::SkipRow).await;
    assert_eq!(skipped, 1);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][1], SqlValue::Integer(10));
    assert_eq!(rows[1][1], SqlValue::Integer(30));
}

#[tokio::test]
async fn mixed_typed_column_abort_policy_carries_context() {
    let f = fixture(
        "CREATE TABLE mixed (id INTEGER PRIMARY KEY, v INTEGER);
         INSERT INTO mixed VALUES (1, 10);
         INSERT INTO mixed VALUES (2, 'broken');",
    );
    let tables = mapped_tables(&f.source);

    let mut stream = f
        .source
        .export(&tables[0], opts(ValueErrorPolicy::AbortTable));
    let mut err = None;
    while let Some(batch) = stream.next_batch().await {
        match batch {
            Ok(_) => {}
            Err(e) => {
                err = Some(e);
                break;
            }
        }
    }

    match err.expect("conversion must fail") {
        MigrateError::ValueConversion {
            table,
            column,
            row_offset,
            ..
        } => {
            assert_eq!(table, "mixed");
            assert_eq!(column, "v");
            assert_eq!(row_offset, 1);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn paged_export_is_ordered_and_complete() {
    let mut setup = String::from("CREATE TABLE seq (id INTEGER PRIMARY KEY, v INTEGER);");
    for i in 1..=1050 {
        setup.push_str(&format!("INSERT INTO seq VALUES ({}, {});", i, i * 7));
    }
    let f = fixture(&setup);
    let tables = mapped_tables(&f.source);

    let mut stream = f.source.export(
        &tables[0],
        ExportOptions {
            batch_size: 500,
            on_value_error: ValueErrorPolicy::AbortTable,
        },
    );

    let mut sizes = Vec::new();
    let mut offsets = Vec::new();
    let mut all = Vec::new();
    while let Some(batch) = stream.next_batch().await {
        let batch = batch.unwrap();
        sizes.push(batch.rows.len());
        offsets.push(batch.first_offset);
        all.extend(batch.rows);
    }

    assert_eq!(sizes, vec![500, 500, 50]);
    assert_eq!(offsets, vec![0, 500, 1000]);
    assert_eq!(all.len(), 1050);
    // rowid order end to end.
    for (i, row) in all.iter().enumerate() {
        assert_eq!(row[0], SqlValue::Integer(i as i64 + 1));
    }
}

#[tokio::test]
async fn export_restarts_from_scratch() {
    let f = fixture(
        "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT);
         INSERT INTO t VALUES (1, 'x');
         INSERT INTO t VALUES (2, 'y');",
    );
    let tables = mapped_tables(&f.source);

    let (first, _) = collect_rows(&f.source, &tables[0], ValueErrorPolicy::AbortTable).await;
    let (second, _) = collect_rows(&f.source, &tables[0], ValueErrorPolicy::AbortTable).await;
    assert_eq!(first, second);
}

#[test]
fn repeated_introspection_is_deterministic() {
    let f = fixture(
        "CREATE TABLE a (id INTEGER PRIMARY KEY, name TEXT UNIQUE);
         CREATE TABLE b (id INTEGER PRIMARY KEY, a_id INTEGER REFERENCES a(id));
         CREATE INDEX idx_b_a ON b(a_id);
         INSERT INTO a VALUES (1, 'n');
         INSERT INTO b VALUES (1, 1);",
    );

    let first = mapped_tables(&f.source);
    let second = mapped_tables(&f.source);

    let ddl_first = emitter::create_table_statements(&first).unwrap();
    let ddl_second = emitter::create_table_statements(&second).unwrap();
    assert_eq!(ddl_first, ddl_second);

    let cons_first = emitter::constraint_statements(&first, true, true);
    let cons_second = emitter::constraint_statements(&second, true, true);
    assert_eq!(cons_first, cons_second);
}

#[test]
fn constraints_are_deferred_behind_table_creation() {
    let f = fixture(
        "CREATE TABLE child (id INTEGER PRIMARY KEY,
                             parent_id INTEGER REFERENCES parent(id));
         CREATE TABLE parent (id INTEGER PRIMARY KEY, name TEXT);
         CREATE INDEX idx_child_parent ON child(parent_id);",
    );
    let tables = mapped_tables(&f.source);

    // Phase one: only CREATE TABLE, parent ordered before child even
    // though the child was declared first.
    let phase_one = emitter::create_table_statements(&tables).unwrap();
    assert!(phase_one[0].contains("CREATE TABLE `parent`"));
    assert!(phase_one[1].contains("CREATE TABLE `child`"));
    for stmt in &phase_one {
        assert!(!stmt.contains("FOREIGN KEY"));
        assert!(!stmt.contains("INDEX"));
    }

    // Phase two: everything constraint-shaped, nothing table-shaped.
    let phase_two = emitter::constraint_statements(&tables, true, true);
    assert_eq!(phase_two.len(), 2);
    assert!(phase_two.iter().all(|s| !s.starts_with("CREATE TABLE")));
    assert!(phase_two
        .iter()
        .any(|s| s.contains("CREATE INDEX `idx_child_parent`")));
    assert!(phase_two
        .iter()
        .any(|s| s.contains("FOREIGN KEY (`parent_id`) REFERENCES `parent` (`id`)")));
}

#[tokio::test]
async fn timestamp_columns_normalize_epoch_integers() {
    let f = fixture(
        "CREATE TABLE knex_migrations (id INTEGER PRIMARY KEY, name TEXT,
                                       batch INTEGER, migration_time INTEGER);
         INSERT INTO knex_migrations VALUES (1, 'init', 1, 1700000000000);
         INSERT INTO knex_migrations VALUES (2, 'next', 1, 1700000000);",
    );
    let tables = mapped_tables(&f.source);
    assert_eq!(
        tables[0].column("migration_time").unwrap().target_type.as_deref(),
        Some("DATETIME")
    );

    let (rows, _) = collect_rows(&f.source, &tables[0], ValueErrorPolicy::AbortTable).await;
    // Milliseconds and seconds collapse to the same instant.
    assert_eq!(rows[0][3], rows[1][3]);
    match &rows[0][3] {
        SqlValue::DateTime(dt) => assert_eq!(dt.format("%Y").to_string(), "2023"),
        other => panic!("unexpected value: {:?}", other),
    }
}

#[test]
fn source_open_rejects_garbage() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("not-a-db.bin");
    std::fs::write(&path, b"definitely not sqlite").unwrap();
    let result = SqliteSource::open(&SourceConfig { path });
    assert!(matches!(result, Err(MigrateError::SchemaRead(_))));

    let missing = dir.path().join("missing.db");
    assert!(SqliteSource::open(&SourceConfig { path: missing }).is_err());
}

#[tokio::test]
async fn without_rowid_table_exports_in_pk_order() {
    let f = fixture(
        "CREATE TABLE kv (k TEXT PRIMARY KEY, v TEXT) WITHOUT ROWID;
         INSERT INTO kv VALUES ('zeta', '1');
         INSERT INTO kv VALUES ('alpha', '2');",
    );
    let tables = mapped_tables(&f.source);
    assert!(tables[0].without_rowid);

    let (rows, _) = collect_rows(&f.source, &tables[0], ValueErrorPolicy::AbortTable).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0], SqlValue::Text("alpha".into()));
    assert_eq!(rows[1][0], SqlValue::Text("zeta".into()));
}
