//! Schema and metadata types.

use serde::{Deserialize, Serialize};

/// SQLite type affinity, derived from the declared column type.
///
/// Derivation follows SQLite's own rules: the declared type text is
/// scanned for substrings in priority order; an empty declaration has no
/// affinity at all and is modeled as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Affinity {
    Integer,
    Text,
    Real,
    Blob,
    Numeric,
    Unknown,
}

impl Affinity {
    /// Derive the affinity from a declared column type.
    pub fn from_declared_type(declared: &str) -> Self {
        let upper = declared.trim().to_uppercase();
        if upper.is_empty() {
            return Affinity::Unknown;
        }
        if upper.contains("INT") {
            return Affinity::Integer;
        }
        if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            return Affinity::Text;
        }
        if upper.contains("BLOB") {
            return Affinity::Blob;
        }
        if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            return Affinity::Real;
        }
        Affinity::Numeric
    }
}

/// Observed value statistics for a column, computed in a pre-pass.
///
/// Drive the widening rules in the type mapper. All fields are `None` for
/// an empty table or a column of all NULLs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnStats {
    /// Largest integer value observed.
    pub max_int: Option<i64>,

    /// Smallest integer value observed.
    pub min_int: Option<i64>,

    /// Longest text value observed, in characters.
    pub max_text_len: Option<i64>,
}

/// Column metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Declared type text, verbatim from the catalog (may be empty).
    pub declared_type: String,

    /// Type affinity derived from the declared type.
    pub affinity: Affinity,

    /// Target MySQL type, assigned by the type mapper before emission.
    pub target_type: Option<String>,

    /// Whether the column allows NULL.
    pub is_nullable: bool,

    /// Default value expression, verbatim from the catalog.
    pub default_value: Option<String>,

    /// Whether the column is part of the primary key.
    pub is_primary_key: bool,

    /// Whether the column carries the AUTOINCREMENT keyword.
    ///
    /// Implies integer affinity and primary-key membership.
    pub is_autoincrement: bool,

    /// Whether a single-column unique index covers this column.
    pub is_unique: bool,

    /// Observed value statistics.
    pub stats: ColumnStats,
}

/// Index metadata (secondary indexes only; the implicit primary-key and
/// `sqlite_autoindex_*` entries are excluded at introspection).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    /// Index name.
    pub name: String,

    /// Indexed column names, in index order.
    pub columns: Vec<String>,

    /// Whether the index is unique.
    pub is_unique: bool,
}

/// Foreign key metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Local column names.
    pub columns: Vec<String>,

    /// Referenced table name.
    pub ref_table: String,

    /// Referenced column names.
    pub ref_columns: Vec<String>,

    /// ON DELETE action, verbatim (SQLite defaults to "NO ACTION").
    pub on_delete: String,

    /// ON UPDATE action, verbatim.
    pub on_update: String,
}

/// Table metadata.
///
/// Constructed once by the introspector and immutable afterwards, except
/// for the single type-mapping pass that fills in each column's target
/// type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    /// Table name.
    pub name: String,

    /// Column definitions in declaration order.
    pub columns: Vec<Column>,

    /// Primary key column names, in key order.
    pub primary_key: Vec<String>,

    /// Secondary indexes.
    pub indexes: Vec<Index>,

    /// Foreign key constraints.
    pub foreign_keys: Vec<ForeignKey>,

    /// Row count at introspection time (informational).
    pub row_count: i64,

    /// Whether the table was declared WITHOUT ROWID.
    pub without_rowid: bool,
}

impl Table {
    /// Check if the table has a primary key.
    pub fn has_pk(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Find a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The column that carries AUTO_INCREMENT on the target side.
    ///
    /// Either the explicit AUTOINCREMENT column, or a single-column
    /// INTEGER primary key (a rowid alias allocates ascending ids in the
    /// source, and follow-on inserts must keep doing so in the target).
    pub fn auto_increment_target(&self) -> Option<&Column> {
        if let Some(col) = self.columns.iter().find(|c| c.is_autoincrement) {
            return Some(col);
        }
        if self.without_rowid || self.primary_key.len() != 1 {
            return None;
        }
        self.column(&self.primary_key[0])
            .filter(|c| c.affinity == Affinity::Integer)
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affinity_from_declared_type() {
        assert_eq!(Affinity::from_declared_type("INTEGER"), Affinity::Integer);
        assert_eq!(Affinity::from_declared_type("TINYINT"), Affinity::Integer);
        assert_eq!(
            Affinity::from_declared_type("BIGINT UNSIGNED"),
            Affinity::Integer
        );
        assert_eq!(Affinity::from_declared_type("VARCHAR(30)"), Affinity::Text);
        assert_eq!(Affinity::from_declared_type("clob"), Affinity::Text);
        assert_eq!(Affinity::from_declared_type("BLOB"), Affinity::Blob);
        assert_eq!(Affinity::from_declared_type("REAL"), Affinity::Real);
        assert_eq!(Affinity::from_declared_type("FLOAT"), Affinity::Real);
        assert_eq!(Affinity::from_declared_type("DOUBLE"), Affinity::Real);
        assert_eq!(Affinity::from_declared_type("DECIMAL(10,5)"), Affinity::Numeric);
        assert_eq!(Affinity::from_declared_type("BOOLEAN"), Affinity::Numeric);
        assert_eq!(Affinity::from_declared_type("DATETIME"), Affinity::Numeric);
        assert_eq!(Affinity::from_declared_type(""), Affinity::Unknown);
        assert_eq!(Affinity::from_declared_type("  "), Affinity::Unknown);
    }

    #[test]
    fn test_affinity_int_wins_over_point() {
        // "POINT" would be numeric, but "INT" substring takes priority,
        // matching SQLite's documented derivation order.
        assert_eq!(Affinity::from_declared_type("POINT"), Affinity::Integer);
    }

    #[test]
    fn test_table_helpers() {
        let table = Table {
            name: "users".into(),
            columns: vec![Column {
                name: "id".into(),
                declared_type: "INTEGER".into(),
                affinity: Affinity::Integer,
                target_type: None,
                is_nullable: false,
                default_value: None,
                is_primary_key: true,
                is_autoincrement: true,
                is_unique: false,
                stats: ColumnStats::default(),
            }],
            primary_key: vec!["id".into()],
            indexes: vec![],
            foreign_keys: vec![],
            row_count: 0,
            without_rowid: false,
        };

        assert!(table.has_pk());
        assert!(table.column("id").is_some());
        assert!(table.column("missing").is_none());
        assert_eq!(table.auto_increment_target().unwrap().name, "id");
        assert_eq!(table.column_names(), vec!["id".to_string()]);
    }
}
