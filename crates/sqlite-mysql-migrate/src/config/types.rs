//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (SQLite file).
    pub source: SourceConfig,

    /// Target database configuration (MySQL/MariaDB).
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Source database (SQLite) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Path to the SQLite database file. Opened read-only for the run.
    pub path: PathBuf,
}

/// Target database (MySQL/MariaDB) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// SSL mode: "disable", "prefer" or "require" (default: "prefer").
    #[serde(default = "default_prefer")]
    pub ssl_mode: String,
}

impl std::fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Policy for rows whose values cannot be coerced to the committed
/// target type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueErrorPolicy {
    /// Log and skip the offending row; continue the table.
    SkipRow,

    /// Mark the table failed; continue with sibling tables.
    #[default]
    AbortTable,

    /// Halt the entire run.
    AbortRun,
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Rows per insert transaction (default: 500).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Policy for value conversion failures (default: abort_table).
    #[serde(default)]
    pub on_value_error: ValueErrorPolicy,

    /// Tables to include (exact names, or a trailing `*` prefix wildcard).
    /// Empty means all tables.
    #[serde(default)]
    pub include_tables: Vec<String>,

    /// Tables to exclude (same pattern forms).
    #[serde(default)]
    pub exclude_tables: Vec<String>,

    /// Create secondary indexes after data load (default: true).
    #[serde(default = "default_true")]
    pub create_indexes: bool,

    /// Create foreign keys after data load (default: true).
    #[serde(default = "default_true")]
    pub create_foreign_keys: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            on_value_error: ValueErrorPolicy::default(),
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
            create_indexes: true,
            create_foreign_keys: true,
        }
    }
}

// Default value functions for serde

fn default_mysql_port() -> u16 {
    3306
}

fn default_prefer() -> String {
    "prefer".to_string()
}

fn default_batch_size() -> usize {
    500
}

fn default_true() -> bool {
    true
}
