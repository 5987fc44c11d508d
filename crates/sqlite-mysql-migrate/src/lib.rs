//! # sqlite-mysql-migrate
//!
//! One-shot SQLite to MySQL/MariaDB migration library.
//!
//! Converts a complete SQLite database - schema and data - into an
//! equivalent, fully populated MySQL-dialect database:
//!
//! - **Catalog introspection** into an immutable table model
//! - **Deterministic type mapping** with observed-range widening
//! - **Two-phase schema creation**: tables first, indexes and foreign
//!   keys only after every table is loaded
//! - **Paged, batched data transfer** with one transaction per batch
//! - **Structured outcomes**: done, partially done, or failed with the
//!   offending stage and table
//!
//! The source file must not be written by another process while the
//! migration runs; stop the writing application first.
//!
//! ## Example
//!
//! ```rust,no_run
//! use sqlite_mysql_migrate::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let report = orchestrator.run().await?;
//!     println!("Loaded {} rows: {}", report.rows_loaded(), report.to_json()?);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod emitter;
pub mod error;
pub mod orchestrator;
pub mod schema;
pub mod source;
pub mod target;
pub mod typemap;
pub mod value;

// Re-exports for convenient access
pub use config::{Config, MigrationConfig, SourceConfig, TargetConfig, ValueErrorPolicy};
pub use error::{MigrateError, Result};
pub use orchestrator::{MigrationReport, Orchestrator, RunOutcome, Stage, TableReport};
pub use schema::{Affinity, Column, ForeignKey, Index, Table};
pub use source::SqliteSource;
pub use target::MysqlLoader;
pub use value::{Row, SqlValue};
