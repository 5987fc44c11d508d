//! Migration orchestrator - main workflow coordinator.
//!
//! Drives the pipeline as a strictly sequential state machine:
//! Introspecting -> CreatingSchema -> LoadingData (table by table) ->
//! CreatingConstraints -> Done or Failed. There is no rollback across
//! tables; already-loaded tables stay loaded, matching an operator-
//! supervised one-shot migration.

use crate::config::{Config, ValueErrorPolicy};
use crate::emitter;
use crate::error::{MigrateError, Result};
use crate::schema::Table;
use crate::source::{ExportOptions, SqliteSource};
use crate::target::MysqlLoader;
use crate::typemap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{error, info, warn};

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Introspecting,
    CreatingSchema,
    LoadingData,
    CreatingConstraints,
    Done,
    Failed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Introspecting => "introspecting",
            Stage::CreatingSchema => "creating_schema",
            Stage::LoadingData => "loading_data",
            Stage::CreatingConstraints => "creating_constraints",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Terminal shape of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    /// All tables loaded, all requested constraints created.
    Done,

    /// Some tables or constraints failed; loaded data stays in place.
    PartiallyDone,

    /// A structural failure halted the run.
    Failed { stage: Stage, cause: String },
}

/// Per-table status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Pending,
    Completed,
    Failed,
}

/// Per-table result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableReport {
    /// Table name.
    pub name: String,

    /// Final status.
    pub status: TableStatus,

    /// Rows read from the source (skipped rows included).
    pub rows_read: u64,

    /// Rows loaded into the target.
    pub rows_loaded: u64,

    /// Rows dropped under the skip_row policy.
    pub rows_skipped: u64,

    /// Error message if failed.
    pub error: Option<String>,
}

impl TableReport {
    fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: TableStatus::Pending,
            rows_read: 0,
            rows_loaded: 0,
            rows_skipped: 0,
            error: None,
        }
    }

    fn fail(&mut self, error: impl Into<String>) {
        self.status = TableStatus::Failed;
        self.error = Some(error.into());
    }
}

/// A constraint statement that failed after data load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintFailure {
    /// The statement that was attempted.
    pub statement: String,

    /// The server's complaint.
    pub error: String,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Unique run identifier.
    pub run_id: String,

    /// Terminal outcome.
    pub outcome: RunOutcome,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Per-table results, in processing order.
    pub tables: Vec<TableReport>,

    /// Constraints that failed to apply after data load.
    pub failed_constraints: Vec<ConstraintFailure>,
}

impl MigrationReport {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Total rows loaded across all tables.
    pub fn rows_loaded(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_loaded).sum()
    }
}

/// Migration orchestrator.
///
/// Exclusively owns both handles for the run's lifetime.
pub struct Orchestrator {
    config: Config,
    source: SqliteSource,
    target: MysqlLoader,
}

impl Orchestrator {
    /// Validate configuration and open both handles.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let source = SqliteSource::open(&config.source)?;
        let target = MysqlLoader::new(&config.target).await?;
        Ok(Self {
            config,
            source,
            target,
        })
    }

    /// Run the migration to completion.
    ///
    /// Always yields a report; the outcome distinguishes Done,
    /// PartiallyDone and Failed so the operator can decide between a
    /// full rerun against a fresh target and a source-side fix.
    pub async fn run(self) -> Result<MigrationReport> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("Starting migration run: {}", run_id);

        let outcome = self.run_phases().await;

        // Best effort: never leave the session with checks off.
        if self.target.set_foreign_key_checks(true).await.is_err() {
            warn!("could not re-enable foreign key checks on the target session");
        }
        self.target.close().await;

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        let (outcome, tables, failed_constraints) = outcome;

        let report = MigrationReport {
            run_id,
            outcome,
            started_at,
            completed_at,
            duration_seconds: duration,
            tables,
            failed_constraints,
        };

        match &report.outcome {
            RunOutcome::Done => info!(
                "Migration done: {} tables, {} rows in {:.1}s",
                report.tables.len(),
                report.rows_loaded(),
                report.duration_seconds
            ),
            RunOutcome::PartiallyDone => warn!(
                "Migration partially done: {} tables failed, {} constraints failed",
                report
                    .tables
                    .iter()
                    .filter(|t| t.status == TableStatus::Failed)
                    .count(),
                report.failed_constraints.len()
            ),
            RunOutcome::Failed { stage, cause } => {
                error!("Migration failed at {}: {}", stage, cause)
            }
        }

        Ok(report)
    }

    /// The sequential stage pipeline.
    ///
    /// Returns the outcome plus whatever per-table state existed when the
    /// pipeline stopped.
    async fn run_phases(&self) -> (RunOutcome, Vec<TableReport>, Vec<ConstraintFailure>) {
        // Phase 1: introspect the source catalog.
        info!("Phase 1: Introspecting source schema");
        let mut tables = match self.source.introspect() {
            Ok(tables) => tables,
            Err(e) => {
                return (
                    RunOutcome::Failed {
                        stage: Stage::Introspecting,
                        cause: e.to_string(),
                    },
                    Vec::new(),
                    Vec::new(),
                );
            }
        };

        tables.retain(|t| {
            let included = self.table_included(&t.name);
            if !included {
                info!("Skipping table '{}' (filtered)", t.name);
            }
            included
        });
        info!("Found {} tables to migrate", tables.len());

        let mut reports: Vec<TableReport> =
            tables.iter().map(|t| TableReport::pending(&t.name)).collect();

        // Type mapping: a failure poisons that table only.
        for (i, table) in tables.iter_mut().enumerate() {
            if let Err(e) = typemap::apply_table(table) {
                error!("{}", e);
                reports[i].fail(e.to_string());
            }
        }

        // Phase 2: create target tables, constraints deferred.
        info!("Phase 2: Creating target schema");
        if let Err(e) = self.target.set_foreign_key_checks(false).await {
            return (
                RunOutcome::Failed {
                    stage: Stage::CreatingSchema,
                    cause: e.to_string(),
                },
                reports,
                Vec::new(),
            );
        }

        let order: Vec<String> = emitter::dependency_order(&tables)
            .iter()
            .map(|t| t.name.clone())
            .collect();

        for name in &order {
            let idx = index_of(&tables, name);
            if reports[idx].status == TableStatus::Failed {
                continue;
            }
            if let Err(e) = self.create_table(&tables[idx]).await {
                error!("Failed to create table '{}': {}", name, e);
                reports[idx].fail(e.to_string());
            }
        }

        // Phase 3: load data, table by table in the same order.
        info!("Phase 3: Loading data");
        for name in &order {
            let idx = index_of(&tables, name);
            if reports[idx].status == TableStatus::Failed {
                continue;
            }
            match self.load_table(&tables[idx], &mut reports[idx]).await {
                Ok(()) => {}
                Err(e) if self.config.migration.on_value_error == ValueErrorPolicy::AbortRun
                    && matches!(e, MigrateError::ValueConversion { .. }) =>
                {
                    reports[idx].fail(e.to_string());
                    return (
                        RunOutcome::Failed {
                            stage: Stage::LoadingData,
                            cause: e.to_string(),
                        },
                        reports,
                        Vec::new(),
                    );
                }
                Err(e) => {
                    error!("Failed to load table '{}': {}", name, e);
                    reports[idx].fail(e.to_string());
                }
            }
        }

        // Phase 4: indexes and foreign keys, now that every table that
        // could load has loaded.
        info!("Phase 4: Creating constraints");
        let failed_constraints = self.create_constraints(&tables, &reports).await;

        let any_failed = reports.iter().any(|r| r.status == TableStatus::Failed);
        let outcome = if any_failed || !failed_constraints.is_empty() {
            RunOutcome::PartiallyDone
        } else {
            RunOutcome::Done
        };
        (outcome, reports, failed_constraints)
    }

    /// Drop and recreate one target table.
    async fn create_table(&self, table: &Table) -> Result<()> {
        self.target
            .execute_ddl(&emitter::drop_table_sql(&table.name))
            .await?;
        let ddl = emitter::create_table_sql(table)?;
        self.target.execute_ddl(&ddl).await?;
        info!("Created table '{}'", table.name);
        Ok(())
    }

    /// Stream one table's rows into the target.
    async fn load_table(&self, table: &Table, report: &mut TableReport) -> Result<()> {
        let opts = ExportOptions {
            batch_size: self.config.migration.batch_size,
            on_value_error: self.config.migration.on_value_error,
        };
        let cols = table.column_names();
        let mut stream = self.source.export(table, opts);

        while let Some(batch) = stream.next_batch().await {
            let batch = batch?;
            report.rows_read += batch.rows.len() as u64 + batch.skipped;
            report.rows_skipped += batch.skipped;

            let loaded = self
                .target
                .load_batch(&table.name, &cols, &batch.rows, batch.first_offset)
                .await?;
            report.rows_loaded += loaded;
        }

        self.target.advance_auto_increment(table).await?;

        report.status = TableStatus::Completed;
        if report.rows_skipped > 0 {
            warn!(
                "Loaded table '{}': {} rows ({} skipped)",
                table.name, report.rows_loaded, report.rows_skipped
            );
        } else {
            info!("Loaded table '{}': {} rows", table.name, report.rows_loaded);
        }
        Ok(())
    }

    /// Execute phase-two statements for all successfully loaded tables.
    ///
    /// Constraint failures never abort the run and never roll back data;
    /// rows, not constraints, are the primary value of the migration.
    async fn create_constraints(
        &self,
        tables: &[Table],
        reports: &[TableReport],
    ) -> Vec<ConstraintFailure> {
        let loaded: Vec<Table> = tables
            .iter()
            .zip(reports)
            .filter(|(_, r)| r.status == TableStatus::Completed)
            .map(|(t, _)| {
                // A foreign key cannot reference a table that failed or
                // was filtered out.
                let mut t = t.clone();
                t.foreign_keys.retain(|fk| {
                    let ok = tables
                        .iter()
                        .zip(reports)
                        .any(|(c, r)| c.name == fk.ref_table && r.status == TableStatus::Completed);
                    if !ok {
                        warn!(
                            "skipping foreign key {} -> {}: referenced table not migrated",
                            t.name, fk.ref_table
                        );
                    }
                    ok
                });
                t
            })
            .collect();

        let statements = emitter::constraint_statements(
            &loaded,
            self.config.migration.create_indexes,
            self.config.migration.create_foreign_keys,
        );

        let mut failures = Vec::new();
        for statement in statements {
            if let Err(e) = self.target.execute_ddl(&statement).await {
                let failure = MigrateError::ConstraintCreation {
                    statement: statement.clone(),
                    message: e.to_string(),
                };
                warn!("{}", failure);
                failures.push(ConstraintFailure {
                    statement,
                    error: e.to_string(),
                });
            }
        }
        failures
    }

    /// Compare row counts between source and target.
    ///
    /// Returns per-table (source_count, target_count, match).
    pub async fn validate(&self) -> Result<HashMap<String, (i64, i64, bool)>> {
        let tables = self.source.introspect()?;
        let mut results = HashMap::new();

        for table in &tables {
            if !self.table_included(&table.name) {
                continue;
            }
            let source_count = self.source.row_count(&table.name)?;
            let target_count = self.target.row_count(&table.name).await.unwrap_or(0);
            let matches = source_count == target_count;
            results.insert(table.name.clone(), (source_count, target_count, matches));

            if matches {
                info!("{}: {} rows (match)", table.name, source_count);
            } else {
                warn!(
                    "{}: source={} target={} (MISMATCH)",
                    table.name, source_count, target_count
                );
            }
        }

        Ok(results)
    }

    fn table_included(&self, name: &str) -> bool {
        let migration = &self.config.migration;
        let included = migration.include_tables.is_empty()
            || migration
                .include_tables
                .iter()
                .any(|p| pattern_matches(p, name));
        let excluded = migration
            .exclude_tables
            .iter()
            .any(|p| pattern_matches(p, name));
        included && !excluded
    }
}

fn index_of(tables: &[Table], name: &str) -> usize {
    tables
        .iter()
        .position(|t| t.name == name)
        .expect("ordered name comes from the same table set")
}

/// Match a table name against an exact pattern or a trailing-`*` prefix
/// wildcard.
fn pattern_matches(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => pattern == name,
    }
}
