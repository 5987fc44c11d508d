//! MySQL/MariaDB target operations.
//!
//! Owns the target connection pool for the run, executes the emitted
//! DDL, and performs batched, transactional inserts.

use crate::config::TargetConfig;
use crate::emitter::quote_ident;
use crate::error::{MigrateError, Result};
use crate::schema::Table;
use crate::value::Row;
use mysql_async::prelude::*;
use mysql_async::{Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, SslOpts, TxOpts};
use tracing::{debug, info, warn};

/// MySQL caps a prepared statement at 65535 placeholders.
const MYSQL_MAX_PLACEHOLDERS: usize = 65_535;

/// MySQL target loader.
pub struct MysqlLoader {
    pool: Pool,
}

impl MysqlLoader {
    /// Connect to the target and verify the connection.
    pub async fn new(config: &TargetConfig) -> Result<Self> {
        let ssl_opts = match config.ssl_mode.as_str() {
            "disable" => {
                warn!("MySQL TLS is disabled. Credentials will be transmitted in plaintext.");
                None
            }
            _ => Some(SslOpts::default().with_danger_accept_invalid_certs(true)),
        };

        let mut builder = OptsBuilder::default()
            .ip_or_hostname(&config.host)
            .tcp_port(config.port)
            .db_name(Some(&config.database))
            .user(Some(&config.user))
            .pass(Some(&config.password))
            // Use utf8mb4 for full Unicode support
            .init(vec!["SET NAMES utf8mb4"]);

        if let Some(ssl) = ssl_opts {
            builder = builder.ssl_opts(ssl);
        }

        let pool_opts =
            PoolOpts::new().with_constraints(PoolConstraints::new(1, 2).expect("valid constraints"));

        let opts: Opts = builder.pool_opts(pool_opts).into();
        let pool = Pool::new(opts);

        // Test connection
        let mut conn = pool.get_conn().await?;
        conn.query_drop("SELECT 1").await?;
        drop(conn);

        info!(
            "Connected to MySQL target: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self { pool })
    }

    /// Execute a single DDL statement.
    pub async fn execute_ddl(&self, sql: &str) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        conn.query_drop(sql).await?;
        debug!("Executed DDL: {}", first_line(sql));
        Ok(())
    }

    /// Toggle session foreign key checks.
    ///
    /// Disabled for the duration of schema creation and data load so that
    /// statement order is independent of the foreign key topology.
    pub async fn set_foreign_key_checks(&self, enabled: bool) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        let flag = if enabled { 1 } else { 0 };
        conn.query_drop(format!("SET SESSION FOREIGN_KEY_CHECKS = {}", flag))
            .await?;
        debug!("Foreign key checks set to {}", flag);
        Ok(())
    }

    /// Insert one batch of rows inside a single transaction.
    ///
    /// The batch either commits whole or rolls back whole; a transient
    /// failure is retried once before surfacing.
    pub async fn load_batch(
        &self,
        table: &str,
        cols: &[String],
        rows: &[Row],
        batch_offset: u64,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        match self.insert_batch(table, cols, rows).await {
            Ok(n) => Ok(n),
            Err(e) if e.is_transient() => {
                warn!(
                    "{}: transient failure at batch offset {}, retrying once: {}",
                    table, batch_offset, e
                );
                self.insert_batch(table, cols, rows)
                    .await
                    .map_err(|e| MigrateError::target_write(table, batch_offset, e.to_string()))
            }
            Err(e) => Err(MigrateError::target_write(
                table,
                batch_offset,
                e.to_string(),
            )),
        }
    }

    async fn insert_batch(&self, table: &str, cols: &[String], rows: &[Row]) -> Result<u64> {
        let mut conn = self.pool.get_conn().await?;
        let mut tx = conn.start_transaction(TxOpts::default()).await?;

        let max_rows_per_stmt = (MYSQL_MAX_PLACEHOLDERS / cols.len().max(1)).max(1);
        for chunk in rows.chunks(max_rows_per_stmt) {
            let sql = build_insert_sql(table, cols, chunk.len());
            let params: Vec<mysql_async::Value> = chunk
                .iter()
                .flat_map(|row| row.iter().cloned().map(mysql_async::Value::from))
                .collect();
            tx.exec_drop(&sql, params).await?;
        }

        // Dropping an uncommitted transaction rolls it back.
        tx.commit().await?;

        debug!("Wrote {} rows to {}", rows.len(), table);
        Ok(rows.len() as u64)
    }

    /// Advance the AUTO_INCREMENT counter past the maximum loaded value.
    pub async fn advance_auto_increment(&self, table: &Table) -> Result<()> {
        let Some(col) = table.auto_increment_target() else {
            return Ok(());
        };

        let mut conn = self.pool.get_conn().await?;

        let max_sql = format!(
            "SELECT COALESCE(MAX({}), 0) FROM {}",
            quote_ident(&col.name),
            quote_ident(&table.name)
        );
        let max_val: Option<i64> = conn.query_first(&max_sql).await?;
        let next_val = max_val.unwrap_or(0) + 1;

        conn.query_drop(format!(
            "ALTER TABLE {} AUTO_INCREMENT = {}",
            quote_ident(&table.name),
            next_val
        ))
        .await?;

        debug!(
            "Reset AUTO_INCREMENT to {} for {}.{}",
            next_val, table.name, col.name
        );
        Ok(())
    }

    /// Current row count of a target table.
    pub async fn row_count(&self, table: &str) -> Result<i64> {
        let mut conn = self.pool.get_conn().await?;
        let count: Option<i64> = conn
            .query_first(format!("SELECT COUNT(*) FROM {}", quote_ident(table)))
            .await?;
        Ok(count.unwrap_or(0))
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        self.pool.clone().disconnect().await.ok();
    }
}

/// Render a multi-row INSERT statement with placeholders.
fn build_insert_sql(table: &str, cols: &[String], row_count: usize) -> String {
    let col_list: Vec<String> = cols.iter().map(|c| quote_ident(c)).collect();
    let row_placeholders = format!("({})", vec!["?"; cols.len()].join(", "));
    let all_placeholders = vec![row_placeholders; row_count].join(", ");

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_ident(table),
        col_list.join(", "),
        all_placeholders
    )
}

fn first_line(sql: &str) -> &str {
    sql.lines().next().unwrap_or(sql)
}
