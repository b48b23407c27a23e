//! PostgreSQL backend for the logical export and restore path.
//!
//! Tables are read as one JSON array per query (`jsonb_agg`) and written
//! back with `jsonb_populate_recordset`, so no per-table row types are
//! needed. After a table is reloaded its `id` sequence is moved past the
//! highest restored id. Exports read every table inside one
//! `REPEATABLE READ` read-only transaction, so the dump has a single point
//! in time.

use super::connection::ConnectionTarget;
use super::error::{DatabaseError, DatabaseResult};
use super::traits::{Database, ReadSnapshot, Row, Transaction};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::postgres::{PgConnectOptions, PgExecutor, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use std::time::Duration;

/// Quote `name` as a SQL identifier, rejecting anything but
/// `[A-Za-z_][A-Za-z0-9_]*`.
pub fn quote_ident(name: &str) -> DatabaseResult<String> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_start || !valid_rest || name.len() > 63 {
        return Err(DatabaseError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{name}\""))
}

async fn fetch_table<'e, E: PgExecutor<'e>>(executor: E, table: &str) -> DatabaseResult<Vec<Row>> {
    let ident = quote_ident(table)?;
    let sql = format!("SELECT COALESCE(jsonb_agg(to_jsonb(t)), '[]'::jsonb) FROM {ident} t");
    let value: serde_json::Value = sqlx::query_scalar(&sql).fetch_one(executor).await?;
    Ok(serde_json::from_value(value)?)
}

/// Connection pool wrapper implementing [`Database`].
pub struct PgDatabase {
    pool: Pool<Postgres>,
}

impl PgDatabase {
    /// Build a pool for `target`. Connections are opened on first use, so
    /// a snapshot that only needs `pg_dump` never touches the pool.
    pub fn connect_lazy(target: &ConnectionTarget, max_connections: u32) -> DatabaseResult<Self> {
        let opts = PgConnectOptions::from_str(target.url().expose_secret())?;

        tracing::info!(
            target = %target,
            max_connections = max_connections,
            "Configured PostgreSQL pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_lazy_with(opts);
        Ok(Self { pool })
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn fetch_all(&self, table: &str) -> DatabaseResult<Vec<Row>> {
        fetch_table(&self.pool, table).await
    }

    async fn count(&self, table: &str) -> DatabaseResult<u64> {
        let ident = quote_ident(table)?;
        let sql = format!("SELECT COUNT(*) FROM {ident}");
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        u64::try_from(count).map_err(|e| DatabaseError::internal(format!("negative count: {e}")))
    }

    async fn begin(&self, timeout: Duration) -> DatabaseResult<Box<dyn Transaction>> {
        let mut tx = self.pool.begin().await?;
        // SET does not take bind parameters; the value is a plain integer.
        let sql = format!("SET LOCAL statement_timeout = {}", timeout.as_millis());
        sqlx::query(&sql).execute(&mut *tx).await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn begin_read(&self) -> DatabaseResult<Box<dyn ReadSnapshot>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgReadSnapshot { tx }))
    }
}

/// Read-only transaction whose snapshot is taken by its first query.
pub struct PgReadSnapshot {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl ReadSnapshot for PgReadSnapshot {
    async fn fetch_all(&mut self, table: &str) -> DatabaseResult<Vec<Row>> {
        // A failed statement aborts the whole transaction unless it is
        // fenced by a savepoint.
        sqlx::query("SAVEPOINT strongbox_read")
            .execute(&mut *self.tx)
            .await?;
        match fetch_table(&mut *self.tx, table).await {
            Ok(rows) => {
                sqlx::query("RELEASE SAVEPOINT strongbox_read")
                    .execute(&mut *self.tx)
                    .await?;
                Ok(rows)
            }
            Err(e) => {
                sqlx::query("ROLLBACK TO SAVEPOINT strongbox_read")
                    .execute(&mut *self.tx)
                    .await?;
                sqlx::query("RELEASE SAVEPOINT strongbox_read")
                    .execute(&mut *self.tx)
                    .await?;
                Err(e)
            }
        }
    }

    async fn close(self: Box<Self>) -> DatabaseResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// An open PostgreSQL transaction.
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl PgTransaction {
    async fn resync_sequence(&mut self, table: &str, ident: &str) -> DatabaseResult<()> {
        let sequence: Option<Option<String>> = sqlx::query_scalar(
            "SELECT pg_get_serial_sequence($1, column_name) \
             FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $2 AND column_name = 'id'",
        )
        .bind(ident)
        .bind(table)
        .fetch_optional(&mut *self.tx)
        .await?;

        if let Some(sequence) = sequence.flatten() {
            let sql = format!(
                "SELECT setval($1::regclass, COALESCE((SELECT MAX(id) FROM {ident}), 0) + 1, false)"
            );
            sqlx::query(&sql)
                .bind(&sequence)
                .execute(&mut *self.tx)
                .await?;
            tracing::debug!(table = table, sequence = %sequence, "Sequence resynchronized");
        }
        Ok(())
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn delete_all(&mut self, table: &str) -> DatabaseResult<u64> {
        let ident = quote_ident(table)?;
        let result = sqlx::query(&format!("DELETE FROM {ident}"))
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_rows(&mut self, table: &str, rows: &[Row]) -> DatabaseResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let ident = quote_ident(table)?;
        let sql = format!(
            "INSERT INTO {ident} SELECT * FROM jsonb_populate_recordset(NULL::{ident}, $1)"
        );
        let result = sqlx::query(&sql)
            .bind(Json(rows))
            .execute(&mut *self.tx)
            .await?;
        self.resync_sequence(table, &ident).await?;
        Ok(result.rows_affected())
    }

    async fn savepoint(&mut self, name: &str) -> DatabaseResult<()> {
        let ident = quote_ident(name)?;
        sqlx::query(&format!("SAVEPOINT {ident}"))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> DatabaseResult<()> {
        let ident = quote_ident(name)?;
        sqlx::query(&format!("ROLLBACK TO SAVEPOINT {ident}"))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> DatabaseResult<()> {
        let ident = quote_ident(name)?;
        sqlx::query(&format!("RELEASE SAVEPOINT {ident}"))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> DatabaseResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DatabaseResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
