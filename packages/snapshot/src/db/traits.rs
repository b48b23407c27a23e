//! Storage seams used by the logical export and restore path.
//!
//! Rows travel as JSON objects keyed by column name. That keeps the
//! fallback manifest independent of the schema: a backend only needs to
//! read a whole table as objects and write objects back.

use super::error::DatabaseResult;
use async_trait::async_trait;
use std::time::Duration;

/// One table row, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Read access plus the ability to open a write transaction.
#[async_trait]
pub trait Database: Send + Sync {
    /// Read every row of `table`.
    async fn fetch_all(&self, table: &str) -> DatabaseResult<Vec<Row>>;

    /// Count the rows currently in `table`.
    async fn count(&self, table: &str) -> DatabaseResult<u64>;

    /// Open a transaction that is aborted if it runs longer than `timeout`.
    async fn begin(&self, timeout: Duration) -> DatabaseResult<Box<dyn Transaction>>;

    /// Open a read-only view pinned to the current committed state.
    ///
    /// Every table read through the snapshot reflects the same instant,
    /// whatever is committed by others in the meantime.
    async fn begin_read(&self) -> DatabaseResult<Box<dyn ReadSnapshot>>;
}

/// A consistent, read-only view of the whole database.
#[async_trait]
pub trait ReadSnapshot: Send {
    /// Read every row of `table` as of the snapshot.
    ///
    /// A failed read leaves the snapshot usable for other tables.
    async fn fetch_all(&mut self, table: &str) -> DatabaseResult<Vec<Row>>;

    /// Release the snapshot.
    async fn close(self: Box<Self>) -> DatabaseResult<()>;
}

/// A write transaction. Nothing it does is visible until [`commit`].
///
/// Dropping a transaction without committing discards its changes.
///
/// [`commit`]: Transaction::commit
#[async_trait]
pub trait Transaction: Send {
    /// Delete every row of `table`, returning the number removed.
    async fn delete_all(&mut self, table: &str) -> DatabaseResult<u64>;

    /// Insert `rows` into `table`, returning the number inserted.
    async fn insert_rows(&mut self, table: &str, rows: &[Row]) -> DatabaseResult<u64>;

    /// Mark a point that later work can be rolled back to.
    async fn savepoint(&mut self, name: &str) -> DatabaseResult<()>;

    /// Undo everything since `savepoint(name)` and keep the transaction open.
    async fn rollback_to_savepoint(&mut self, name: &str) -> DatabaseResult<()>;

    /// Forget a savepoint, keeping its changes.
    async fn release_savepoint(&mut self, name: &str) -> DatabaseResult<()>;

    /// Make all changes visible atomically.
    async fn commit(self: Box<Self>) -> DatabaseResult<()>;

    /// Discard all changes.
    async fn rollback(self: Box<Self>) -> DatabaseResult<()>;
}
