//! Per-table repositories and the registry that orders them.

use super::error::DatabaseResult;
use super::traits::{Database, ReadSnapshot, Row, Transaction};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Name of a table and whether a restore may continue without it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table name as known to the database
    pub name: String,
    /// Required tables abort the whole restore when they fail
    pub required: bool,
}

impl TableSpec {
    /// A table that must export and restore successfully
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
        }
    }

    /// A best-effort table that may be skipped and reported
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
        }
    }
}

/// Data access for one entity table.
#[async_trait]
pub trait TableRepository: Send + Sync {
    /// Identity of the table this repository manages
    fn spec(&self) -> &TableSpec;

    /// Read all rows for export through a shared snapshot
    async fn export_rows(&self, snapshot: &mut dyn ReadSnapshot) -> DatabaseResult<Vec<Row>>;

    /// Count the rows currently stored
    async fn live_count(&self) -> DatabaseResult<u64>;

    /// Remove all rows inside `tx`
    async fn clear(&self, tx: &mut dyn Transaction) -> DatabaseResult<u64>;

    /// Insert exported rows inside `tx`
    async fn load(&self, tx: &mut dyn Transaction, rows: &[Row]) -> DatabaseResult<u64>;
}

/// Repository that maps a table straight onto a [`Database`].
pub struct TableDao {
    spec: TableSpec,
    db: Arc<dyn Database>,
}

impl TableDao {
    /// Bind `spec` to `db`
    pub fn new(spec: TableSpec, db: Arc<dyn Database>) -> Self {
        Self { spec, db }
    }
}

#[async_trait]
impl TableRepository for TableDao {
    fn spec(&self) -> &TableSpec {
        &self.spec
    }

    async fn export_rows(&self, snapshot: &mut dyn ReadSnapshot) -> DatabaseResult<Vec<Row>> {
        snapshot.fetch_all(&self.spec.name).await
    }

    async fn live_count(&self) -> DatabaseResult<u64> {
        self.db.count(&self.spec.name).await
    }

    async fn clear(&self, tx: &mut dyn Transaction) -> DatabaseResult<u64> {
        tx.delete_all(&self.spec.name).await
    }

    async fn load(&self, tx: &mut dyn Transaction, rows: &[Row]) -> DatabaseResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        tx.insert_rows(&self.spec.name, rows).await
    }
}

/// Tables in foreign-key dependency order, parents first.
///
/// Export and insert walk the registry forward; deletion walks it in
/// reverse so children are removed before the rows they reference.
pub struct TableRegistry {
    db: Arc<dyn Database>,
    root: String,
    tables: Vec<Arc<dyn TableRepository>>,
}

impl TableRegistry {
    /// Empty registry over `db`. `root` names the collection a valid
    /// export must never leave empty.
    pub fn new(db: Arc<dyn Database>, root: impl Into<String>) -> Self {
        Self {
            db,
            root: root.into(),
            tables: Vec::new(),
        }
    }

    /// Append a repository after every table it references
    #[must_use]
    pub fn register(mut self, repository: Arc<dyn TableRepository>) -> Self {
        self.tables.push(repository);
        self
    }

    /// Append a [`TableDao`] for `spec`
    #[must_use]
    pub fn table(self, spec: TableSpec) -> Self {
        let dao = Arc::new(TableDao::new(spec, Arc::clone(&self.db)));
        self.register(dao)
    }

    /// The classifieds schema: reference data, accounts and listings are
    /// required; history, audit and seller profile tables are optional.
    pub fn classifieds(db: Arc<dyn Database>) -> Self {
        Self::new(db, "users")
            .table(TableSpec::required("categories"))
            .table(TableSpec::required("cities"))
            .table(TableSpec::required("neighborhoods"))
            .table(TableSpec::required("streets"))
            .table(TableSpec::required("users"))
            .table(TableSpec::required("listings"))
            .table(TableSpec::optional("listing_history"))
            .table(TableSpec::optional("audit_log"))
            .table(TableSpec::optional("seller_profiles"))
    }

    /// Collection that must be non-empty in any restorable export
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Backend shared by the registered repositories
    pub fn database(&self) -> &Arc<dyn Database> {
        &self.db
    }

    /// Open a transaction on the shared backend
    pub async fn begin(&self, timeout: Duration) -> DatabaseResult<Box<dyn Transaction>> {
        self.db.begin(timeout).await
    }

    /// Pin a read snapshot on the shared backend
    pub async fn begin_read(&self) -> DatabaseResult<Box<dyn ReadSnapshot>> {
        self.db.begin_read().await
    }

    /// Repositories in dependency order
    pub fn forward(&self) -> impl Iterator<Item = &Arc<dyn TableRepository>> {
        self.tables.iter()
    }

    /// Repositories in reverse dependency order
    pub fn reverse(&self) -> impl Iterator<Item = &Arc<dyn TableRepository>> {
        self.tables.iter().rev()
    }

    /// Look a repository up by table name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn TableRepository>> {
        self.tables.iter().find(|repo| repo.spec().name == name)
    }

    /// Whether `name` is a registered table
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Registered table names in dependency order
    pub fn names(&self) -> Vec<&str> {
        self.tables.iter().map(|repo| repo.spec().name.as_str()).collect()
    }
}
