//! In-process database backend
//!
//! `MemoryDatabase` keeps every table as a vector of JSON rows. Transactions
//! work on a private copy of the tables and publish it on commit, so a
//! transaction that is rolled back or dropped leaves no trace. Simple
//! foreign keys are enforced so deletion and insertion order matter the same
//! way they do in PostgreSQL.
//!
//! The backend also counts write calls and can be told to fail specific
//! operations, which makes the restore path observable without a server.

use super::error::{DatabaseError, DatabaseResult};
use super::traits::{Database, ReadSnapshot, Row, Transaction};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

type Tables = BTreeMap<String, Vec<Row>>;

/// Transaction ID generator
static TRANSACTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Column in `child` that must match an `id` in `parent`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    /// Referencing table
    pub child: String,
    /// Referencing column
    pub column: String,
    /// Referenced table, matched on its `id` column
    pub parent: String,
}

/// Kind of write recorded in the operation log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// A transaction was opened
    Begin,
    /// `delete_all` on a table
    Delete(String),
    /// `insert_rows` on a table with the row count
    Insert(String, usize),
    /// A transaction was committed
    Commit,
    /// A transaction was rolled back
    Rollback,
}

#[derive(Default)]
struct Faults {
    fail_fetch: HashSet<String>,
    fail_delete: HashSet<String>,
    fail_insert: HashSet<String>,
}

#[derive(Default)]
struct MemoryInner {
    tables: Mutex<Tables>,
    foreign_keys: Mutex<Vec<ForeignKey>>,
    faults: Mutex<Faults>,
    write_log: Mutex<Vec<WriteOp>>,
    write_calls: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> DatabaseResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| DatabaseError::internal("memory database lock poisoned"))
}

/// Shared in-memory database. Clones refer to the same tables.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<MemoryInner>,
}

impl MemoryDatabase {
    /// Create an empty database with no tables
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `name` if it does not exist yet
    pub fn create_table(&self, name: &str) -> DatabaseResult<()> {
        lock(&self.inner.tables)?
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    /// Declare that `child.column` references `parent.id`
    pub fn add_foreign_key(&self, child: &str, column: &str, parent: &str) -> DatabaseResult<()> {
        lock(&self.inner.foreign_keys)?.push(ForeignKey {
            child: child.to_string(),
            column: column.to_string(),
            parent: parent.to_string(),
        });
        Ok(())
    }

    /// Replace the contents of `table` directly, outside any transaction.
    ///
    /// Seeding is fixture setup and is not counted as a write call.
    pub fn seed(&self, table: &str, rows: Vec<Row>) -> DatabaseResult<()> {
        lock(&self.inner.tables)?.insert(table.to_string(), rows);
        Ok(())
    }

    /// Current committed rows of `table`
    pub fn rows(&self, table: &str) -> DatabaseResult<Vec<Row>> {
        lock(&self.inner.tables)?
            .get(table)
            .cloned()
            .ok_or_else(|| DatabaseError::UnknownTable(table.to_string()))
    }

    /// Copy of every committed table
    pub fn snapshot(&self) -> DatabaseResult<BTreeMap<String, Vec<Row>>> {
        Ok(lock(&self.inner.tables)?.clone())
    }

    /// Make every later `fetch_all` of `table` fail
    pub fn fail_fetches_of(&self, table: &str) -> DatabaseResult<()> {
        lock(&self.inner.faults)?
            .fail_fetch
            .insert(table.to_string());
        Ok(())
    }

    /// Make every later `delete_all` on `table` fail
    pub fn fail_deletes_from(&self, table: &str) -> DatabaseResult<()> {
        lock(&self.inner.faults)?
            .fail_delete
            .insert(table.to_string());
        Ok(())
    }

    /// Make every later `insert_rows` into `table` fail
    pub fn fail_inserts_into(&self, table: &str) -> DatabaseResult<()> {
        lock(&self.inner.faults)?
            .fail_insert
            .insert(table.to_string());
        Ok(())
    }

    /// Number of write calls made so far: begin, delete, insert and commit
    pub fn write_calls(&self) -> u64 {
        self.inner.write_calls.load(Ordering::SeqCst)
    }

    /// Every write operation in the order it was issued
    pub fn write_log(&self) -> DatabaseResult<Vec<WriteOp>> {
        Ok(lock(&self.inner.write_log)?.clone())
    }

    fn record(&self, op: WriteOp) -> DatabaseResult<()> {
        self.inner.write_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.write_log)?.push(op);
        Ok(())
    }

    fn injected(&self, table: &str, pick: fn(&Faults) -> &HashSet<String>) -> DatabaseResult<()> {
        if pick(&*lock(&self.inner.faults)?).contains(table) {
            return Err(DatabaseError::Injected(format!("operation on '{table}' failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn fetch_all(&self, table: &str) -> DatabaseResult<Vec<Row>> {
        self.injected(table, |f| &f.fail_fetch)?;
        self.rows(table)
    }

    async fn count(&self, table: &str) -> DatabaseResult<u64> {
        let tables = lock(&self.inner.tables)?;
        let rows = tables
            .get(table)
            .ok_or_else(|| DatabaseError::UnknownTable(table.to_string()))?;
        Ok(rows.len() as u64)
    }

    async fn begin(&self, timeout: Duration) -> DatabaseResult<Box<dyn Transaction>> {
        self.record(WriteOp::Begin)?;
        let working = self.snapshot()?;
        let foreign_keys = lock(&self.inner.foreign_keys)?.clone();
        let id = TRANSACTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        log::debug!("memory transaction {id} opened");
        Ok(Box::new(MemoryTransaction {
            id,
            db: self.clone(),
            working,
            savepoints: Vec::new(),
            foreign_keys,
            timeout,
            deadline: Instant::now() + timeout,
        }))
    }

    async fn begin_read(&self) -> DatabaseResult<Box<dyn ReadSnapshot>> {
        Ok(Box::new(MemoryReadSnapshot {
            db: self.clone(),
            tables: self.snapshot()?,
        }))
    }
}

/// Frozen copy of the committed tables. Reads are not write calls.
pub struct MemoryReadSnapshot {
    db: MemoryDatabase,
    tables: Tables,
}

#[async_trait]
impl ReadSnapshot for MemoryReadSnapshot {
    async fn fetch_all(&mut self, table: &str) -> DatabaseResult<Vec<Row>> {
        self.db.injected(table, |f| &f.fail_fetch)?;
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| DatabaseError::UnknownTable(table.to_string()))
    }

    async fn close(self: Box<Self>) -> DatabaseResult<()> {
        Ok(())
    }
}

/// Transaction over a private copy of the tables
pub struct MemoryTransaction {
    id: u64,
    db: MemoryDatabase,
    working: Tables,
    savepoints: Vec<(String, Tables)>,
    foreign_keys: Vec<ForeignKey>,
    timeout: Duration,
    deadline: Instant,
}

impl MemoryTransaction {
    fn check_deadline(&self) -> DatabaseResult<()> {
        if Instant::now() > self.deadline {
            return Err(DatabaseError::Timeout(self.timeout));
        }
        Ok(())
    }

    fn table_mut(&mut self, table: &str) -> DatabaseResult<&mut Vec<Row>> {
        self.working
            .get_mut(table)
            .ok_or_else(|| DatabaseError::UnknownTable(table.to_string()))
    }

    fn ids_of(&self, table: &str) -> BTreeSet<String> {
        self.working
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| row.get("id"))
                    .map(|id| id.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn check_still_referenced(&self, table: &str) -> DatabaseResult<()> {
        for fk in self.foreign_keys.iter().filter(|fk| fk.parent == table) {
            let referenced = self
                .working
                .get(&fk.child)
                .map(|rows| {
                    rows.iter()
                        .any(|row| row.get(&fk.column).is_some_and(|v| !v.is_null()))
                })
                .unwrap_or(false);
            if referenced {
                return Err(DatabaseError::Constraint(format!(
                    "rows in '{table}' are still referenced by {}.{}",
                    fk.child, fk.column
                )));
            }
        }
        Ok(())
    }

    fn check_references(&self, table: &str, rows: &[Row]) -> DatabaseResult<()> {
        for fk in self.foreign_keys.iter().filter(|fk| fk.child == table) {
            let parents = self.ids_of(&fk.parent);
            for row in rows {
                let Some(value) = row.get(&fk.column).filter(|v| !v.is_null()) else {
                    continue;
                };
                if !parents.contains(&value.to_string()) {
                    return Err(DatabaseError::Constraint(format!(
                        "{table}.{} = {value} has no matching row in '{}'",
                        fk.column, fk.parent
                    )));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn delete_all(&mut self, table: &str) -> DatabaseResult<u64> {
        self.db.record(WriteOp::Delete(table.to_string()))?;
        self.check_deadline()?;
        self.db.injected(table, |f| &f.fail_delete)?;
        self.check_still_referenced(table)?;
        let rows = self.table_mut(table)?;
        let removed = rows.len() as u64;
        rows.clear();
        Ok(removed)
    }

    async fn insert_rows(&mut self, table: &str, rows: &[Row]) -> DatabaseResult<u64> {
        self.db.record(WriteOp::Insert(table.to_string(), rows.len()))?;
        self.check_deadline()?;
        self.db.injected(table, |f| &f.fail_insert)?;
        self.check_references(table, rows)?;

        let existing = self.ids_of(table);
        let mut seen = HashSet::new();
        for id in rows.iter().filter_map(|row| row.get("id")) {
            let key = id.to_string();
            if existing.contains(&key) || !seen.insert(key) {
                return Err(DatabaseError::Constraint(format!(
                    "duplicate id {id} in '{table}'"
                )));
            }
        }

        self.table_mut(table)?.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn savepoint(&mut self, name: &str) -> DatabaseResult<()> {
        self.check_deadline()?;
        self.savepoints.push((name.to_string(), self.working.clone()));
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> DatabaseResult<()> {
        let position = self
            .savepoints
            .iter()
            .rposition(|(saved, _)| saved == name)
            .ok_or_else(|| DatabaseError::UnknownSavepoint(name.to_string()))?;
        // The savepoint itself survives a rollback to it, later ones do not.
        self.savepoints.truncate(position + 1);
        if let Some((_, tables)) = self.savepoints.last() {
            self.working = tables.clone();
        }
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> DatabaseResult<()> {
        let position = self
            .savepoints
            .iter()
            .rposition(|(saved, _)| saved == name)
            .ok_or_else(|| DatabaseError::UnknownSavepoint(name.to_string()))?;
        self.savepoints.truncate(position);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> DatabaseResult<()> {
        self.db.record(WriteOp::Commit)?;
        self.check_deadline()?;
        let MemoryTransaction { id, db, working, .. } = *self;
        *lock(&db.inner.tables)? = working;
        log::debug!("memory transaction {id} committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DatabaseResult<()> {
        self.db.record(WriteOp::Rollback)?;
        log::debug!("memory transaction {} rolled back", self.id);
        Ok(())
    }
}
