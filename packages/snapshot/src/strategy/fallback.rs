//! Logical export through the table repositories.
//!
//! Used when `pg_dump` is not installed. The whole database is written as a
//! JSON manifest; restoring it empties every registered table and reloads
//! it inside one transaction. Required tables are all-or-nothing. Optional
//! tables run inside savepoints, so a failing one is rolled back on its own
//! and reported instead of aborting the restore.

use super::{
    Availability, DatabaseStrategy, Dump, DumpFormat, ExportOutcome, PreparedDump, RestoreReport,
};
use crate::db::{
    ConnectionTarget, DatabaseError, DatabaseResult, ExportManifest, Row, SkippedCollection,
    TableRegistry, TableRepository, Transaction,
};
use crate::error::{SnapshotError, SnapshotResult};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use strongbox_common::LoggingTransformer;

enum TableOp<'a> {
    Clear,
    Load(&'a [Row]),
}

/// Strategy that exports and restores through a [`TableRegistry`]
pub struct JsonFallbackStrategy {
    registry: Arc<TableRegistry>,
    transaction_timeout: Duration,
}

impl JsonFallbackStrategy {
    /// Strategy over `registry`; restores abort after `transaction_timeout`
    pub fn new(registry: Arc<TableRegistry>, transaction_timeout: Duration) -> Self {
        Self {
            registry,
            transaction_timeout,
        }
    }

    /// Registry this strategy reads and writes
    pub fn registry(&self) -> &Arc<TableRegistry> {
        &self.registry
    }

    /// Read every registered table into a manifest
    ///
    /// All tables come from one read snapshot, so rows committed while the
    /// export runs never leave a child row without its parent.
    pub async fn export_manifest(&self) -> SnapshotResult<ExportManifest> {
        let mut manifest = ExportManifest::new();
        let mut snapshot = self.registry.begin_read().await?;

        for repo in self.registry.forward() {
            let spec = repo.spec();
            match repo.export_rows(snapshot.as_mut()).await {
                Ok(rows) => {
                    LoggingTransformer::log_table_rows("export", &spec.name, rows.len() as u64);
                    manifest.insert_table(spec.name.clone(), rows);
                }
                Err(e) if !spec.required => {
                    let reason = e.to_string();
                    LoggingTransformer::log_partial_table("export", &spec.name, &reason);
                    manifest.skip_table(spec.name.clone(), reason);
                }
                Err(e) => {
                    log::error!("Export of required table '{}' failed: {e}", spec.name);
                    return Err(SnapshotError::Database(e));
                }
            }
        }

        snapshot.close().await?;
        Ok(manifest)
    }

    /// Reload the database from a validated manifest in one transaction
    pub async fn restore_manifest(
        &self,
        manifest: &ExportManifest,
    ) -> SnapshotResult<RestoreReport> {
        for table in manifest.tables.keys() {
            if !self.registry.contains(table) {
                log::warn!("Ignoring table '{table}' in export: not part of the current schema");
            }
        }

        let mut tx = self.registry.begin(self.transaction_timeout).await?;
        match self.reload(tx.as_mut(), manifest).await {
            Ok(report) => {
                tx.commit().await?;
                Ok(report)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    log::error!("Rollback after failed restore also failed: {rollback}");
                }
                Err(e)
            }
        }
    }

    async fn reload(
        &self,
        tx: &mut dyn Transaction,
        manifest: &ExportManifest,
    ) -> SnapshotResult<RestoreReport> {
        let mut report = RestoreReport::new(self.name());
        let mut skipped = BTreeSet::new();

        for repo in self.registry.reverse() {
            let name = repo.spec().name.clone();
            if let Some(reason) = run_table_op(repo.as_ref(), tx, TableOp::Clear).await?.err() {
                skipped.insert(name.clone());
                report.skipped.push(SkippedCollection { table: name, reason });
            }
        }

        for repo in self.registry.forward() {
            let name = repo.spec().name.clone();
            if skipped.contains(&name) {
                continue;
            }
            let rows = manifest.rows(&name);
            match run_table_op(repo.as_ref(), tx, TableOp::Load(rows)).await? {
                Ok(inserted) => {
                    LoggingTransformer::log_table_rows("restore", &name, inserted);
                    report.tables.insert(name, inserted);
                }
                Err(reason) => report.skipped.push(SkippedCollection { table: name, reason }),
            }
        }

        for skip in &report.skipped {
            LoggingTransformer::log_partial_table("restore", &skip.table, &skip.reason);
        }
        Ok(report)
    }
}

async fn apply(
    repo: &dyn TableRepository,
    tx: &mut dyn Transaction,
    op: &TableOp<'_>,
) -> DatabaseResult<u64> {
    match op {
        TableOp::Clear => repo.clear(tx).await,
        TableOp::Load(rows) => repo.load(tx, rows).await,
    }
}

/// Run one step for one table.
///
/// The outer error aborts the restore. The inner error is an optional table
/// that failed and was rolled back to its savepoint.
async fn run_table_op(
    repo: &dyn TableRepository,
    tx: &mut dyn Transaction,
    op: TableOp<'_>,
) -> SnapshotResult<Result<u64, String>> {
    let spec = repo.spec();
    let critical = |source: DatabaseError| SnapshotError::CriticalRestoreFailure {
        table: spec.name.clone(),
        source,
    };

    if spec.required {
        return apply(repo, tx, &op).await.map(Ok).map_err(critical);
    }

    let savepoint = format!("strongbox_{}", spec.name);
    tx.savepoint(&savepoint).await.map_err(critical)?;
    match apply(repo, tx, &op).await {
        Ok(rows) => {
            tx.release_savepoint(&savepoint).await.map_err(critical)?;
            Ok(Ok(rows))
        }
        Err(e) => {
            tx.rollback_to_savepoint(&savepoint).await.map_err(critical)?;
            tx.release_savepoint(&savepoint).await.map_err(critical)?;
            Ok(Err(e.to_string()))
        }
    }
}

#[async_trait]
impl DatabaseStrategy for JsonFallbackStrategy {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn format(&self) -> DumpFormat {
        DumpFormat::Json
    }

    async fn probe(&self) -> Availability {
        Availability::Available(format!("{} registered tables", self.registry.names().len()))
    }

    async fn try_export(
        &self,
        _target: &ConnectionTarget,
        dir: &Path,
    ) -> SnapshotResult<ExportOutcome> {
        let manifest = self.export_manifest().await?;
        let path = dir.join(DumpFormat::Json.file_name());
        tokio::fs::write(&path, serde_json::to_vec(&manifest)?).await?;

        log::info!(
            "Fallback export wrote {} records across {} tables",
            manifest.total_records,
            manifest.tables.len()
        );

        Ok(ExportOutcome::Dumped(Dump {
            path,
            format: DumpFormat::Json,
            strategy: self.name(),
            counts: manifest.counts,
            skipped: manifest.skipped_tables,
        }))
    }

    async fn prepare(&self, dump: &Path) -> SnapshotResult<PreparedDump> {
        let bytes = tokio::fs::read(dump)
            .await
            .map_err(|_| SnapshotError::InvalidArchive("database export is missing".to_string()))?;
        let manifest = ExportManifest::parse(&bytes)?;
        manifest.validate(self.registry.root())?;

        Ok(PreparedDump {
            path: dump.to_path_buf(),
            manifest: Some(manifest),
        })
    }

    async fn restore(
        &self,
        _target: &ConnectionTarget,
        dump: PreparedDump,
    ) -> SnapshotResult<RestoreReport> {
        let manifest = match dump.manifest {
            Some(manifest) => manifest,
            None => self
                .prepare(&dump.path)
                .await?
                .manifest
                .ok_or_else(|| {
                    SnapshotError::Internal("prepared dump lost its manifest".to_string())
                })?,
        };
        self.restore_manifest(&manifest).await
    }
}
