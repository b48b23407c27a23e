//! # Strongbox Snapshot
//!
//! Full-system backup and restore for a classifieds deployment.
//!
//! [`SnapshotOrchestrator::create`] dumps the database, packs it with the
//! uploaded media and the application source tree, and encrypts the result
//! with a password. [`SnapshotOrchestrator::restore`] reverses that: it
//! decrypts and unpacks an archive, validates the dump, reloads the
//! database in a single transaction and swaps in the media directory.
//!
//! ```no_run
//! use std::sync::Arc;
//! use secrecy::SecretString;
//! use strongbox_snapshot::prelude::*;
//!
//! # async fn run() -> SnapshotResult<()> {
//! let config = SnapshotConfig::from_env();
//! let target = ConnectionTarget::parse(&config.database_url()?)?;
//! let db = Arc::new(PgDatabase::connect_lazy(&target, 4)?);
//! let registry = Arc::new(TableRegistry::classifieds(db));
//! let strategies: Vec<Arc<dyn DatabaseStrategy>> = vec![
//!     Arc::new(NativeToolStrategy::postgres()),
//!     Arc::new(JsonFallbackStrategy::new(registry, config.transaction_timeout())),
//! ];
//! let orchestrator = SnapshotOrchestrator::new(config, strategies);
//!
//! let password = SecretString::from("correct horse battery".to_string());
//! let file = orchestrator.create(&password).await?;
//! orchestrator.restore(&file.file_path, &password).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod db;
pub mod error;
pub mod lock;
pub mod orchestrator;
pub mod stage;
pub mod strategy;
pub mod workspace;

pub use config::SnapshotConfig;
pub use error::{SnapshotError, SnapshotResult};
pub use lock::{ExclusiveOperationLock, OperationGuard, OperationKind};
pub use orchestrator::{
    ARCHIVE_ROOT, SITE_CODE_DIR, SnapshotFile, SnapshotOrchestrator, UPLOADS_DIR,
};
pub use stage::OperationStage;
pub use strategy::{
    Availability, DatabaseExporter, DatabaseRestorer, DatabaseStrategy, Dump, DumpFormat,
    ExportOutcome, JsonFallbackStrategy, NativeToolStrategy, PreparedDump, RestoreReport,
};
pub use workspace::{TempWorkspace, TempWorkspaceManager};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::db::{
        ConnectionTarget, Database, MemoryDatabase, PgDatabase, TableRegistry, TableSpec,
    };
    pub use crate::{
        DatabaseStrategy, JsonFallbackStrategy, NativeToolStrategy, OperationKind,
        RestoreReport, SnapshotConfig, SnapshotError, SnapshotFile, SnapshotOrchestrator,
        SnapshotResult,
    };
}
