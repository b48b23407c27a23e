//! Database export and restore strategies.
//!
//! A strategy turns the live database into a dump file inside the archive
//! staging directory and back. The native strategy drives `pg_dump` and
//! `psql`; the fallback strategy writes a JSON manifest through the table
//! repositories. Strategies are tried in order and the first one whose
//! tooling exists wins.

pub mod exporter;
pub mod fallback;
pub mod native;
pub mod restorer;

pub use exporter::DatabaseExporter;
pub use fallback::JsonFallbackStrategy;
pub use native::NativeToolStrategy;
pub use restorer::{DatabaseRestorer, PreparedRestore};

use crate::db::{ConnectionTarget, ExportManifest, SkippedCollection};
use crate::error::SnapshotResult;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// On-disk format of a database dump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DumpFormat {
    /// Plain SQL script from `pg_dump`
    Sql,
    /// JSON export manifest
    Json,
}

impl DumpFormat {
    /// File name of the dump at the archive root
    pub fn file_name(self) -> &'static str {
        match self {
            DumpFormat::Sql => "database.sql",
            DumpFormat::Json => "database.json",
        }
    }
}

/// A dump written into the staging directory
#[derive(Debug, Clone)]
pub struct Dump {
    /// Location of the dump file
    pub path: PathBuf,
    /// File format
    pub format: DumpFormat,
    /// Strategy that produced it
    pub strategy: &'static str,
    /// Rows per table, when the strategy knows them
    pub counts: BTreeMap<String, u64>,
    /// Optional tables left out of the dump
    pub skipped: Vec<SkippedCollection>,
}

/// Result of asking a strategy to export
#[derive(Debug)]
pub enum ExportOutcome {
    /// The dump was written
    Dumped(Dump),
    /// The strategy's tooling is not installed; try the next one
    ToolUnavailable(String),
}

/// Whether a strategy's tooling can be used
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    /// Ready, with a version or description
    Available(String),
    /// Verifiably absent; falling back is safe
    Missing(String),
    /// Present but unusable; falling back would hide a real fault
    Broken(String),
}

/// A dump that passed pre-flight checks and is ready to load
#[derive(Debug)]
pub struct PreparedDump {
    /// Location of the dump file
    pub path: PathBuf,
    /// Parsed manifest, for JSON dumps
    pub manifest: Option<ExportManifest>,
}

/// Outcome of a successful restore
#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreReport {
    /// Strategy that loaded the database
    pub strategy: String,
    /// Rows inserted per table, when the strategy knows them
    pub tables: BTreeMap<String, u64>,
    /// Optional tables that could not be restored
    pub skipped: Vec<SkippedCollection>,
    /// Whether the media directory was replaced
    pub media_replaced: bool,
}

impl RestoreReport {
    /// Empty report for `strategy`
    pub fn new(strategy: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            ..Self::default()
        }
    }

    /// Total rows inserted
    pub fn total_rows(&self) -> u64 {
        self.tables.values().sum()
    }
}

/// One way of dumping and reloading the database
#[async_trait]
pub trait DatabaseStrategy: Send + Sync {
    /// Short name for logs and reports
    fn name(&self) -> &'static str;

    /// Format of the dumps this strategy reads and writes
    fn format(&self) -> DumpFormat;

    /// Check whether the strategy's tooling is usable
    async fn probe(&self) -> Availability;

    /// Write a dump of `target` into `dir`
    async fn try_export(
        &self,
        target: &ConnectionTarget,
        dir: &Path,
    ) -> SnapshotResult<ExportOutcome>;

    /// Validate a dump without touching the database
    async fn prepare(&self, dump: &Path) -> SnapshotResult<PreparedDump>;

    /// Replace the contents of `target` with a prepared dump
    async fn restore(
        &self,
        target: &ConnectionTarget,
        dump: PreparedDump,
    ) -> SnapshotResult<RestoreReport>;
}
