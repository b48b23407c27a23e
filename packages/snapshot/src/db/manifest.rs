//! JSON export manifest written by the fallback strategy.

use super::traits::Row;
use crate::error::{SnapshotError, SnapshotResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Format tag stored in every manifest
pub const SCHEMA_VERSION: &str = "strongbox-export/1";

/// A table left out of an export or restore, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedCollection {
    /// Table name
    pub table: String,
    /// Error message that caused the skip
    pub reason: String,
}

/// Full logical export of the database.
///
/// ```json
/// {
///   "exportedAt": "2026-01-01T00:00:00Z",
///   "schemaVersion": "strongbox-export/1",
///   "tables": { "users": [ { "id": 1, ... } ], ... },
///   "counts": { "users": 1, ... },
///   "totalRecords": 1,
///   "skippedTables": []
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportManifest {
    /// When the export was taken
    pub exported_at: DateTime<Utc>,
    /// Format tag, see [`SCHEMA_VERSION`]
    pub schema_version: String,
    /// Rows per table
    pub tables: BTreeMap<String, Vec<Row>>,
    /// Row count per table at export time
    #[serde(default)]
    pub counts: BTreeMap<String, u64>,
    /// Sum of all counts
    #[serde(default)]
    pub total_records: u64,
    /// Optional tables that could not be exported
    #[serde(default)]
    pub skipped_tables: Vec<SkippedCollection>,
}

impl Default for ExportManifest {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportManifest {
    /// Empty manifest stamped with the current time
    pub fn new() -> Self {
        Self {
            exported_at: Utc::now(),
            schema_version: SCHEMA_VERSION.to_string(),
            tables: BTreeMap::new(),
            counts: BTreeMap::new(),
            total_records: 0,
            skipped_tables: Vec::new(),
        }
    }

    /// Add the rows of one table and update the totals
    pub fn insert_table(&mut self, table: impl Into<String>, rows: Vec<Row>) {
        let table = table.into();
        let count = rows.len() as u64;
        if let Some(previous) = self.counts.insert(table.clone(), count) {
            self.total_records -= previous;
        }
        self.total_records += count;
        self.tables.insert(table, rows);
    }

    /// Record an optional table that was left out
    pub fn skip_table(&mut self, table: impl Into<String>, reason: impl Into<String>) {
        self.skipped_tables.push(SkippedCollection {
            table: table.into(),
            reason: reason.into(),
        });
    }

    /// Rows for `table`, empty when the manifest does not carry it
    pub fn rows(&self, table: &str) -> &[Row] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Rows actually present, independent of the stored counts
    pub fn row_total(&self) -> u64 {
        self.tables.values().map(|rows| rows.len() as u64).sum()
    }

    /// Parse manifest bytes. A missing or non-object `tables` member is
    /// reported separately from other shape errors.
    pub fn parse(bytes: &[u8]) -> SnapshotResult<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| {
                SnapshotError::InvalidArchive(format!("database export is not valid JSON: {e}"))
            })?;

        if !value.get("tables").is_some_and(serde_json::Value::is_object) {
            return Err(SnapshotError::InvalidArchive(
                "database export has no tables object".to_string(),
            ));
        }

        serde_json::from_value(value)
            .map_err(|e| {
                SnapshotError::InvalidArchive(format!("database export is malformed: {e}"))
            })
    }

    /// Reject exports that would wipe the database: no rows at all, or an
    /// empty `root` collection.
    pub fn validate(&self, root: &str) -> SnapshotResult<()> {
        if self.row_total() == 0 {
            return Err(SnapshotError::InvalidArchive(
                "database export contains no records".to_string(),
            ));
        }
        if self.rows(root).is_empty() {
            return Err(SnapshotError::InvalidArchive(format!(
                "database export has no rows in required table '{root}'"
            )));
        }
        if self.schema_version != SCHEMA_VERSION {
            log::warn!(
                "Export format '{}' differs from '{SCHEMA_VERSION}', continuing",
                self.schema_version
            );
        }
        Ok(())
    }
}
