//! Strategy selection for export.

use super::{DatabaseStrategy, Dump, ExportOutcome};
use crate::db::ConnectionTarget;
use crate::error::{SnapshotError, SnapshotResult};
use std::path::Path;
use std::sync::Arc;

/// Tries each strategy in order until one produces a dump
#[derive(Clone)]
pub struct DatabaseExporter {
    strategies: Vec<Arc<dyn DatabaseStrategy>>,
}

impl DatabaseExporter {
    /// Strategies in preference order
    pub fn new(strategies: Vec<Arc<dyn DatabaseStrategy>>) -> Self {
        Self { strategies }
    }

    /// Dump `target` into `dir`.
    ///
    /// A strategy whose tooling is missing hands over to the next one. Any
    /// other failure stops the export; silently switching strategies after
    /// a real error would hide it.
    pub async fn export(&self, target: &ConnectionTarget, dir: &Path) -> SnapshotResult<Dump> {
        let mut unavailable = Vec::new();

        for strategy in &self.strategies {
            match strategy.try_export(target, dir).await? {
                ExportOutcome::Dumped(dump) => {
                    log::info!(
                        "Database exported with the {} strategy to {}",
                        dump.strategy,
                        dump.format.file_name()
                    );
                    return Ok(dump);
                }
                ExportOutcome::ToolUnavailable(reason) => {
                    log::info!("{} strategy unavailable: {reason}", strategy.name());
                    unavailable.push(reason);
                }
            }
        }

        Err(SnapshotError::ToolUnavailable(if unavailable.is_empty() {
            "no export strategy configured".to_string()
        } else {
            unavailable.join("; ")
        }))
    }
}
