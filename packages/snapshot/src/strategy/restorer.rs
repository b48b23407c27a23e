//! Strategy selection for restore.

use super::{DatabaseStrategy, DumpFormat, PreparedDump, RestoreReport};
use crate::db::ConnectionTarget;
use crate::error::{SnapshotError, SnapshotResult};
use std::path::Path;
use std::sync::Arc;

/// A dump matched to the strategy that can load it
pub struct PreparedRestore {
    strategy: Arc<dyn DatabaseStrategy>,
    dump: PreparedDump,
}

impl PreparedRestore {
    /// Name of the chosen strategy
    pub fn strategy(&self) -> &'static str {
        self.strategy.name()
    }

    /// The validated dump
    pub fn dump(&self) -> &PreparedDump {
        &self.dump
    }
}

/// Picks the strategy matching the dump found in an extracted archive
#[derive(Clone)]
pub struct DatabaseRestorer {
    strategies: Vec<Arc<dyn DatabaseStrategy>>,
}

impl DatabaseRestorer {
    /// Strategies in preference order
    pub fn new(strategies: Vec<Arc<dyn DatabaseStrategy>>) -> Self {
        Self { strategies }
    }

    /// Find the dump under `root` and validate it. Nothing here writes to
    /// the database, so every rejection leaves it untouched.
    pub async fn prepare(&self, root: &Path) -> SnapshotResult<PreparedRestore> {
        for strategy in &self.strategies {
            let candidate = root.join(strategy.format().file_name());
            if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                continue;
            }
            log::info!(
                "Found {} in archive, restoring with the {} strategy",
                strategy.format().file_name(),
                strategy.name()
            );
            let dump = strategy.prepare(&candidate).await?;
            return Ok(PreparedRestore {
                strategy: Arc::clone(strategy),
                dump,
            });
        }

        for format in [DumpFormat::Sql, DumpFormat::Json] {
            if tokio::fs::try_exists(root.join(format.file_name())).await.unwrap_or(false) {
                return Err(SnapshotError::ToolUnavailable(format!(
                    "no configured strategy can restore {}",
                    format.file_name()
                )));
            }
        }

        Err(SnapshotError::InvalidArchive(
            "archive does not contain a database dump".to_string(),
        ))
    }

    /// Load a prepared dump into `target`
    pub async fn restore(
        &self,
        target: &ConnectionTarget,
        prepared: PreparedRestore,
    ) -> SnapshotResult<RestoreReport> {
        let PreparedRestore { strategy, dump } = prepared;
        strategy.restore(target, dump).await
    }
}
