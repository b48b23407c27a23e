//! Progress stages of create and restore.

use crate::lock::OperationKind;
use serde::Serialize;
use std::fmt;
use strongbox_common::LoggingTransformer;
use tokio::sync::watch;

/// Where an operation currently is.
///
/// Create moves through `Exporting`, `Archiving`, `Encrypting`; restore
/// through `Decrypting`, `Extracting`, `Validating`, `RestoringDb`,
/// `RestoringMedia`. Both end in `Done`, or in `Cleanup` then `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStage {
    /// No operation running
    Idle,
    /// Dumping the database
    Exporting,
    /// Building the zip container
    Archiving,
    /// Writing the encrypted archive
    Encrypting,
    /// Decrypting an uploaded archive
    Decrypting,
    /// Unpacking the zip container
    Extracting,
    /// Checking the dump before touching the database
    Validating,
    /// Reloading the database
    RestoringDb,
    /// Swapping in the media directory
    RestoringMedia,
    /// Removing scratch files after a failure
    Cleanup,
    /// Finished successfully
    Done,
    /// Finished with an error
    Failed,
}

impl OperationStage {
    /// Stable lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            OperationStage::Idle => "idle",
            OperationStage::Exporting => "exporting",
            OperationStage::Archiving => "archiving",
            OperationStage::Encrypting => "encrypting",
            OperationStage::Decrypting => "decrypting",
            OperationStage::Extracting => "extracting",
            OperationStage::Validating => "validating",
            OperationStage::RestoringDb => "restoring_db",
            OperationStage::RestoringMedia => "restoring_media",
            OperationStage::Cleanup => "cleanup",
            OperationStage::Done => "done",
            OperationStage::Failed => "failed",
        }
    }
}

impl fmt::Display for OperationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records and publishes the stages of one operation
pub(crate) struct StageTracker<'a> {
    kind: OperationKind,
    publisher: &'a watch::Sender<OperationStage>,
    history: Vec<OperationStage>,
}

impl<'a> StageTracker<'a> {
    pub(crate) fn new(kind: OperationKind, publisher: &'a watch::Sender<OperationStage>) -> Self {
        Self {
            kind,
            publisher,
            history: Vec::new(),
        }
    }

    pub(crate) fn enter(&mut self, stage: OperationStage) {
        LoggingTransformer::log_stage(self.kind.as_str(), stage.as_str());
        tracing::debug!(
            operation = self.kind.as_str(),
            stage = stage.as_str(),
            step = self.history.len(),
            "stage transition"
        );
        self.history.push(stage);
        self.publisher.send_replace(stage);
    }

    pub(crate) fn current(&self) -> OperationStage {
        self.history.last().copied().unwrap_or(OperationStage::Idle)
    }

    pub(crate) fn into_history(self) -> Vec<OperationStage> {
        self.history
    }
}
