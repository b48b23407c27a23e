//! Create and restore pipelines.
//!
//! Create: export the database, zip the dump with the media and source
//! trees, encrypt the zip into the output directory.
//!
//! Restore: decrypt, unzip, validate the dump, reload the database in one
//! transaction, then swap in the media directory. Site code inside an
//! archive is never written back to disk.
//!
//! Both run under the process-wide operation lock, in a private scratch
//! directory that is removed on every exit path.

use crate::config::SnapshotConfig;
use crate::db::ConnectionTarget;
use crate::error::{SnapshotError, SnapshotResult};
use crate::lock::{ExclusiveOperationLock, OperationKind};
use crate::stage::{OperationStage, StageTracker};
use crate::strategy::{DatabaseExporter, DatabaseRestorer, DatabaseStrategy, RestoreReport};
use crate::workspace::{TempWorkspace, TempWorkspaceManager};
use chrono::Utc;
use secrecy::SecretString;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use strongbox_cipher::StreamCipher;
use strongbox_common::{LoggingTransformer, log_security_event};
use strongbox_compression::{
    ArchiveSource, Archiver, Extractor, ZIP_LOCAL_HEADER_MAGIC, replace_dir,
};
use tokio::sync::watch;

/// Top-level directory inside every archive
pub const ARCHIVE_ROOT: &str = "backup";
/// Media directory inside the archive root
pub const UPLOADS_DIR: &str = "uploads";
/// Source tree directory inside the archive root
pub const SITE_CODE_DIR: &str = "site_code";

/// A finished encrypted archive
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotFile {
    /// Absolute location of the archive
    pub file_path: PathBuf,
    /// File name offered for download
    pub filename: String,
    /// Archive size on disk
    pub size_bytes: u64,
}

/// Runs create and restore against one deployment
pub struct SnapshotOrchestrator {
    config: SnapshotConfig,
    cipher: StreamCipher,
    archiver: Archiver,
    exporter: DatabaseExporter,
    restorer: DatabaseRestorer,
    workspaces: TempWorkspaceManager,
    lock: ExclusiveOperationLock,
    stage: watch::Sender<OperationStage>,
    last_stages: Mutex<Vec<OperationStage>>,
}

impl SnapshotOrchestrator {
    /// Orchestrator using `strategies` in preference order and the
    /// process-wide operation lock
    pub fn new(config: SnapshotConfig, strategies: Vec<Arc<dyn DatabaseStrategy>>) -> Self {
        let (stage, _) = watch::channel(OperationStage::Idle);
        Self {
            cipher: StreamCipher::new(config.kdf_params()),
            archiver: Archiver::new(),
            exporter: DatabaseExporter::new(strategies.clone()),
            restorer: DatabaseRestorer::new(strategies),
            workspaces: TempWorkspaceManager::new(config.temp_root.clone()),
            lock: ExclusiveOperationLock::global(),
            stage,
            last_stages: Mutex::new(Vec::new()),
            config,
        }
    }

    /// Use a specific lock instead of the process-wide one
    #[must_use]
    pub fn with_lock(mut self, lock: ExclusiveOperationLock) -> Self {
        self.lock = lock;
        self
    }

    /// Settings in use
    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    /// The lock this orchestrator takes
    pub fn lock(&self) -> &ExclusiveOperationLock {
        &self.lock
    }

    /// Follow stage changes of running operations
    pub fn subscribe(&self) -> watch::Receiver<OperationStage> {
        self.stage.subscribe()
    }

    /// Stages the most recent operation went through
    pub fn last_stages(&self) -> Vec<OperationStage> {
        self.last_stages
            .lock()
            .map(|stages| stages.clone())
            .unwrap_or_default()
    }

    /// Build an encrypted archive of the database, media and source tree
    pub async fn create(&self, password: &SecretString) -> SnapshotResult<SnapshotFile> {
        let target = self.connection_target()?;
        let _guard = self.lock.try_acquire(OperationKind::Create)?;
        let started = Instant::now();
        let mut tracker = StageTracker::new(OperationKind::Create, &self.stage);

        let result = match self.workspaces.allocate("create").await {
            Ok(workspace) => {
                let result = self.run_create(&mut tracker, &workspace, &target, password).await;
                self.finish(&mut tracker, workspace, result.is_ok()).await;
                result
            }
            Err(e) => {
                tracker.enter(OperationStage::Failed);
                Err(e)
            }
        };
        self.record(tracker);

        self.audit(
            OperationKind::Create,
            started,
            result.as_ref().map(|file| file.filename.clone()),
        );
        result
    }

    /// Replace the database and media with the contents of an archive
    pub async fn restore(
        &self,
        archive: &Path,
        password: &SecretString,
    ) -> SnapshotResult<RestoreReport> {
        let target = self.connection_target()?;
        let _guard = self.lock.try_acquire(OperationKind::Restore)?;
        let started = Instant::now();
        let mut tracker = StageTracker::new(OperationKind::Restore, &self.stage);

        let result = match self.workspaces.allocate("restore").await {
            Ok(workspace) => {
                let result = self
                    .run_restore(&mut tracker, &workspace, &target, archive, password)
                    .await;
                self.finish(&mut tracker, workspace, result.is_ok()).await;
                result
            }
            Err(e) => {
                tracker.enter(OperationStage::Failed);
                Err(e)
            }
        };
        self.record(tracker);

        self.audit(
            OperationKind::Restore,
            started,
            result.as_ref().map(|report| {
                format!(
                    "{} strategy, archive {}",
                    report.strategy,
                    LoggingTransformer::secure_hash(&archive.to_string_lossy())
                )
            }),
        );
        result
    }

    fn connection_target(&self) -> SnapshotResult<ConnectionTarget> {
        let url = self.config.database_url()?;
        ConnectionTarget::parse(&url)
    }

    async fn run_create(
        &self,
        tracker: &mut StageTracker<'_>,
        workspace: &TempWorkspace,
        target: &ConnectionTarget,
        password: &SecretString,
    ) -> SnapshotResult<SnapshotFile> {
        tracker.enter(OperationStage::Exporting);
        let staging = workspace.join(ARCHIVE_ROOT);
        tokio::fs::create_dir_all(&staging).await?;
        let dump = self.exporter.export(target, &staging).await?;
        for skip in &dump.skipped {
            log::warn!("Archive will not contain table '{}': {}", skip.table, skip.reason);
        }

        tracker.enter(OperationStage::Archiving);
        let mut sources = vec![
            ArchiveSource::new(&staging, ARCHIVE_ROOT),
            ArchiveSource::new(&self.config.media_dir, format!("{ARCHIVE_ROOT}/{UPLOADS_DIR}"))
                .optional(),
        ];
        if let Some(source_dir) = &self.config.source_dir {
            sources.push(
                ArchiveSource::new(source_dir, format!("{ARCHIVE_ROOT}/{SITE_CODE_DIR}"))
                    .with_exclusions(self.config.effective_source_exclusions())
                    .optional(),
            );
        }
        let zip_path = workspace.join("backup.zip");
        let stats = self.archiver.archive(sources, zip_path.clone()).await?;
        log::info!(
            "Archived {} files ({} bytes), skipped {} entries",
            stats.files,
            stats.bytes,
            stats.skipped
        );

        tracker.enter(OperationStage::Encrypting);
        tokio::fs::create_dir_all(&self.config.output_dir).await?;
        let filename = archive_file_name();
        let file_path = self.config.output_dir.join(&filename);
        self.cipher.encrypt_file(password, &zip_path, &file_path).await?;
        let size_bytes = tokio::fs::metadata(&file_path).await?.len();

        Ok(SnapshotFile {
            file_path,
            filename,
            size_bytes,
        })
    }

    async fn run_restore(
        &self,
        tracker: &mut StageTracker<'_>,
        workspace: &TempWorkspace,
        target: &ConnectionTarget,
        archive: &Path,
        password: &SecretString,
    ) -> SnapshotResult<RestoreReport> {
        tracker.enter(OperationStage::Decrypting);
        if !tokio::fs::try_exists(archive).await.unwrap_or(false) {
            return Err(SnapshotError::InvalidArchive("uploaded archive not found".to_string()));
        }
        let zip_path = workspace.join("backup.zip");
        self.cipher
            .decrypt_file(password, archive, &zip_path, &ZIP_LOCAL_HEADER_MAGIC)
            .await?;

        tracker.enter(OperationStage::Extracting);
        let extracted = workspace.join("extracted");
        Extractor::extract(zip_path, extracted.clone())
            .await
            .map_err(SnapshotError::from_extraction)?;
        let root = extracted.join(ARCHIVE_ROOT);
        if !root.is_dir() {
            return Err(SnapshotError::InvalidArchive(format!(
                "archive has no {ARCHIVE_ROOT}/ directory"
            )));
        }

        tracker.enter(OperationStage::Validating);
        let prepared = self.restorer.prepare(&root).await?;

        tracker.enter(OperationStage::RestoringDb);
        log::info!("Restoring database with the {} strategy", prepared.strategy());
        let mut report = self.restorer.restore(target, prepared).await?;

        if root.join(SITE_CODE_DIR).exists() {
            // Code is never replaced under a running process.
            log::info!("Archive contains site code; leaving the deployed code untouched");
        }

        tracker.enter(OperationStage::RestoringMedia);
        let uploads = root.join(UPLOADS_DIR);
        if uploads.is_dir() {
            let stats = replace_dir(uploads, self.config.media_dir.clone())
                .await
                .map_err(|e| SnapshotError::MediaRestore(e.to_string()))?;
            log::info!("Media directory replaced with {} files", stats.files);
            report.media_replaced = true;
        } else {
            log::warn!("Archive has no {UPLOADS_DIR}/ directory; media left unchanged");
        }

        Ok(report)
    }

    async fn finish(
        &self,
        tracker: &mut StageTracker<'_>,
        workspace: TempWorkspace,
        success: bool,
    ) {
        if success {
            workspace.cleanup().await;
            tracker.enter(OperationStage::Done);
        } else {
            log::warn!("Operation failed during {}", tracker.current());
            tracker.enter(OperationStage::Cleanup);
            workspace.cleanup().await;
            tracker.enter(OperationStage::Failed);
        }
    }

    fn record(&self, tracker: StageTracker<'_>) {
        if let Ok(mut stages) = self.last_stages.lock() {
            *stages = tracker.into_history();
        }
    }

    fn audit(
        &self,
        kind: OperationKind,
        started: Instant,
        outcome: Result<String, &SnapshotError>,
    ) {
        LoggingTransformer::log_operation_complete(
            kind.as_str(),
            started.elapsed(),
            outcome.is_ok(),
        );
        let event = kind.as_str().to_uppercase();
        match outcome {
            Ok(detail) => log_security_event(&event, &detail, true),
            Err(e) => log_security_event(&event, &e.to_string(), false),
        }
    }
}

fn archive_file_name() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "backup-{}-{}.enc",
        Utc::now().format("%Y%m%d-%H%M%S"),
        &suffix[..8]
    )
}
