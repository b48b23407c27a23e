//! End-to-end create and restore against the in-memory backend

mod common;

use common::{
    PASSWORD, WRONG_PASSWORD, classifieds_db, database_url, fallback, missing_native, secret,
    seed, user_listing_counts,
};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strongbox_cipher::{HEADER_LEN, KdfParams, StreamCipher};
use strongbox_compression::{ArchiveSource, Archiver};
use strongbox_snapshot::db::{ExportManifest, MemoryDatabase};
use strongbox_snapshot::{
    DatabaseStrategy, ExclusiveOperationLock, OperationKind, OperationStage, SnapshotConfig,
    SnapshotError, SnapshotOrchestrator,
};
use tempfile::TempDir;

struct Harness {
    dir: TempDir,
    db: MemoryDatabase,
    orchestrator: SnapshotOrchestrator,
}

impl Harness {
    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn media(&self) -> PathBuf {
        self.path("uploads")
    }

    fn site(&self) -> PathBuf {
        self.path("site")
    }
}

fn write(path: &Path, contents: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("mkdir");
    }
    std::fs::write(path, contents).expect("write");
}

fn base_config(dir: &Path) -> SnapshotConfig {
    SnapshotConfig::new(dir.join("uploads"))
        .with_source_dir(dir.join("site"))
        .with_temp_root(dir.join("scratch"))
        .with_output_dir(dir.join("exports"))
        .with_kdf(KdfParams::fast())
}

fn orchestrator(config: SnapshotConfig, db: &MemoryDatabase) -> SnapshotOrchestrator {
    let strategies: Vec<Arc<dyn DatabaseStrategy>> =
        vec![Arc::new(missing_native()), Arc::new(fallback(db))];
    SnapshotOrchestrator::new(config, strategies).with_lock(ExclusiveOperationLock::new())
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    write(&dir.path().join("uploads/a.jpg"), b"jpeg-a");
    write(&dir.path().join("uploads/avatars/b.png"), b"png-b");
    write(&dir.path().join("site/index.js"), b"console.log('v1')");
    write(&dir.path().join("site/node_modules/dep/index.js"), b"module.exports = 1");
    write(&dir.path().join("site/.git/HEAD"), b"ref: refs/heads/main");

    let db = classifieds_db();
    seed(&db, 5, 3);

    let config = base_config(dir.path()).with_database_url(database_url());
    let orchestrator = orchestrator(config, &db);
    Harness { dir, db, orchestrator }
}

fn scratch_is_empty(h: &Harness) -> bool {
    match std::fs::read_dir(h.path("scratch")) {
        Ok(entries) => entries.count() == 0,
        Err(_) => true,
    }
}

/// Decrypt an archive and list its zip entries
async fn archive_entries(archive: &Path) -> BTreeSet<String> {
    let out = tempfile::tempdir().expect("tempdir");
    let zip_path = out.path().join("plain.zip");
    StreamCipher::new(KdfParams::fast())
        .decrypt_file(&secret(PASSWORD), archive, &zip_path, b"PK\x03\x04")
        .await
        .expect("decrypt");

    let file = std::fs::File::open(&zip_path).expect("open zip");
    let mut zip = zip::ZipArchive::new(file).expect("read zip");
    (0..zip.len())
        .map(|i| zip.by_index(i).expect("entry").name().to_string())
        .collect()
}

#[tokio::test]
async fn test_create_then_restore_round_trip() {
    let h = harness();

    let file = h.orchestrator.create(&secret(PASSWORD)).await.expect("create");

    assert!(file.filename.starts_with("backup-"));
    assert!(file.filename.ends_with(".enc"));
    assert_eq!(file.file_path, h.path("exports").join(&file.filename));
    assert_eq!(file.size_bytes, std::fs::metadata(&file.file_path).expect("stat").len());
    assert!(file.size_bytes > HEADER_LEN as u64);
    assert!(scratch_is_empty(&h));

    // the live system drifts after the backup
    seed(&h.db, 2, 1);
    std::fs::remove_file(h.media().join("a.jpg")).expect("remove");
    write(&h.media().join("stale.jpg"), b"stale");
    write(&h.site().join("index.js"), b"console.log('v2')");

    let wrong = h.orchestrator.restore(&file.file_path, &secret(WRONG_PASSWORD)).await;
    assert!(matches!(wrong, Err(SnapshotError::IncorrectPassword)));
    assert_eq!(user_listing_counts(&h.db).await, (2, 1));
    assert!(h.media().join("stale.jpg").exists());
    assert!(!h.media().join("a.jpg").exists());

    let report = h
        .orchestrator
        .restore(&file.file_path, &secret(PASSWORD))
        .await
        .expect("restore");

    assert_eq!(user_listing_counts(&h.db).await, (5, 3));
    assert_eq!(report.strategy, "fallback");
    assert!(report.skipped.is_empty());
    assert!(report.media_replaced);
    assert_eq!(std::fs::read(h.media().join("a.jpg")).expect("a.jpg"), b"jpeg-a");
    assert_eq!(std::fs::read(h.media().join("avatars/b.png")).expect("b.png"), b"png-b");
    assert!(!h.media().join("stale.jpg").exists());
    // code is never restored
    assert_eq!(std::fs::read(h.site().join("index.js")).expect("index.js"), b"console.log('v2')");
    assert!(scratch_is_empty(&h));
}

#[tokio::test]
async fn test_archive_layout_and_source_exclusions() {
    let h = harness();

    let file = h.orchestrator.create(&secret(PASSWORD)).await.expect("create");
    let entries = archive_entries(&file.file_path).await;

    for expected in [
        "backup/",
        "backup/database.json",
        "backup/uploads/a.jpg",
        "backup/uploads/avatars/b.png",
        "backup/site_code/index.js",
    ] {
        assert!(entries.contains(expected), "missing {expected} in {entries:?}");
    }
    assert!(!entries.iter().any(|name| name.contains("node_modules")));
    assert!(!entries.iter().any(|name| name.contains(".git")));
    assert!(!entries.contains("backup/database.sql"));
}

#[tokio::test]
async fn test_archive_manifest_matches_database() {
    let h = harness();

    let file = h.orchestrator.create(&secret(PASSWORD)).await.expect("create");

    let out = tempfile::tempdir().expect("tempdir");
    let zip_path = out.path().join("plain.zip");
    StreamCipher::new(KdfParams::fast())
        .decrypt_file(&secret(PASSWORD), &file.file_path, &zip_path, b"")
        .await
        .expect("decrypt");
    let mut zip = zip::ZipArchive::new(std::fs::File::open(&zip_path).expect("open")).expect("zip");
    let mut bytes = Vec::new();
    zip.by_name("backup/database.json")
        .expect("manifest entry")
        .read_to_end(&mut bytes)
        .expect("read manifest");

    let manifest = ExportManifest::parse(&bytes).expect("parse");
    assert_eq!(manifest.rows("users"), h.db.rows("users").expect("rows").as_slice());
    assert_eq!(manifest.rows("listings").len(), 3);
}

#[tokio::test]
async fn test_stages_are_published() {
    let h = harness();
    let receiver = h.orchestrator.subscribe();
    assert_eq!(*receiver.borrow(), OperationStage::Idle);

    let file = h.orchestrator.create(&secret(PASSWORD)).await.expect("create");
    assert_eq!(
        h.orchestrator.last_stages(),
        vec![
            OperationStage::Exporting,
            OperationStage::Archiving,
            OperationStage::Encrypting,
            OperationStage::Done,
        ]
    );
    assert_eq!(*receiver.borrow(), OperationStage::Done);

    h.orchestrator
        .restore(&file.file_path, &secret(PASSWORD))
        .await
        .expect("restore");
    assert_eq!(
        h.orchestrator.last_stages(),
        vec![
            OperationStage::Decrypting,
            OperationStage::Extracting,
            OperationStage::Validating,
            OperationStage::RestoringDb,
            OperationStage::RestoringMedia,
            OperationStage::Done,
        ]
    );
}

#[tokio::test]
async fn test_missing_database_url_fails_before_any_io() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = classifieds_db();
    seed(&db, 5, 3);
    let mut config = base_config(dir.path());
    config.database_url_var = "STRONGBOX_TEST_UNSET_DATABASE_URL".to_string();
    let orchestrator = orchestrator(config, &db);

    let created = orchestrator.create(&secret(PASSWORD)).await;
    let restored = orchestrator
        .restore(&dir.path().join("backup.enc"), &secret(PASSWORD))
        .await;

    assert!(matches!(created, Err(SnapshotError::Configuration(_))));
    assert!(matches!(restored, Err(SnapshotError::Configuration(_))));
    assert!(!dir.path().join("scratch").exists());
    assert!(!dir.path().join("exports").exists());
    assert_eq!(db.write_calls(), 0);
    assert!(!orchestrator.lock().is_held());
}

#[tokio::test]
async fn test_concurrent_operation_is_rejected() {
    let h = harness();
    let _running = h
        .orchestrator
        .lock()
        .try_acquire(OperationKind::Restore)
        .expect("acquire");

    let result = h.orchestrator.create(&secret(PASSWORD)).await;

    assert!(matches!(result, Err(SnapshotError::OperationInProgress)));
    assert!(!h.path("exports").exists());
    assert!(!h.path("scratch").exists());
}

#[tokio::test]
async fn test_failed_restore_preserves_database_and_media() {
    let h = harness();
    let file = h.orchestrator.create(&secret(PASSWORD)).await.expect("create");

    seed(&h.db, 2, 1);
    write(&h.media().join("stale.jpg"), b"stale");
    let before = h.db.snapshot().expect("snapshot");
    h.db.fail_inserts_into("listings").expect("fault");

    let error = h
        .orchestrator
        .restore(&file.file_path, &secret(PASSWORD))
        .await
        .expect_err("restore must fail");

    assert!(matches!(error, SnapshotError::CriticalRestoreFailure { .. }));
    assert!(error.user_message(OperationKind::Restore).contains("preserved"));
    assert_eq!(h.db.snapshot().expect("snapshot"), before);
    assert!(h.media().join("stale.jpg").exists());
    assert!(scratch_is_empty(&h));

    let stages = h.orchestrator.last_stages();
    assert!(!stages.contains(&OperationStage::RestoringMedia));
    assert_eq!(
        stages[stages.len() - 2..],
        [OperationStage::Cleanup, OperationStage::Failed]
    );
}

#[tokio::test]
async fn test_garbage_upload_is_an_invalid_archive() {
    let h = harness();
    let upload = h.path("upload.enc");
    write(&upload, b"definitely not an archive");

    let result = h.orchestrator.restore(&upload, &secret(PASSWORD)).await;

    assert!(matches!(result, Err(SnapshotError::InvalidArchive(_))));
    assert_eq!(h.db.write_calls(), 0);
    assert!(scratch_is_empty(&h));
}

#[tokio::test]
async fn test_missing_upload_is_an_invalid_archive() {
    let h = harness();

    let result = h
        .orchestrator
        .restore(&h.path("nowhere.enc"), &secret(PASSWORD))
        .await;

    assert!(matches!(result, Err(SnapshotError::InvalidArchive(_))));
}

#[tokio::test]
async fn test_archive_with_empty_export_is_rejected_before_any_write() {
    let h = harness();

    // hand-built archive whose export has reference data but no users
    let staging = tempfile::tempdir().expect("tempdir");
    let backup = staging.path().join("backup");
    let mut manifest = ExportManifest::new();
    manifest.insert_table("categories", h.db.rows("categories").expect("rows"));
    write(
        &backup.join("database.json"),
        &serde_json::to_vec(&manifest).expect("encode"),
    );
    write(&backup.join("uploads/evil.jpg"), b"should never land");
    let zip_path = staging.path().join("plain.zip");
    Archiver::new()
        .archive(vec![ArchiveSource::new(&backup, "backup")], zip_path.clone())
        .await
        .expect("archive");
    let upload = staging.path().join("upload.enc");
    StreamCipher::new(KdfParams::fast())
        .encrypt_file(&secret(PASSWORD), &zip_path, &upload)
        .await
        .expect("encrypt");

    let result = h.orchestrator.restore(&upload, &secret(PASSWORD)).await;

    assert!(matches!(result, Err(SnapshotError::InvalidArchive(_))));
    assert_eq!(h.db.write_calls(), 0);
    assert_eq!(user_listing_counts(&h.db).await, (5, 3));
    assert!(!h.media().join("evil.jpg").exists());
    assert!(h.orchestrator.last_stages().contains(&OperationStage::Validating));
}

#[tokio::test]
async fn test_archive_without_media_leaves_media_untouched() {
    let h = harness();

    let staging = tempfile::tempdir().expect("tempdir");
    let backup = staging.path().join("backup");
    let export = fallback(&h.db).export_manifest().await.expect("export");
    write(
        &backup.join("database.json"),
        &serde_json::to_vec(&export).expect("encode"),
    );
    let zip_path = staging.path().join("plain.zip");
    Archiver::new()
        .archive(vec![ArchiveSource::new(&backup, "backup")], zip_path.clone())
        .await
        .expect("archive");
    let upload = staging.path().join("upload.enc");
    StreamCipher::new(KdfParams::fast())
        .encrypt_file(&secret(PASSWORD), &zip_path, &upload)
        .await
        .expect("encrypt");

    let report = h
        .orchestrator
        .restore(&upload, &secret(PASSWORD))
        .await
        .expect("restore");

    assert!(!report.media_replaced);
    assert!(h.media().join("a.jpg").exists());
}

#[test]
fn test_user_messages_do_not_leak_details() {
    let errors = [
        SnapshotError::InvalidArchive("/srv/app/scratch/restore-x/backup".to_string()),
        SnapshotError::Configuration("DATABASE_URL is not set".to_string()),
        SnapshotError::Internal("postgres://app:secret@db/app".to_string()),
        SnapshotError::IncorrectPassword,
    ];

    for error in &errors {
        for kind in [OperationKind::Create, OperationKind::Restore] {
            let message = error.user_message(kind);
            assert!(!message.contains("/srv"), "{message}");
            assert!(!message.contains("secret"), "{message}");
            assert!(!message.contains("DATABASE_URL"), "{message}");
        }
    }
    assert!(SnapshotError::IncorrectPassword
        .user_message(OperationKind::Restore)
        .contains("preserved"));
}

#[test]
fn test_user_errors_are_told_apart_from_faults() {
    assert!(SnapshotError::IncorrectPassword.is_user_error());
    assert!(SnapshotError::InvalidArchive("truncated".to_string()).is_user_error());
    assert!(SnapshotError::OperationInProgress.is_user_error());
    assert!(!SnapshotError::Configuration("DATABASE_URL is not set".to_string()).is_user_error());
    assert!(!SnapshotError::Internal("lost manifest".to_string()).is_user_error());
}
