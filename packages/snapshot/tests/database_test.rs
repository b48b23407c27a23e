//! In-memory backend semantics, registry order and identifier quoting

mod common;

use common::{classifieds_db, row, seed};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use strongbox_snapshot::db::{
    Database, DatabaseError, ExportManifest, MemoryDatabase, ReadSnapshot, TableRegistry,
    quote_ident,
};
use strongbox_snapshot::SnapshotError;

const TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::test]
async fn test_uncommitted_changes_are_invisible() {
    let db = classifieds_db();
    seed(&db, 2, 1);

    let mut tx = db.begin(TIMEOUT).await.expect("begin");
    tx.delete_all("seller_profiles").await.expect("delete");
    assert_eq!(db.count("seller_profiles").await.expect("count"), 2);

    tx.commit().await.expect("commit");
    assert_eq!(db.count("seller_profiles").await.expect("count"), 0);
}

#[tokio::test]
async fn test_dropped_transaction_discards_changes() {
    let db = classifieds_db();
    seed(&db, 2, 1);

    {
        let mut tx = db.begin(TIMEOUT).await.expect("begin");
        tx.delete_all("audit_log").await.expect("delete");
    }

    assert_eq!(db.count("audit_log").await.expect("count"), 2);
}

#[tokio::test]
async fn test_savepoint_rollback_keeps_earlier_work() {
    let db = classifieds_db();
    seed(&db, 2, 1);

    let mut tx = db.begin(TIMEOUT).await.expect("begin");
    tx.delete_all("seller_profiles").await.expect("delete");
    tx.savepoint("before_audit").await.expect("savepoint");
    tx.delete_all("audit_log").await.expect("delete");
    tx.rollback_to_savepoint("before_audit").await.expect("rollback to");
    tx.release_savepoint("before_audit").await.expect("release");
    tx.commit().await.expect("commit");

    assert_eq!(db.count("seller_profiles").await.expect("count"), 0);
    assert_eq!(db.count("audit_log").await.expect("count"), 2);
}

#[tokio::test]
async fn test_unknown_savepoint_is_an_error() {
    let db = classifieds_db();
    let mut tx = db.begin(TIMEOUT).await.expect("begin");

    let result = tx.rollback_to_savepoint("never_created").await;

    assert!(matches!(result, Err(DatabaseError::UnknownSavepoint(_))));
}

#[tokio::test]
async fn test_foreign_keys_are_enforced() {
    let db = classifieds_db();
    seed(&db, 2, 1);
    let mut tx = db.begin(TIMEOUT).await.expect("begin");

    let delete_parent = tx.delete_all("users").await;
    assert!(matches!(delete_parent, Err(DatabaseError::Constraint(_))));

    let orphan = vec![row(json!({ "id": 99, "user_id": 42, "action": "login" }))];
    let insert_orphan = tx.insert_rows("audit_log", &orphan).await;
    assert!(matches!(insert_orphan, Err(DatabaseError::Constraint(_))));
}

#[tokio::test]
async fn test_duplicate_ids_are_rejected() {
    let db = classifieds_db();
    seed(&db, 2, 1);
    let mut tx = db.begin(TIMEOUT).await.expect("begin");

    let duplicate = vec![row(json!({ "id": 1, "name": "Vehicles again" }))];
    let result = tx.insert_rows("categories", &duplicate).await;

    assert!(matches!(result, Err(DatabaseError::Constraint(_))));
}

#[tokio::test]
async fn test_unknown_table_is_reported() {
    let db = MemoryDatabase::new();

    assert!(matches!(db.count("ghosts").await, Err(DatabaseError::UnknownTable(_))));
    assert!(matches!(db.fetch_all("ghosts").await, Err(DatabaseError::UnknownTable(_))));
}

#[tokio::test]
async fn test_reads_are_not_write_calls() {
    let db = classifieds_db();
    seed(&db, 2, 1);

    db.fetch_all("users").await.expect("fetch");
    db.count("listings").await.expect("count");

    assert_eq!(db.write_calls(), 0);
}

#[test]
fn test_classifieds_registry_order() {
    let registry = TableRegistry::classifieds(Arc::new(MemoryDatabase::new()));

    assert_eq!(
        registry.names(),
        vec![
            "categories",
            "cities",
            "neighborhoods",
            "streets",
            "users",
            "listings",
            "listing_history",
            "audit_log",
            "seller_profiles",
        ]
    );
    assert_eq!(registry.root(), "users");
    let required: Vec<bool> = registry.forward().map(|repo| repo.spec().required).collect();
    assert_eq!(required, [true, true, true, true, true, true, false, false, false]);
    assert_eq!(
        registry.reverse().next().map(|repo| repo.spec().name.clone()),
        Some("seller_profiles".to_string())
    );
}

#[test]
fn test_quote_ident_accepts_plain_names_only() {
    assert_eq!(quote_ident("listing_history").expect("valid"), "\"listing_history\"");
    assert_eq!(quote_ident("_t1").expect("valid"), "\"_t1\"");

    for bad in ["", "1users", "users; DROP TABLE users", "a\"b", "users.id", "naïve"] {
        assert!(
            matches!(quote_ident(bad), Err(DatabaseError::InvalidIdentifier(_))),
            "{bad}"
        );
    }
    assert!(quote_ident(&"x".repeat(64)).is_err());
}

#[test]
fn test_manifest_counts_follow_inserted_tables() {
    let mut manifest = ExportManifest::new();
    manifest.insert_table("users", vec![row(json!({ "id": 1 })), row(json!({ "id": 2 }))]);
    manifest.insert_table("cities", vec![row(json!({ "id": 1 }))]);
    manifest.insert_table("users", vec![row(json!({ "id": 1 }))]);

    assert_eq!(manifest.total_records, 2);
    assert_eq!(manifest.counts.get("users"), Some(&1));
    assert!(manifest.rows("listings").is_empty());
    assert!(manifest.validate("users").is_ok());
    assert!(matches!(
        manifest.validate("listings"),
        Err(SnapshotError::InvalidArchive(_))
    ));
}

#[tokio::test]
async fn test_read_snapshot_ignores_later_commits() {
    let db = classifieds_db();
    seed(&db, 2, 1);

    let mut snapshot = db.begin_read().await.expect("snapshot");
    seed(&db, 5, 3);

    assert_eq!(snapshot.fetch_all("users").await.expect("users").len(), 2);
    assert_eq!(snapshot.fetch_all("listings").await.expect("listings").len(), 1);
    assert!(matches!(
        snapshot.fetch_all("ghosts").await,
        Err(DatabaseError::UnknownTable(_))
    ));
    // A failed read does not poison the snapshot.
    assert_eq!(snapshot.fetch_all("cities").await.expect("cities").len(), 2);
    snapshot.close().await.expect("close");

    assert_eq!(db.fetch_all("users").await.expect("users").len(), 5);
    assert_eq!(db.write_calls(), 0);
}
