mod helpers;

use helpers::*;
use serde_json::json;
use unimount_core::{MountStatus, NewMount};
use unimount_db::MountRepository;
use unimount_storage::StorageError;
use uuid::Uuid;

#[tokio::test]
async fn test_create_loads_mount_once_handle_resolves() {
    let ctx = setup();
    let (record, handle) = ctx
        .service
        .create(
            NewMount::new(None, "docs/", RECORDING, recording("docs")),
            ctx.cancel.clone(),
        )
        .await
        .unwrap();
    assert_eq!(record.mount_path, "/docs");
    assert_eq!(record.status, MountStatus::Pending);

    handle.wait().await.unwrap();
    assert_eq!(ctx.global.mounts().await, vec!["/docs"]);
    assert_eq!(ctx.repo.status_of(record.id).await, Some(MountStatus::Work));
}

#[tokio::test]
async fn test_duplicate_mount_path_is_rejected_before_loading() {
    let ctx = setup();
    let (_, handle) = ctx
        .service
        .create(
            NewMount::new(None, "/docs", RECORDING, recording("first")),
            ctx.cancel.clone(),
        )
        .await
        .unwrap();
    handle.wait().await.unwrap();

    let err = ctx
        .service
        .create(
            NewMount::new(None, "/docs/", RECORDING, recording("second")),
            ctx.cancel.clone(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::AlreadyExists(_)));
    assert_eq!(ctx.log.count("init:second"), 0);

    // The same path in a tenant scope is a different mount.
    let tenant = Uuid::new_v4();
    let (_, handle) = ctx
        .service
        .create(
            NewMount::new(Some(tenant), "/docs", RECORDING, recording("tenant")),
            ctx.cancel.clone(),
        )
        .await
        .unwrap();
    handle.wait().await.unwrap();
    assert_eq!(ctx.tenants.mounts(tenant).await, vec!["/docs"]);
}

#[tokio::test]
async fn test_create_validates_driver_and_settings() {
    let ctx = setup();

    let err = ctx
        .service
        .create(NewMount::new(None, "/x", "Nope", "{}"), ctx.cancel.clone())
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = ctx
        .service
        .create(NewMount::new(None, "/x", "Local", "{}"), ctx.cancel.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidInput(ref msg) if msg.contains("root_folder_path")));

    let err = ctx
        .service
        .create(NewMount::new(None, "/x", RECORDING, "{broken"), ctx.cancel.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidInput(_)));

    let err = ctx
        .service
        .create(NewMount::new(None, "", RECORDING, "{}"), ctx.cancel.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidInput(_)));

    let mut negative = NewMount::new(None, "/x", RECORDING, "{}");
    negative.cache_expiration = -1;
    let err = ctx
        .service
        .create(negative, ctx.cancel.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidInput(_)));

    assert!(ctx.repo.list_enabled(unimount_core::MountScope::Global).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_initialization_is_reported_through_handle() {
    let ctx = setup();
    let (record, handle) = ctx
        .service
        .create(
            NewMount::new(None, "/bad", RECORDING, r#"{"label":"bad","fail_init":true}"#),
            ctx.cancel.clone(),
        )
        .await
        .unwrap();

    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, StorageError::InitializationFailed { .. }));
    assert_eq!(ctx.repo.status_of(record.id).await, Some(MountStatus::Error));
    assert!(ctx.global.mounts().await.is_empty());
}

#[tokio::test]
async fn test_update_moves_mount_to_new_path() {
    let ctx = setup();
    let (record, handle) = ctx
        .service
        .create(
            NewMount::new(None, "/old", RECORDING, recording("v1")),
            ctx.cancel.clone(),
        )
        .await
        .unwrap();
    handle.wait().await.unwrap();

    let (updated, handle) = ctx
        .service
        .update(
            record.id,
            NewMount::new(None, "/new", RECORDING, recording("v2")),
            ctx.cancel.clone(),
        )
        .await
        .unwrap();
    handle.wait().await.unwrap();

    assert_eq!(updated.id, record.id);
    assert_eq!(ctx.global.mounts().await, vec!["/new"]);
    assert_eq!(ctx.log.count("drop:v1"), 1);
}

#[tokio::test]
async fn test_update_to_taken_path_is_rejected() {
    let ctx = setup();
    let (a, _) = ctx
        .service
        .create(NewMount::new(None, "/a", RECORDING, recording("a")), ctx.cancel.clone())
        .await
        .unwrap();
    ctx.service
        .create(NewMount::new(None, "/b", RECORDING, recording("b")), ctx.cancel.clone())
        .await
        .unwrap();

    let err = ctx
        .service
        .update(
            a.id,
            NewMount::new(None, "/b", RECORDING, recording("a")),
            ctx.cancel.clone(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::AlreadyExists(_)));

    let err = ctx
        .service
        .update(9999, NewMount::new(None, "/z", RECORDING, "{}"), ctx.cancel.clone())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_disabling_through_update_unloads() {
    let ctx = setup();
    let (record, handle) = ctx
        .service
        .create(NewMount::new(None, "/d", RECORDING, recording("d")), ctx.cancel.clone())
        .await
        .unwrap();
    handle.wait().await.unwrap();

    let mut disabled = NewMount::new(None, "/d", RECORDING, recording("d"));
    disabled.disabled = true;
    let (_, handle) = ctx
        .service
        .update(record.id, disabled, ctx.cancel.clone())
        .await
        .unwrap();
    handle.wait().await.unwrap();

    assert!(ctx.global.mounts().await.is_empty());
    assert_eq!(ctx.log.count("drop:d"), 1);
}

#[tokio::test]
async fn test_delete_unloads_and_removes_record() {
    let ctx = setup();
    let tenant = Uuid::new_v4();
    let (record, handle) = ctx
        .service
        .create(
            NewMount::new(Some(tenant), "/t", RECORDING, recording("t")),
            ctx.cancel.clone(),
        )
        .await
        .unwrap();
    handle.wait().await.unwrap();
    assert_eq!(ctx.tenants.mounts(tenant).await, vec!["/t"]);

    let (deleted, handle) = ctx.service.delete(record.id, ctx.cancel.clone()).await.unwrap();
    handle.wait().await.unwrap();

    assert_eq!(deleted.id, record.id);
    assert!(ctx.tenants.mounts(tenant).await.is_empty());
    assert!(ctx.repo.get_by_id(record.id).await.unwrap().is_none());
    assert_eq!(ctx.log.count("drop:t"), 1);

    let err = ctx
        .service
        .delete(record.id, ctx.cancel.clone())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_probe_lists_without_persisting() {
    let ctx = setup();
    let addition = json!({"entries": [{"name": "a.txt", "size": 1}, {"name": "b", "is_dir": true}]});

    let objects = ctx
        .service
        .test(
            NewMount::new(None, "/probe", "Memory", addition.to_string()),
            &ctx.cancel,
        )
        .await
        .unwrap();

    assert_eq!(names(&objects), vec!["a.txt", "b"]);
    assert!(ctx.repo.get_by_path(unimount_core::MountScope::Global, "/probe").await.unwrap().is_none());
    assert!(ctx.global.mounts().await.is_empty());

    let err = ctx
        .service
        .test(
            NewMount::new(None, "/probe", RECORDING, r#"{"label":"p","fail_init":true}"#),
            &ctx.cancel,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InitializationFailed { .. }));
}
