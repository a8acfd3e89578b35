mod helpers;

use std::time::Duration;

use helpers::*;
use unimount_core::{MountStatus, NewMount};
use unimount_db::MountRepository;
use unimount_storage::{FsService, ListArgs, Scope, StorageError};

async fn listed(fs: &FsService, path: &str) -> Vec<String> {
    fs.list(Scope::Global, path, ListArgs::default(), &unimount_storage::CancellationToken::new())
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.name)
        .collect()
}

#[tokio::test]
async fn test_load_all_isolates_failing_mount() {
    let ctx = setup();
    let a = ctx.insert_global("/a", "a").await;
    let mut failing = NewMount::new(None, "/b", RECORDING, r#"{"label":"b","fail_init":true}"#);
    failing.order_index = 1;
    let b = ctx.insert(failing).await;
    let mut third = NewMount::new(None, "/c", RECORDING, recording("c"));
    third.order_index = 2;
    let c = ctx.insert(third).await;

    let report = ctx.global.load_all(&ctx.cancel).await.unwrap();

    assert_eq!(report.loaded, vec!["/a", "/c"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].mount_path, "/b");
    assert!(matches!(
        report.failed[0].error,
        StorageError::InitializationFailed { .. }
    ));

    assert_eq!(ctx.global.mounts().await, vec!["/a", "/c"]);
    assert_eq!(ctx.repo.status_of(a.id).await, Some(MountStatus::Work));
    assert_eq!(ctx.repo.status_of(b.id).await, Some(MountStatus::Error));
    assert_eq!(ctx.repo.status_of(c.id).await, Some(MountStatus::Work));
}

#[tokio::test]
async fn test_disabled_mounts_are_not_loaded() {
    let ctx = setup();
    ctx.insert_global("/on", "on").await;
    let mut off = NewMount::new(None, "/off", RECORDING, recording("off"));
    off.disabled = true;
    ctx.insert(off).await;

    ctx.global.load_all(&ctx.cancel).await.unwrap();
    assert_eq!(ctx.global.mounts().await, vec!["/on"]);
    assert_eq!(ctx.log.count("init:off"), 0);
}

#[tokio::test]
async fn test_reload_drops_old_instance_once_before_new_is_visible() {
    let ctx = setup();
    let record = ctx.insert_global("/r", "v1").await;
    ctx.global.load_all(&ctx.cancel).await.unwrap();
    assert_eq!(listed(&ctx.fs, "/r").await, vec!["v1"]);

    ctx.repo
        .update(record.id, NewMount::new(None, "/r", RECORDING, recording("v2")))
        .await
        .unwrap();
    ctx.global.reload("/r", &ctx.cancel).await.unwrap();

    assert_eq!(ctx.log.events(), vec!["init:v1", "init:v2", "drop:v1"]);
    assert_eq!(ctx.log.count("drop:v1"), 1);
    assert_eq!(ctx.log.count("drop:v2"), 0);
    assert_eq!(listed(&ctx.fs, "/r").await, vec!["v2"]);
}

#[tokio::test]
async fn test_failed_reload_leaves_slot_empty() {
    let ctx = setup();
    let record = ctx.insert_global("/r", "v1").await;
    ctx.global.load_all(&ctx.cancel).await.unwrap();

    ctx.repo
        .update(
            record.id,
            NewMount::new(None, "/r", RECORDING, r#"{"label":"v2","fail_init":true}"#),
        )
        .await
        .unwrap();
    let err = ctx.global.reload("/r", &ctx.cancel).await.unwrap_err();

    assert!(matches!(err, StorageError::InitializationFailed { .. }));
    assert_eq!(ctx.log.count("drop:v1"), 1);
    assert!(ctx.global.get("/r").await.unwrap_err().is_not_found());
    assert_eq!(ctx.repo.status_of(record.id).await, Some(MountStatus::Error));
}

#[tokio::test]
async fn test_unload_twice_is_a_no_op() {
    let ctx = setup();
    ctx.insert_global("/u", "u").await;
    ctx.global.load_all(&ctx.cancel).await.unwrap();

    ctx.global.unload("/u", &ctx.cancel).await.unwrap();
    ctx.global.unload("/u", &ctx.cancel).await.unwrap();

    assert_eq!(ctx.log.count("drop:u"), 1);
    assert!(ctx.global.mounts().await.is_empty());
}

#[tokio::test]
async fn test_reload_of_disabled_or_deleted_record_unloads() {
    let ctx = setup();
    let record = ctx.insert_global("/d", "d").await;
    ctx.global.load_all(&ctx.cancel).await.unwrap();

    let mut disabled = NewMount::new(None, "/d", RECORDING, recording("d"));
    disabled.disabled = true;
    ctx.repo.update(record.id, disabled).await.unwrap();
    ctx.global.reload("/d", &ctx.cancel).await.unwrap();
    assert!(ctx.global.mounts().await.is_empty());

    ctx.repo.delete(record.id).await.unwrap();
    let err = ctx.global.reload("/d", &ctx.cancel).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(ctx.log.count("drop:d"), 1);
}

#[tokio::test]
async fn test_unknown_driver_marks_record_error() {
    let ctx = setup();
    let record = ctx
        .insert(NewMount::new(None, "/x", "NoSuchDriver", "{}"))
        .await;

    let report = ctx.global.load_all(&ctx.cancel).await.unwrap();
    assert!(report.failed[0].error.is_not_found());
    assert_eq!(ctx.repo.status_of(record.id).await, Some(MountStatus::Error));
}

#[tokio::test]
async fn test_slow_init_times_out() {
    let ctx = setup_with_timeout(Duration::from_millis(50));
    let record = ctx
        .insert(NewMount::new(
            None,
            "/slow",
            RECORDING,
            r#"{"label":"slow","init_delay_ms":2000}"#,
        ))
        .await;

    let err = ctx.global.load_one(&record, &ctx.cancel).await.unwrap_err();
    assert!(matches!(err, StorageError::InitializationFailed { .. }));
    assert!(ctx.global.mounts().await.is_empty());
}

#[tokio::test]
async fn test_background_reload_can_be_awaited() {
    let ctx = setup();
    ctx.insert_global("/bg", "bg").await;

    let handle = ctx.global.spawn_reload("/bg", ctx.cancel.clone());
    handle.wait().await.unwrap();
    assert_eq!(ctx.global.mounts().await, vec!["/bg"]);

    let report = ctx
        .global
        .spawn_load_all(ctx.cancel.clone())
        .wait()
        .await
        .unwrap();
    assert_eq!(report.loaded, vec!["/bg"]);
    assert_eq!(ctx.log.count("drop:bg"), 1);
}

#[tokio::test]
async fn test_refresh_all_rebuilds_every_instance() {
    let ctx = setup();
    ctx.insert_global("/one", "one").await;
    ctx.insert_global("/two", "two").await;
    ctx.global.load_all(&ctx.cancel).await.unwrap();

    let report = ctx.global.refresh_all(&ctx.cancel).await.unwrap();
    assert!(report.is_ok());
    assert_eq!(ctx.log.count("drop:one"), 1);
    assert_eq!(ctx.log.count("init:two"), 2);
}
