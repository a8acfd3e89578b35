mod helpers;

use helpers::*;
use serde_json::json;
use unimount_core::NewMount;
use unimount_db::MountRepository;
use unimount_storage::{CancellationToken, FsService, ListArgs, Scope};
use uuid::Uuid;

fn slow_recording(label: &str, init_delay_ms: u64) -> String {
    json!({ "label": label, "init_delay_ms": init_delay_ms }).to_string()
}

async fn list_names(fs: FsService, scope: Scope, path: &str, cancel: CancellationToken) -> Vec<String> {
    fs.list(scope, path, ListArgs::default(), &cancel)
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.name)
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_access_initializes_public_mount_once() {
    let ctx = setup();
    let mut new = NewMount::new(None, "/pub", RECORDING, slow_recording("p", 200));
    new.is_public = true;
    new.allow_guest = true;
    ctx.insert(new).await;

    let first = tokio::spawn(list_names(ctx.fs.clone(), Scope::Guest, "/pub", ctx.cancel.clone()));
    let second = tokio::spawn(list_names(
        ctx.fs.clone(),
        Scope::Tenant(Uuid::new_v4()),
        "/pub",
        ctx.cancel.clone(),
    ));

    assert_eq!(first.await.unwrap(), vec!["p"]);
    assert_eq!(second.await.unwrap(), vec!["p"]);
    assert_eq!(ctx.log.count("init:p"), 1);
    assert_eq!(ctx.log.count("drop:p"), 0);
    assert_eq!(ctx.global.mounts().await, vec!["/pub"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_access_initializes_public_tenant_mount_once() {
    let ctx = setup();
    let owner = Uuid::new_v4();
    let mut new = NewMount::new(Some(owner), "/gallery", RECORDING, slow_recording("g", 200));
    new.is_public = true;
    new.allow_guest = true;
    ctx.insert(new).await;

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            tokio::spawn(list_names(
                ctx.fs.clone(),
                Scope::Tenant(Uuid::new_v4()),
                "/gallery",
                ctx.cancel.clone(),
            ))
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap(), vec!["g"]);
    }

    assert_eq!(ctx.log.count("init:g"), 1);
    assert_eq!(ctx.log.count("drop:g"), 0);
    assert_eq!(ctx.tenants.mounts(owner).await, vec!["/gallery"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reads_during_reload_always_find_a_live_instance() {
    let ctx = setup();
    let record = ctx.insert_global("/r", "v1").await;
    ctx.global.load_all(&ctx.cancel).await.unwrap();

    let fs = ctx.fs.clone();
    let cancel = ctx.cancel.clone();
    let reader = tokio::spawn(async move {
        let mut seen = Vec::new();
        for _ in 0..50 {
            let names = fs
                .list(Scope::Global, "/r", ListArgs::default(), &cancel)
                .await
                .unwrap();
            seen.push(names[0].name.clone());
            tokio::task::yield_now().await;
        }
        seen
    });

    ctx.repo
        .update(
            record.id,
            NewMount::new(None, "/r", RECORDING, slow_recording("v2", 20)),
        )
        .await
        .unwrap();
    ctx.global.reload("/r", &ctx.cancel).await.unwrap();

    let seen = reader.await.unwrap();
    assert!(seen.iter().all(|label| label == "v1" || label == "v2"));
    assert_eq!(ctx.log.count("init:v2"), 1);
    assert_eq!(ctx.log.count("drop:v1"), 1);
    assert_eq!(ctx.log.count("drop:v2"), 0);
    assert_eq!(ctx.global.mounts().await, vec!["/r"]);

    let after = list_names(ctx.fs.clone(), Scope::Global, "/r", ctx.cancel.clone()).await;
    assert_eq!(after, vec!["v2"]);
}
