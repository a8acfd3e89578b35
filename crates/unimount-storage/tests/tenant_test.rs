mod helpers;

use helpers::*;
use unimount_core::NewMount;
use unimount_storage::{AccessSource, ListArgs, Scope, StorageError};
use uuid::Uuid;

async fn listed(ctx: &TestContext, scope: Scope, path: &str) -> Result<Vec<String>, StorageError> {
    ctx.fs
        .list(scope, path, ListArgs::default(), &ctx.cancel)
        .await
        .map(|objects| objects.into_iter().map(|o| o.name).collect())
}

#[tokio::test]
async fn test_tenant_mounts_are_private() {
    let ctx = setup();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    ctx.insert_tenant(alice, "/docs", "alice-docs").await;

    ctx.tenants.load_tenant(alice, &ctx.cancel).await.unwrap();
    assert_eq!(ctx.tenants.mounts(alice).await, vec!["/docs"]);

    assert_eq!(
        listed(&ctx, Scope::Tenant(alice), "/docs").await.unwrap(),
        vec!["alice-docs"]
    );
    assert!(listed(&ctx, Scope::Tenant(bob), "/docs")
        .await
        .unwrap_err()
        .is_not_found());
    assert!(listed(&ctx, Scope::Global, "/docs")
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_own_mount_wins_over_public_mount_at_same_path() {
    let ctx = setup();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    ctx.insert_tenant(alice, "/shared", "own").await;
    ctx.insert_public("/shared", "public", true, false).await;

    let decision = ctx.tenants.check_access(Some(alice), "/shared/x").await.unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.source, Some(AccessSource::Own));

    assert_eq!(
        listed(&ctx, Scope::Tenant(alice), "/shared").await.unwrap(),
        vec!["own"]
    );
    assert_eq!(
        listed(&ctx, Scope::Tenant(bob), "/shared").await.unwrap(),
        vec!["public"]
    );
}

#[tokio::test]
async fn test_longer_public_mount_wins_over_shorter_own_mount() {
    let ctx = setup();
    let alice = Uuid::new_v4();
    ctx.insert_tenant(alice, "/", "own-root").await;
    ctx.insert_public("/library", "library", true, false).await;

    assert_eq!(
        listed(&ctx, Scope::Tenant(alice), "/library/books").await.unwrap(),
        vec!["library"]
    );
    assert_eq!(
        listed(&ctx, Scope::Tenant(alice), "/notes").await.unwrap(),
        vec!["own-root"]
    );
}

#[tokio::test]
async fn test_guest_access_rules() {
    let ctx = setup();
    ctx.insert_public("/open", "open", true, true).await;
    ctx.insert_public("/free", "free", false, false).await;
    ctx.insert_public("/members", "members", false, true).await;
    ctx.insert_tenant(Uuid::new_v4(), "/private", "private").await;

    assert_eq!(listed(&ctx, Scope::Guest, "/open").await.unwrap(), vec!["open"]);
    assert_eq!(listed(&ctx, Scope::Guest, "/free").await.unwrap(), vec!["free"]);

    let err = listed(&ctx, Scope::Guest, "/members").await.unwrap_err();
    assert!(matches!(err, StorageError::AccessDenied(_)));

    let err = listed(&ctx, Scope::Guest, "/private").await.unwrap_err();
    assert!(err.is_not_found());

    let visible = ctx.tenants.visible_mounts(None).await.unwrap();
    assert_eq!(visible, vec!["/free", "/open"]);
}

#[tokio::test]
async fn test_guest_denied_mount_does_not_fall_back_to_shorter_one() {
    let ctx = setup();
    ctx.insert_public("/", "root", true, false).await;
    ctx.insert_public("/members", "members", false, true).await;

    let decision = ctx.tenants.check_access(None, "/members/file").await.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.record.unwrap().mount_path, "/members");

    let err = listed(&ctx, Scope::Guest, "/members/file").await.unwrap_err();
    assert!(matches!(err, StorageError::AccessDenied(_)));
}

#[tokio::test]
async fn test_authenticated_tenant_reaches_auth_only_public_mount() {
    let ctx = setup();
    let alice = Uuid::new_v4();
    ctx.insert_public("/members", "members", false, true).await;

    assert_eq!(
        listed(&ctx, Scope::Tenant(alice), "/members").await.unwrap(),
        vec!["members"]
    );
    // Public global mounts are instantiated in the global manager.
    assert_eq!(ctx.global.mounts().await, vec!["/members"]);
    assert!(ctx.tenants.mounts(alice).await.is_empty());
}

#[tokio::test]
async fn test_public_tenant_mount_loads_into_owner_slot() {
    let ctx = setup();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let mut new = NewMount::new(Some(alice), "/gallery", RECORDING, recording("gallery"));
    new.is_public = true;
    new.allow_guest = true;
    ctx.insert(new).await;

    assert_eq!(
        listed(&ctx, Scope::Tenant(bob), "/gallery").await.unwrap(),
        vec!["gallery"]
    );
    assert_eq!(ctx.tenants.mounts(alice).await, vec!["/gallery"]);
    assert!(ctx.tenants.mounts(bob).await.is_empty());

    // Second access reuses the cached instance.
    listed(&ctx, Scope::Guest, "/gallery").await.unwrap();
    assert_eq!(ctx.log.count("init:gallery"), 1);
}

#[tokio::test]
async fn test_load_tenant_replaces_previous_instances() {
    let ctx = setup();
    let alice = Uuid::new_v4();
    ctx.insert_tenant(alice, "/a", "a").await;
    ctx.insert_tenant(alice, "/b", "b").await;

    let report = ctx.tenants.load_tenant(alice, &ctx.cancel).await.unwrap();
    assert_eq!(report.loaded, vec!["/a", "/b"]);

    ctx.tenants.load_tenant(alice, &ctx.cancel).await.unwrap();
    assert_eq!(ctx.log.count("drop:a"), 1);
    assert_eq!(ctx.log.count("init:a"), 2);

    ctx.tenants.unload_tenant(alice, &ctx.cancel).await.unwrap();
    assert!(ctx.tenants.mounts(alice).await.is_empty());
    assert_eq!(ctx.log.count("drop:b"), 2);
}

#[tokio::test]
async fn test_tenant_unload_is_idempotent() {
    let ctx = setup();
    let alice = Uuid::new_v4();
    ctx.insert_tenant(alice, "/a", "a").await;
    ctx.tenants.load_tenant(alice, &ctx.cancel).await.unwrap();

    ctx.tenants.unload(alice, "/a", &ctx.cancel).await.unwrap();
    ctx.tenants.unload(alice, "/a", &ctx.cancel).await.unwrap();
    ctx.tenants
        .unload(Uuid::new_v4(), "/a", &ctx.cancel)
        .await
        .unwrap();
    assert_eq!(ctx.log.count("drop:a"), 1);
}

#[tokio::test]
async fn test_tenant_visible_mounts_merge_own_and_public() {
    let ctx = setup();
    let alice = Uuid::new_v4();
    ctx.insert_tenant(alice, "/mine", "mine").await;
    ctx.insert_tenant(alice, "/shared", "mine-shared").await;
    ctx.insert_public("/shared", "public", false, true).await;
    ctx.insert_public("/news", "news", false, true).await;

    let visible = ctx.tenants.visible_mounts(Some(alice)).await.unwrap();
    assert_eq!(visible, vec!["/mine", "/news", "/shared"]);

    let objects = ctx
        .fs
        .list(Scope::Tenant(alice), "/", ListArgs::default(), &ctx.cancel)
        .await
        .unwrap();
    assert_eq!(names(&objects), vec!["mine", "news", "shared"]);
}
