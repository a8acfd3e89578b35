#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use unimount_core::{MountRecord, NewMount};
use unimount_db::{InMemoryMountRepository, MountRepository};
use unimount_storage::{
    CancellationToken, ConfigField, Driver, DriverConfig, DriverError, DriverManager,
    DriverRegistry, DriverResult, FileObject, FsService, Link, LinkArgs, ListArgs, MountService,
    TenantDriverManager,
};
use uuid::Uuid;

/// Lifecycle calls observed across every `Recording` instance.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| e.as_str() == event).count()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RecordingSettings {
    label: String,
    fail_init: bool,
    init_delay_ms: u64,
}

/// Test double that logs `init:<label>` and `drop:<label>` and lists one file
/// named after its label. Implements no optional capability.
pub struct RecordingDriver {
    settings: RecordingSettings,
    log: EventLog,
}

pub const RECORDING: &str = "Recording";

#[async_trait]
impl Driver for RecordingDriver {
    fn config(&self) -> DriverConfig {
        DriverConfig::named(RECORDING)
    }

    fn additions(&self) -> Vec<ConfigField> {
        vec![
            ConfigField::string("label"),
            ConfigField::bool("fail_init"),
            ConfigField::number("init_delay_ms"),
        ]
    }

    fn bind(&mut self, addition: &str) -> DriverResult<()> {
        self.settings = serde_json::from_str(addition)?;
        Ok(())
    }

    async fn init(&mut self, _cancel: &CancellationToken) -> DriverResult<()> {
        if self.settings.init_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.settings.init_delay_ms)).await;
        }
        self.log.push(format!("init:{}", self.settings.label));
        if self.settings.fail_init {
            return Err(DriverError::Backend("remote unreachable".to_string()));
        }
        Ok(())
    }

    async fn drop_driver(&self, _cancel: &CancellationToken) -> DriverResult<()> {
        self.log.push(format!("drop:{}", self.settings.label));
        Ok(())
    }

    async fn list(
        &self,
        _cancel: &CancellationToken,
        dir: &FileObject,
        _args: &ListArgs,
    ) -> DriverResult<Vec<FileObject>> {
        let mut obj = FileObject::file(&unimount_storage::path::join_path(
            &dir.path,
            &self.settings.label,
        ));
        obj.size = 1;
        Ok(vec![obj])
    }

    async fn link(
        &self,
        _cancel: &CancellationToken,
        _file: &FileObject,
        _args: &LinkArgs,
    ) -> DriverResult<Link> {
        Ok(Link::redirect(format!("https://example.test/{}", self.settings.label)))
    }
}

pub struct TestContext {
    pub repo: InMemoryMountRepository,
    pub log: EventLog,
    pub global: DriverManager,
    pub tenants: TenantDriverManager,
    pub fs: FsService,
    pub service: MountService,
    pub cancel: CancellationToken,
}

pub fn setup() -> TestContext {
    setup_with_timeout(Duration::from_secs(5))
}

pub fn setup_with_timeout(init_timeout: Duration) -> TestContext {
    build(init_timeout, |_| {})
}

/// Context whose registry also carries the drivers added by `register`.
pub fn setup_with(register: impl FnOnce(&mut DriverRegistry)) -> TestContext {
    build(Duration::from_secs(5), register)
}

fn build(init_timeout: Duration, register: impl FnOnce(&mut DriverRegistry)) -> TestContext {
    let log = EventLog::default();
    let mut registry = DriverRegistry::with_builtin();
    register(&mut registry);
    let driver_log = log.clone();
    registry.register(move || {
        Box::new(RecordingDriver {
            settings: RecordingSettings::default(),
            log: driver_log.clone(),
        })
    });

    let repo = InMemoryMountRepository::new();
    let global = DriverManager::new(Arc::new(registry), Arc::new(repo.clone()))
        .with_init_timeout(init_timeout);
    let tenants = TenantDriverManager::new(global.clone());

    TestContext {
        repo,
        log,
        fs: FsService::new(tenants.clone()),
        service: MountService::new(tenants.clone()),
        global,
        tenants,
        cancel: CancellationToken::new(),
    }
}

pub fn recording(label: &str) -> String {
    serde_json::json!({ "label": label }).to_string()
}

impl TestContext {
    /// Insert a record straight into the repository, bypassing the service.
    pub async fn insert(&self, new: NewMount) -> MountRecord {
        self.repo.create(new).await.unwrap()
    }

    pub async fn insert_global(&self, mount_path: &str, label: &str) -> MountRecord {
        self.insert(NewMount::new(None, mount_path, RECORDING, recording(label)))
            .await
    }

    pub async fn insert_tenant(&self, tenant_id: Uuid, mount_path: &str, label: &str) -> MountRecord {
        self.insert(NewMount::new(
            Some(tenant_id),
            mount_path,
            RECORDING,
            recording(label),
        ))
        .await
    }

    pub async fn insert_public(
        &self,
        mount_path: &str,
        label: &str,
        allow_guest: bool,
        require_auth: bool,
    ) -> MountRecord {
        let mut new = NewMount::new(None, mount_path, RECORDING, recording(label));
        new.is_public = true;
        new.allow_guest = allow_guest;
        new.require_auth = require_auth;
        self.insert(new).await
    }
}

pub fn names(objects: &[FileObject]) -> Vec<&str> {
    objects.iter().map(|o| o.name.as_str()).collect()
}
