//! Global lifecycle manager
//!
//! Owns one slot per global mount path. Readers share the lock; lifecycle
//! transitions build and initialize the new instance first, then take the
//! write lock only to drop the previous occupant and swap the slot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use unimount_core::{Config, MountRecord, MountScope, MountStatus};
use unimount_db::MountRepository;

use crate::error::{StorageError, StorageResult};
use crate::instance::{
    build_instance, drop_instance, persist_status, DriverInstance, LoadReport, ReloadHandle,
};
use crate::path;
use crate::registry::DriverRegistry;

const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);

type Slots = HashMap<String, Arc<DriverInstance>>;

#[derive(Clone)]
pub struct DriverManager {
    registry: Arc<DriverRegistry>,
    repo: Arc<dyn MountRepository>,
    slots: Arc<RwLock<Slots>>,
    /// Serializes lazy loads so a mount is built once per miss.
    lazy_loads: Arc<Mutex<()>>,
    init_timeout: Duration,
}

impl DriverManager {
    pub fn new(registry: Arc<DriverRegistry>, repo: Arc<dyn MountRepository>) -> Self {
        Self {
            registry,
            repo,
            slots: Arc::new(RwLock::new(HashMap::new())),
            lazy_loads: Arc::new(Mutex::new(())),
            init_timeout: DEFAULT_INIT_TIMEOUT,
        }
    }

    pub fn from_config(
        config: &Config,
        registry: Arc<DriverRegistry>,
        repo: Arc<dyn MountRepository>,
    ) -> Self {
        Self::new(registry, repo).with_init_timeout(config.driver_init_timeout())
    }

    /// Upper bound for a single driver `init`.
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<DriverRegistry> {
        &self.registry
    }

    pub fn repository(&self) -> &Arc<dyn MountRepository> {
        &self.repo
    }

    pub(crate) fn init_timeout(&self) -> Duration {
        self.init_timeout
    }

    /// Load every enabled global mount. One failing mount never blocks the rest.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn load_all(&self, cancel: &CancellationToken) -> StorageResult<LoadReport> {
        let start = Instant::now();
        let records = self.repo.list_enabled(MountScope::Global).await?;

        let mut report = LoadReport::default();
        for record in &records {
            let result = self.load_one(record, cancel).await;
            if let Err(ref e) = result {
                tracing::error!(
                    error = %e,
                    mount_path = %record.mount_path,
                    driver = %record.driver,
                    "Failed to load mount"
                );
            }
            report.record(&record.mount_path, result);
        }

        tracing::info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Global mounts loaded"
        );
        Ok(report)
    }

    /// Build a fresh instance for `record` and swap it into its slot.
    ///
    /// On failure any previous occupant is dropped and removed, so the slot
    /// ends up empty, and the record is marked `error`.
    pub async fn load_one(
        &self,
        record: &MountRecord,
        cancel: &CancellationToken,
    ) -> StorageResult<()> {
        let built = build_instance(&self.registry, record, cancel, self.init_timeout).await;

        let mut slots = self.slots.write().await;
        let previous = slots.remove(&record.mount_path);
        if let Some(ref old) = previous {
            drop_instance(old, cancel).await;
        }

        match built {
            Ok(instance) => {
                slots.insert(record.mount_path.clone(), Arc::new(instance));
                drop(slots);
                persist_status(&self.repo, record, MountStatus::Work).await;
                tracing::info!(
                    mount_path = %record.mount_path,
                    driver = %record.driver,
                    replaced = previous.is_some(),
                    "Mount loaded"
                );
                Ok(())
            }
            Err(e) => {
                drop(slots);
                persist_status(&self.repo, record, MountStatus::Error).await;
                Err(e)
            }
        }
    }

    /// Drop and remove the instance at `mount_path`. Empty slots are a no-op.
    pub async fn unload(&self, mount_path: &str, cancel: &CancellationToken) -> StorageResult<()> {
        let mut slots = self.slots.write().await;
        if let Some(instance) = slots.remove(mount_path) {
            drop_instance(&instance, cancel).await;
            tracing::info!(mount_path = %mount_path, "Mount unloaded");
        }
        Ok(())
    }

    /// Re-read the record and load it again. Disabled or deleted records are unloaded.
    pub async fn reload(&self, mount_path: &str, cancel: &CancellationToken) -> StorageResult<()> {
        let record = self.repo.get_by_path(MountScope::Global, mount_path).await?;
        match record {
            Some(record) if !record.disabled => self.load_one(&record, cancel).await,
            Some(_) => self.unload(mount_path, cancel).await,
            None => {
                self.unload(mount_path, cancel).await?;
                Err(StorageError::NotFound(format!(
                    "mount {} not found",
                    mount_path
                )))
            }
        }
    }

    pub async fn get(&self, mount_path: &str) -> StorageResult<Arc<DriverInstance>> {
        self.slots
            .read()
            .await
            .get(mount_path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("mount {} is not loaded", mount_path)))
    }

    /// Longest loaded mount serving `path`, plus the path relative to it.
    pub async fn resolve(&self, path: &str) -> StorageResult<(Arc<DriverInstance>, String)> {
        let slots = self.slots.read().await;
        let mount_path = path::longest_match(slots.keys().map(String::as_str), path)
            .ok_or_else(|| StorageError::NotFound(format!("no mount serves {}", path)))?;
        let instance = Arc::clone(&slots[mount_path]);
        Ok((instance, path::relative_path(path, mount_path)))
    }

    /// Loaded mount paths, sorted.
    pub async fn mounts(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.slots.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Drop every loaded instance, then load all enabled mounts again.
    pub async fn refresh_all(&self, cancel: &CancellationToken) -> StorageResult<LoadReport> {
        {
            let mut slots = self.slots.write().await;
            for (_, instance) in slots.drain() {
                drop_instance(&instance, cancel).await;
            }
        }
        self.load_all(cancel).await
    }

    async fn cached(&self, record: &MountRecord) -> Option<Arc<DriverInstance>> {
        self.get(&record.mount_path)
            .await
            .ok()
            .filter(|instance| instance.record.id == record.id)
    }

    /// Cached instance for `record`, loading it on first use.
    ///
    /// Concurrent misses wait for the first loader and then reuse its
    /// instance instead of replacing it.
    pub async fn get_or_load(
        &self,
        record: &MountRecord,
        cancel: &CancellationToken,
    ) -> StorageResult<Arc<DriverInstance>> {
        if let Some(instance) = self.cached(record).await {
            return Ok(instance);
        }
        let _guard = self.lazy_loads.lock().await;
        if let Some(instance) = self.cached(record).await {
            return Ok(instance);
        }
        self.load_one(record, cancel).await?;
        self.get(&record.mount_path).await
    }

    /// Reload `mount_path` in the background.
    pub fn spawn_reload(&self, mount_path: &str, cancel: CancellationToken) -> ReloadHandle {
        let manager = self.clone();
        let mount_path = mount_path.to_string();
        ReloadHandle::spawn(async move {
            let result = manager.reload(&mount_path, &cancel).await;
            if let Err(ref e) = result {
                tracing::warn!(error = %e, mount_path = %mount_path, "Background reload failed");
            }
            result
        })
    }

    /// Unload `mount_path` in the background.
    pub fn spawn_unload(&self, mount_path: &str, cancel: CancellationToken) -> ReloadHandle {
        let manager = self.clone();
        let mount_path = mount_path.to_string();
        ReloadHandle::spawn(async move { manager.unload(&mount_path, &cancel).await })
    }

    pub fn spawn_load_all(&self, cancel: CancellationToken) -> ReloadHandle<LoadReport> {
        let manager = self.clone();
        ReloadHandle::spawn(async move { manager.load_all(&cancel).await })
    }
}
