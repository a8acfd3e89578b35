//! Tenant-scoped lifecycle manager
//!
//! Slots are keyed by `(tenant, mount_path)`. Besides the tenant's own
//! mounts, a tenant (or an anonymous viewer) may reach public mounts of
//! other scopes; those are instantiated lazily on first access.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use unimount_core::{MountRecord, MountScope, MountStatus};
use unimount_db::MountRepository;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::instance::{
    build_instance, drop_instance, persist_status, DriverInstance, LoadReport, ReloadHandle,
};
use crate::manager::DriverManager;
use crate::path;
use crate::registry::DriverRegistry;

type TenantSlots = HashMap<Uuid, HashMap<String, Arc<DriverInstance>>>;

/// Where the mount that granted access comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessSource {
    Own,
    Public,
}

#[derive(Debug, Clone)]
pub struct AccessDecision {
    pub allowed: bool,
    /// Longest mount serving the path, if any.
    pub record: Option<MountRecord>,
    pub source: Option<AccessSource>,
}

impl AccessDecision {
    fn none() -> Self {
        Self {
            allowed: false,
            record: None,
            source: None,
        }
    }
}

#[derive(Clone)]
pub struct TenantDriverManager {
    registry: Arc<DriverRegistry>,
    repo: Arc<dyn MountRepository>,
    global: DriverManager,
    slots: Arc<RwLock<TenantSlots>>,
    lazy_loads: Arc<Mutex<()>>,
    init_timeout: Duration,
}

impl TenantDriverManager {
    /// Shares the registry, repository and init timeout of `global`, which also
    /// serves public global mounts.
    pub fn new(global: DriverManager) -> Self {
        Self {
            registry: Arc::clone(global.registry()),
            repo: Arc::clone(global.repository()),
            init_timeout: global.init_timeout(),
            global,
            slots: Arc::new(RwLock::new(HashMap::new())),
            lazy_loads: Arc::new(Mutex::new(())),
        }
    }

    pub fn global(&self) -> &DriverManager {
        &self.global
    }

    /// Drop whatever the tenant has loaded, then load every enabled tenant mount.
    #[tracing::instrument(skip(self, cancel), fields(tenant_id = %tenant_id))]
    pub async fn load_tenant(
        &self,
        tenant_id: Uuid,
        cancel: &CancellationToken,
    ) -> StorageResult<LoadReport> {
        let start = Instant::now();
        let records = self.repo.list_enabled(MountScope::Tenant(tenant_id)).await?;

        {
            let mut slots = self.slots.write().await;
            if let Some(existing) = slots.remove(&tenant_id) {
                for (_, instance) in existing {
                    drop_instance(&instance, cancel).await;
                }
            }
        }

        let mut report = LoadReport::default();
        for record in &records {
            let result = self.load_one(tenant_id, record, cancel).await;
            if let Err(ref e) = result {
                tracing::error!(
                    error = %e,
                    mount_path = %record.mount_path,
                    driver = %record.driver,
                    "Failed to load tenant mount"
                );
            }
            report.record(&record.mount_path, result);
        }

        tracing::info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Tenant mounts loaded"
        );
        Ok(report)
    }

    pub async fn load_one(
        &self,
        tenant_id: Uuid,
        record: &MountRecord,
        cancel: &CancellationToken,
    ) -> StorageResult<()> {
        let built = build_instance(&self.registry, record, cancel, self.init_timeout).await;

        let mut slots = self.slots.write().await;
        let tenant_slots = slots.entry(tenant_id).or_default();
        if let Some(old) = tenant_slots.remove(&record.mount_path) {
            drop_instance(&old, cancel).await;
        }

        match built {
            Ok(instance) => {
                tenant_slots.insert(record.mount_path.clone(), Arc::new(instance));
                drop(slots);
                persist_status(&self.repo, record, MountStatus::Work).await;
                tracing::info!(
                    tenant_id = %tenant_id,
                    mount_path = %record.mount_path,
                    driver = %record.driver,
                    "Tenant mount loaded"
                );
                Ok(())
            }
            Err(e) => {
                if tenant_slots.is_empty() {
                    slots.remove(&tenant_id);
                }
                drop(slots);
                persist_status(&self.repo, record, MountStatus::Error).await;
                Err(e)
            }
        }
    }

    /// Drop and remove one tenant mount. Empty slots are a no-op.
    pub async fn unload(
        &self,
        tenant_id: Uuid,
        mount_path: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<()> {
        let mut slots = self.slots.write().await;
        let Some(tenant_slots) = slots.get_mut(&tenant_id) else {
            return Ok(());
        };
        if let Some(instance) = tenant_slots.remove(mount_path) {
            drop_instance(&instance, cancel).await;
            tracing::info!(tenant_id = %tenant_id, mount_path = %mount_path, "Tenant mount unloaded");
        }
        if tenant_slots.is_empty() {
            slots.remove(&tenant_id);
        }
        Ok(())
    }

    /// Drop every instance the tenant has loaded.
    pub async fn unload_tenant(
        &self,
        tenant_id: Uuid,
        cancel: &CancellationToken,
    ) -> StorageResult<()> {
        let removed = self.slots.write().await.remove(&tenant_id);
        if let Some(tenant_slots) = removed {
            for (_, instance) in tenant_slots {
                drop_instance(&instance, cancel).await;
            }
        }
        Ok(())
    }

    pub async fn reload(
        &self,
        tenant_id: Uuid,
        mount_path: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<()> {
        let record = self
            .repo
            .get_by_path(MountScope::Tenant(tenant_id), mount_path)
            .await?;
        match record {
            Some(record) if !record.disabled => self.load_one(tenant_id, &record, cancel).await,
            Some(_) => self.unload(tenant_id, mount_path, cancel).await,
            None => {
                self.unload(tenant_id, mount_path, cancel).await?;
                Err(StorageError::NotFound(format!(
                    "mount {} not found",
                    mount_path
                )))
            }
        }
    }

    pub async fn get(&self, tenant_id: Uuid, mount_path: &str) -> StorageResult<Arc<DriverInstance>> {
        self.slots
            .read()
            .await
            .get(&tenant_id)
            .and_then(|s| s.get(mount_path))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("mount {} is not loaded", mount_path)))
    }

    /// Longest loaded tenant mount serving `path`.
    pub async fn resolve(
        &self,
        tenant_id: Uuid,
        path: &str,
    ) -> StorageResult<(Arc<DriverInstance>, String)> {
        let slots = self.slots.read().await;
        let tenant_slots = slots
            .get(&tenant_id)
            .ok_or_else(|| StorageError::NotFound(format!("no mount serves {}", path)))?;
        let mount_path = path::longest_match(tenant_slots.keys().map(String::as_str), path)
            .ok_or_else(|| StorageError::NotFound(format!("no mount serves {}", path)))?;
        let instance = Arc::clone(&tenant_slots[mount_path]);
        Ok((instance, path::relative_path(path, mount_path)))
    }

    /// Loaded mount paths of one tenant, sorted.
    pub async fn mounts(&self, tenant_id: Uuid) -> Vec<String> {
        let mut paths: Vec<String> = self
            .slots
            .read()
            .await
            .get(&tenant_id)
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }

    /// Mount paths `viewer` can address: own enabled mounts plus visible public ones.
    pub async fn visible_mounts(&self, viewer: Option<Uuid>) -> StorageResult<Vec<String>> {
        let mut paths: Vec<String> = match viewer {
            Some(tenant_id) => self
                .repo
                .list_enabled(MountScope::Tenant(tenant_id))
                .await?
                .into_iter()
                .map(|r| r.mount_path)
                .collect(),
            None => Vec::new(),
        };
        for record in self.repo.list_public().await? {
            if (viewer.is_some() || record.guest_visible()) && !paths.contains(&record.mount_path)
            {
                paths.push(record.mount_path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Decide which mount, if any, serves `path` for `viewer`.
    ///
    /// Candidates are the viewer's own enabled mounts and every enabled public
    /// mount. The longest segment-bounded match wins; at equal length the
    /// viewer's own mount wins. An anonymous viewer (`None`) only sees public
    /// mounts and is refused those that require authentication.
    pub async fn check_access(
        &self,
        viewer: Option<Uuid>,
        path: &str,
    ) -> StorageResult<AccessDecision> {
        let own = match viewer {
            Some(tenant_id) => self.repo.list_enabled(MountScope::Tenant(tenant_id)).await?,
            None => Vec::new(),
        };
        let public = self.repo.list_public().await?;

        let mut best: Option<(&MountRecord, AccessSource)> = None;
        let candidates = own
            .iter()
            .map(|r| (r, AccessSource::Own))
            .chain(public.iter().map(|r| (r, AccessSource::Public)));
        for (record, source) in candidates {
            if !path::match_path(path, &record.mount_path) {
                continue;
            }
            let better = match best {
                None => true,
                Some((current, _)) => record.mount_path.len() > current.mount_path.len(),
            };
            if better {
                best = Some((record, source));
            }
        }

        let Some((record, source)) = best else {
            return Ok(AccessDecision::none());
        };

        let allowed = match (viewer, source) {
            (_, AccessSource::Own) => true,
            (Some(_), AccessSource::Public) => true,
            (None, AccessSource::Public) => record.guest_visible(),
        };

        Ok(AccessDecision {
            allowed,
            record: Some(record.clone()),
            source: Some(source),
        })
    }

    /// Resolve `path` for `viewer`, lazily instantiating the matching mount.
    pub async fn resolve_for(
        &self,
        viewer: Option<Uuid>,
        path: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<(Arc<DriverInstance>, String)> {
        let decision = self.check_access(viewer, path).await?;
        let record = decision
            .record
            .ok_or_else(|| StorageError::NotFound(format!("no mount serves {}", path)))?;
        if !decision.allowed {
            return Err(StorageError::AccessDenied(format!(
                "mount {} requires authentication",
                record.mount_path
            )));
        }

        let instance = match record.tenant_id {
            Some(owner) => self.get_or_load(owner, &record, cancel).await?,
            None => self.global.get_or_load(&record, cancel).await?,
        };
        let relative = path::relative_path(path, &record.mount_path);
        Ok((instance, relative))
    }

    async fn cached(&self, tenant_id: Uuid, record: &MountRecord) -> Option<Arc<DriverInstance>> {
        self.get(tenant_id, &record.mount_path)
            .await
            .ok()
            .filter(|instance| instance.record.id == record.id)
    }

    /// Cached instance in the owner's slot, loaded on first use. Lazy loads
    /// are serialized so concurrent misses share one instance.
    async fn get_or_load(
        &self,
        tenant_id: Uuid,
        record: &MountRecord,
        cancel: &CancellationToken,
    ) -> StorageResult<Arc<DriverInstance>> {
        if let Some(instance) = self.cached(tenant_id, record).await {
            return Ok(instance);
        }
        let _guard = self.lazy_loads.lock().await;
        if let Some(instance) = self.cached(tenant_id, record).await {
            return Ok(instance);
        }
        self.load_one(tenant_id, record, cancel).await?;
        self.get(tenant_id, &record.mount_path).await
    }

    pub fn spawn_reload(
        &self,
        tenant_id: Uuid,
        mount_path: &str,
        cancel: CancellationToken,
    ) -> ReloadHandle {
        let manager = self.clone();
        let mount_path = mount_path.to_string();
        ReloadHandle::spawn(async move {
            let result = manager.reload(tenant_id, &mount_path, &cancel).await;
            if let Err(ref e) = result {
                tracing::warn!(
                    error = %e,
                    tenant_id = %tenant_id,
                    mount_path = %mount_path,
                    "Background tenant reload failed"
                );
            }
            result
        })
    }

    pub fn spawn_unload(
        &self,
        tenant_id: Uuid,
        mount_path: &str,
        cancel: CancellationToken,
    ) -> ReloadHandle {
        let manager = self.clone();
        let mount_path = mount_path.to_string();
        ReloadHandle::spawn(async move { manager.unload(tenant_id, &mount_path, &cancel).await })
    }

    pub fn spawn_load_tenant(
        &self,
        tenant_id: Uuid,
        cancel: CancellationToken,
    ) -> ReloadHandle<LoadReport> {
        let manager = self.clone();
        ReloadHandle::spawn(async move { manager.load_tenant(tenant_id, &cancel).await })
    }
}
