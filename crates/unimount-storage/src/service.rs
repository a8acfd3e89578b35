//! Mount service: create, update and delete mount records, then bring the
//! lifecycle managers in line in the background.
//!
//! Every mutation returns a [`ReloadHandle`]. The new state is not guaranteed
//! to be live until the handle resolves; callers that need it await
//! `handle.wait()`, everyone else may drop the handle.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use unimount_core::{MountRecord, MountScope, NewMount};
use unimount_db::MountRepository;
use validator::Validate;

use crate::error::{StorageError, StorageResult};
use crate::instance::{build_instance, drop_instance, ReloadHandle};
use crate::manager::DriverManager;
use crate::path;
use crate::registry::DriverRegistry;
use crate::tenant::TenantDriverManager;
use crate::types::{FileObject, ListArgs};

#[derive(Clone)]
pub struct MountService {
    registry: Arc<DriverRegistry>,
    repo: Arc<dyn MountRepository>,
    global: DriverManager,
    tenants: TenantDriverManager,
}

impl MountService {
    pub fn new(tenants: TenantDriverManager) -> Self {
        let global = tenants.global().clone();
        Self {
            registry: Arc::clone(global.registry()),
            repo: Arc::clone(global.repository()),
            global,
            tenants,
        }
    }

    /// Field limits, known driver, settings schema. Normalizes the mount path in place.
    fn validate(&self, new: &mut NewMount) -> StorageResult<()> {
        new.validate()?;
        new.mount_path = path::normalize_mount_path(&new.mount_path);
        let info = self.registry.info(&new.driver)?;
        info.validate_addition_str(&new.addition)?;
        Ok(())
    }

    async fn ensure_path_free(
        &self,
        scope: MountScope,
        mount_path: &str,
        except: Option<i64>,
    ) -> StorageResult<()> {
        if let Some(existing) = self.repo.get_by_path(scope, mount_path).await? {
            if Some(existing.id) != except {
                return Err(StorageError::AlreadyExists(format!(
                    "mount path {} already exists",
                    mount_path
                )));
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, new, cancel), fields(mount_path = %new.mount_path, driver = %new.driver))]
    pub async fn create(
        &self,
        mut new: NewMount,
        cancel: CancellationToken,
    ) -> StorageResult<(MountRecord, ReloadHandle)> {
        self.validate(&mut new)?;
        self.ensure_path_free(new.scope(), &new.mount_path, None)
            .await?;

        let record = self.repo.create(new).await?;
        tracing::info!(
            mount_id = record.id,
            scope = %record.scope(),
            mount_path = %record.mount_path,
            "Mount created"
        );

        let handle = self.schedule(None, record.clone(), cancel);
        Ok((record, handle))
    }

    #[tracing::instrument(skip(self, new, cancel), fields(mount_id = id))]
    pub async fn update(
        &self,
        id: i64,
        mut new: NewMount,
        cancel: CancellationToken,
    ) -> StorageResult<(MountRecord, ReloadHandle)> {
        let existing = self
            .repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("mount {} not found", id)))?;

        self.validate(&mut new)?;
        self.ensure_path_free(new.scope(), &new.mount_path, Some(id))
            .await?;

        let record = self.repo.update(id, new).await?;
        tracing::info!(
            mount_id = record.id,
            scope = %record.scope(),
            mount_path = %record.mount_path,
            "Mount updated"
        );

        let moved = existing.scope() != record.scope() || existing.mount_path != record.mount_path;
        let previous = moved.then_some(existing);
        let handle = self.schedule(previous, record.clone(), cancel);
        Ok((record, handle))
    }

    #[tracing::instrument(skip(self, cancel), fields(mount_id = id))]
    pub async fn delete(
        &self,
        id: i64,
        cancel: CancellationToken,
    ) -> StorageResult<(MountRecord, ReloadHandle)> {
        let existing = self
            .repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("mount {} not found", id)))?;

        self.repo.delete(id).await?;
        tracing::info!(
            mount_id = existing.id,
            scope = %existing.scope(),
            mount_path = %existing.mount_path,
            "Mount deleted"
        );

        let handle = match existing.scope() {
            MountScope::Global => self.global.spawn_unload(&existing.mount_path, cancel),
            MountScope::Tenant(tenant_id) => {
                self.tenants
                    .spawn_unload(tenant_id, &existing.mount_path, cancel)
            }
        };
        Ok((existing, handle))
    }

    /// Build, initialize and list the root of a throwaway instance. Nothing is persisted.
    pub async fn test(
        &self,
        mut new: NewMount,
        cancel: &CancellationToken,
    ) -> StorageResult<Vec<FileObject>> {
        self.validate(&mut new)?;
        let record = MountRecord::from_new(0, new);
        let init_timeout = self.global.init_timeout();
        let instance = build_instance(&self.registry, &record, cancel, init_timeout).await?;

        let listed = instance
            .driver
            .list(cancel, &FileObject::dir("/"), &ListArgs::default())
            .await
            .map_err(|e| StorageError::backend(&record.mount_path, "list", e));
        drop_instance(&instance, cancel).await;
        listed
    }

    /// Unload the previous slot if the mount moved, then reload the current one.
    fn schedule(
        &self,
        previous: Option<MountRecord>,
        record: MountRecord,
        cancel: CancellationToken,
    ) -> ReloadHandle {
        let global = self.global.clone();
        let tenants = self.tenants.clone();
        ReloadHandle::spawn(async move {
            if let Some(old) = previous {
                match old.scope() {
                    MountScope::Global => global.unload(&old.mount_path, &cancel).await?,
                    MountScope::Tenant(tenant_id) => {
                        tenants.unload(tenant_id, &old.mount_path, &cancel).await?
                    }
                }
            }
            let result = match record.scope() {
                MountScope::Global => global.reload(&record.mount_path, &cancel).await,
                MountScope::Tenant(tenant_id) => {
                    tenants.reload(tenant_id, &record.mount_path, &cancel).await
                }
            };
            if let Err(ref e) = result {
                tracing::warn!(
                    error = %e,
                    mount_path = %record.mount_path,
                    "Background reload after mount change failed"
                );
            }
            result
        })
    }
}
