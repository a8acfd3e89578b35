//! In-memory mount repository
//!
//! Mirrors the constraints of the `mounts` table (unique path per scope,
//! `pending` status on insert) without a database.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use unimount_core::{AppError, MountRecord, MountScope, MountStatus, NewMount};

use super::mount::MountRepository;

#[derive(Clone, Default)]
pub struct InMemoryMountRepository {
    records: Arc<RwLock<HashMap<i64, MountRecord>>>,
    next_id: Arc<AtomicI64>,
}

impl InMemoryMountRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status of a record, for assertions.
    pub async fn status_of(&self, id: i64) -> Option<MountStatus> {
        self.records.read().await.get(&id).map(|r| r.status)
    }

    fn sorted(mut records: Vec<MountRecord>) -> Vec<MountRecord> {
        records.sort_by(|a, b| {
            a.order_index
                .cmp(&b.order_index)
                .then_with(|| a.mount_path.cmp(&b.mount_path))
        });
        records
    }

    fn ensure_unique(
        records: &HashMap<i64, MountRecord>,
        scope: MountScope,
        mount_path: &str,
        except: Option<i64>,
    ) -> Result<(), AppError> {
        let taken = records.values().any(|r| {
            Some(r.id) != except && r.scope() == scope && r.mount_path == mount_path
        });
        if taken {
            return Err(AppError::AlreadyExists(format!(
                "mount path {} already exists",
                mount_path
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MountRepository for InMemoryMountRepository {
    async fn get_by_id(&self, id: i64) -> Result<Option<MountRecord>, AppError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn get_by_path(
        &self,
        scope: MountScope,
        mount_path: &str,
    ) -> Result<Option<MountRecord>, AppError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|r| r.scope() == scope && r.mount_path == mount_path)
            .cloned())
    }

    async fn list_enabled(&self, scope: MountScope) -> Result<Vec<MountRecord>, AppError> {
        let records = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.scope() == scope && !r.disabled)
            .cloned()
            .collect();
        Ok(Self::sorted(records))
    }

    async fn list_public(&self) -> Result<Vec<MountRecord>, AppError> {
        let records = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.is_public && !r.disabled)
            .cloned()
            .collect();
        Ok(Self::sorted(records))
    }

    async fn list(
        &self,
        scope: MountScope,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<MountRecord>, AppError> {
        let records = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.scope() == scope)
            .cloned()
            .collect();
        Ok(Self::sorted(records)
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn update_status(&self, id: i64, status: MountStatus) -> Result<(), AppError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("mount {} not found", id)))?;
        record.status = status;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn create(&self, new: NewMount) -> Result<MountRecord, AppError> {
        let mut records = self.records.write().await;
        Self::ensure_unique(&records, new.scope(), &new.mount_path, None)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = MountRecord::from_new(id, new);
        records.insert(id, record.clone());
        Ok(record)
    }

    async fn update(&self, id: i64, update: NewMount) -> Result<MountRecord, AppError> {
        let mut records = self.records.write().await;
        Self::ensure_unique(&records, update.scope(), &update.mount_path, Some(id))?;

        let record = records
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("mount {} not found", id)))?;
        record.apply(update);
        Ok(record.clone())
    }

    async fn delete(&self, id: i64) -> Result<(), AppError> {
        self.records
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("mount {} not found", id)))
    }
}
