//! Mount repository: CRUD for the mounts table.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres};
use unimount_core::{AppError, MountRecord, MountScope, MountStatus, NewMount};

/// Persistence contract consumed by the lifecycle managers and the mount service.
///
/// Scope filters use `tenant_id IS NOT DISTINCT FROM $n` so the global scope
/// (`NULL` tenant) is matched like any other.
#[async_trait]
pub trait MountRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> Result<Option<MountRecord>, AppError>;

    async fn get_by_path(
        &self,
        scope: MountScope,
        mount_path: &str,
    ) -> Result<Option<MountRecord>, AppError>;

    /// Enabled mounts of one scope, ordered by `order_index`.
    async fn list_enabled(&self, scope: MountScope) -> Result<Vec<MountRecord>, AppError>;

    /// Enabled public mounts across every scope.
    async fn list_public(&self) -> Result<Vec<MountRecord>, AppError>;

    async fn list(
        &self,
        scope: MountScope,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<MountRecord>, AppError>;

    async fn update_status(&self, id: i64, status: MountStatus) -> Result<(), AppError>;

    /// Insert a record with `status = pending`. Fails with `AlreadyExists` on a
    /// duplicate mount path within the scope.
    async fn create(&self, new: NewMount) -> Result<MountRecord, AppError>;

    async fn update(&self, id: i64, update: NewMount) -> Result<MountRecord, AppError>;

    async fn delete(&self, id: i64) -> Result<(), AppError>;
}

const MOUNT_COLUMNS: &str = "id, tenant_id, mount_path, order_index, driver, cache_expiration, \
     status, addition, remark, disabled, disable_index, enable_sign, is_public, allow_guest, \
     require_auth, order_by, order_direction, extract_folder, web_proxy, webdav_policy, \
     proxy_range, down_proxy_url, modified, created_at, updated_at";

/// Map a unique violation on `(tenant, mount_path)` to `AlreadyExists`.
fn map_write_error(err: sqlx::Error, mount_path: &str) -> AppError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.is_unique_violation() {
            return AppError::AlreadyExists(format!("mount path {} already exists", mount_path));
        }
    }
    AppError::Database(err)
}

/// PostgreSQL-backed repository for the mounts table.
#[derive(Clone)]
pub struct PgMountRepository {
    pool: PgPool,
}

impl PgMountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MountRepository for PgMountRepository {
    #[tracing::instrument(skip(self), fields(db.table = "mounts", db.record_id = %id))]
    async fn get_by_id(&self, id: i64) -> Result<Option<MountRecord>, AppError> {
        let record = sqlx::query_as::<Postgres, MountRecord>(&format!(
            "SELECT {} FROM mounts WHERE id = $1",
            MOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    #[tracing::instrument(skip(self), fields(db.table = "mounts", scope = %scope))]
    async fn get_by_path(
        &self,
        scope: MountScope,
        mount_path: &str,
    ) -> Result<Option<MountRecord>, AppError> {
        let record = sqlx::query_as::<Postgres, MountRecord>(&format!(
            "SELECT {} FROM mounts WHERE tenant_id IS NOT DISTINCT FROM $1 AND mount_path = $2",
            MOUNT_COLUMNS
        ))
        .bind(scope.tenant_id())
        .bind(mount_path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    #[tracing::instrument(skip(self), fields(db.table = "mounts", scope = %scope))]
    async fn list_enabled(&self, scope: MountScope) -> Result<Vec<MountRecord>, AppError> {
        let records = sqlx::query_as::<Postgres, MountRecord>(&format!(
            r#"
            SELECT {} FROM mounts
            WHERE tenant_id IS NOT DISTINCT FROM $1 AND disabled = false
            ORDER BY order_index, mount_path
            "#,
            MOUNT_COLUMNS
        ))
        .bind(scope.tenant_id())
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    #[tracing::instrument(skip(self), fields(db.table = "mounts"))]
    async fn list_public(&self) -> Result<Vec<MountRecord>, AppError> {
        let records = sqlx::query_as::<Postgres, MountRecord>(&format!(
            r#"
            SELECT {} FROM mounts
            WHERE is_public = true AND disabled = false
            ORDER BY order_index, mount_path
            "#,
            MOUNT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    #[tracing::instrument(skip(self), fields(db.table = "mounts", scope = %scope))]
    async fn list(
        &self,
        scope: MountScope,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<MountRecord>, AppError> {
        let records = sqlx::query_as::<Postgres, MountRecord>(&format!(
            r#"
            SELECT {} FROM mounts
            WHERE tenant_id IS NOT DISTINCT FROM $1
            ORDER BY order_index, mount_path
            LIMIT $2 OFFSET $3
            "#,
            MOUNT_COLUMNS
        ))
        .bind(scope.tenant_id())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    #[tracing::instrument(skip(self), fields(db.table = "mounts", db.record_id = %id, status = %status))]
    async fn update_status(&self, id: i64, status: MountStatus) -> Result<(), AppError> {
        let result =
            sqlx::query("UPDATE mounts SET status = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(status)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("mount {} not found", id)));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, new), fields(db.table = "mounts", mount_path = %new.mount_path))]
    async fn create(&self, new: NewMount) -> Result<MountRecord, AppError> {
        sqlx::query_as::<Postgres, MountRecord>(&format!(
            r#"
            INSERT INTO mounts (
                tenant_id, mount_path, order_index, driver, cache_expiration, status,
                addition, remark, disabled, disable_index, enable_sign, is_public,
                allow_guest, require_auth, order_by, order_direction, extract_folder,
                web_proxy, webdav_policy, proxy_range, down_proxy_url
            )
            VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7, $8, $9, $10, $11,
                    $12, $13, $14, $15, $16, $17, $18, $19, $20)
            RETURNING {}
            "#,
            MOUNT_COLUMNS
        ))
        .bind(new.tenant_id)
        .bind(&new.mount_path)
        .bind(new.order_index)
        .bind(&new.driver)
        .bind(new.cache_expiration)
        .bind(&new.addition)
        .bind(&new.remark)
        .bind(new.disabled)
        .bind(new.disable_index)
        .bind(new.enable_sign)
        .bind(new.is_public)
        .bind(new.allow_guest)
        .bind(new.require_auth)
        .bind(&new.order_by)
        .bind(&new.order_direction)
        .bind(&new.extract_folder)
        .bind(new.web_proxy)
        .bind(&new.webdav_policy)
        .bind(new.proxy_range)
        .bind(&new.down_proxy_url)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, &new.mount_path))
    }

    #[tracing::instrument(skip(self, update), fields(db.table = "mounts", db.record_id = %id))]
    async fn update(&self, id: i64, update: NewMount) -> Result<MountRecord, AppError> {
        let record = sqlx::query_as::<Postgres, MountRecord>(&format!(
            r#"
            UPDATE mounts SET
                tenant_id = $2, mount_path = $3, order_index = $4, driver = $5,
                cache_expiration = $6, addition = $7, remark = $8, disabled = $9,
                disable_index = $10, enable_sign = $11, is_public = $12, allow_guest = $13,
                require_auth = $14, order_by = $15, order_direction = $16,
                extract_folder = $17, web_proxy = $18, webdav_policy = $19,
                proxy_range = $20, down_proxy_url = $21,
                modified = NOW(), updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            MOUNT_COLUMNS
        ))
        .bind(id)
        .bind(update.tenant_id)
        .bind(&update.mount_path)
        .bind(update.order_index)
        .bind(&update.driver)
        .bind(update.cache_expiration)
        .bind(&update.addition)
        .bind(&update.remark)
        .bind(update.disabled)
        .bind(update.disable_index)
        .bind(update.enable_sign)
        .bind(update.is_public)
        .bind(update.allow_guest)
        .bind(update.require_auth)
        .bind(&update.order_by)
        .bind(&update.order_direction)
        .bind(&update.extract_folder)
        .bind(update.web_proxy)
        .bind(&update.webdav_policy)
        .bind(update.proxy_range)
        .bind(&update.down_proxy_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_write_error(e, &update.mount_path))?;

        record.ok_or_else(|| AppError::NotFound(format!("mount {} not found", id)))
    }

    #[tracing::instrument(skip(self), fields(db.table = "mounts", db.record_id = %id))]
    async fn delete(&self, id: i64) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM mounts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("mount {} not found", id)));
        }
        Ok(())
    }
}
