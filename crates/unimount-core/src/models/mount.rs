use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Load status of a mount as last observed by a lifecycle manager.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "mount_status", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum MountStatus {
    /// Created or updated, not loaded yet.
    #[default]
    Pending,
    /// A live driver instance is serving the mount.
    Work,
    /// The last load attempt failed.
    Error,
}

impl FromStr for MountStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(MountStatus::Pending),
            "work" => Ok(MountStatus::Work),
            "error" => Ok(MountStatus::Error),
            _ => Err(anyhow::anyhow!("Invalid mount status: {}", s)),
        }
    }
}

impl Display for MountStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MountStatus::Pending => write!(f, "pending"),
            MountStatus::Work => write!(f, "work"),
            MountStatus::Error => write!(f, "error"),
        }
    }
}

/// Owner of a mount: the shared global namespace or a single tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "tenant_id")]
pub enum MountScope {
    Global,
    Tenant(Uuid),
}

impl MountScope {
    pub fn tenant_id(&self) -> Option<Uuid> {
        match self {
            MountScope::Global => None,
            MountScope::Tenant(id) => Some(*id),
        }
    }
}

impl From<Option<Uuid>> for MountScope {
    fn from(tenant_id: Option<Uuid>) -> Self {
        match tenant_id {
            Some(id) => MountScope::Tenant(id),
            None => MountScope::Global,
        }
    }
}

impl Display for MountScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MountScope::Global => write!(f, "global"),
            MountScope::Tenant(id) => write!(f, "tenant:{}", id),
        }
    }
}

/// A configured mount: which driver serves which path, with what settings.
///
/// `addition` holds the driver settings as serialized JSON. The routing core
/// never interprets it; drivers decode it in `bind`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct MountRecord {
    pub id: i64,
    /// `None` for global mounts.
    pub tenant_id: Option<Uuid>,
    pub mount_path: String,
    pub order_index: i32,
    pub driver: String,
    /// Minutes a driver may cache listings for.
    pub cache_expiration: i32,
    pub status: MountStatus,
    pub addition: String,
    pub remark: String,
    pub disabled: bool,
    pub disable_index: bool,
    pub enable_sign: bool,

    pub is_public: bool,
    pub allow_guest: bool,
    pub require_auth: bool,

    pub order_by: String,
    pub order_direction: String,
    pub extract_folder: String,

    pub web_proxy: bool,
    pub webdav_policy: String,
    pub proxy_range: bool,
    pub down_proxy_url: String,

    pub modified: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MountRecord {
    pub fn scope(&self) -> MountScope {
        MountScope::from(self.tenant_id)
    }

    /// Whether an unauthenticated caller may browse this mount.
    pub fn guest_visible(&self) -> bool {
        self.is_public && !self.disabled && (self.allow_guest || !self.require_auth)
    }

    /// Build a record from an insert payload, as the repository would.
    pub fn from_new(id: i64, new: NewMount) -> Self {
        let now = Utc::now();
        Self {
            id,
            tenant_id: new.tenant_id,
            mount_path: new.mount_path,
            order_index: new.order_index,
            driver: new.driver,
            cache_expiration: new.cache_expiration,
            status: MountStatus::Pending,
            addition: new.addition,
            remark: new.remark,
            disabled: new.disabled,
            disable_index: new.disable_index,
            enable_sign: new.enable_sign,
            is_public: new.is_public,
            allow_guest: new.allow_guest,
            require_auth: new.require_auth,
            order_by: new.order_by,
            order_direction: new.order_direction,
            extract_folder: new.extract_folder,
            web_proxy: new.web_proxy,
            webdav_policy: new.webdav_policy,
            proxy_range: new.proxy_range,
            down_proxy_url: new.down_proxy_url,
            modified: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite the editable fields with `update`, keeping id, status and creation time.
    pub fn apply(&mut self, update: NewMount) {
        let id = self.id;
        let status = self.status;
        let created_at = self.created_at;
        *self = Self::from_new(id, update);
        self.status = status;
        self.created_at = created_at;
    }
}

/// Insert/update payload for a mount record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct NewMount {
    pub tenant_id: Option<Uuid>,
    #[validate(length(
        min = 1,
        max = 1024,
        message = "Mount path must be between 1 and 1024 characters"
    ))]
    pub mount_path: String,
    pub order_index: i32,
    #[validate(length(min = 1, max = 64, message = "Driver name must not be empty"))]
    pub driver: String,
    #[validate(range(min = 0, message = "Cache expiration must not be negative"))]
    pub cache_expiration: i32,
    pub addition: String,
    pub remark: String,
    pub disabled: bool,
    pub disable_index: bool,
    pub enable_sign: bool,
    pub is_public: bool,
    pub allow_guest: bool,
    pub require_auth: bool,
    pub order_by: String,
    pub order_direction: String,
    pub extract_folder: String,
    pub web_proxy: bool,
    pub webdav_policy: String,
    pub proxy_range: bool,
    pub down_proxy_url: String,
}

impl NewMount {
    pub fn new(
        tenant_id: Option<Uuid>,
        mount_path: impl Into<String>,
        driver: impl Into<String>,
        addition: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            mount_path: mount_path.into(),
            driver: driver.into(),
            addition: addition.into(),
            ..Self::default()
        }
    }

    pub fn scope(&self) -> MountScope {
        MountScope::from(self.tenant_id)
    }
}
