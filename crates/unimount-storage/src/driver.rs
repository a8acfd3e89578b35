//! Driver abstraction traits
//!
//! Every storage backend implements [`Driver`]. Optional operation groups are
//! separate traits ([`Writer`], [`Getter`], [`Other`]); a driver advertises
//! them through the `as_*` queries, and the facade turns a `None` into
//! `StorageError::Unsupported`.
//!
//! Lifecycle of one instance: construct (registry) → [`Driver::bind`] →
//! [`Driver::init`] → operations → [`Driver::drop_driver`]. Instances are
//! never shared between mounts.

use crate::error::DriverResult;
use crate::types::{
    ConfigField, DriverConfig, FileObject, FileStream, Link, LinkArgs, ListArgs, OtherArgs,
    UpdateProgress,
};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Driver: Send + Sync {
    /// Static descriptor of the driver type.
    fn config(&self) -> DriverConfig;

    /// Settings schema, declared explicitly by each driver.
    fn additions(&self) -> Vec<ConfigField>;

    /// Decode the serialized settings of the owning mount.
    fn bind(&mut self, addition: &str) -> DriverResult<()>;

    /// Connect to the backend. Runs before the instance becomes visible.
    async fn init(&mut self, cancel: &CancellationToken) -> DriverResult<()>;

    /// Release sessions and handles. Called exactly once before the instance
    /// is replaced or unloaded.
    async fn drop_driver(&self, cancel: &CancellationToken) -> DriverResult<()>;

    async fn list(
        &self,
        cancel: &CancellationToken,
        dir: &FileObject,
        args: &ListArgs,
    ) -> DriverResult<Vec<FileObject>>;

    async fn link(
        &self,
        cancel: &CancellationToken,
        file: &FileObject,
        args: &LinkArgs,
    ) -> DriverResult<Link>;

    fn as_writer(&self) -> Option<&dyn Writer> {
        None
    }

    fn as_getter(&self) -> Option<&dyn Getter> {
        None
    }

    fn as_other(&self) -> Option<&dyn Other> {
        None
    }
}

/// Mutating operations.
#[async_trait]
pub trait Writer: Send + Sync {
    async fn make_dir(
        &self,
        cancel: &CancellationToken,
        parent: &FileObject,
        name: &str,
    ) -> DriverResult<()>;

    async fn move_obj(
        &self,
        cancel: &CancellationToken,
        src: &FileObject,
        dst_dir: &FileObject,
    ) -> DriverResult<()>;

    async fn rename(
        &self,
        cancel: &CancellationToken,
        src: &FileObject,
        new_name: &str,
    ) -> DriverResult<()>;

    async fn copy(
        &self,
        cancel: &CancellationToken,
        src: &FileObject,
        dst_dir: &FileObject,
    ) -> DriverResult<()>;

    async fn remove(&self, cancel: &CancellationToken, obj: &FileObject) -> DriverResult<()>;

    async fn put(
        &self,
        cancel: &CancellationToken,
        dst_dir: &FileObject,
        stream: FileStream,
        progress: UpdateProgress<'_>,
    ) -> DriverResult<()>;
}

/// Direct metadata lookup by path.
#[async_trait]
pub trait Getter: Send + Sync {
    async fn get(&self, cancel: &CancellationToken, path: &str) -> DriverResult<FileObject>;
}

/// Driver-specific calls outside the common operation set.
#[async_trait]
pub trait Other: Send + Sync {
    async fn other(&self, cancel: &CancellationToken, args: OtherArgs)
        -> DriverResult<JsonValue>;
}

/// Fail fast when the caller already gave up.
pub fn check_cancelled(cancel: &CancellationToken) -> DriverResult<()> {
    if cancel.is_cancelled() {
        return Err(crate::error::DriverError::Cancelled);
    }
    Ok(())
}
