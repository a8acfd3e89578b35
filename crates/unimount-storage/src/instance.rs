//! Live driver instances and the pieces shared by both lifecycle managers.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use unimount_core::{MountRecord, MountStatus};
use unimount_db::MountRepository;

use crate::driver::Driver;
use crate::error::{DriverError, StorageError, StorageResult};
use crate::registry::DriverRegistry;

/// An initialized driver bound to exactly one mount record.
pub struct DriverInstance {
    pub record: MountRecord,
    pub driver: Box<dyn Driver>,
}

impl DriverInstance {
    pub fn mount_path(&self) -> &str {
        &self.record.mount_path
    }

    pub fn driver_name(&self) -> &str {
        &self.record.driver
    }
}

impl fmt::Debug for DriverInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverInstance")
            .field("id", &self.record.id)
            .field("mount_path", &self.record.mount_path)
            .field("driver", &self.record.driver)
            .finish()
    }
}

/// Outcome of a batch load. Failures are collected, never fatal to the batch.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<LoadFailure>,
}

#[derive(Debug)]
pub struct LoadFailure {
    pub mount_path: String,
    pub error: StorageError,
}

impl LoadReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }

    pub(crate) fn record(&mut self, mount_path: &str, result: StorageResult<()>) {
        match result {
            Ok(()) => self.loaded.push(mount_path.to_string()),
            Err(error) => self.failed.push(LoadFailure {
                mount_path: mount_path.to_string(),
                error,
            }),
        }
    }
}

/// Handle to a background lifecycle task. Await it with [`ReloadHandle::wait`]
/// or drop it to let the task finish detached.
#[derive(Debug)]
pub struct ReloadHandle<T = ()> {
    handle: JoinHandle<StorageResult<T>>,
}

impl<T: Send + 'static> ReloadHandle<T> {
    pub(crate) fn spawn<F>(future: F) -> Self
    where
        F: std::future::Future<Output = StorageResult<T>> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future),
        }
    }

    /// Wait for the task to finish and return its result.
    pub async fn wait(self) -> StorageResult<T> {
        self.handle
            .await
            .map_err(|e| StorageError::Task(e.to_string()))?
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Let the task run to completion without observing it.
    pub fn detach(self) {}
}

/// Construct, bind and initialize a driver for `record`. No lock is held here.
pub(crate) async fn build_instance(
    registry: &DriverRegistry,
    record: &MountRecord,
    cancel: &CancellationToken,
    init_timeout: Duration,
) -> StorageResult<DriverInstance> {
    let start = Instant::now();
    let mut driver = registry.create(record)?;

    let init_failed = |source: DriverError| StorageError::InitializationFailed {
        mount_path: record.mount_path.clone(),
        driver: record.driver.clone(),
        source,
    };

    match tokio::time::timeout(init_timeout, driver.init(cancel)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(init_failed(e)),
        Err(_) => {
            return Err(init_failed(DriverError::Backend(format!(
                "init timed out after {}s",
                init_timeout.as_secs()
            ))))
        }
    }

    tracing::debug!(
        mount_path = %record.mount_path,
        driver = %record.driver,
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Driver initialized"
    );

    Ok(DriverInstance {
        record: record.clone(),
        driver,
    })
}

/// Tear down an instance that is leaving its slot. Errors are logged only.
pub(crate) async fn drop_instance(instance: &DriverInstance, cancel: &CancellationToken) {
    if let Err(e) = instance.driver.drop_driver(cancel).await {
        tracing::warn!(
            error = %e,
            mount_path = %instance.record.mount_path,
            driver = %instance.record.driver,
            "Driver drop failed"
        );
    }
}

/// Write the load outcome back to the record. Failures are logged only.
pub(crate) async fn persist_status(
    repo: &Arc<dyn MountRepository>,
    record: &MountRecord,
    status: MountStatus,
) {
    if let Err(e) = repo.update_status(record.id, status).await {
        tracing::warn!(
            error = %e,
            mount_id = record.id,
            mount_path = %record.mount_path,
            status = %status,
            "Failed to persist mount status"
        );
    }
}
