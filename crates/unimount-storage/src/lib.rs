//! Unimount Storage Library
//!
//! Routes path-based file operations to pluggable storage drivers.
//!
//! # Layout
//!
//! - [`registry`]: driver types by name, each with a descriptor and settings schema.
//! - [`manager`] / [`tenant`]: live driver instances, one per enabled mount,
//!   for global mounts and for each tenant.
//! - [`fs`]: the facade. Resolves a path to the longest matching mount and
//!   forwards the call if the driver supports it.
//! - [`service`]: mount record mutations that schedule reloads.
//!
//! Mount paths always start with `/` and never end with one, except the root mount `/`.

pub mod driver;
pub mod drivers;
pub mod error;
pub mod fs;
pub mod instance;
pub mod manager;
pub mod path;
pub mod registry;
pub mod service;
pub mod tenant;
pub mod types;

// Re-export commonly used types
pub use driver::{check_cancelled, Driver, Getter, Other, Writer};
pub use error::{Capability, DriverError, DriverResult, StorageError, StorageResult};
pub use fs::{FsService, Scope};
pub use instance::{DriverInstance, LoadFailure, LoadReport, ReloadHandle};
pub use manager::DriverManager;
pub use registry::DriverRegistry;
pub use service::MountService;
pub use tenant::{AccessDecision, AccessSource, TenantDriverManager};
pub use types::{
    ByteStream, ConfigField, DriverConfig, DriverInfo, FieldType, FileObject, FileStream, Link,
    LinkArgs, ListArgs, OtherArgs, UpdateProgress,
};
pub use tokio_util::sync::CancellationToken;
