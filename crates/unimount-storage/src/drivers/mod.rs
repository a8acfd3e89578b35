//! Built-in drivers
//!
//! `Memory` and `Virtual` are always compiled in. `Local` and `S3` sit behind
//! the `driver-local` and `driver-s3` features.

#[cfg(feature = "driver-local")]
pub mod local;
pub mod memory;
#[cfg(feature = "driver-s3")]
pub mod s3;
pub mod virtual_fs;

#[cfg(feature = "driver-local")]
pub use local::LocalDriver;
pub use memory::MemoryDriver;
#[cfg(feature = "driver-s3")]
pub use s3::S3Driver;
pub use virtual_fs::VirtualDriver;

use crate::registry::DriverRegistry;

/// Register every driver compiled into this build.
pub fn register_builtin(registry: &mut DriverRegistry) {
    registry.register(|| Box::new(MemoryDriver::new()));
    registry.register(|| Box::new(VirtualDriver::new()));

    #[cfg(feature = "driver-local")]
    registry.register(|| Box::new(LocalDriver::new()));

    #[cfg(feature = "driver-s3")]
    registry.register(|| Box::new(S3Driver::new()));
}
