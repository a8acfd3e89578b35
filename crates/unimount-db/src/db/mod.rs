//! Database repositories for the mount registry
//
// Repository contract and PostgreSQL implementation
pub mod mount;
//
// In-memory implementation for tests and embedders
pub mod memory;
//
// Pool setup and migrations
pub mod pool;

pub use memory::InMemoryMountRepository;
pub use mount::{MountRepository, PgMountRepository};
pub use pool::connect;
