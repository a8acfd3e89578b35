//! Unimount persistence layer
//!
//! Mount records live in PostgreSQL (`mounts` table). The routing core only
//! talks to the [`MountRepository`] contract, so tests and embedders can swap
//! in [`InMemoryMountRepository`].

pub mod db;

pub use db::{connect, InMemoryMountRepository, MountRepository, PgMountRepository};
