//! Data models for the application

mod mount;

pub use mount::*;
