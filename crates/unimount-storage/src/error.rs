//! Error types for drivers and the routing core

use std::fmt;
use thiserror::Error;
use unimount_core::{AppError, ErrorMetadata, LogLevel};

/// Failure reported by a driver from inside its own operations.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for DriverError {
    fn from(err: serde_json::Error) -> Self {
        DriverError::Config(format!("Invalid settings: {}", err))
    }
}

/// Result type for driver operations
pub type DriverResult<T> = Result<T, DriverError>;

/// Optional operation groups a driver may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Writer,
    Getter,
    Other,
    Upload,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Writer => write!(f, "writer"),
            Capability::Getter => write!(f, "getter"),
            Capability::Other => write!(f, "other"),
            Capability::Upload => write!(f, "upload"),
        }
    }
}

/// Error kinds surfaced by the registry, the lifecycle managers and the facade.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Unknown driver type, mount record, or no mount serves the path.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Driver {driver} does not support {capability} operations")]
    Unsupported {
        driver: String,
        capability: Capability,
    },

    #[error("Failed to initialize mount {mount_path} ({driver}): {source}")]
    InitializationFailed {
        mount_path: String,
        driver: String,
        #[source]
        source: DriverError,
    },

    #[error("{operation} failed on mount {mount_path}: {source}")]
    Backend {
        mount_path: String,
        operation: &'static str,
        #[source]
        source: DriverError,
    },

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Cannot move or copy across mounts: {from} -> {to}")]
    CrossMount { from: String, to: String },

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Repository(AppError),
}

impl From<AppError> for StorageError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(msg) => StorageError::NotFound(msg),
            AppError::AlreadyExists(msg) => StorageError::AlreadyExists(msg),
            AppError::InvalidInput(msg) => StorageError::InvalidInput(msg),
            other => StorageError::Repository(other),
        }
    }
}

impl From<validator::ValidationErrors> for StorageError {
    fn from(err: validator::ValidationErrors) -> Self {
        StorageError::InvalidInput(format!("Validation error: {}", err))
    }
}

impl StorageError {
    pub fn backend(mount_path: &str, operation: &'static str, source: DriverError) -> Self {
        StorageError::Backend {
            mount_path: mount_path.to_string(),
            operation,
            source,
        }
    }

    pub fn unsupported(driver: &str, capability: Capability) -> Self {
        StorageError::Unsupported {
            driver: driver.to_string(),
            capability,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, StorageError::Unsupported { .. })
    }
}

/// Result type for routing and lifecycle operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Static metadata for each variant: (http_status, error_code, recoverable, suggested_action, sensitive, log_level).
fn storage_error_static_metadata(
    err: &StorageError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        StorageError::NotFound(_) => (
            404,
            "NOT_FOUND",
            false,
            Some("Verify the path and mount exist"),
            false,
            LogLevel::Debug,
        ),
        StorageError::Unsupported { .. } => (
            501,
            "NOT_IMPLEMENTED",
            false,
            Some("Use a mount whose driver supports this operation"),
            false,
            LogLevel::Debug,
        ),
        StorageError::InitializationFailed { .. } => (
            502,
            "DRIVER_INIT_FAILED",
            true,
            Some("Check the mount settings and remote service availability"),
            true,
            LogLevel::Error,
        ),
        StorageError::Backend { .. } => (
            502,
            "BACKEND_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Warn,
        ),
        StorageError::AlreadyExists(_) => (
            409,
            "ALREADY_EXISTS",
            false,
            Some("Choose a different mount path"),
            false,
            LogLevel::Debug,
        ),
        StorageError::InvalidInput(_) => (
            400,
            "INVALID_INPUT",
            false,
            Some("Check request parameters and try again"),
            false,
            LogLevel::Debug,
        ),
        StorageError::CrossMount { .. } => (
            400,
            "CROSS_MOUNT",
            false,
            Some("Source and destination must be on the same mount"),
            false,
            LogLevel::Debug,
        ),
        StorageError::AccessDenied(_) => (
            403,
            "ACCESS_DENIED",
            false,
            Some("Sign in or request access to this mount"),
            false,
            LogLevel::Debug,
        ),
        StorageError::Task(_) => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        // Delegated in the trait impl.
        StorageError::Repository(_) => (500, "INTERNAL_ERROR", true, None, true, LogLevel::Error),
    }
}

impl ErrorMetadata for StorageError {
    fn http_status_code(&self) -> u16 {
        match self {
            StorageError::Repository(e) => e.http_status_code(),
            _ => storage_error_static_metadata(self).0,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            StorageError::Repository(e) => e.error_code(),
            _ => storage_error_static_metadata(self).1,
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            StorageError::Repository(e) => e.is_recoverable(),
            _ => storage_error_static_metadata(self).2,
        }
    }

    fn suggested_action(&self) -> Option<&'static str> {
        match self {
            StorageError::Repository(e) => e.suggested_action(),
            _ => storage_error_static_metadata(self).3,
        }
    }

    fn client_message(&self) -> String {
        match self {
            StorageError::Repository(e) => e.client_message(),
            StorageError::InitializationFailed { mount_path, .. } => {
                format!("Mount {} failed to initialize", mount_path)
            }
            StorageError::Backend {
                mount_path,
                operation,
                ..
            } => format!("{} failed on mount {}", operation, mount_path),
            StorageError::Task(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    fn is_sensitive(&self) -> bool {
        match self {
            StorageError::Repository(e) => e.is_sensitive(),
            _ => storage_error_static_metadata(self).4,
        }
    }

    fn log_level(&self) -> LogLevel {
        match self {
            StorageError::Repository(e) => e.log_level(),
            _ => storage_error_static_metadata(self).5,
        }
    }
}
