//! Driver registry for managing available driver types
//!
//! Registration happens at start-up; afterwards the table is read-only and
//! shared behind an `Arc`, so lookups take no lock.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::driver::Driver;
use crate::error::{StorageError, StorageResult};
use crate::types::DriverInfo;
use unimount_core::MountRecord;

/// Builds a fresh, unbound driver instance.
pub type DriverConstructor = Arc<dyn Fn() -> Box<dyn Driver> + Send + Sync>;

struct Entry {
    constructor: DriverConstructor,
    info: DriverInfo,
}

/// Table of driver types keyed by name.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Entry>,
}

impl DriverRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every driver compiled into this build.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        crate::drivers::register_builtin(&mut registry);
        registry
    }

    /// Register a driver type.
    ///
    /// The constructor is called once to read the descriptor and schema. A
    /// second registration under the same name replaces the first.
    pub fn register<F>(&mut self, constructor: F)
    where
        F: Fn() -> Box<dyn Driver> + Send + Sync + 'static,
    {
        let probe = constructor();
        let info = DriverInfo {
            config: probe.config(),
            items: probe.additions(),
        };
        let name = info.config.name.clone();

        if let Some(previous) = self.drivers.get(&name) {
            tracing::warn!(
                driver = %name,
                descriptor_changed = previous.info != info,
                "Driver registered twice, replacing previous registration"
            );
        } else {
            tracing::debug!(driver = %name, fields = info.items.len(), "Driver registered");
        }

        self.drivers.insert(
            name,
            Entry {
                constructor: Arc::new(constructor),
                info,
            },
        );
    }

    /// Get a driver constructor by name
    pub fn get(&self, name: &str) -> StorageResult<DriverConstructor> {
        self.drivers
            .get(name)
            .map(|e| Arc::clone(&e.constructor))
            .ok_or_else(|| StorageError::NotFound(format!("driver '{}' not found", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.drivers.contains_key(name)
    }

    /// Registered driver names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn infos(&self) -> HashMap<String, DriverInfo> {
        self.drivers
            .iter()
            .map(|(name, e)| (name.clone(), e.info.clone()))
            .collect()
    }

    pub fn info(&self, name: &str) -> StorageResult<DriverInfo> {
        self.drivers
            .get(name)
            .map(|e| e.info.clone())
            .ok_or_else(|| StorageError::NotFound(format!("driver '{}' not found", name)))
    }

    /// Construct an instance for `record` and bind its settings. Does not `init`.
    pub fn create(&self, record: &MountRecord) -> StorageResult<Box<dyn Driver>> {
        let constructor = self.get(&record.driver)?;
        let mut driver = constructor();
        driver
            .bind(&record.addition)
            .map_err(|source| StorageError::InitializationFailed {
                mount_path: record.mount_path.clone(),
                driver: record.driver.clone(),
                source,
            })?;
        Ok(driver)
    }
}

static GLOBAL: OnceLock<Arc<DriverRegistry>> = OnceLock::new();

/// Install the process-wide registry. Returns `false` if one was already set.
pub fn install(registry: DriverRegistry) -> bool {
    GLOBAL.set(Arc::new(registry)).is_ok()
}

/// The process-wide registry, built from the built-in drivers on first use
/// unless [`install`] ran earlier.
pub fn global() -> Arc<DriverRegistry> {
    Arc::clone(GLOBAL.get_or_init(|| Arc::new(DriverRegistry::with_builtin())))
}

/// Names of every driver type in the process-wide registry.
pub fn names() -> Vec<String> {
    global().names()
}

/// Descriptor and schema of one driver type in the process-wide registry.
pub fn info(name: &str) -> StorageResult<DriverInfo> {
    global().info(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Driver;
    use crate::error::DriverResult;
    use crate::types::{ConfigField, DriverConfig, FileObject, Link, LinkArgs, ListArgs};
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;
    use unimount_core::NewMount;

    struct MockDriver {
        name: &'static str,
        fields: usize,
        bound: Option<String>,
    }

    impl MockDriver {
        fn boxed(name: &'static str, fields: usize) -> Box<dyn Driver> {
            Box::new(Self {
                name,
                fields,
                bound: None,
            })
        }
    }

    #[async_trait]
    impl Driver for MockDriver {
        fn config(&self) -> DriverConfig {
            DriverConfig::named(self.name)
        }

        fn additions(&self) -> Vec<ConfigField> {
            (0..self.fields)
                .map(|i| ConfigField::string(&format!("field_{}", i)))
                .collect()
        }

        fn bind(&mut self, addition: &str) -> DriverResult<()> {
            let _: serde_json::Value = serde_json::from_str(addition)?;
            self.bound = Some(addition.to_string());
            Ok(())
        }

        async fn init(&mut self, _cancel: &CancellationToken) -> DriverResult<()> {
            Ok(())
        }

        async fn drop_driver(&self, _cancel: &CancellationToken) -> DriverResult<()> {
            Ok(())
        }

        async fn list(
            &self,
            _cancel: &CancellationToken,
            _dir: &FileObject,
            _args: &ListArgs,
        ) -> DriverResult<Vec<FileObject>> {
            Ok(Vec::new())
        }

        async fn link(
            &self,
            _cancel: &CancellationToken,
            _file: &FileObject,
            _args: &LinkArgs,
        ) -> DriverResult<Link> {
            Ok(Link::default())
        }
    }

    fn record(driver: &str, addition: &str) -> MountRecord {
        MountRecord::from_new(1, NewMount::new(None, "/m", driver, addition))
    }

    #[test]
    fn test_new_registry_is_empty() {
        let registry = DriverRegistry::new();
        assert!(registry.names().is_empty());
        assert!(!registry.contains("Mock"));
    }

    #[test]
    fn test_register_driver() {
        let mut registry = DriverRegistry::new();
        registry.register(|| MockDriver::boxed("Mock", 2));

        assert!(registry.contains("Mock"));
        let info = registry.info("Mock").unwrap();
        assert_eq!(info.config.name, "Mock");
        assert_eq!(info.items.len(), 2);
    }

    #[test]
    fn test_get_nonexistent_driver() {
        let registry = DriverRegistry::new();
        let err = registry.get("nonexistent").err().unwrap();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("driver 'nonexistent' not found"));
    }

    #[test]
    fn test_names_are_sorted() {
        let mut registry = DriverRegistry::new();
        registry.register(|| MockDriver::boxed("Zeta", 0));
        registry.register(|| MockDriver::boxed("Alpha", 0));
        registry.register(|| MockDriver::boxed("Mid", 0));
        assert_eq!(registry.names(), vec!["Alpha", "Mid", "Zeta"]);
        assert_eq!(registry.infos().len(), 3);
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = DriverRegistry::new();
        registry.register(|| MockDriver::boxed("Mock", 1));
        registry.register(|| MockDriver::boxed("Mock", 3));
        assert_eq!(registry.names().len(), 1);
        assert_eq!(registry.info("Mock").unwrap().items.len(), 3);
    }

    #[test]
    fn test_create_binds_settings() {
        let mut registry = DriverRegistry::new();
        registry.register(|| MockDriver::boxed("Mock", 0));

        assert!(registry.create(&record("Mock", "{}")).is_ok());

        let err = registry.create(&record("Mock", "{broken")).err().unwrap();
        assert!(matches!(err, StorageError::InitializationFailed { .. }));

        let err = registry.create(&record("Missing", "{}")).err().unwrap();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_builtin_registry_lists_memory_and_virtual() {
        let registry = DriverRegistry::with_builtin();
        let names = registry.names();
        assert!(names.contains(&"Memory".to_string()));
        assert!(names.contains(&"Virtual".to_string()));
    }
}
