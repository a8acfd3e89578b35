//! Virtual driver: a fixed, read-only file list declared in the mount settings.
//!
//! Every directory under the mount lists the same entries. Nothing can be
//! written, so the driver does not expose a `Writer`.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::driver::{check_cancelled, Driver, Getter};
use crate::error::{DriverError, DriverResult};
use crate::path;
use crate::types::{ConfigField, DriverConfig, FileObject, Link, LinkArgs, ListArgs};

pub const NAME: &str = "Virtual";

const MODIFIED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Addition {
    root_folder_path: String,
    /// JSON-encoded list of [`VirtualFile`].
    files: String,
}

#[derive(Debug, Clone, Deserialize)]
struct VirtualFile {
    name: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    is_dir: bool,
    #[serde(default)]
    modified: String,
    #[serde(default)]
    content: Option<String>,
}

impl VirtualFile {
    fn modified(&self) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(&self.modified, MODIFIED_FORMAT)
            .map(|t| t.and_utc())
            .unwrap_or_else(|_| Utc::now())
    }

    fn object(&self, dir: &str) -> FileObject {
        FileObject {
            id: self.name.clone(),
            path: path::join_path(dir, &self.name),
            name: self.name.clone(),
            size: self.size,
            modified: self.modified(),
            created: None,
            is_dir: self.is_dir,
        }
    }
}

#[derive(Default)]
pub struct VirtualDriver {
    addition: Addition,
    files: Vec<VirtualFile>,
}

impl VirtualDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, name: &str) -> Option<&VirtualFile> {
        self.files.iter().find(|f| f.name == name)
    }
}

#[async_trait]
impl Driver for VirtualDriver {
    fn config(&self) -> DriverConfig {
        DriverConfig {
            local_sort: true,
            only_local: true,
            no_cache: true,
            default_root: "/".to_string(),
            ..DriverConfig::named(NAME)
        }
    }

    fn additions(&self) -> Vec<ConfigField> {
        vec![
            ConfigField::string("root_folder_path")
                .required()
                .default_value("/"),
            ConfigField::text("files").help("JSON format file list"),
        ]
    }

    fn bind(&mut self, addition: &str) -> DriverResult<()> {
        let addition: Addition = if addition.trim().is_empty() {
            Addition::default()
        } else {
            serde_json::from_str(addition)?
        };
        self.files = if addition.files.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&addition.files)?
        };
        self.addition = addition;
        Ok(())
    }

    async fn init(&mut self, cancel: &CancellationToken) -> DriverResult<()> {
        check_cancelled(cancel)?;
        if let Some(bad) = self
            .files
            .iter()
            .find(|f| f.name.is_empty() || f.name.contains('/'))
        {
            return Err(DriverError::Config(format!(
                "invalid virtual file name '{}'",
                bad.name
            )));
        }
        tracing::debug!(
            root = %self.addition.root_folder_path,
            files = self.files.len(),
            "Virtual driver ready"
        );
        Ok(())
    }

    async fn drop_driver(&self, _cancel: &CancellationToken) -> DriverResult<()> {
        Ok(())
    }

    async fn list(
        &self,
        cancel: &CancellationToken,
        dir: &FileObject,
        _args: &ListArgs,
    ) -> DriverResult<Vec<FileObject>> {
        check_cancelled(cancel)?;
        Ok(self.files.iter().map(|f| f.object(&dir.path)).collect())
    }

    async fn link(
        &self,
        cancel: &CancellationToken,
        file: &FileObject,
        _args: &LinkArgs,
    ) -> DriverResult<Link> {
        check_cancelled(cancel)?;
        let content = self
            .find(path::base_name(&file.path))
            .and_then(|f| f.content.clone());
        Ok(match content {
            Some(content) => {
                let bytes = Bytes::from(content);
                Link::stream(Box::pin(futures::stream::once(async move { Ok(bytes) })))
            }
            None => Link::default(),
        })
    }

    fn as_getter(&self) -> Option<&dyn Getter> {
        Some(self)
    }
}

#[async_trait]
impl Getter for VirtualDriver {
    /// Declared entries are returned as-is; any other path is a directory.
    async fn get(&self, cancel: &CancellationToken, obj_path: &str) -> DriverResult<FileObject> {
        check_cancelled(cancel)?;
        let parent = path::parent_path(obj_path);
        Ok(match self.find(path::base_name(obj_path)) {
            Some(file) => file.object(&parent),
            None => FileObject {
                id: obj_path.to_string(),
                ..FileObject::dir(obj_path)
            },
        })
    }
}
