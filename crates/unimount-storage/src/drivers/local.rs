use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Deserialize;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::driver::{check_cancelled, Driver, Getter, Writer};
use crate::error::{DriverError, DriverResult};
use crate::path;
use crate::types::{
    ConfigField, DriverConfig, FileObject, FileStream, Link, LinkArgs, ListArgs, UpdateProgress,
};

pub const NAME: &str = "Local";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Addition {
    root_folder_path: String,
    show_hidden: bool,
    mkdir_root: bool,
}

/// Local filesystem driver
#[derive(Default)]
pub struct LocalDriver {
    addition: Addition,
    root: PathBuf,
}

impl LocalDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert a path inside the mount to a filesystem path under the root.
    ///
    /// Rejects `..` segments and anything that canonicalizes outside the root,
    /// so symlinks cannot escape the mount either.
    fn key_to_path(&self, obj_path: &str) -> DriverResult<PathBuf> {
        let clean = path::clean_path(obj_path)
            .ok_or_else(|| DriverError::InvalidPath(obj_path.to_string()))?;
        let relative = clean.trim_start_matches('/');
        if relative.is_empty() {
            return Ok(self.root.clone());
        }

        let full = self.root.join(relative);
        if let Ok(canonical) = full.canonicalize() {
            if canonical.strip_prefix(&self.root).is_err() {
                return Err(DriverError::InvalidPath(format!(
                    "{} resolves outside the mount root",
                    obj_path
                )));
            }
        }
        Ok(full)
    }

    fn object(&self, obj_path: &str, meta: &std::fs::Metadata) -> FileObject {
        let modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        FileObject {
            id: obj_path.to_string(),
            path: obj_path.to_string(),
            name: path::base_name(obj_path).to_string(),
            size: if meta.is_dir() { 0 } else { meta.len() as i64 },
            modified,
            created: meta.created().ok().map(DateTime::<Utc>::from),
            is_dir: meta.is_dir(),
        }
    }

    async fn require_dir(&self, obj_path: &str) -> DriverResult<PathBuf> {
        let dir = self.key_to_path(obj_path)?;
        let meta = fs::metadata(&dir).await.map_err(|e| io_error(e, obj_path))?;
        if !meta.is_dir() {
            return Err(DriverError::InvalidPath(format!(
                "{} is not a directory",
                obj_path
            )));
        }
        Ok(dir)
    }

    async fn ensure_absent(target: &Path, obj_path: &str) -> DriverResult<()> {
        if fs::try_exists(target).await.unwrap_or(false) {
            return Err(DriverError::AlreadyExists(obj_path.to_string()));
        }
        Ok(())
    }
}

fn io_error(err: io::Error, obj_path: &str) -> DriverError {
    match err.kind() {
        io::ErrorKind::NotFound => DriverError::NotFound(obj_path.to_string()),
        io::ErrorKind::AlreadyExists => DriverError::AlreadyExists(obj_path.to_string()),
        _ => DriverError::Io(err),
    }
}

fn check_name(name: &str) -> DriverResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(DriverError::InvalidPath(name.to_string()));
    }
    Ok(())
}

async fn copy_recursive(src: &Path, dst: &Path) -> io::Result<u64> {
    let mut copied = 0;
    let mut pending = vec![(src.to_path_buf(), dst.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        let meta = fs::metadata(&from).await?;
        if meta.is_dir() {
            fs::create_dir(&to).await?;
            let mut entries = fs::read_dir(&from).await?;
            while let Some(entry) = entries.next_entry().await? {
                pending.push((entry.path(), to.join(entry.file_name())));
            }
        } else {
            copied += fs::copy(&from, &to).await?;
        }
    }
    Ok(copied)
}

#[async_trait]
impl Driver for LocalDriver {
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
                .help("absolute directory served by this mount"),
            ConfigField::bool("show_hidden").default_value("false"),
            ConfigField::bool("mkdir_root")
                .default_value("false")
                .help("create the root directory if it is missing"),
        ]
    }

    fn bind(&mut self, addition: &str) -> DriverResult<()> {
        let addition: Addition = serde_json::from_str(addition)?;
        if addition.root_folder_path.is_empty() {
            return Err(DriverError::Config(
                "root_folder_path is required".to_string(),
            ));
        }
        self.addition = addition;
        Ok(())
    }

    async fn init(&mut self, cancel: &CancellationToken) -> DriverResult<()> {
        check_cancelled(cancel)?;
        let root = PathBuf::from(&self.addition.root_folder_path);

        if self.addition.mkdir_root {
            fs::create_dir_all(&root).await.map_err(|e| {
                DriverError::Config(format!(
                    "Failed to create root directory {}: {}",
                    root.display(),
                    e
                ))
            })?;
        }

        let meta = fs::metadata(&root).await.map_err(|e| {
            DriverError::Config(format!("Root directory {}: {}", root.display(), e))
        })?;
        if !meta.is_dir() {
            return Err(DriverError::Config(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        self.root = root.canonicalize().map_err(|e| {
            DriverError::Config(format!("Failed to canonicalize root path: {}", e))
        })?;
        tracing::debug!(root = %self.root.display(), "Local driver ready");
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
        let dir_path = self.require_dir(&dir.path).await?;

        let mut objects = Vec::new();
        let mut entries = fs::read_dir(&dir_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !self.addition.show_hidden && name.starts_with('.') {
                continue;
            }
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!(error = %e, name = %name, "Skipping unreadable entry");
                    continue;
                }
            };
            objects.push(self.object(&path::join_path(&dir.path, &name), &meta));
        }
        Ok(objects)
    }

    async fn link(
        &self,
        cancel: &CancellationToken,
        file: &FileObject,
        _args: &LinkArgs,
    ) -> DriverResult<Link> {
        check_cancelled(cancel)?;
        let full = self.key_to_path(&file.path)?;
        let handle = fs::File::open(&full)
            .await
            .map_err(|e| io_error(e, &file.path))?;

        let start = Instant::now();
        let shown = full.display().to_string();
        let stream = tokio_util::io::ReaderStream::new(handle).map(move |chunk| {
            chunk.map_err(|e| {
                tracing::error!(
                    path = %shown,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Local stream read error"
                );
                DriverError::Io(e)
            })
        });
        Ok(Link::stream(Box::pin(stream)))
    }

    fn as_writer(&self) -> Option<&dyn Writer> {
        Some(self)
    }

    fn as_getter(&self) -> Option<&dyn Getter> {
        Some(self)
    }
}

#[async_trait]
impl Getter for LocalDriver {
    async fn get(&self, cancel: &CancellationToken, obj_path: &str) -> DriverResult<FileObject> {
        check_cancelled(cancel)?;
        let full = self.key_to_path(obj_path)?;
        let meta = fs::metadata(&full)
            .await
            .map_err(|e| io_error(e, obj_path))?;
        Ok(self.object(obj_path, &meta))
    }
}

#[async_trait]
impl Writer for LocalDriver {
    async fn make_dir(
        &self,
        cancel: &CancellationToken,
        parent: &FileObject,
        name: &str,
    ) -> DriverResult<()> {
        check_cancelled(cancel)?;
        check_name(name)?;
        let parent_path = self.require_dir(&parent.path).await?;
        let obj_path = path::join_path(&parent.path, name);
        fs::create_dir(parent_path.join(name))
            .await
            .map_err(|e| io_error(e, &obj_path))
    }

    async fn move_obj(
        &self,
        cancel: &CancellationToken,
        src: &FileObject,
        dst_dir: &FileObject,
    ) -> DriverResult<()> {
        check_cancelled(cancel)?;
        let from = self.key_to_path(&src.path)?;
        let to_dir = self.require_dir(&dst_dir.path).await?;
        let name = path::base_name(&src.path);
        let obj_path = path::join_path(&dst_dir.path, name);
        let to = to_dir.join(name);

        Self::ensure_absent(&to, &obj_path).await?;
        fs::rename(&from, &to)
            .await
            .map_err(|e| io_error(e, &src.path))?;
        tracing::info!(from = %from.display(), to = %to.display(), "Local move successful");
        Ok(())
    }

    async fn rename(
        &self,
        cancel: &CancellationToken,
        src: &FileObject,
        new_name: &str,
    ) -> DriverResult<()> {
        check_cancelled(cancel)?;
        check_name(new_name)?;
        let from = self.key_to_path(&src.path)?;
        let obj_path = path::join_path(&path::parent_path(&src.path), new_name);
        let to = self.key_to_path(&obj_path)?;

        Self::ensure_absent(&to, &obj_path).await?;
        fs::rename(&from, &to)
            .await
            .map_err(|e| io_error(e, &src.path))
    }

    async fn copy(
        &self,
        cancel: &CancellationToken,
        src: &FileObject,
        dst_dir: &FileObject,
    ) -> DriverResult<()> {
        check_cancelled(cancel)?;
        let from = self.key_to_path(&src.path)?;
        let to_dir = self.require_dir(&dst_dir.path).await?;
        let name = path::base_name(&src.path);
        let obj_path = path::join_path(&dst_dir.path, name);
        let to = to_dir.join(name);

        if to.starts_with(&from) {
            return Err(DriverError::InvalidPath(format!(
                "cannot copy {} into itself",
                src.path
            )));
        }
        Self::ensure_absent(&to, &obj_path).await?;

        let start = Instant::now();
        let copied = copy_recursive(&from, &to)
            .await
            .map_err(|e| io_error(e, &src.path))?;
        tracing::info!(
            from = %from.display(),
            to = %to.display(),
            size_bytes = copied,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local copy successful"
        );
        Ok(())
    }

    async fn remove(&self, cancel: &CancellationToken, obj: &FileObject) -> DriverResult<()> {
        check_cancelled(cancel)?;
        let full = self.key_to_path(&obj.path)?;
        if full == self.root {
            return Err(DriverError::InvalidPath("cannot remove the root".to_string()));
        }
        let meta = fs::metadata(&full)
            .await
            .map_err(|e| io_error(e, &obj.path))?;
        if meta.is_dir() {
            fs::remove_dir_all(&full).await?;
        } else {
            fs::remove_file(&full).await?;
        }
        tracing::info!(path = %full.display(), "Local delete successful");
        Ok(())
    }

    async fn put(
        &self,
        cancel: &CancellationToken,
        dst_dir: &FileObject,
        mut stream: FileStream,
        progress: UpdateProgress<'_>,
    ) -> DriverResult<()> {
        check_cancelled(cancel)?;
        check_name(&stream.obj.name)?;
        let dir = self.require_dir(&dst_dir.path).await?;
        let target = dir.join(&stream.obj.name);
        let start = Instant::now();

        let mut file = fs::File::create(&target).await?;
        let written = tokio::io::copy(&mut stream.reader, &mut file).await?;
        file.sync_all().await?;
        progress(100.0);

        tracing::info!(
            path = %target.display(),
            size_bytes = written,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local stream upload successful"
        );
        Ok(())
    }
}
