use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::TryStreamExt;
use http::Method;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::Error as ObjectStoreError;
use object_store::{ObjectMeta, ObjectStoreExt, PutPayload, Result as ObjectResult};
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::driver::{check_cancelled, Driver, Getter, Writer};
use crate::error::{DriverError, DriverResult};
use crate::path;
use crate::types::{
    ConfigField, DriverConfig, FileObject, FileStream, Link, LinkArgs, ListArgs, UpdateProgress,
};

pub const NAME: &str = "S3";

/// Empty object that keeps a "directory" alive in a flat bucket.
const PLACEHOLDER: &str = ".placeholder";

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_expire() -> u64 {
    4
}

#[derive(Debug, Deserialize)]
struct Addition {
    bucket: String,
    #[serde(default = "default_region")]
    region: String,
    /// Custom endpoint for S3-compatible providers.
    #[serde(default)]
    endpoint: String,
    #[serde(default)]
    root_folder_path: String,
    /// Hours a signed link stays valid.
    #[serde(default = "default_expire")]
    sign_url_expire: u64,
}

/// S3 driver backed by `object_store`
#[derive(Default)]
pub struct S3Driver {
    addition: Option<Addition>,
    store: Option<AmazonS3>,
}

impl S3Driver {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self) -> DriverResult<&AmazonS3> {
        self.store
            .as_ref()
            .ok_or_else(|| DriverError::Backend("S3 driver is not initialized".to_string()))
    }

    fn bucket(&self) -> &str {
        self.addition.as_ref().map(|a| a.bucket.as_str()).unwrap_or("")
    }

    /// Object key for a path inside the mount.
    fn key(&self, obj_path: &str) -> DriverResult<Path> {
        let clean = path::clean_path(obj_path)
            .ok_or_else(|| DriverError::InvalidPath(obj_path.to_string()))?;
        let root = self
            .addition
            .as_ref()
            .map(|a| a.root_folder_path.trim_matches('/'))
            .unwrap_or("");
        let relative = clean.trim_start_matches('/');
        let key = match (root.is_empty(), relative.is_empty()) {
            (true, _) => relative.to_string(),
            (false, true) => root.to_string(),
            (false, false) => format!("{}/{}", root, relative),
        };
        Ok(Path::from(key))
    }

    fn file_object(&self, dir: &str, meta: &ObjectMeta) -> FileObject {
        let name = meta.location.filename().unwrap_or_default().to_string();
        FileObject {
            id: meta.location.to_string(),
            path: path::join_path(dir, &name),
            name,
            size: meta.size as i64,
            modified: meta.last_modified,
            created: None,
            is_dir: false,
        }
    }

    fn dir_object(dir: &str, prefix: &Path) -> FileObject {
        let name = prefix.filename().unwrap_or_default().to_string();
        FileObject {
            id: prefix.to_string(),
            path: path::join_path(dir, &name),
            name,
            size: 0,
            modified: Utc::now(),
            created: None,
            is_dir: true,
        }
    }

    /// Every object stored under `prefix`, recursively.
    async fn objects_under(&self, prefix: &Path) -> DriverResult<Vec<ObjectMeta>> {
        let store = self.store()?;
        object_store::ObjectStore::list(store, Some(prefix))
            .try_collect()
            .await
            .map_err(backend_error)
    }

    /// Copy a single object or a whole prefix to `to`.
    async fn copy_tree(&self, from: &Path, to: &Path) -> DriverResult<Vec<Path>> {
        let store = self.store()?;
        match store.head(from).await {
            Ok(_) => {
                let result: ObjectResult<_> = store.copy(from, to).await;
                result.map_err(backend_error)?;
                Ok(vec![from.clone()])
            }
            Err(ObjectStoreError::NotFound { .. }) => {
                let objects = self.objects_under(from).await?;
                if objects.is_empty() {
                    return Err(DriverError::NotFound(from.to_string()));
                }
                let mut copied = Vec::with_capacity(objects.len());
                for meta in objects {
                    let target = match meta.location.as_ref().strip_prefix(from.as_ref()) {
                        Some(rest) => Path::from(format!("{}{}", to, rest)),
                        None => continue,
                    };
                    let result: ObjectResult<_> = store.copy(&meta.location, &target).await;
                    result.map_err(backend_error)?;
                    copied.push(meta.location);
                }
                Ok(copied)
            }
            Err(e) => Err(backend_error(e)),
        }
    }

    async fn delete_all(&self, locations: &[Path]) -> DriverResult<()> {
        let store = self.store()?;
        for location in locations {
            let result: ObjectResult<_> = store.delete(location).await;
            result.map_err(backend_error)?;
        }
        Ok(())
    }

    async fn relocate(&self, src: &str, dst: &str) -> DriverResult<()> {
        let start = Instant::now();
        let from = self.key(src)?;
        let to = self.key(dst)?;
        let copied = self.copy_tree(&from, &to).await?;
        self.delete_all(&copied).await?;
        tracing::info!(
            bucket = %self.bucket(),
            from_key = %from,
            to_key = %to,
            objects = copied.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 move successful"
        );
        Ok(())
    }
}

fn backend_error(err: ObjectStoreError) -> DriverError {
    match err {
        ObjectStoreError::NotFound { path, .. } => DriverError::NotFound(path),
        ObjectStoreError::AlreadyExists { path, .. } => DriverError::AlreadyExists(path),
        other => DriverError::Backend(other.to_string()),
    }
}

#[async_trait]
impl Driver for S3Driver {
    fn config(&self) -> DriverConfig {
        DriverConfig {
            local_sort: true,
            default_root: "/".to_string(),
            check_status: true,
            ..DriverConfig::named(NAME)
        }
    }

    fn additions(&self) -> Vec<ConfigField> {
        vec![
            ConfigField::string("bucket").required(),
            ConfigField::string("region").default_value("us-east-1"),
            ConfigField::string("endpoint")
                .help("custom endpoint for S3-compatible providers, e.g. http://localhost:9000"),
            ConfigField::string("root_folder_path"),
            ConfigField::number("sign_url_expire")
                .default_value("4")
                .help("hours a signed link stays valid"),
        ]
    }

    fn bind(&mut self, addition: &str) -> DriverResult<()> {
        let addition: Addition = serde_json::from_str(addition)?;
        if addition.bucket.is_empty() {
            return Err(DriverError::Config("bucket is required".to_string()));
        }
        self.addition = Some(addition);
        Ok(())
    }

    async fn init(&mut self, cancel: &CancellationToken) -> DriverResult<()> {
        check_cancelled(cancel)?;
        let addition = self
            .addition
            .as_ref()
            .ok_or_else(|| DriverError::Config("S3 settings are not bound".to_string()))?;

        let mut builder = AmazonS3Builder::from_env()
            .with_region(addition.region.clone())
            .with_bucket_name(addition.bucket.clone());

        if !addition.endpoint.is_empty() {
            let allow_http = addition.endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(addition.endpoint.clone())
                .with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| DriverError::Config(e.to_string()))?;

        tracing::info!(
            bucket = %addition.bucket,
            region = %addition.region,
            endpoint = %addition.endpoint,
            "S3 driver ready"
        );
        self.store = Some(store);
        Ok(())
    }

    async fn drop_driver(&self, _cancel: &CancellationToken) -> DriverResult<()> {
        Ok(())
    }

    async fn list(
        &self,
        cancel: &CancellationToken,
        dir: &FileObject,
        args: &ListArgs,
    ) -> DriverResult<Vec<FileObject>> {
        check_cancelled(cancel)?;
        let store = self.store()?;
        let prefix = self.key(&dir.path)?;
        let start = Instant::now();

        let listed = object_store::ObjectStore::list_with_delimiter(store, Some(&prefix))
            .await
            .map_err(backend_error)?;

        let mut objects: Vec<FileObject> = listed
            .common_prefixes
            .iter()
            .map(|p| Self::dir_object(&dir.path, p))
            .collect();
        objects.extend(
            listed
                .objects
                .iter()
                .filter(|m| {
                    args.s3_show_placeholder || m.location.filename() != Some(PLACEHOLDER)
                })
                .map(|m| self.file_object(&dir.path, m)),
        );

        tracing::debug!(
            bucket = %self.bucket(),
            prefix = %prefix,
            count = objects.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 list successful"
        );
        Ok(objects)
    }

    async fn link(
        &self,
        cancel: &CancellationToken,
        file: &FileObject,
        _args: &LinkArgs,
    ) -> DriverResult<Link> {
        check_cancelled(cancel)?;
        let store = self.store()?;
        let location = self.key(&file.path)?;
        let hours = self
            .addition
            .as_ref()
            .map(|a| a.sign_url_expire)
            .unwrap_or_else(default_expire);

        let url_result: ObjectResult<_> = store
            .signed_url(Method::GET, &location, Duration::from_secs(hours * 3600))
            .await;
        let url = url_result.map_err(backend_error)?.to_string();
        Ok(Link::redirect(url))
    }

    fn as_writer(&self) -> Option<&dyn Writer> {
        Some(self)
    }

    fn as_getter(&self) -> Option<&dyn Getter> {
        Some(self)
    }
}

#[async_trait]
impl Getter for S3Driver {
    async fn get(&self, cancel: &CancellationToken, obj_path: &str) -> DriverResult<FileObject> {
        check_cancelled(cancel)?;
        let store = self.store()?;
        let location = self.key(obj_path)?;
        let parent = path::parent_path(obj_path);

        match store.head(&location).await {
            Ok(meta) => Ok(self.file_object(&parent, &meta)),
            Err(ObjectStoreError::NotFound { .. }) => {
                let listed = object_store::ObjectStore::list_with_delimiter(store, Some(&location))
                    .await
                    .map_err(backend_error)?;
                if listed.objects.is_empty() && listed.common_prefixes.is_empty() {
                    return Err(DriverError::NotFound(obj_path.to_string()));
                }
                Ok(Self::dir_object(&parent, &location))
            }
            Err(e) => Err(backend_error(e)),
        }
    }
}

#[async_trait]
impl Writer for S3Driver {
    async fn make_dir(
        &self,
        cancel: &CancellationToken,
        parent: &FileObject,
        name: &str,
    ) -> DriverResult<()> {
        check_cancelled(cancel)?;
        let store = self.store()?;
        let dir = self.key(&path::join_path(&parent.path, name))?;
        let placeholder = dir.child(PLACEHOLDER);

        let result: ObjectResult<_> = store
            .put(&placeholder, PutPayload::from(Bytes::new()))
            .await;
        result.map_err(backend_error)?;
        Ok(())
    }

    async fn move_obj(
        &self,
        cancel: &CancellationToken,
        src: &FileObject,
        dst_dir: &FileObject,
    ) -> DriverResult<()> {
        check_cancelled(cancel)?;
        let dst = path::join_path(&dst_dir.path, path::base_name(&src.path));
        self.relocate(&src.path, &dst).await
    }

    async fn rename(
        &self,
        cancel: &CancellationToken,
        src: &FileObject,
        new_name: &str,
    ) -> DriverResult<()> {
        check_cancelled(cancel)?;
        let dst = path::join_path(&path::parent_path(&src.path), new_name);
        self.relocate(&src.path, &dst).await
    }

    async fn copy(
        &self,
        cancel: &CancellationToken,
        src: &FileObject,
        dst_dir: &FileObject,
    ) -> DriverResult<()> {
        check_cancelled(cancel)?;
        let from = self.key(&src.path)?;
        let to = self.key(&path::join_path(&dst_dir.path, path::base_name(&src.path)))?;
        let copied = self.copy_tree(&from, &to).await?;
        tracing::info!(
            bucket = %self.bucket(),
            from_key = %from,
            to_key = %to,
            objects = copied.len(),
            "S3 copy successful"
        );
        Ok(())
    }

    async fn remove(&self, cancel: &CancellationToken, obj: &FileObject) -> DriverResult<()> {
        check_cancelled(cancel)?;
        let location = self.key(&obj.path)?;
        let start = Instant::now();

        let targets = if obj.is_dir {
            self.objects_under(&location)
                .await?
                .into_iter()
                .map(|m| m.location)
                .collect()
        } else {
            vec![location.clone()]
        };
        self.delete_all(&targets).await?;

        tracing::info!(
            bucket = %self.bucket(),
            key = %location,
            objects = targets.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );
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
        let store = self.store()?;
        let location = self.key(&path::join_path(&dst_dir.path, &stream.obj.name))?;
        let start = Instant::now();

        // Buffered in memory and sent as a single put.
        let mut buffer = Vec::new();
        stream.reader.read_to_end(&mut buffer).await?;
        check_cancelled(cancel)?;
        progress(50.0);

        let size = buffer.len() as u64;
        let result: ObjectResult<_> = store
            .put(&location, PutPayload::from(Bytes::from(buffer)))
            .await;

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket(),
                key = %location,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 upload failed"
            );
            backend_error(e)
        })?;
        progress(100.0);

        tracing::info!(
            bucket = %self.bucket(),
            key = %location,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );
        Ok(())
    }
}
