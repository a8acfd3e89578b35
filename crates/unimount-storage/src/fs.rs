//! Operation facade
//!
//! Every entry point resolves the path to a live instance, checks the
//! capability it needs, and delegates with the mount-relative path. Backend
//! errors are wrapped with the mount path and operation name, never retried.

use std::cmp::Ordering;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use unimount_core::MountRecord;
use uuid::Uuid;

use crate::error::{Capability, StorageError, StorageResult};
use crate::instance::DriverInstance;
use crate::manager::DriverManager;
use crate::path;
use crate::tenant::TenantDriverManager;
use crate::types::{FileObject, FileStream, Link, LinkArgs, ListArgs, OtherArgs, UpdateProgress};

/// Namespace a request is resolved in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Global,
    Tenant(Uuid),
    /// Anonymous caller: public mounts that admit guests.
    Guest,
}

#[derive(Clone)]
pub struct FsService {
    global: DriverManager,
    tenants: TenantDriverManager,
}

impl FsService {
    pub fn new(tenants: TenantDriverManager) -> Self {
        Self {
            global: tenants.global().clone(),
            tenants,
        }
    }

    pub fn global(&self) -> &DriverManager {
        &self.global
    }

    pub fn tenants(&self) -> &TenantDriverManager {
        &self.tenants
    }

    async fn resolve(
        &self,
        scope: Scope,
        path: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<(Arc<DriverInstance>, String)> {
        match scope {
            Scope::Global => self.global.resolve(path).await,
            Scope::Tenant(tenant_id) => self.tenants.resolve_for(Some(tenant_id), path, cancel).await,
            Scope::Guest => self.tenants.resolve_for(None, path, cancel).await,
        }
    }

    async fn visible_mounts(&self, scope: Scope) -> StorageResult<Vec<String>> {
        match scope {
            Scope::Global => Ok(self.global.mounts().await),
            Scope::Tenant(tenant_id) => self.tenants.visible_mounts(Some(tenant_id)).await,
            Scope::Guest => self.tenants.visible_mounts(None).await,
        }
    }

    /// Current object at `rel`: via `Getter` when available, otherwise a bare reference.
    async fn object_at(
        instance: &DriverInstance,
        rel: &str,
        operation: &'static str,
        cancel: &CancellationToken,
    ) -> StorageResult<FileObject> {
        match instance.driver.as_getter() {
            Some(getter) => getter
                .get(cancel, rel)
                .await
                .map_err(|e| StorageError::backend(instance.mount_path(), operation, e)),
            None => Ok(FileObject::file(rel)),
        }
    }

    pub async fn list(
        &self,
        scope: Scope,
        path: &str,
        mut args: ListArgs,
        cancel: &CancellationToken,
    ) -> StorageResult<Vec<FileObject>> {
        let path = clean(path)?;
        let virtual_dirs = path::child_mount_names(
            self.visible_mounts(scope).await?.iter().map(String::as_str),
            &path,
        );

        let (instance, rel) = match self.resolve(scope, &path, cancel).await {
            Ok(resolved) => resolved,
            Err(StorageError::NotFound(_)) if !virtual_dirs.is_empty() => {
                return Ok(virtual_dirs
                    .iter()
                    .map(|name| FileObject::dir(&path::join_path(&path, name)))
                    .collect());
            }
            Err(e) => return Err(e),
        };

        let config = instance.driver.config();
        args.req_path = path.clone();
        if config.no_cache {
            args.refresh = true;
        }

        let start = std::time::Instant::now();
        let mut objects = instance
            .driver
            .list(cancel, &FileObject::dir(&rel), &args)
            .await
            .map_err(|e| StorageError::backend(instance.mount_path(), "list", e))?;

        for name in virtual_dirs {
            if !objects.iter().any(|o| o.name == name) {
                objects.push(FileObject::dir(&path::join_path(&rel, &name)));
            }
        }

        if config.local_sort {
            sort_objects(&mut objects, &instance.record);
        }

        tracing::debug!(
            mount_path = %instance.mount_path(),
            path = %path,
            count = objects.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Listed directory"
        );
        Ok(objects)
    }

    pub async fn get(
        &self,
        scope: Scope,
        path: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<FileObject> {
        let path = clean(path)?;
        let (instance, rel) = self.resolve(scope, &path, cancel).await?;
        let getter = instance
            .driver
            .as_getter()
            .ok_or_else(|| StorageError::unsupported(instance.driver_name(), Capability::Getter))?;
        getter
            .get(cancel, &rel)
            .await
            .map_err(|e| StorageError::backend(instance.mount_path(), "get", e))
    }

    pub async fn link(
        &self,
        scope: Scope,
        path: &str,
        args: LinkArgs,
        cancel: &CancellationToken,
    ) -> StorageResult<Link> {
        let path = clean(path)?;
        let (instance, rel) = self.resolve(scope, &path, cancel).await?;
        let file = Self::object_at(&instance, &rel, "link", cancel).await?;
        instance
            .driver
            .link(cancel, &file, &args)
            .await
            .map_err(|e| StorageError::backend(instance.mount_path(), "link", e))
    }

    pub async fn make_dir(
        &self,
        scope: Scope,
        path: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<()> {
        let path = clean(path)?;
        let (instance, rel) = self.resolve(scope, &path, cancel).await?;
        let writer = writer_of(&instance)?;
        if rel == "/" {
            return Err(StorageError::AlreadyExists(path));
        }
        let parent = FileObject::dir(&path::parent_path(&rel));
        writer
            .make_dir(cancel, &parent, path::base_name(&rel))
            .await
            .map_err(|e| StorageError::backend(instance.mount_path(), "make_dir", e))
    }

    /// Move `src_path` into the directory `dst_dir`. Both must be on the same mount.
    pub async fn move_obj(
        &self,
        scope: Scope,
        src_path: &str,
        dst_dir: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<()> {
        let (instance, src_rel, dst_rel) = self.resolve_pair(scope, src_path, dst_dir, cancel).await?;
        let writer = writer_of(&instance)?;
        let src = Self::object_at(&instance, &src_rel, "move", cancel).await?;
        writer
            .move_obj(cancel, &src, &FileObject::dir(&dst_rel))
            .await
            .map_err(|e| StorageError::backend(instance.mount_path(), "move", e))
    }

    pub async fn rename(
        &self,
        scope: Scope,
        path: &str,
        new_name: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<()> {
        if new_name.is_empty() || new_name.contains('/') || new_name == ".." {
            return Err(StorageError::InvalidInput(format!(
                "invalid name '{}'",
                new_name
            )));
        }
        let path = clean(path)?;
        let (instance, rel) = self.resolve(scope, &path, cancel).await?;
        let writer = writer_of(&instance)?;
        if rel == "/" {
            return Err(StorageError::InvalidInput(
                "cannot rename a mount root".to_string(),
            ));
        }
        let src = Self::object_at(&instance, &rel, "rename", cancel).await?;
        writer
            .rename(cancel, &src, new_name)
            .await
            .map_err(|e| StorageError::backend(instance.mount_path(), "rename", e))
    }

    /// Copy `src_path` into the directory `dst_dir`. Both must be on the same mount.
    pub async fn copy(
        &self,
        scope: Scope,
        src_path: &str,
        dst_dir: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<()> {
        let (instance, src_rel, dst_rel) = self.resolve_pair(scope, src_path, dst_dir, cancel).await?;
        let writer = writer_of(&instance)?;
        let src = Self::object_at(&instance, &src_rel, "copy", cancel).await?;
        writer
            .copy(cancel, &src, &FileObject::dir(&dst_rel))
            .await
            .map_err(|e| StorageError::backend(instance.mount_path(), "copy", e))
    }

    pub async fn remove(
        &self,
        scope: Scope,
        path: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<()> {
        let path = clean(path)?;
        let (instance, rel) = self.resolve(scope, &path, cancel).await?;
        let writer = writer_of(&instance)?;
        if rel == "/" {
            return Err(StorageError::InvalidInput(
                "cannot remove a mount root".to_string(),
            ));
        }
        let obj = Self::object_at(&instance, &rel, "remove", cancel).await?;
        writer
            .remove(cancel, &obj)
            .await
            .map_err(|e| StorageError::backend(instance.mount_path(), "remove", e))
    }

    /// Upload `stream` into the directory `dst_dir`.
    pub async fn put(
        &self,
        scope: Scope,
        dst_dir: &str,
        stream: FileStream,
        progress: UpdateProgress<'_>,
        cancel: &CancellationToken,
    ) -> StorageResult<()> {
        let dst_dir = clean(dst_dir)?;
        let (instance, rel) = self.resolve(scope, &dst_dir, cancel).await?;
        if instance.driver.config().no_upload {
            return Err(StorageError::unsupported(
                instance.driver_name(),
                Capability::Upload,
            ));
        }
        let writer = writer_of(&instance)?;

        let start = std::time::Instant::now();
        let name = stream.obj.name.clone();
        writer
            .put(cancel, &FileObject::dir(&rel), stream, progress)
            .await
            .map_err(|e| StorageError::backend(instance.mount_path(), "put", e))?;

        tracing::info!(
            mount_path = %instance.mount_path(),
            dir = %dst_dir,
            name = %name,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Upload finished"
        );
        Ok(())
    }

    /// Driver-specific call on the object at `path`.
    pub async fn other(
        &self,
        scope: Scope,
        path: &str,
        method: &str,
        data: JsonValue,
        cancel: &CancellationToken,
    ) -> StorageResult<JsonValue> {
        let path = clean(path)?;
        let (instance, rel) = self.resolve(scope, &path, cancel).await?;
        let other = instance
            .driver
            .as_other()
            .ok_or_else(|| StorageError::unsupported(instance.driver_name(), Capability::Other))?;
        let obj = Self::object_at(&instance, &rel, "other", cancel).await?;
        other
            .other(
                cancel,
                OtherArgs {
                    obj,
                    method: method.to_string(),
                    data,
                },
            )
            .await
            .map_err(|e| StorageError::backend(instance.mount_path(), "other", e))
    }

    async fn resolve_pair(
        &self,
        scope: Scope,
        src_path: &str,
        dst_path: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<(Arc<DriverInstance>, String, String)> {
        let src_path = clean(src_path)?;
        let dst_path = clean(dst_path)?;
        let (src, src_rel) = self.resolve(scope, &src_path, cancel).await?;
        let (dst, dst_rel) = self.resolve(scope, &dst_path, cancel).await?;
        if !Arc::ptr_eq(&src, &dst) {
            return Err(StorageError::CrossMount {
                from: src.mount_path().to_string(),
                to: dst.mount_path().to_string(),
            });
        }
        if src_rel == "/" {
            return Err(StorageError::InvalidInput(
                "cannot move or copy a mount root".to_string(),
            ));
        }
        Ok((src, src_rel, dst_rel))
    }
}

fn clean(path: &str) -> StorageResult<String> {
    path::clean_path(path)
        .ok_or_else(|| StorageError::InvalidInput(format!("invalid path '{}'", path)))
}

fn writer_of(instance: &DriverInstance) -> StorageResult<&dyn crate::driver::Writer> {
    instance
        .driver
        .as_writer()
        .ok_or_else(|| StorageError::unsupported(instance.driver_name(), Capability::Writer))
}

/// Sort a listing by the mount's `order_by`, `order_direction` and `extract_folder`.
pub fn sort_objects(objects: &mut [FileObject], record: &MountRecord) {
    let descending = record.order_direction.eq_ignore_ascii_case("desc");
    let compare = |a: &FileObject, b: &FileObject| -> Ordering {
        let ord = match record.order_by.as_str() {
            "size" => a.size.cmp(&b.size),
            "modified" => a.modified.cmp(&b.modified),
            "name" => a.name.cmp(&b.name),
            _ => Ordering::Equal,
        };
        if descending {
            ord.reverse()
        } else {
            ord
        }
    };
    objects.sort_by(compare);

    match record.extract_folder.as_str() {
        "front" => objects.sort_by_key(|o| !o.is_dir),
        "back" => objects.sort_by_key(|o| o.is_dir),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use unimount_core::NewMount;

    fn obj(name: &str, size: i64, age_secs: i64, is_dir: bool) -> FileObject {
        let mut o = if is_dir {
            FileObject::dir(&format!("/{}", name))
        } else {
            FileObject::file(&format!("/{}", name))
        };
        o.size = size;
        o.modified = Utc::now() - Duration::seconds(age_secs);
        o
    }

    fn record(order_by: &str, direction: &str, extract: &str) -> MountRecord {
        let mut record = MountRecord::from_new(1, NewMount::new(None, "/m", "Virtual", "{}"));
        record.order_by = order_by.to_string();
        record.order_direction = direction.to_string();
        record.extract_folder = extract.to_string();
        record
    }

    fn names(objects: &[FileObject]) -> Vec<&str> {
        objects.iter().map(|o| o.name.as_str()).collect()
    }

    #[test]
    fn sort_by_name_ascending() {
        let mut objects = vec![obj("b", 1, 0, false), obj("a", 2, 0, false)];
        sort_objects(&mut objects, &record("name", "asc", ""));
        assert_eq!(names(&objects), vec!["a", "b"]);
    }

    #[test]
    fn sort_by_size_descending() {
        let mut objects = vec![
            obj("small", 1, 0, false),
            obj("big", 100, 0, false),
            obj("mid", 10, 0, false),
        ];
        sort_objects(&mut objects, &record("size", "desc", ""));
        assert_eq!(names(&objects), vec!["big", "mid", "small"]);
    }

    #[test]
    fn folders_extracted_to_front_or_back() {
        let mut objects = vec![
            obj("z.txt", 1, 0, false),
            obj("dir", 0, 0, true),
            obj("a.txt", 1, 0, false),
        ];
        sort_objects(&mut objects, &record("name", "asc", "front"));
        assert_eq!(names(&objects), vec!["dir", "a.txt", "z.txt"]);

        sort_objects(&mut objects, &record("name", "asc", "back"));
        assert_eq!(names(&objects), vec!["a.txt", "z.txt", "dir"]);
    }

    #[test]
    fn unknown_order_keeps_driver_order() {
        let mut objects = vec![obj("b", 1, 0, false), obj("a", 1, 0, false)];
        sort_objects(&mut objects, &record("", "", ""));
        assert_eq!(names(&objects), vec!["b", "a"]);
    }

    #[test]
    fn sort_by_modified() {
        let mut objects = vec![obj("new", 1, 0, false), obj("old", 1, 600, false)];
        sort_objects(&mut objects, &record("modified", "asc", ""));
        assert_eq!(names(&objects), vec!["old", "new"]);
    }
}
