//! In-memory driver
//!
//! Holds a tree of entries keyed by their path inside the mount. The tree is
//! seeded from the `entries` setting at `init` and lost on drop. Useful for
//! tests, demos and scratch mounts.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::driver::{check_cancelled, Driver, Getter, Writer};
use crate::error::{DriverError, DriverResult};
use crate::path;
use crate::types::{
    ConfigField, DriverConfig, FileObject, FileStream, Link, LinkArgs, ListArgs, UpdateProgress,
};

pub const NAME: &str = "Memory";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Addition {
    entries: Vec<SeedEntry>,
}

#[derive(Debug, Deserialize)]
struct SeedEntry {
    name: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    is_dir: bool,
    #[serde(default)]
    modified: Option<DateTime<Utc>>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone)]
struct Node {
    is_dir: bool,
    size: i64,
    modified: DateTime<Utc>,
    created: DateTime<Utc>,
    content: Bytes,
}

impl Node {
    fn dir() -> Self {
        let now = Utc::now();
        Self {
            is_dir: true,
            size: 0,
            modified: now,
            created: now,
            content: Bytes::new(),
        }
    }

    fn file(content: Bytes) -> Self {
        let now = Utc::now();
        Self {
            is_dir: false,
            size: content.len() as i64,
            modified: now,
            created: now,
            content,
        }
    }

    fn object(&self, key: &str) -> FileObject {
        FileObject {
            id: key.to_string(),
            path: key.to_string(),
            name: path::base_name(key).to_string(),
            size: self.size,
            modified: self.modified,
            created: Some(self.created),
            is_dir: self.is_dir,
        }
    }
}

type Tree = BTreeMap<String, Node>;

fn root_tree() -> Tree {
    let mut tree = Tree::new();
    tree.insert("/".to_string(), Node::dir());
    tree
}

fn key_of(obj_path: &str) -> DriverResult<String> {
    path::clean_path(obj_path).ok_or_else(|| DriverError::InvalidPath(obj_path.to_string()))
}

fn is_within(key: &str, ancestor: &str) -> bool {
    ancestor == "/" || key == ancestor || key.starts_with(&format!("{}/", ancestor))
}

fn check_name(name: &str) -> DriverResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(DriverError::InvalidPath(name.to_string()));
    }
    Ok(())
}

fn poisoned<T>(_: T) -> DriverError {
    DriverError::Backend("memory tree lock poisoned".to_string())
}

/// Create missing parent directories of `key`.
fn ensure_parents(tree: &mut Tree, key: &str) -> DriverResult<()> {
    let parent = path::parent_path(key);
    if parent == key {
        return Ok(());
    }
    match tree.get(&parent) {
        Some(node) if node.is_dir => Ok(()),
        Some(_) => Err(DriverError::InvalidPath(format!("{} is not a directory", parent))),
        None => {
            ensure_parents(tree, &parent)?;
            tree.insert(parent, Node::dir());
            Ok(())
        }
    }
}

fn require_dir(tree: &Tree, key: &str) -> DriverResult<()> {
    match tree.get(key) {
        Some(node) if node.is_dir => Ok(()),
        Some(_) => Err(DriverError::InvalidPath(format!("{} is not a directory", key))),
        None => Err(DriverError::NotFound(key.to_string())),
    }
}

/// Copy the subtree at `src` to `dst`, keeping relative layout.
fn copy_subtree(tree: &mut Tree, src: &str, dst: &str) {
    let moved: Vec<(String, Node)> = tree
        .iter()
        .filter(|(key, _)| is_within(key, src))
        .map(|(key, node)| (format!("{}{}", dst, &key[src.len()..]), node.clone()))
        .collect();
    for (key, node) in moved {
        tree.insert(key, node);
    }
}

fn remove_subtree(tree: &mut Tree, key: &str) {
    tree.retain(|k, _| !is_within(k, key));
}

pub struct MemoryDriver {
    addition: Addition,
    tree: RwLock<Tree>,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self {
            addition: Addition::default(),
            tree: RwLock::new(root_tree()),
        }
    }

    fn seed(&self) -> DriverResult<Tree> {
        let mut tree = root_tree();
        for entry in &self.addition.entries {
            let key = key_of(&path::join_path("/", &entry.name))?;
            if key == "/" {
                return Err(DriverError::Config(format!(
                    "invalid entry name '{}'",
                    entry.name
                )));
            }
            ensure_parents(&mut tree, &key)?;

            let mut node = if entry.is_dir {
                Node::dir()
            } else {
                let content = entry
                    .content
                    .as_ref()
                    .map(|c| Bytes::from(c.clone()))
                    .unwrap_or_default();
                Node::file(content)
            };
            if !entry.is_dir && entry.size > 0 {
                node.size = entry.size;
            }
            if let Some(modified) = entry.modified {
                node.modified = modified;
            }
            tree.insert(key, node);
        }
        Ok(tree)
    }

    /// Move or copy `src` into `dst_dir` under `name`.
    fn transfer(
        &self,
        src: &FileObject,
        dst_dir: &str,
        name: &str,
        keep_source: bool,
    ) -> DriverResult<()> {
        let src_key = key_of(&src.path)?;
        let dst_dir = key_of(dst_dir)?;
        if src_key == "/" {
            return Err(DriverError::InvalidPath("cannot move the root".to_string()));
        }

        let mut tree = self.tree.write().map_err(poisoned)?;
        if !tree.contains_key(&src_key) {
            return Err(DriverError::NotFound(src_key));
        }
        require_dir(&tree, &dst_dir)?;
        if is_within(&dst_dir, &src_key) {
            return Err(DriverError::InvalidPath(format!(
                "cannot place {} inside itself",
                src_key
            )));
        }
        let dst_key = path::join_path(&dst_dir, name);
        if tree.contains_key(&dst_key) {
            return Err(DriverError::AlreadyExists(dst_key));
        }

        copy_subtree(&mut tree, &src_key, &dst_key);
        if !keep_source {
            remove_subtree(&mut tree, &src_key);
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn config(&self) -> DriverConfig {
        DriverConfig {
            local_sort: true,
            no_cache: true,
            default_root: "/".to_string(),
            ..DriverConfig::named(NAME)
        }
    }

    fn additions(&self) -> Vec<ConfigField> {
        vec![ConfigField::json("entries")
            .default_value("[]")
            .help("initial entries: [{name, size, is_dir, modified, content}]")]
    }

    fn bind(&mut self, addition: &str) -> DriverResult<()> {
        self.addition = if addition.trim().is_empty() {
            Addition::default()
        } else {
            serde_json::from_str(addition)?
        };
        Ok(())
    }

    async fn init(&mut self, cancel: &CancellationToken) -> DriverResult<()> {
        check_cancelled(cancel)?;
        let seeded = self.seed()?;
        let count = seeded.len() - 1;
        *self.tree.write().map_err(poisoned)? = seeded;
        tracing::debug!(entries = count, "Memory driver seeded");
        Ok(())
    }

    async fn drop_driver(&self, _cancel: &CancellationToken) -> DriverResult<()> {
        let mut tree = self.tree.write().map_err(poisoned)?;
        *tree = root_tree();
        Ok(())
    }

    async fn list(
        &self,
        cancel: &CancellationToken,
        dir: &FileObject,
        _args: &ListArgs,
    ) -> DriverResult<Vec<FileObject>> {
        check_cancelled(cancel)?;
        let dir_key = key_of(&dir.path)?;
        let tree = self.tree.read().map_err(poisoned)?;
        require_dir(&tree, &dir_key)?;

        Ok(tree
            .iter()
            .filter(|(key, _)| key.as_str() != "/" && path::parent_path(key) == dir_key)
            .map(|(key, node)| node.object(key))
            .collect())
    }

    async fn link(
        &self,
        cancel: &CancellationToken,
        file: &FileObject,
        _args: &LinkArgs,
    ) -> DriverResult<Link> {
        check_cancelled(cancel)?;
        let key = key_of(&file.path)?;
        let content = {
            let tree = self.tree.read().map_err(poisoned)?;
            match tree.get(&key) {
                Some(node) if !node.is_dir => node.content.clone(),
                Some(_) => return Err(DriverError::InvalidPath(format!("{} is a directory", key))),
                None => return Err(DriverError::NotFound(key)),
            }
        };
        let stream = futures::stream::once(async move { Ok(content) });
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
impl Getter for MemoryDriver {
    async fn get(&self, cancel: &CancellationToken, obj_path: &str) -> DriverResult<FileObject> {
        check_cancelled(cancel)?;
        let key = key_of(obj_path)?;
        let tree = self.tree.read().map_err(poisoned)?;
        tree.get(&key)
            .map(|node| node.object(&key))
            .ok_or(DriverError::NotFound(key))
    }
}

#[async_trait]
impl Writer for MemoryDriver {
    async fn make_dir(
        &self,
        cancel: &CancellationToken,
        parent: &FileObject,
        name: &str,
    ) -> DriverResult<()> {
        check_cancelled(cancel)?;
        check_name(name)?;
        let parent_key = key_of(&parent.path)?;
        let mut tree = self.tree.write().map_err(poisoned)?;
        require_dir(&tree, &parent_key)?;

        let key = path::join_path(&parent_key, name);
        if tree.contains_key(&key) {
            return Err(DriverError::AlreadyExists(key));
        }
        tree.insert(key, Node::dir());
        Ok(())
    }

    async fn move_obj(
        &self,
        cancel: &CancellationToken,
        src: &FileObject,
        dst_dir: &FileObject,
    ) -> DriverResult<()> {
        check_cancelled(cancel)?;
        self.transfer(src, &dst_dir.path, path::base_name(&src.path), false)
    }

    async fn rename(
        &self,
        cancel: &CancellationToken,
        src: &FileObject,
        new_name: &str,
    ) -> DriverResult<()> {
        check_cancelled(cancel)?;
        check_name(new_name)?;
        let parent = path::parent_path(&src.path);
        self.transfer(src, &parent, new_name, false)
    }

    async fn copy(
        &self,
        cancel: &CancellationToken,
        src: &FileObject,
        dst_dir: &FileObject,
    ) -> DriverResult<()> {
        check_cancelled(cancel)?;
        self.transfer(src, &dst_dir.path, path::base_name(&src.path), true)
    }

    async fn remove(&self, cancel: &CancellationToken, obj: &FileObject) -> DriverResult<()> {
        check_cancelled(cancel)?;
        let key = key_of(&obj.path)?;
        if key == "/" {
            return Err(DriverError::InvalidPath("cannot remove the root".to_string()));
        }
        let mut tree = self.tree.write().map_err(poisoned)?;
        if !tree.contains_key(&key) {
            return Err(DriverError::NotFound(key));
        }
        remove_subtree(&mut tree, &key);
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
        let dir_key = key_of(&dst_dir.path)?;
        {
            let tree = self.tree.read().map_err(poisoned)?;
            require_dir(&tree, &dir_key)?;
        }

        let mut buf = Vec::new();
        stream.reader.read_to_end(&mut buf).await?;
        check_cancelled(cancel)?;

        let key = path::join_path(&dir_key, &stream.obj.name);
        let mut tree = self.tree.write().map_err(poisoned)?;
        if matches!(tree.get(&key), Some(node) if node.is_dir) {
            return Err(DriverError::AlreadyExists(key));
        }
        tree.insert(key, Node::file(Bytes::from(buf)));
        progress(100.0);
        Ok(())
    }
}
