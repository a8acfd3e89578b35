//! Mount path matching and path helpers.
//!
//! Mount paths are absolute, `/`-separated and carry no trailing slash
//! (except the root mount `/`). Matching is segment-bounded: `/ab` never
//! serves `/abcdef`.

/// Normalize a mount path: ensure it starts with `/` and has no trailing slash.
pub fn normalize_mount_path(path: &str) -> String {
    let trimmed = path.trim();
    let mut parts = Vec::new();
    for segment in trimmed.split('/') {
        match segment {
            "" | "." => {}
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// Normalize a request path the same way; `..` segments are rejected.
pub fn clean_path(path: &str) -> Option<String> {
    if path.split('/').any(|s| s == "..") {
        return None;
    }
    Some(normalize_mount_path(path))
}

/// Whether `mount_path` is a segment-bounded prefix of `path`.
pub fn match_path(path: &str, mount_path: &str) -> bool {
    if mount_path == "/" {
        return true;
    }
    match path.strip_prefix(mount_path) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// The part of `path` below `mount_path`, `/` when nothing remains.
pub fn relative_path(path: &str, mount_path: &str) -> String {
    if mount_path == "/" {
        return if path.is_empty() {
            "/".to_string()
        } else {
            path.to_string()
        };
    }
    match path.strip_prefix(mount_path) {
        Some("") | None => "/".to_string(),
        Some(rest) => rest.to_string(),
    }
}

/// Longest mount path in `mount_paths` that serves `path`.
pub fn longest_match<'a, I>(mount_paths: I, path: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<&'a str> = None;
    for mount_path in mount_paths {
        if match_path(path, mount_path) && best.map_or(true, |b| mount_path.len() > b.len()) {
            best = Some(mount_path);
        }
    }
    best
}

/// Names of the first segments of mounts nested strictly below `path`.
///
/// Listing `/` with mounts `/a` and `/b/c` yields `a` and `b`.
pub fn child_mount_names<'a, I>(mount_paths: I, path: &str) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut names: Vec<String> = Vec::new();
    for mount_path in mount_paths {
        if mount_path == path || !match_path(mount_path, path) {
            continue;
        }
        let rest = relative_path(mount_path, path);
        if let Some(first) = rest.trim_start_matches('/').split('/').next() {
            if !first.is_empty() && !names.iter().any(|n| n == first) {
                names.push(first.to_string());
            }
        }
    }
    names.sort();
    names
}

/// Last segment of a path; `/` for the root.
pub fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/";
    }
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Parent directory of a path; the root is its own parent.
pub fn parent_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
    }
}

pub fn join_path(dir: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if dir.is_empty() || dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}
