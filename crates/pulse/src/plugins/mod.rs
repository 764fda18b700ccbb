//! Plugin Discovery
//!
//! Keeps the set of runnable plugins in sync with the plugin directory.
//! A plugin is any regular file directly inside the directory with at least
//! one execute permission bit set.

mod registry;
mod watcher;

pub use registry::*;
pub use watcher::*;

use std::path::Path;

/// A change to the plugin directory, by bare plugin name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginChange {
    Created(String),
    Removed(String),
}

/// Whether `path` is a regular file with an execute bit set
#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

/// Translate a watcher event path into a registry key.
///
/// A leading `./` is ignored on both sides, then the directory prefix and its
/// separator are removed. Paths outside the directory fall back to their final
/// component.
pub fn script_name(path: &Path, directory: &Path) -> String {
    let path = path.to_string_lossy();
    let directory = directory.to_string_lossy();

    let path = path.strip_prefix("./").unwrap_or(&path);
    let directory = directory.strip_prefix("./").unwrap_or(&directory);
    let directory = directory.trim_end_matches('/');

    if let Some(name) = path
        .strip_prefix(directory)
        .and_then(|rest| rest.strip_prefix('/'))
    {
        if !name.is_empty() && !name.contains('/') {
            return name.to_string();
        }
    }

    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
