//! Plugin Registry
//!
//! The set of runnable plugin names, keyed by bare filename. The value is a
//! consecutive failure count, zero whenever a plugin is (re)registered.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{PluginChange, is_executable};
use crate::error::{AgentError, Result};

/// Shared registry of known plugins
///
/// Cloning is cheap; all clones see the same set. The lock is only held for
/// the duration of a single update or snapshot.
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    plugins: Arc<Mutex<HashMap<String, u32>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a registry from a one-time listing of `directory`
    pub fn scan(directory: impl AsRef<Path>) -> Result<Self> {
        let registry = Self::new();
        for name in scan(directory)? {
            registry.insert(name);
        }
        Ok(registry)
    }

    /// Register a plugin, resetting its failure count
    pub fn insert(&self, name: impl Into<String>) {
        let name = name.into();
        info!(plugin = %name, "Plugin registered");
        self.plugins.lock().insert(name, 0);
    }

    /// Forget a plugin. Returns whether it was registered.
    pub fn remove(&self, name: &str) -> bool {
        let removed = self.plugins.lock().remove(name).is_some();
        if removed {
            info!(plugin = %name, "Plugin removed");
        }
        removed
    }

    /// Apply a filesystem change observed under `directory`
    pub fn apply(&self, directory: &Path, change: PluginChange) {
        match change {
            PluginChange::Created(name) => {
                if is_executable(&directory.join(&name)) {
                    self.insert(name);
                } else {
                    debug!(plugin = %name, "Ignoring non-executable entry");
                }
            }
            PluginChange::Removed(name) => {
                self.remove(&name);
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.plugins.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.lock().is_empty()
    }

    /// Sorted copy of the registered names
    pub fn snapshot(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Bump the failure count of a registered plugin, returning the new count
    pub fn record_failure(&self, name: &str) -> Option<u32> {
        let mut plugins = self.plugins.lock();
        let count = plugins.get_mut(name)?;
        *count += 1;
        Some(*count)
    }

    pub fn record_success(&self, name: &str) {
        if let Some(count) = self.plugins.lock().get_mut(name) {
            *count = 0;
        }
    }

    pub fn failures(&self, name: &str) -> Option<u32> {
        self.plugins.lock().get(name).copied()
    }
}

/// List the executable regular files directly inside `directory`
pub fn scan(directory: impl AsRef<Path>) -> Result<Vec<String>> {
    let directory = directory.as_ref();
    let scan_err = |source| AgentError::Scan {
        path: directory.to_path_buf(),
        source,
    };

    let mut names = Vec::new();
    for entry in fs::read_dir(directory).map_err(scan_err)? {
        let entry = entry.map_err(scan_err)?;
        if is_executable(&entry.path()) {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
