//! Plugin Directory Watcher
//!
//! Watches the plugin directory for created and removed entries and applies
//! them to the registry.

use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::{PluginChange, PluginRegistry, script_name};
use crate::error::Result;

/// Plugin directory watcher
pub struct PluginWatcher {
    /// Plugin directory as configured
    directory: PathBuf,
    registry: PluginRegistry,
    /// Channel receiver for directory changes
    rx: mpsc::Receiver<PluginChange>,
    /// The underlying watcher (kept alive)
    _watcher: RecommendedWatcher,
}

impl PluginWatcher {
    /// Start watching `directory` (non-recursively)
    pub fn new(directory: impl AsRef<Path>, registry: PluginRegistry) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        let (tx, rx) = mpsc::channel(100);

        let directory_clone = directory.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            Self::forward(&directory_clone, res, &tx);
        })?;

        watcher.watch(&directory, RecursiveMode::NonRecursive)?;
        info!("Watching plugin directory: {}", directory.display());

        Ok(Self {
            directory,
            registry,
            rx,
            _watcher: watcher,
        })
    }

    /// Handle one notification on the watcher thread.
    ///
    /// Errors are logged and dropped; the watcher keeps running.
    fn forward(
        directory: &Path,
        res: notify::Result<Event>,
        tx: &mpsc::Sender<PluginChange>,
    ) {
        match res {
            Ok(event) => {
                for change in Self::event_to_changes(directory, &event) {
                    if tx.blocking_send(change).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                error!("Plugin watcher error: {}", e);
            }
        }
    }

    /// Convert a notify event into registry changes.
    ///
    /// Only creations and removals matter: modifying a script does not change
    /// whether it can run.
    pub fn event_to_changes(directory: &Path, event: &Event) -> Vec<PluginChange> {
        let make: fn(String) -> PluginChange = match event.kind {
            EventKind::Create(_) => PluginChange::Created,
            EventKind::Remove(_) => PluginChange::Removed,
            _ => {
                debug!("Ignoring event kind: {:?}", event.kind);
                return Vec::new();
            }
        };

        event
            .paths
            .iter()
            .map(|path| make(script_name(path, directory)))
            .collect()
    }

    /// Run the watcher loop
    pub async fn run(mut self) {
        info!("Starting plugin watcher loop");

        while let Some(change) = self.rx.recv().await {
            debug!("Plugin directory change: {:?}", change);
            self.registry.apply(&self.directory, change);
        }

        info!("Plugin watcher loop ended");
    }
}
