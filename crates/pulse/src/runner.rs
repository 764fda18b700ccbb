//! Script Runner
//!
//! Executes one plugin and turns its output into a [`Message`].

use std::path::PathBuf;
use std::process::Stdio;

use chrono::Utc;
use tokio::process::Command;
use tracing::trace;

use crate::error::{AgentError, Result};
use crate::message::Message;

/// Runs plugins from a fixed directory
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    directory: PathBuf,
}

impl ScriptRunner {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Path executed for `plugin`
    pub fn script_path(&self, plugin: &str) -> PathBuf {
        self.directory.join(plugin)
    }

    /// Run `plugin` to completion and parse its output.
    ///
    /// The plugin gets no arguments and no stdin; its stderr is discarded.
    /// The message is stamped when the plugin exits.
    pub async fn run(&self, plugin: &str) -> Result<Message> {
        let path = self.script_path(plugin);
        trace!(plugin = %plugin, path = %path.display(), "Running plugin");

        let output = Command::new(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|source| AgentError::Launch {
                plugin: plugin.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(AgentError::PluginFailed {
                plugin: plugin.to_string(),
                status: output.status,
            });
        }

        let malformed = |output: String| AgentError::MalformedOutput {
            plugin: plugin.to_string(),
            output,
        };

        // Values go on the wire byte for byte, so anything but UTF-8 is rejected
        let stdout = String::from_utf8(output.stdout)
            .map_err(|e| malformed(String::from_utf8_lossy(e.as_bytes()).into_owned()))?;
        Message::parse(&stdout, Utc::now().timestamp()).ok_or_else(|| malformed(stdout))
    }
}
