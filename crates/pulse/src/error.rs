//! Error types for the agent.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

/// Errors that can occur while setting up or running the agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] Box<figment::Error>),

    #[error("Failed to read API key file {path}: {source}")]
    ApiKeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to watch plugin directory: {0}")]
    Watch(#[from] notify::Error),

    #[error("Failed to scan plugin directory {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out connecting to {address} after {timeout:?}")]
    DialTimeout { address: String, timeout: Duration },

    #[error("Failed to launch plugin {plugin}: {source}")]
    Launch {
        plugin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Plugin {plugin} exited with {status}")]
    PluginFailed { plugin: String, status: ExitStatus },

    #[error("Invalid output from plugin {plugin}: {output:?}")]
    MalformedOutput { plugin: String, output: String },

    #[error("Failed to write metric: {0}")]
    Write(#[source] std::io::Error),

    #[error("Metric channel closed")]
    ChannelClosed,
}

impl From<figment::Error> for AgentError {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

/// Result type for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;
