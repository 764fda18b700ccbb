//! Agent Configuration
//!
//! Settings are layered with figment, lowest precedence first:
//! built-in defaults, the TOML config file, `PULSE_*` environment variables,
//! then command line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::error::{AgentError, Result};

/// Environment variable prefix for configuration keys
pub const ENV_PREFIX: &str = "PULSE_";

/// What the scheduler does when a plugin is still running from an earlier tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Start another run regardless
    #[default]
    Allow,
    /// Skip the plugin until its previous run finishes
    Skip,
}

/// What happens when a plugin fails to launch, exits nonzero or prints garbage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the agent
    #[default]
    Exit,
    /// Log, count the failure against the plugin and keep going
    Skip,
}

/// Full agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Key prefix for every metric line
    pub api_key: Option<String>,
    /// File holding the key prefix, used when `api_key` is unset
    pub api_key_file: Option<PathBuf>,
    /// Collector address (`host:port`)
    pub address: String,
    /// Directory holding plugin executables
    pub plugin_dir: PathBuf,
    pub tick_interval_ms: u64,
    pub dial_timeout_secs: u64,
    /// Capacity of the runner -> collector channel
    pub channel_capacity: usize,
    /// Upper bound on concurrent plugin runs, 0 for unbounded
    pub max_in_flight: usize,
    pub overlap: OverlapPolicy,
    pub failure_policy: FailurePolicy,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_file: None,
            address: "127.0.0.1:2003".to_string(),
            plugin_dir: PathBuf::from("./plugins"),
            tick_interval_ms: 1000,
            dial_timeout_secs: 30,
            channel_capacity: 1,
            max_in_flight: 64,
            overlap: OverlapPolicy::Allow,
            failure_policy: FailurePolicy::Exit,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

/// Command line overrides, merged last
#[derive(Debug, Clone, Default, Serialize, clap::Args)]
pub struct ConfigOverrides {
    /// API key prepended to every metric name
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Read the API key from this file
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_file: Option<PathBuf>,

    /// Collector address (host:port)
    #[arg(short, long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Directory containing plugin executables
    #[arg(short, long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_dir: Option<PathBuf>,

    /// Scheduler period in milliseconds
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tick_interval_ms: Option<u64>,

    /// Overlapping runs of the same plugin
    #[arg(long, value_enum)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlap: Option<OverlapPolicy>,

    /// Reaction to a failed plugin run
    #[arg(long, value_enum)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<FailurePolicy>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub log_json: bool,
}

impl AgentConfig {
    /// Load configuration from all layers.
    ///
    /// A missing config file is not an error; the layer is simply empty.
    pub fn load(config_path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(AgentConfig::default()));

        if let Some(path) = config_path {
            debug!(path = %path.display(), exists = path.exists(), "Config file");
            figment = figment.merge(Toml::file(path));
        }

        let config: AgentConfig = figment
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(Serialized::defaults(overrides))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the agent cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(AgentError::Config("address must not be empty".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(AgentError::Config("tick_interval_ms must be positive".into()));
        }
        if self.dial_timeout_secs == 0 {
            return Err(AgentError::Config("dial_timeout_secs must be positive".into()));
        }
        if self.channel_capacity == 0 {
            return Err(AgentError::Config("channel_capacity must be positive".into()));
        }
        if self.max_in_flight > Semaphore::MAX_PERMITS {
            return Err(AgentError::Config(format!(
                "max_in_flight must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }
        self.log_filter()?;
        if self.api_key.is_none() && self.api_key_file.is_none() {
            return Err(AgentError::Config(
                "one of api_key or api_key_file is required".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the key prefix, reading `api_key_file` if no inline key is set
    pub fn resolve_api_key(&self) -> Result<String> {
        let key = match (&self.api_key, &self.api_key_file) {
            (Some(key), _) => key.trim().to_string(),
            (None, Some(path)) => std::fs::read_to_string(path)
                .map_err(|source| AgentError::ApiKeyFile {
                    path: path.clone(),
                    source,
                })?
                .trim()
                .to_string(),
            (None, None) => String::new(),
        };

        if key.is_empty() {
            return Err(AgentError::Config("API key is empty".into()));
        }
        Ok(key)
    }

    /// Log filter for the configured level, scoped to this crate
    pub fn log_filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_new(format!("pulse={}", self.log_level))
            .map_err(|e| AgentError::Config(format!("invalid log_level {:?}: {}", self.log_level, e)))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }
}
