//! Agent Service
//!
//! Ties the pieces together: the watched plugin registry, the scheduler, the
//! metric collector and the outbound connection.

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::plugins::{PluginRegistry, PluginWatcher};
use crate::runner::ScriptRunner;
use crate::scheduler::{ScheduleOptions, Scheduler};
use crate::sink::{MetricCollector, MetricSink};

/// Process-wide agent session
pub struct Service {
    config: AgentConfig,
    registry: PluginRegistry,
    watcher: PluginWatcher,
    sink: MetricSink<TcpStream>,
}

impl Service {
    /// Set up the agent.
    ///
    /// Starts watching the plugin directory, seeds the registry from its
    /// current contents and connects to the collector. Fails if any of these
    /// cannot be done.
    pub async fn new(config: AgentConfig) -> Result<Self> {
        config.validate()?;
        let api_key = config.resolve_api_key()?;

        let registry = PluginRegistry::new();
        let watcher = PluginWatcher::new(&config.plugin_dir, registry.clone())?;

        for name in crate::plugins::scan(&config.plugin_dir)? {
            registry.insert(name);
        }
        info!(
            "Found {} plugins in {}",
            registry.len(),
            config.plugin_dir.display()
        );

        let sink = MetricSink::connect(&config.address, api_key, config.dial_timeout()).await?;
        info!("Connected to collector at {}", config.address);

        Ok(Self {
            config,
            registry,
            watcher,
            sink,
        })
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Run until a fatal error.
    ///
    /// Fatal errors are a failed write to the collector and, under
    /// `FailurePolicy::Exit`, any failed plugin run.
    pub async fn run(self) -> Result<()> {
        let Self {
            config,
            registry,
            watcher,
            sink,
        } = self;

        let (collector, metrics) = MetricCollector::new(sink, config.channel_capacity);
        let (failures_tx, mut failures_rx) = mpsc::unbounded_channel();

        let scheduler = Scheduler::new(
            registry,
            ScriptRunner::new(&config.plugin_dir),
            metrics,
            failures_tx,
            ScheduleOptions::from(&config),
        );

        let watcher_task = tokio::spawn(watcher.run());
        let scheduler_task = tokio::spawn(scheduler.run());
        let mut collector_task = tokio::spawn(collector.run());

        info!(
            "Agent running (tick every {:?})",
            config.tick_interval()
        );

        let result = tokio::select! {
            res = &mut collector_task => match res {
                Ok(Ok(())) => Err(AgentError::ChannelClosed),
                Ok(Err(e)) => Err(e),
                Err(e) => {
                    error!("Metric collector task failed: {}", e);
                    Err(AgentError::ChannelClosed)
                }
            },
            Some(e) = failures_rx.recv() => Err(e),
        };

        scheduler_task.abort();
        watcher_task.abort();
        collector_task.abort();

        result
    }
}
