//! Plugin Scheduler
//!
//! Fires once per tick and starts one run per registered plugin. Runs are
//! spawned, never awaited, so a slow plugin cannot hold up the others.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::config::{AgentConfig, FailurePolicy, OverlapPolicy};
use crate::error::AgentError;
use crate::message::Message;
use crate::plugins::PluginRegistry;
use crate::runner::ScriptRunner;

/// Scheduling knobs
#[derive(Debug, Clone)]
pub struct ScheduleOptions {
    pub tick_interval: Duration,
    pub overlap: OverlapPolicy,
    pub failure_policy: FailurePolicy,
    /// Limit on concurrent runs across all plugins, `None` for unbounded
    pub max_in_flight: Option<usize>,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            overlap: OverlapPolicy::Allow,
            failure_policy: FailurePolicy::Exit,
            max_in_flight: Some(64),
        }
    }
}

impl From<&AgentConfig> for ScheduleOptions {
    fn from(config: &AgentConfig) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            overlap: config.overlap,
            failure_policy: config.failure_policy,
            max_in_flight: (config.max_in_flight > 0).then_some(config.max_in_flight),
        }
    }
}

/// Periodic plugin scheduler
pub struct Scheduler {
    registry: PluginRegistry,
    runner: Arc<ScriptRunner>,
    metrics: mpsc::Sender<Message>,
    /// Fatal run errors, reported when the failure policy is `Exit`
    failures: mpsc::UnboundedSender<AgentError>,
    options: ScheduleOptions,
    permits: Option<Arc<Semaphore>>,
    running: Arc<Mutex<HashSet<String>>>,
}

impl Scheduler {
    pub fn new(
        registry: PluginRegistry,
        runner: ScriptRunner,
        metrics: mpsc::Sender<Message>,
        failures: mpsc::UnboundedSender<AgentError>,
        options: ScheduleOptions,
    ) -> Self {
        let permits = options.max_in_flight.map(|n| Arc::new(Semaphore::new(n)));
        Self {
            registry,
            runner: Arc::new(runner),
            metrics,
            failures,
            options,
            permits,
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Tick forever
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.options.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.tick();
        }
    }

    /// Start a run for every registered plugin, returning how many started
    pub fn tick(&self) -> usize {
        let plugins = self.registry.snapshot();
        debug!(
            plugins = plugins.len(),
            at = %chrono::Utc::now().to_rfc3339(),
            "Tick"
        );

        let mut started = 0;
        for plugin in &plugins {
            if self.dispatch(plugin) {
                started += 1;
            }
        }
        started
    }

    /// Number of plugins with a run in progress (tracked under `OverlapPolicy::Skip`)
    pub fn running(&self) -> usize {
        self.running.lock().len()
    }

    fn dispatch(&self, plugin: &str) -> bool {
        let guard = match self.options.overlap {
            OverlapPolicy::Allow => None,
            OverlapPolicy::Skip => {
                if !self.running.lock().insert(plugin.to_string()) {
                    debug!(plugin = %plugin, "Previous run still in progress, skipping");
                    return false;
                }
                Some(RunningGuard {
                    running: self.running.clone(),
                    plugin: plugin.to_string(),
                })
            }
        };

        let permit = match &self.permits {
            Some(permits) => match permits.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    warn!(plugin = %plugin, "Too many plugin runs in flight, skipping");
                    return false;
                }
            },
            None => None,
        };

        let plugin = plugin.to_string();
        let runner = self.runner.clone();
        let registry = self.registry.clone();
        let metrics = self.metrics.clone();
        let failures = self.failures.clone();
        let failure_policy = self.options.failure_policy;

        tokio::spawn(async move {
            let _guard = guard;
            let _permit = permit;

            match runner.run(&plugin).await {
                Ok(message) => {
                    registry.record_success(&plugin);
                    if metrics.send(message).await.is_err() {
                        debug!(plugin = %plugin, "Metric collector gone, dropping metric");
                    }
                }
                Err(e) => match failure_policy {
                    FailurePolicy::Exit => {
                        let _ = failures.send(e);
                    }
                    FailurePolicy::Skip => {
                        let count = registry.record_failure(&plugin).unwrap_or_default();
                        warn!(plugin = %plugin, failures = count, error = %e, "Plugin run failed");
                    }
                },
            }
        });

        true
    }
}

/// Clears a plugin's in-progress mark when its run ends
struct RunningGuard {
    running: Arc<Mutex<HashSet<String>>>,
    plugin: String,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running.lock().remove(&self.plugin);
    }
}
