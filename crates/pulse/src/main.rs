//! Pulse Agent
//!
//! Runs plugin scripts on a fixed interval and streams their metrics to a
//! remote collector.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use pulse::config::ConfigOverrides;
use pulse::{AgentConfig, Service};

/// Pulse metrics agent
#[derive(Parser, Debug)]
#[command(name = "pulse")]
#[command(about = "Plugin-driven metrics agent", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "pulse.toml")]
    config: PathBuf,

    #[command(flatten)]
    overrides: ConfigOverrides,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = AgentConfig::load(Some(args.config.as_path()), &args.overrides)
        .context("Failed to load configuration")?;

    init_tracing(&config).context("Failed to initialize logging")?;

    info!("Starting pulse agent v{}", env!("CARGO_PKG_VERSION"));
    info!("Plugin directory: {}", config.plugin_dir.display());

    let service = Service::new(config)
        .await
        .context("Failed to start agent")?;

    info!("Registered plugins: {:?}", service.registry().snapshot());

    if let Err(e) = service.run().await {
        error!("Agent stopped: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Initialize tracing; `RUST_LOG` takes precedence over the configured level
fn init_tracing(config: &AgentConfig) -> pulse::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => config.log_filter()?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    Ok(())
}
