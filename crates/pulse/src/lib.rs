//! Pulse - plugin-driven metrics agent
//!
//! This crate provides:
//! - Plugin discovery from a watched directory
//! - A fixed-period scheduler running every plugin concurrently
//! - A single collector streaming metric lines to a remote TCP endpoint

pub mod config;
pub mod error;
pub mod message;

// Plugin registry and directory watcher
pub mod plugins;

// Plugin execution
pub mod runner;
pub mod scheduler;

// Outbound metric stream
pub mod sink;

pub mod service;

pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use message::Message;
pub use service::Service;
