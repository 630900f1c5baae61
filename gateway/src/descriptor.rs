//! Runtime descriptor
//!
//! Written once at startup so tooling alongside the process can find the
//! API endpoint and bus without parsing the environment. Write failures
//! are logged and ignored; the descriptor is a convenience, not a
//! precondition.

use crate::config::Config;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use tracing::warn;

/// Startup metadata of a running gateway process
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeDescriptor {
    /// Base URL of the external API surface
    pub api_base_url: String,
    /// Host the API surface binds to
    pub api_host: String,
    /// Port the API surface binds to
    pub api_port: u16,
    /// URL of the message bus
    #[serde(rename = "nats_url")]
    pub bus_url: String,
    /// This gateway's registry ID
    pub gateway_id: String,
    /// Process start time, UTC
    pub started_at: DateTime<Utc>,
    /// Process ID
    pub pid: u32,
}

impl RuntimeDescriptor {
    /// Describe the current process under the given configuration
    pub fn for_process(config: &Config) -> Self {
        Self {
            api_base_url: config.api_base_url(),
            api_host: config.api_host.clone(),
            api_port: config.api_port,
            bus_url: config.bus_url.clone(),
            gateway_id: config.gateway_id(),
            started_at: Utc::now(),
            pid: std::process::id(),
        }
    }

    /// Write the descriptor to the configured path, creating parent dirs
    pub fn write(&self, config: &Config) {
        let path = &config.runtime_file;
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!(path = %path.display(), error = %e, "Failed to create runtime dir");
                return;
            }
        }
        match serde_json::to_vec_pretty(self) {
            Ok(data) => {
                if let Err(e) = fs::write(path, data) {
                    warn!(path = %path.display(), error = %e, "Failed to write runtime descriptor");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode runtime descriptor"),
        }
    }
}
