//! Process configuration, read from the environment

use crate::error::{GatewayError, Result};
use silta_core::subjects;
use std::env;
use std::path::PathBuf;

/// Host the external API surface binds to
pub const ENV_API_HOST: &str = "SILTA_API_HOST";
/// Port the external API surface binds to (required)
pub const ENV_API_PORT: &str = "SILTA_API_PORT";
/// URL of the message bus (required)
pub const ENV_BUS_URL: &str = "SILTA_BUS_URL";
/// The gateway's own RPC subject (optional)
pub const ENV_RPC_SUBJECT: &str = "SILTA_RPC_SUBJECT";
/// Data directory for the virtual store (required)
pub const ENV_DATA_DIR: &str = "SILTA_DATA_DIR";
/// Path of the runtime descriptor file
pub const ENV_RUNTIME_FILE: &str = "SILTA_RUNTIME_FILE";

const DEFAULT_API_HOST: &str = "127.0.0.1";
const DEFAULT_RUNTIME_FILE: &str = ".build/runtime.json";

/// Gateway process configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host the external API surface binds to
    pub api_host: String,
    /// Port the external API surface binds to
    pub api_port: u16,
    /// URL of the message bus
    pub bus_url: String,
    /// The gateway's own RPC subject; when absent a default gateway ID is
    /// synthesized and self-registration is skipped
    pub rpc_subject: Option<String>,
    /// Data directory for the virtual store
    pub data_dir: PathBuf,
    /// Path of the runtime descriptor file
    pub runtime_file: PathBuf,
}

impl Config {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |name: &str| -> Result<String> {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| GatewayError::Config(format!("{name} is required")))
        };

        let api_port = required(ENV_API_PORT)?;
        let api_port: u16 = api_port
            .parse()
            .map_err(|_| GatewayError::Config(format!("{ENV_API_PORT} is not a valid port")))?;

        Ok(Self {
            api_host: lookup(ENV_API_HOST)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_API_HOST.to_string()),
            api_port,
            bus_url: required(ENV_BUS_URL)?,
            rpc_subject: lookup(ENV_RPC_SUBJECT).filter(|v| !v.is_empty()),
            data_dir: required(ENV_DATA_DIR)?.into(),
            runtime_file: lookup(ENV_RUNTIME_FILE)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_RUNTIME_FILE.to_string())
                .into(),
        })
    }

    /// The gateway's registry ID, derived from its RPC subject by
    /// stripping the RPC prefix; defaults to `"gateway"`
    pub fn gateway_id(&self) -> String {
        derive_gateway_id(self.rpc_subject.as_deref())
    }

    /// Base URL of the external API surface
    pub fn api_base_url(&self) -> String {
        format!("http://{}:{}", self.api_host, self.api_port)
    }
}

/// Derive a gateway ID from an optional RPC subject
pub(crate) fn derive_gateway_id(rpc_subject: Option<&str>) -> String {
    match rpc_subject {
        Some(subject) => {
            let id = subject.strip_prefix(subjects::RPC_PREFIX).unwrap_or(subject);
            if id.is_empty() {
                "gateway".to_string()
            } else {
                id.to_string()
            }
        }
        None => "gateway".to_string(),
    }
}
