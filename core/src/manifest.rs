//! Plugin manifests and registry announcements

use serde::{Deserialize, Serialize};

/// Static description a plugin publishes about itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Unique plugin ID, the registry key
    pub id: String,
    /// Human-readable plugin name
    pub name: String,
    /// Plugin version string
    pub version: String,
    /// Optional free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A registry announcement published on the registration subject
///
/// Plugins publish one on startup and re-publish whenever they observe a
/// discovery probe. The gateway keys its registry by `manifest.id`;
/// re-announcing an identical registration leaves the registry unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// The plugin's manifest
    pub manifest: Manifest,
    /// Bus subject the plugin answers JSON-RPC requests on
    pub rpc_subject: String,
}
