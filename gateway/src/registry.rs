//! Plugin registry
//!
//! In-memory mapping from plugin ID to its registration, maintained from
//! announcements on the registration subject. Entries are overwritten on
//! re-announcement and never explicitly deleted; liveness is recovered by
//! the periodic discovery probe soliciting re-announcements.

use parking_lot::RwLock;
use silta_core::Registration;
use std::collections::HashMap;
use tracing::debug;

/// Thread-safe registry of announced plugins, keyed by manifest ID
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, Registration>>,
}

impl PluginRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an announcement, overwriting any previous entry
    pub fn announce(&self, reg: Registration) {
        debug!(
            plugin_id = %reg.manifest.id,
            subject = %reg.rpc_subject,
            "Plugin announced"
        );
        self.plugins.write().insert(reg.manifest.id.clone(), reg);
    }

    /// Look up the RPC subject for a plugin ID
    pub fn rpc_subject(&self, plugin_id: &str) -> Option<String> {
        self.plugins
            .read()
            .get(plugin_id)
            .map(|reg| reg.rpc_subject.clone())
    }

    /// Look up a full registration
    pub fn get(&self, plugin_id: &str) -> Option<Registration> {
        self.plugins.read().get(plugin_id).cloned()
    }

    /// Whether a plugin is currently registered
    pub fn contains(&self, plugin_id: &str) -> bool {
        self.plugins.read().contains_key(plugin_id)
    }

    /// Copy of the full registry, keyed by plugin ID
    pub fn snapshot(&self) -> HashMap<String, Registration> {
        self.plugins.read().clone()
    }

    /// Number of registered plugins
    pub fn len(&self) -> usize {
        self.plugins.read().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.plugins.read().is_empty()
    }
}
