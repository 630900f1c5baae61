//! Gateway context
//!
//! All shared state lives here and is carried through the call graph:
//! the bus handle, the plugin registry, the RPC router, the virtual store
//! and the ID generator. The context is cheap to clone (one `Arc` bump),
//! which is how the command monitors and subscription tasks hold onto it.

use crate::discovery;
use crate::error::{GatewayError, Result};
use crate::events;
use crate::ids::IdGenerator;
use crate::registry::PluginRegistry;
use crate::router::RpcRouter;
use crate::store::VirtualStore;
use serde_json::Value;
use silta_core::{methods, Bus, Registration};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

struct Inner {
    bus: Arc<dyn Bus>,
    registry: Arc<PluginRegistry>,
    router: RpcRouter,
    store: VirtualStore,
    ids: IdGenerator,
    gateway_id: String,
    rpc_subject: Option<String>,
}

/// Shared state and operations of one gateway process
#[derive(Clone)]
pub struct GatewayContext {
    inner: Arc<Inner>,
}

impl GatewayContext {
    /// Build a context over a bus connection and a store data directory
    ///
    /// When `rpc_subject` is set the gateway participates in the registry
    /// protocol itself (see [`GatewayContext::start`]); its registry ID is
    /// derived from the subject by stripping the RPC prefix.
    pub fn new(
        bus: Arc<dyn Bus>,
        data_dir: impl Into<PathBuf>,
        rpc_subject: Option<String>,
    ) -> Self {
        let registry = Arc::new(PluginRegistry::new());
        let router = RpcRouter::new(Arc::clone(&bus), Arc::clone(&registry));
        let gateway_id = crate::config::derive_gateway_id(rpc_subject.as_deref());
        Self {
            inner: Arc::new(Inner {
                bus,
                registry,
                router,
                store: VirtualStore::load(data_dir),
                ids: IdGenerator::new(),
                gateway_id,
                rpc_subject,
            }),
        }
    }

    /// Spawn the long-lived background tasks
    ///
    /// Registry listener, entity-event subscriber, discovery probe and -
    /// when an RPC subject is configured - the self-registration responder.
    /// The handles are returned so the caller can abort them on shutdown;
    /// the tasks carry no other cancellation.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let mut handles = vec![
            discovery::spawn_registry_listener(self.clone()),
            events::spawn_event_subscriber(self.clone()),
            discovery::spawn_discovery_probe(self.clone()),
        ];
        if let Some(handle) = discovery::spawn_self_registration(self.clone()) {
            handles.push(handle);
        }
        handles
    }

    /// The bus connection
    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.inner.bus
    }

    /// The plugin registry
    pub fn registry(&self) -> &PluginRegistry {
        &self.inner.registry
    }

    /// The RPC router
    pub fn router(&self) -> &RpcRouter {
        &self.inner.router
    }

    /// The virtual store
    pub fn store(&self) -> &VirtualStore {
        &self.inner.store
    }

    pub(crate) fn ids(&self) -> &IdGenerator {
        &self.inner.ids
    }

    /// This gateway's registry ID
    pub fn gateway_id(&self) -> &str {
        &self.inner.gateway_id
    }

    pub(crate) fn rpc_subject(&self) -> Option<&str> {
        self.inner.rpc_subject.as_deref()
    }

    /// Gateway health, or a specific plugin's health when an ID is given
    pub async fn health(&self, plugin_id: Option<&str>) -> Result<Value> {
        let Some(plugin_id) = plugin_id else {
            return Ok(serde_json::json!({"status": "ok"}));
        };
        if !self.registry().contains(plugin_id) {
            return Err(GatewayError::Forbidden("plugin not found".to_string()));
        }
        let resp = self.router().call(plugin_id, methods::HEALTH, Value::Null).await;
        if let Some(err) = resp.error {
            return Err(GatewayError::Unavailable(err.message));
        }
        Ok(resp.result.unwrap_or(Value::Null))
    }

    /// All currently registered plugins, keyed by plugin ID
    pub fn list_plugins(&self) -> HashMap<String, Registration> {
        self.registry().snapshot()
    }

    /// Recent observed events, optionally filtered, oldest first
    pub fn journal(
        &self,
        plugin_id: Option<&str>,
        device_id: Option<&str>,
        entity_id: Option<&str>,
    ) -> Vec<crate::store::ObservedEvent> {
        self.store().journal(plugin_id, device_id, entity_id)
    }
}
