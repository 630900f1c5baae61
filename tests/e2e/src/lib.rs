//! Black-box test environment for the gateway
//!
//! Wires a real [`GatewayContext`] to an in-process bus and a throwaway
//! data directory. Scripted plugins from `silta-test-light` join the same
//! bus and speak the real registry and RPC protocol.

use silta_core::{Bus, Entity, EntityData, MemoryBus};
use silta_gateway::GatewayContext;
use silta_test_light::{LightHandle, LightPlugin};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// One gateway over one in-process bus
pub struct TestEnv {
    /// The shared bus
    pub bus: Arc<MemoryBus>,
    /// The gateway under test
    pub ctx: GatewayContext,
    /// Data directory backing the virtual store
    pub data_dir: TempDir,
    handles: Vec<JoinHandle<()>>,
}

impl TestEnv {
    /// Start a gateway with self-registration as `gateway-test`
    pub async fn start() -> anyhow::Result<Self> {
        let bus = Arc::new(MemoryBus::new());
        let data_dir = TempDir::new()?;
        let ctx = GatewayContext::new(
            Arc::clone(&bus) as Arc<dyn Bus>,
            data_dir.path(),
            Some("silta.rpc.gateway-test".to_string()),
        );
        let handles = ctx.start();
        Ok(Self {
            bus,
            ctx,
            data_dir,
            handles,
        })
    }

    /// The bus as a trait object, for spawning plugins
    pub fn bus(&self) -> Arc<dyn Bus> {
        Arc::clone(&self.bus) as Arc<dyn Bus>
    }

    /// Spawn a scripted plugin on the shared bus and give its
    /// announcement time to land in the registry
    pub async fn spawn_plugin(&self, plugin: LightPlugin) -> LightHandle {
        let handle = plugin.spawn(self.bus()).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        handle
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// A light entity fixture with the given actions
pub fn light_entity(id: &str, device_id: &str, actions: &[&str]) -> Entity {
    Entity {
        id: id.to_string(),
        device_id: device_id.to_string(),
        domain: "light".to_string(),
        local_name: format!("{id} light"),
        actions: actions.iter().map(|a| a.to_string()).collect(),
        data: EntityData::default(),
    }
}
