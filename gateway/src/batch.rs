//! Batch device and entity operations
//!
//! Fetches group their refs so each plugin (or device) is listed once;
//! mutations go out one RPC per item. Every input ref produces exactly
//! one positional [`BatchResult`], failures included - a batch call never
//! fails as a whole because one plugin is down.

use crate::context::GatewayContext;
use crate::router::{parse_entities, rpc_result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use silta_core::{methods, Device, Entity};
use std::collections::{HashMap, HashSet};

/// Reference to one device of one plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRef {
    /// Owning plugin
    pub plugin_id: String,
    /// Device ID
    pub device_id: String,
}

/// Reference to one entity of one device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRef {
    /// Owning plugin
    pub plugin_id: String,
    /// Owning device
    pub device_id: String,
    /// Entity ID
    pub entity_id: String,
}

/// A device to create or update in a plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceItem {
    /// Target plugin
    pub plugin_id: String,
    /// The device payload
    pub device: Device,
}

/// An entity to create or update in a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityItem {
    /// Target plugin
    pub plugin_id: String,
    /// Target device
    pub device_id: String,
    /// The entity payload
    pub entity: Entity,
}

/// Outcome of one item in a batch call, positionally matched to the input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    /// Plugin the item addressed
    pub plugin_id: String,
    /// Device the item addressed
    pub device_id: String,
    /// Entity the item addressed, for entity batches
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub entity_id: String,
    /// Whether the item succeeded
    pub ok: bool,
    /// Result payload on success, when the operation returns one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error message on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchResult {
    fn for_device(plugin_id: &str, device_id: &str) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            device_id: device_id.to_string(),
            entity_id: String::new(),
            ok: false,
            data: None,
            error: None,
        }
    }

    fn for_entity(plugin_id: &str, device_id: &str, entity_id: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            ..Self::for_device(plugin_id, device_id)
        }
    }

    fn succeed(mut self, data: Option<Value>) -> Self {
        self.ok = true;
        self.data = data;
        self
    }

    fn fail(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

impl GatewayContext {
    /// Fetch devices by ref, one `devices/list` per distinct plugin
    pub async fn batch_get_devices(&self, refs: &[DeviceRef]) -> Vec<BatchResult> {
        let by_plugin: HashSet<&str> = refs.iter().map(|r| r.plugin_id.as_str()).collect();

        let mut index: HashMap<(String, String), Device> = HashMap::new();
        let mut plugin_errors: HashMap<String, String> = HashMap::new();
        for plugin_id in by_plugin {
            match self.list_devices(plugin_id).await {
                Ok(devices) => {
                    for d in devices {
                        index.insert((plugin_id.to_string(), d.id.clone()), d);
                    }
                }
                Err(e) => {
                    plugin_errors.insert(plugin_id.to_string(), e.to_string());
                }
            }
        }

        refs.iter()
            .map(|r| {
                let result = BatchResult::for_device(&r.plugin_id, &r.device_id);
                if let Some(err) = plugin_errors.get(&r.plugin_id) {
                    return result.fail(err.clone());
                }
                match index.get(&(r.plugin_id.clone(), r.device_id.clone())) {
                    Some(device) => result.succeed(serde_json::to_value(device).ok()),
                    None => result.fail("not found"),
                }
            })
            .collect()
    }

    /// Create devices across plugins, one RPC per item
    pub async fn batch_create_devices(&self, items: &[DeviceItem]) -> Vec<BatchResult> {
        self.device_mutation(items, methods::DEVICES_CREATE).await
    }

    /// Update devices across plugins, one RPC per item
    pub async fn batch_update_devices(&self, items: &[DeviceItem]) -> Vec<BatchResult> {
        self.device_mutation(items, methods::DEVICES_UPDATE).await
    }

    /// Delete devices across plugins, one RPC per ref
    pub async fn batch_delete_devices(&self, refs: &[DeviceRef]) -> Vec<BatchResult> {
        let mut results = Vec::with_capacity(refs.len());
        for r in refs {
            let result = BatchResult::for_device(&r.plugin_id, &r.device_id);
            let resp = self
                .router()
                .call(&r.plugin_id, methods::DEVICES_DELETE, json!(r.device_id))
                .await;
            results.push(match rpc_result(resp) {
                Ok(_) => result.succeed(None),
                Err(e) => result.fail(e.to_string()),
            });
        }
        results
    }

    async fn device_mutation(&self, items: &[DeviceItem], method: &str) -> Vec<BatchResult> {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let result = BatchResult::for_device(&item.plugin_id, &item.device.id);
            let params = match serde_json::to_value(&item.device) {
                Ok(params) => params,
                Err(e) => {
                    results.push(result.fail(e.to_string()));
                    continue;
                }
            };
            let resp = self.router().call(&item.plugin_id, method, params).await;
            results.push(match rpc_result(resp) {
                Ok(data) => result.succeed(Some(data)),
                Err(e) => result.fail(e.to_string()),
            });
        }
        results
    }

    /// Fetch entities by ref, one `entities/list` per distinct device
    pub async fn batch_get_entities(&self, refs: &[EntityRef]) -> Vec<BatchResult> {
        let by_device: HashSet<(&str, &str)> = refs
            .iter()
            .map(|r| (r.plugin_id.as_str(), r.device_id.as_str()))
            .collect();

        let mut index: HashMap<(String, String, String), Entity> = HashMap::new();
        let mut device_errors: HashMap<(String, String), String> = HashMap::new();
        for (plugin_id, device_id) in by_device {
            let resp = self
                .router()
                .call(plugin_id, methods::ENTITIES_LIST, json!({"device_id": device_id}))
                .await;
            match parse_entities(resp) {
                Ok(entities) => {
                    for e in entities {
                        index.insert(
                            (plugin_id.to_string(), device_id.to_string(), e.id.clone()),
                            e,
                        );
                    }
                }
                Err(e) => {
                    device_errors
                        .insert((plugin_id.to_string(), device_id.to_string()), e.to_string());
                }
            }
        }

        refs.iter()
            .map(|r| {
                let result = BatchResult::for_entity(&r.plugin_id, &r.device_id, &r.entity_id);
                if let Some(err) =
                    device_errors.get(&(r.plugin_id.clone(), r.device_id.clone()))
                {
                    return result.fail(err.clone());
                }
                let key = (r.plugin_id.clone(), r.device_id.clone(), r.entity_id.clone());
                match index.get(&key) {
                    Some(entity) => result.succeed(serde_json::to_value(entity).ok()),
                    None => result.fail("not found"),
                }
            })
            .collect()
    }

    /// Create entities across plugins, one RPC per item
    pub async fn batch_create_entities(&self, items: &[EntityItem]) -> Vec<BatchResult> {
        self.entity_mutation(items, methods::ENTITIES_CREATE).await
    }

    /// Update entities across plugins, one RPC per item
    pub async fn batch_update_entities(&self, items: &[EntityItem]) -> Vec<BatchResult> {
        self.entity_mutation(items, methods::ENTITIES_UPDATE).await
    }

    /// Delete entities across plugins, one RPC per ref
    pub async fn batch_delete_entities(&self, refs: &[EntityRef]) -> Vec<BatchResult> {
        let mut results = Vec::with_capacity(refs.len());
        for r in refs {
            let result = BatchResult::for_entity(&r.plugin_id, &r.device_id, &r.entity_id);
            let params = json!({"device_id": r.device_id, "entity_id": r.entity_id});
            let resp = self
                .router()
                .call(&r.plugin_id, methods::ENTITIES_DELETE, params)
                .await;
            results.push(match rpc_result(resp) {
                Ok(_) => result.succeed(None),
                Err(e) => result.fail(e.to_string()),
            });
        }
        results
    }

    async fn entity_mutation(&self, items: &[EntityItem], method: &str) -> Vec<BatchResult> {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let mut entity = item.entity.clone();
            entity.device_id = item.device_id.clone();
            let result = BatchResult::for_entity(&item.plugin_id, &item.device_id, &entity.id);
            let params = match serde_json::to_value(&entity) {
                Ok(params) => params,
                Err(e) => {
                    results.push(result.fail(e.to_string()));
                    continue;
                }
            };
            let resp = self.router().call(&item.plugin_id, method, params).await;
            results.push(match rpc_result(resp) {
                Ok(data) => result.succeed(Some(data)),
                Err(e) => result.fail(e.to_string()),
            });
        }
        results
    }
}
