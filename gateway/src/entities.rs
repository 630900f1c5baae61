//! Entity and device operations
//!
//! Device and entity CRUD forwards verbatim to the owning plugin; the
//! gateway only adds value for virtual entities, which it owns itself.

use crate::context::GatewayContext;
use crate::error::{GatewayError, Result};
use crate::router::{parse_entities, rpc_result};
use crate::store::{entity_key, VirtualEntityRecord};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use silta_core::{methods, Device, Entity, SyncStatus};
use tracing::info;

/// Request to create a virtual entity
#[derive(Debug, Clone, Deserialize)]
pub struct CreateVirtualEntity {
    /// ID for the virtual entity, unique within the owning device
    pub id: String,
    /// Display name; defaults to the source entity's
    #[serde(default)]
    pub local_name: String,
    /// Subset of actions to expose; defaults to the source entity's
    #[serde(default)]
    pub actions: Vec<String>,
    /// Plugin owning the source entity
    pub source_plugin_id: String,
    /// Device of the source entity
    pub source_device_id: String,
    /// ID of the source entity
    pub source_entity_id: String,
    /// Keep the virtual entity in sync with the source (default true)
    #[serde(default)]
    pub mirror_source: Option<bool>,
}

impl GatewayContext {
    /// Create a virtual entity proxying a source entity
    ///
    /// The owner must not already expose an entity with the same ID
    /// (checked with a real `entities/list` against the owner plugin),
    /// and the composite key must be free in the store. The source entity
    /// must exist; its domain, name, actions and data seed the proxy.
    pub async fn create_virtual_entity(
        &self,
        owner_plugin_id: &str,
        owner_device_id: &str,
        req: CreateVirtualEntity,
    ) -> Result<Entity> {
        if req.id.is_empty()
            || req.source_plugin_id.is_empty()
            || req.source_device_id.is_empty()
            || req.source_entity_id.is_empty()
        {
            return Err(GatewayError::BadRequest(
                "id, source_plugin_id, source_device_id, source_entity_id are required"
                    .to_string(),
            ));
        }

        let key = entity_key(owner_plugin_id, owner_device_id, &req.id);
        if self
            .router()
            .find_entity(owner_plugin_id, owner_device_id, &req.id)
            .await
            .is_ok()
        {
            return Err(GatewayError::Conflict(
                "entity id already exists in plugin".to_string(),
            ));
        }
        if self.store().contains_entity(&key) {
            return Err(GatewayError::Conflict(
                "virtual entity id already exists".to_string(),
            ));
        }

        let source = self
            .router()
            .find_entity(
                &req.source_plugin_id,
                &req.source_device_id,
                &req.source_entity_id,
            )
            .await
            .map_err(|_| GatewayError::Forbidden("source entity not found".to_string()))?;

        let actions = if req.actions.is_empty() {
            source.actions.clone()
        } else {
            req.actions
        };
        let local_name = if req.local_name.is_empty() {
            source.local_name.clone()
        } else {
            req.local_name
        };

        let mut entity = Entity {
            id: req.id,
            device_id: owner_device_id.to_string(),
            domain: source.domain.clone(),
            local_name,
            actions,
            data: source.data,
        };
        entity.data.sync_status = SyncStatus::InSync;
        entity.data.updated_at = Utc::now();

        let record = VirtualEntityRecord {
            owner_plugin_id: owner_plugin_id.to_string(),
            owner_device_id: owner_device_id.to_string(),
            source_plugin_id: req.source_plugin_id,
            source_device_id: req.source_device_id,
            source_entity_id: req.source_entity_id,
            mirror_source: req.mirror_source.unwrap_or(true),
            entity: entity.clone(),
        };
        info!(
            key = %key,
            source_plugin = %record.source_plugin_id,
            mirror = record.mirror_source,
            "Virtual entity created"
        );
        self.store().insert_entity(key, record);
        Ok(entity)
    }

    /// All entities of a device: the plugin's own plus any virtual ones
    pub async fn list_entities(&self, plugin_id: &str, device_id: &str) -> Result<Vec<Entity>> {
        let resp = self
            .router()
            .call(plugin_id, methods::ENTITIES_LIST, json!({"device_id": device_id}))
            .await;
        let mut entities = parse_entities(resp)?;
        entities.extend(self.store().entities_owned_by(plugin_id, device_id));
        Ok(entities)
    }

    /// Create an entity in the owning plugin
    pub async fn create_entity(
        &self,
        plugin_id: &str,
        device_id: &str,
        mut entity: Entity,
    ) -> Result<Value> {
        entity.device_id = device_id.to_string();
        let params = serde_json::to_value(entity)
            .map_err(|e| GatewayError::BadRequest(e.to_string()))?;
        rpc_result(self.router().call(plugin_id, methods::ENTITIES_CREATE, params).await)
    }

    /// Update an entity in the owning plugin
    pub async fn update_entity(
        &self,
        plugin_id: &str,
        device_id: &str,
        mut entity: Entity,
    ) -> Result<Value> {
        entity.device_id = device_id.to_string();
        let params = serde_json::to_value(entity)
            .map_err(|e| GatewayError::BadRequest(e.to_string()))?;
        rpc_result(self.router().call(plugin_id, methods::ENTITIES_UPDATE, params).await)
    }

    /// Delete an entity from the owning plugin
    pub async fn delete_entity(
        &self,
        plugin_id: &str,
        device_id: &str,
        entity_id: &str,
    ) -> Result<Value> {
        let params = json!({"device_id": device_id, "entity_id": entity_id});
        rpc_result(self.router().call(plugin_id, methods::ENTITIES_DELETE, params).await)
    }

    /// List a plugin's devices
    pub async fn list_devices(&self, plugin_id: &str) -> Result<Vec<Device>> {
        let result = rpc_result(
            self.router()
                .call(plugin_id, methods::DEVICES_LIST, Value::Null)
                .await,
        )?;
        serde_json::from_value(result).map_err(|e| GatewayError::Forbidden(e.to_string()))
    }

    /// Create a device in a plugin
    pub async fn create_device(&self, plugin_id: &str, device: Device) -> Result<Value> {
        let params = serde_json::to_value(device)
            .map_err(|e| GatewayError::BadRequest(e.to_string()))?;
        rpc_result(self.router().call(plugin_id, methods::DEVICES_CREATE, params).await)
    }

    /// Update a device in a plugin
    pub async fn update_device(&self, plugin_id: &str, device: Device) -> Result<Value> {
        let params = serde_json::to_value(device)
            .map_err(|e| GatewayError::BadRequest(e.to_string()))?;
        rpc_result(self.router().call(plugin_id, methods::DEVICES_UPDATE, params).await)
    }

    /// Delete a device from a plugin
    pub async fn delete_device(&self, plugin_id: &str, device_id: &str) -> Result<Value> {
        rpc_result(
            self.router()
                .call(plugin_id, methods::DEVICES_DELETE, json!(device_id))
                .await,
        )
    }
}
