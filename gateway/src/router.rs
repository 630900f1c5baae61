//! RPC router
//!
//! Stateless request routing: look up the target plugin's RPC subject in
//! the registry and perform a JSON-RPC request/reply over the bus with a
//! bounded timeout. Failures come back as structured `-32000` errors, so
//! callers always receive a [`Response`] and decide how to surface it.

use crate::error::{GatewayError, Result};
use crate::registry::PluginRegistry;
use bytes::Bytes;
use serde_json::{json, Value};
use silta_core::rpc::ERR_UNAVAILABLE;
use silta_core::{methods, Bus, CommandStatus, Entity, Request, Response};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Reply deadline for a single plugin RPC
pub const RPC_TIMEOUT: Duration = Duration::from_millis(2000);

/// Routes JSON-RPC calls to registered plugins
///
/// Purely synchronous per call; concurrency between callers is serviced
/// by the bus transport.
pub struct RpcRouter {
    bus: Arc<dyn Bus>,
    registry: Arc<PluginRegistry>,
}

impl RpcRouter {
    /// Create a router over the given bus and registry
    pub fn new(bus: Arc<dyn Bus>, registry: Arc<PluginRegistry>) -> Self {
        Self { bus, registry }
    }

    /// Send `method(params)` to a plugin and wait for its reply
    ///
    /// Registry misses and bus timeouts come back as error responses with
    /// code `-32000`; a plugin-reported error is returned as-is.
    pub async fn call(&self, plugin_id: &str, method: &str, params: Value) -> Response {
        let Some(subject) = self.registry.rpc_subject(plugin_id) else {
            return Response::error(Value::Null, ERR_UNAVAILABLE, "plugin not registered");
        };

        let req = Request::new(json!(1), method, params);
        let data = match serde_json::to_vec(&req) {
            Ok(data) => data,
            Err(e) => {
                return Response::error(Value::Null, ERR_UNAVAILABLE, e.to_string());
            }
        };

        debug!(plugin_id = %plugin_id, method = %method, subject = %subject, "Routing RPC");
        match self.bus.request(&subject, Bytes::from(data), RPC_TIMEOUT).await {
            Ok(payload) => serde_json::from_slice(&payload).unwrap_or_else(|_| {
                Response::error(Value::Null, ERR_UNAVAILABLE, "invalid response from plugin")
            }),
            Err(_) => Response::error(Value::Null, ERR_UNAVAILABLE, "plugin timeout"),
        }
    }

    /// Look up one entity of a device via the plugin's `entities/list`
    pub async fn find_entity(
        &self,
        plugin_id: &str,
        device_id: &str,
        entity_id: &str,
    ) -> Result<Entity> {
        let resp = self
            .call(plugin_id, methods::ENTITIES_LIST, json!({"device_id": device_id}))
            .await;
        parse_entities(resp)?
            .into_iter()
            .find(|e| e.id == entity_id)
            .ok_or_else(|| GatewayError::NotFound("entity not found".to_string()))
    }

    /// Poll a plugin for the status of one of its commands
    pub async fn command_status(
        &self,
        plugin_id: &str,
        command_id: &str,
    ) -> Result<CommandStatus> {
        let resp = self
            .call(
                plugin_id,
                methods::COMMANDS_STATUS,
                json!({"command_id": command_id}),
            )
            .await;
        serde_json::from_value(rpc_result(resp)?)
            .map_err(|e| GatewayError::Forbidden(e.to_string()))
    }
}

/// Unwrap a response into its result, mapping plugin errors to Forbidden
pub(crate) fn rpc_result(resp: Response) -> Result<Value> {
    if let Some(err) = resp.error {
        return Err(GatewayError::Forbidden(err.message));
    }
    Ok(resp.result.unwrap_or(Value::Null))
}

/// Decode an `entities/list` response
pub(crate) fn parse_entities(resp: Response) -> Result<Vec<Entity>> {
    serde_json::from_value(rpc_result(resp)?).map_err(|e| GatewayError::Forbidden(e.to_string()))
}
