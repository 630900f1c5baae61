//! Command dispatch and the virtual command lifecycle
//!
//! Commands addressed to a plugin's own entity forward verbatim. Commands
//! addressed to a virtual entity fan out: the source plugin gets the real
//! command, the caller gets a gateway-issued pending status, and a monitor
//! task correlates the two until the source terminalizes or the poll
//! budget runs out.

use crate::context::GatewayContext;
use crate::error::{GatewayError, Result};
use crate::store::{entity_key, VirtualCommandRecord};
use chrono::Utc;
use serde_json::{json, Value};
use silta_core::{methods, CommandState, CommandStatus};
use std::time::Duration;
use tracing::{debug, info};

/// Pause between monitor polls of the source command
pub const MONITOR_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Poll budget before the monitor gives up (~10 s)
pub const MONITOR_MAX_POLLS: u32 = 100;

impl GatewayContext {
    /// Dispatch a command to an entity
    ///
    /// Returns the status the caller should poll: the plugin's own for a
    /// plugin entity, a fresh pending `vcmd` status for a virtual one.
    pub async fn send_command(
        &self,
        plugin_id: &str,
        device_id: &str,
        entity_id: &str,
        payload: Value,
    ) -> Result<CommandStatus> {
        let key = entity_key(plugin_id, device_id, entity_id);
        let Some(vrec) = self.store().entity(&key) else {
            return self.forward_command(plugin_id, device_id, entity_id, payload).await;
        };

        let action = payload
            .get("type")
            .and_then(Value::as_str)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| GatewayError::BadRequest("payload.type is required".to_string()))?
            .to_string();
        if !vrec.entity.actions.is_empty() && !vrec.entity.actions.iter().any(|a| *a == action) {
            return Err(GatewayError::Forbidden(format!(
                "action \"{action}\" not supported by this virtual entity"
            )));
        }

        let params = json!({
            "device_id": vrec.source_device_id,
            "entity_id": vrec.source_entity_id,
            "payload": payload,
        });
        let resp = self
            .router()
            .call(&vrec.source_plugin_id, methods::COMMANDS_CREATE, params)
            .await;
        if let Some(err) = resp.error {
            return Err(GatewayError::Forbidden(err.message));
        }
        let source_status: CommandStatus =
            serde_json::from_value(resp.result.unwrap_or(Value::Null))
                .map_err(|_| GatewayError::Forbidden("invalid source command status".to_string()))?;

        let now = Utc::now();
        let virtual_command_id = self.ids().next("vcmd");
        let status = CommandStatus {
            command_id: virtual_command_id.clone(),
            plugin_id: plugin_id.to_string(),
            device_id: device_id.to_string(),
            entity_id: entity_id.to_string(),
            entity_type: vrec.entity.domain.clone(),
            state: CommandState::Pending,
            error: None,
            created_at: now,
            last_updated_at: now,
        };
        self.store().begin_command(
            &virtual_command_id,
            VirtualCommandRecord {
                owner_plugin_id: plugin_id.to_string(),
                source_plugin_id: vrec.source_plugin_id.clone(),
                source_command_id: source_status.command_id.clone(),
                virtual_key: key,
                status: status.clone(),
            },
        );
        info!(
            command_id = %virtual_command_id,
            source_command = %source_status.command_id,
            action = %action,
            "Virtual command dispatched"
        );

        let ctx = self.clone();
        let command_id = virtual_command_id;
        tokio::spawn(async move { monitor(ctx, command_id).await });

        Ok(status)
    }

    async fn forward_command(
        &self,
        plugin_id: &str,
        device_id: &str,
        entity_id: &str,
        payload: Value,
    ) -> Result<CommandStatus> {
        let params = json!({
            "device_id": device_id,
            "entity_id": entity_id,
            "payload": payload,
        });
        let resp = self
            .router()
            .call(plugin_id, methods::COMMANDS_CREATE, params)
            .await;
        if let Some(err) = resp.error {
            return Err(GatewayError::Forbidden(err.message));
        }
        serde_json::from_value(resp.result.unwrap_or(Value::Null))
            .map_err(|_| GatewayError::Forbidden("invalid command status".to_string()))
    }

    /// Status of a previously issued command
    ///
    /// Virtual commands are answered from the store without bus traffic,
    /// but only for the plugin that owns them; everything else forwards to
    /// the plugin's `commands/status/get`.
    pub async fn command_status(&self, plugin_id: &str, command_id: &str) -> Result<CommandStatus> {
        if let Some(rec) = self.store().command(command_id) {
            if rec.owner_plugin_id != plugin_id {
                return Err(GatewayError::Forbidden(
                    "command not owned by plugin".to_string(),
                ));
            }
            return Ok(rec.status);
        }
        self.router().command_status(plugin_id, command_id).await
    }
}

/// Poll the source command until it terminalizes or the budget runs out
///
/// Each tick re-reads the local record first: a removed record stops the
/// monitor, an already-terminal one means a correlated event ingest won
/// the race and there is nothing left to do. Source-side poll errors are
/// retried on the next tick.
async fn monitor(ctx: GatewayContext, command_id: String) {
    for _ in 0..MONITOR_MAX_POLLS {
        tokio::time::sleep(MONITOR_POLL_INTERVAL).await;

        let Some(rec) = ctx.store().command(&command_id) else {
            return;
        };
        if rec.status.state.is_terminal() {
            return;
        }

        let source = match ctx
            .router()
            .command_status(&rec.source_plugin_id, &rec.source_command_id)
            .await
        {
            Ok(status) => status,
            Err(e) => {
                debug!(command_id = %command_id, error = %e, "Source status poll failed");
                continue;
            }
        };
        if source.state == CommandState::Pending {
            continue;
        }

        let source_data = if source.state == CommandState::Succeeded {
            match ctx.store().entity(&rec.virtual_key) {
                Some(vent) => ctx
                    .router()
                    .find_entity(
                        &vent.source_plugin_id,
                        &vent.source_device_id,
                        &vent.source_entity_id,
                    )
                    .await
                    .ok()
                    .map(|e| e.data),
                None => None,
            }
        } else {
            None
        };

        ctx.store().finalize_command(
            &command_id,
            source.state,
            source.error.clone(),
            source_data.as_ref(),
        );
        debug!(command_id = %command_id, state = ?source.state, "Virtual command terminalized");
        return;
    }

    ctx.store().finalize_command(
        &command_id,
        CommandState::Failed,
        Some("timeout waiting for source command".to_string()),
        None,
    );
    debug!(command_id = %command_id, "Virtual command timed out");
}
