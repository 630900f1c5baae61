//! Event ingestion and mirror propagation
//!
//! One subscription on the global entity-event subject journals every
//! observed envelope and propagates source state into mirroring virtual
//! entities. Mirrors are selected under the shared lock, the source is
//! re-read over the bus lock-free, and the write-back re-validates each
//! mirror's source triple under the exclusive lock (the store's job).

use crate::context::GatewayContext;
use crate::error::{GatewayError, Result};
use crate::router::rpc_result;
use crate::store::{entity_key, ObservedEvent};
use chrono::Utc;
use serde_json::{json, Value};
use silta_core::methods::domain;
use silta_core::{methods, subjects, Entity, EntityEventEnvelope};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Classify an observed event into its journal name
///
/// Prefix `entity.virtual` or `entity.original`; suffix `.lightchange`
/// for a light's `set_rgb` payload, `.statechange` for everything else
/// (including payloads that are not objects at all).
pub fn classify_event_name(entity_type: &str, payload: &Value, is_virtual: bool) -> String {
    let prefix = if is_virtual {
        "entity.virtual"
    } else {
        "entity.original"
    };
    if entity_type == domain::LIGHT
        && payload.get("type").and_then(Value::as_str) == Some(domain::ACTION_SET_RGB)
    {
        return format!("{prefix}.lightchange");
    }
    format!("{prefix}.statechange")
}

/// Journal and mirror every envelope on the entity-event subject
///
/// Envelopes are processed in arrival order; malformed payloads and bus
/// hiccups are swallowed so the subscription never unwinds.
pub(crate) fn spawn_event_subscriber(ctx: GatewayContext) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sub = match ctx.bus().subscribe(subjects::ENTITY_EVENTS).await {
            Ok(sub) => sub,
            Err(e) => {
                warn!(error = %e, "Event subscriber failed to subscribe");
                return;
            }
        };
        while let Some(msg) = sub.next().await {
            match serde_json::from_slice::<EntityEventEnvelope>(&msg.payload) {
                Ok(env) => ctx.handle_entity_event(env).await,
                Err(e) => trace!(error = %e, "Ignoring malformed event envelope"),
            }
        }
    })
}

impl GatewayContext {
    /// Journal one envelope and propagate it into matching mirrors
    pub(crate) async fn handle_entity_event(&self, env: EntityEventEnvelope) {
        self.store().append_observed(ObservedEvent {
            name: classify_event_name(&env.entity_type, &env.payload, false),
            plugin_id: env.plugin_id.clone(),
            device_id: env.device_id.clone(),
            entity_id: env.entity_id.clone(),
            event_id: env.event_id.clone(),
            created_at: Utc::now(),
        });

        let mirrors = self
            .store()
            .mirror_keys(&env.plugin_id, &env.device_id, &env.entity_id);
        if mirrors.is_empty() {
            return;
        }

        // One source read serves every mirror of this triple.
        let source = match self
            .router()
            .find_entity(&env.plugin_id, &env.device_id, &env.entity_id)
            .await
        {
            Ok(entity) => entity,
            Err(e) => {
                debug!(
                    plugin_id = %env.plugin_id,
                    entity_id = %env.entity_id,
                    error = %e,
                    "Source re-read failed, mirrors left untouched"
                );
                return;
            }
        };

        let virtual_name = classify_event_name(&env.entity_type, &env.payload, true);
        for key in mirrors {
            let event_id = self.ids().next("vevt");
            self.store().apply_mirror_update(
                &key,
                (&env.plugin_id, &env.device_id, &env.entity_id),
                &source.data,
                event_id,
                virtual_name.clone(),
            );
        }
    }

    /// Synchronously ingest a state-change event for an entity
    ///
    /// Virtual targets are updated in place: reported and effective take
    /// the payload, and a correlation ID naming a known virtual command
    /// marks that command succeeded. Events for plugin entities forward to
    /// the owner's `entities/events/ingest`.
    pub async fn ingest_event(
        &self,
        plugin_id: &str,
        device_id: &str,
        entity_id: &str,
        payload: Value,
        correlation_id: Option<&str>,
    ) -> Result<Entity> {
        let key = entity_key(plugin_id, device_id, entity_id);
        if let Some(vrec) = self.store().entity(&key) {
            let name = classify_event_name(&vrec.entity.domain, &payload, true);
            let event_id = self.ids().next("vevt");
            return self
                .store()
                .ingest_virtual_event(&key, &payload, event_id, name, correlation_id)
                .ok_or_else(|| GatewayError::NotFound("virtual entity not found".to_string()));
        }

        let params = json!({
            "device_id": device_id,
            "entity_id": entity_id,
            "payload": payload,
            "correlation_id": correlation_id.unwrap_or(""),
        });
        let result = rpc_result(self.router().call(plugin_id, methods::EVENTS_INGEST, params).await)?;
        serde_json::from_value(result).map_err(|e| GatewayError::Forbidden(e.to_string()))
    }
}
