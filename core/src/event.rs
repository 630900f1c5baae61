//! Entity event envelopes published on the global event subject

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope for a state-change event published by a plugin
///
/// One global subject carries every plugin's events; the gateway journals
/// each envelope and propagates state to any virtual mirrors of the
/// `(plugin_id, device_id, entity_id)` triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEventEnvelope {
    /// Plugin that owns the entity
    pub plugin_id: String,
    /// Device the entity belongs to
    pub device_id: String,
    /// Entity the event concerns
    pub entity_id: String,
    /// The entity's domain (`light`, `switch`, ...)
    #[serde(default)]
    pub entity_type: String,
    /// Plugin-issued event ID
    pub event_id: String,
    /// Opaque domain payload
    #[serde(default)]
    pub payload: Value,
}
