//! Well-known bus subjects
//!
//! The bus is the only inter-process channel between the gateway and
//! plugins. Subjects are flat strings; there is no wildcard matching.

/// Carrier of [`Registration`](crate::Registration) announcements,
/// inbound from plugins and outbound for the gateway's self-registration
pub const REGISTRATION: &str = "silta.registration";

/// Discovery probe, published by the gateway every 2 seconds; plugins
/// reply by re-publishing their registration
pub const DISCOVERY_PROBE: &str = "silta.discovery.probe";

/// Global topic for [`EntityEventEnvelope`](crate::EntityEventEnvelope)
pub const ENTITY_EVENTS: &str = "silta.entity.events";

/// Broadcast plugin search; replies carry one `Manifest` each
pub const SEARCH_PLUGINS: &str = "silta.search.plugins";

/// Broadcast device search; replies carry a `Device` array each
pub const SEARCH_DEVICES: &str = "silta.search.devices";

/// Broadcast entity search; replies carry an `Entity` array each
pub const SEARCH_ENTITIES: &str = "silta.search.entities";

/// Prefix of per-plugin RPC subjects
pub const RPC_PREFIX: &str = "silta.rpc.";

/// The conventional RPC subject for a plugin ID
pub fn rpc_subject(plugin_id: &str) -> String {
    format!("{RPC_PREFIX}{plugin_id}")
}
