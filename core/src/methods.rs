//! RPC method names understood by plugins and the gateway
//!
//! Methods are path-like strings inside the JSON-RPC envelope. Every
//! plugin answers the subset relevant to what it owns; unknown methods
//! get the standard `-32601` error.

/// Health probe; the gateway itself answers this on its own RPC subject
pub const HEALTH: &str = "health";

/// List devices owned by a plugin
pub const DEVICES_LIST: &str = "devices/list";
/// Create a device
pub const DEVICES_CREATE: &str = "devices/create";
/// Update a device
pub const DEVICES_UPDATE: &str = "devices/update";
/// Delete a device
pub const DEVICES_DELETE: &str = "devices/delete";

/// List entities of a device (`{device_id}` param)
pub const ENTITIES_LIST: &str = "entities/list";
/// Create an entity
pub const ENTITIES_CREATE: &str = "entities/create";
/// Update an entity
pub const ENTITIES_UPDATE: &str = "entities/update";
/// Delete an entity
pub const ENTITIES_DELETE: &str = "entities/delete";

/// Dispatch a command to an entity
pub const COMMANDS_CREATE: &str = "entities/commands/create";
/// Poll the status of a previously dispatched command
pub const COMMANDS_STATUS: &str = "commands/status/get";

/// Report a state-change event for an entity
pub const EVENTS_INGEST: &str = "entities/events/ingest";

/// Domain names and actions the gateway inspects
///
/// Full domain descriptors live with the plugins; the gateway only needs
/// the strings its event classifier looks at.
pub mod domain {
    /// The light domain
    pub const LIGHT: &str = "light";
    /// Colour-change action, classified as a light change event
    pub const ACTION_SET_RGB: &str = "set_rgb";
}
