//! Devices and entities - the units plugins expose for control

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A logical grouping of entities owned by a plugin
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Device {
    /// Device ID, unique within the owning plugin
    pub id: String,
    /// Display name
    #[serde(default)]
    pub local_name: String,
    /// Free-form labels used by search filters (`room:kitchen`)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

/// Synchronisation state of an entity's data with its source of truth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// The last command or mirror update succeeded
    InSync,
    /// A command is outstanding
    Pending,
    /// The last attempt terminated with an error
    Failed,
}

impl Default for SyncStatus {
    fn default() -> Self {
        SyncStatus::InSync
    }
}

/// The mutable state block of an entity
///
/// `desired`, `reported` and `effective` are opaque domain payloads; the
/// gateway copies them around without interpreting their contents.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityData {
    /// State the caller asked for
    #[serde(default)]
    pub desired: Value,
    /// State the device last reported
    #[serde(default)]
    pub reported: Value,
    /// State currently in effect
    #[serde(default)]
    pub effective: Value,
    /// Whether the entity is in sync with its source of truth
    #[serde(default)]
    pub sync_status: SyncStatus,
    /// ID of the last command applied to this entity
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_command_id: String,
    /// ID of the last event observed for this entity
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_event_id: String,
    /// Last mutation time, never decreasing for a given entity
    #[serde(default = "epoch")]
    pub updated_at: DateTime<Utc>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// A single controllable or observable unit belonging to a domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Entity ID, unique within the owning device
    pub id: String,
    /// Owning device ID
    pub device_id: String,
    /// Schema family the entity belongs to (`light`, `switch`, ...)
    pub domain: String,
    /// Display name
    #[serde(default)]
    pub local_name: String,
    /// Actions the entity accepts; empty means unrestricted
    #[serde(default)]
    pub actions: Vec<String>,
    /// Mutable state block
    #[serde(default)]
    pub data: EntityData,
}
