//! Virtual store
//!
//! Three containers behind one reader/writer lock: the virtual entity map,
//! the outstanding virtual command map, and a bounded journal of observed
//! events. Every mutation happens under the exclusive lock and is followed
//! by a write-out of all three JSON files. Filesystem errors on persist are
//! logged and ignored; correct in-memory state outranks a failed write.
//!
//! Guards are never held across `.await`: callers snapshot what they need
//! under the shared lock, do their bus work lock-free, and re-validate
//! under the exclusive lock before writing back (see the triple re-check in
//! [`VirtualStore::apply_mirror_update`] and the terminal-state re-check in
//! [`VirtualStore::finalize_command`]).

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use silta_core::{CommandState, CommandStatus, Entity, EntityData, SyncStatus};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const ENTITIES_FILE: &str = "virtual_entities.json";
const COMMANDS_FILE: &str = "virtual_commands.json";
const JOURNAL_FILE: &str = "event_journal.json";

/// Journal retention: on overflow the oldest entries are discarded
const JOURNAL_CAP: usize = 5000;

/// Composite key of a virtual entity within the store
pub fn entity_key(plugin_id: &str, device_id: &str, entity_id: &str) -> String {
    format!("{plugin_id}|{device_id}|{entity_id}")
}

/// A gateway-owned entity proxying a source entity of some plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualEntityRecord {
    /// Plugin that owns the virtual entity
    pub owner_plugin_id: String,
    /// Device the virtual entity lives under
    pub owner_device_id: String,
    /// Plugin owning the mirrored source entity
    pub source_plugin_id: String,
    /// Device of the source entity
    pub source_device_id: String,
    /// ID of the source entity
    pub source_entity_id: String,
    /// Whether observed source events are propagated into the mirror
    pub mirror_source: bool,
    /// The proxy entity itself
    pub entity: Entity,
}

/// A locally-issued virtual command correlated with a source command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualCommandRecord {
    /// Plugin that owns the virtual entity the command targets
    pub owner_plugin_id: String,
    /// Plugin the source command was dispatched to
    pub source_plugin_id: String,
    /// The source plugin's command ID
    pub source_command_id: String,
    /// Composite key of the owning virtual entity
    pub virtual_key: String,
    /// Local status reported to clients
    pub status: CommandStatus,
}

/// One journaled state-change observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedEvent {
    /// Classified event name, e.g. `entity.original.statechange`
    pub name: String,
    /// Plugin the event concerns
    pub plugin_id: String,
    /// Device the event concerns
    pub device_id: String,
    /// Entity the event concerns
    pub entity_id: String,
    /// Event ID, plugin-issued or gateway-issued
    pub event_id: String,
    /// When the gateway observed the event
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct StoreState {
    entities: HashMap<String, VirtualEntityRecord>,
    commands: HashMap<String, VirtualCommandRecord>,
    events: Vec<ObservedEvent>,
}

/// Persistent store for virtual entities, commands and the event journal
pub struct VirtualStore {
    state: RwLock<StoreState>,
    data_dir: PathBuf,
}

impl VirtualStore {
    /// Load the store from its data directory
    ///
    /// Missing or malformed files yield empty containers; loading never
    /// fails.
    pub fn load(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        if let Err(e) = fs::create_dir_all(&data_dir) {
            warn!(dir = %data_dir.display(), error = %e, "Failed to create data directory");
        }

        let state = StoreState {
            entities: read_json(&data_dir.join(ENTITIES_FILE)).unwrap_or_default(),
            commands: read_json(&data_dir.join(COMMANDS_FILE)).unwrap_or_default(),
            events: read_json(&data_dir.join(JOURNAL_FILE)).unwrap_or_default(),
        };
        debug!(
            entities = state.entities.len(),
            commands = state.commands.len(),
            events = state.events.len(),
            "Virtual store loaded"
        );

        Self {
            state: RwLock::new(state),
            data_dir,
        }
    }

    // ------------------------------------------------------------------
    // Read side (shared lock)
    // ------------------------------------------------------------------

    /// Look up a virtual entity record by composite key
    pub fn entity(&self, key: &str) -> Option<VirtualEntityRecord> {
        self.state.read().entities.get(key).cloned()
    }

    /// Whether a virtual entity exists at the composite key
    pub fn contains_entity(&self, key: &str) -> bool {
        self.state.read().entities.contains_key(key)
    }

    /// Look up a virtual command record
    pub fn command(&self, command_id: &str) -> Option<VirtualCommandRecord> {
        self.state.read().commands.get(command_id).cloned()
    }

    /// Entities owned by a given plugin and device
    pub fn entities_owned_by(&self, plugin_id: &str, device_id: &str) -> Vec<Entity> {
        self.state
            .read()
            .entities
            .values()
            .filter(|rec| rec.owner_plugin_id == plugin_id && rec.owner_device_id == device_id)
            .map(|rec| rec.entity.clone())
            .collect()
    }

    /// Composite keys of mirroring entities whose source triple matches
    pub fn mirror_keys(&self, plugin_id: &str, device_id: &str, entity_id: &str) -> Vec<String> {
        self.state
            .read()
            .entities
            .iter()
            .filter(|(_, rec)| {
                rec.mirror_source
                    && rec.source_plugin_id == plugin_id
                    && rec.source_device_id == device_id
                    && rec.source_entity_id == entity_id
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Journal entries, optionally filtered, oldest first
    pub fn journal(
        &self,
        plugin_id: Option<&str>,
        device_id: Option<&str>,
        entity_id: Option<&str>,
    ) -> Vec<ObservedEvent> {
        self.state
            .read()
            .events
            .iter()
            .filter(|evt| {
                plugin_id.is_none_or(|p| evt.plugin_id == p)
                    && device_id.is_none_or(|d| evt.device_id == d)
                    && entity_id.is_none_or(|e| evt.entity_id == e)
            })
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------
    // Write side (exclusive lock + persist)
    // ------------------------------------------------------------------

    /// Insert a freshly created virtual entity
    pub fn insert_entity(&self, key: String, rec: VirtualEntityRecord) {
        let mut state = self.state.write();
        state.entities.insert(key, rec);
        self.persist(&state);
    }

    /// Record a dispatched virtual command and mark its entity pending
    pub fn begin_command(&self, command_id: &str, rec: VirtualCommandRecord) {
        let mut state = self.state.write();
        let key = rec.virtual_key.clone();
        state.commands.insert(command_id.to_string(), rec);
        if let Some(vent) = state.entities.get_mut(&key) {
            vent.entity.data.last_command_id = command_id.to_string();
            vent.entity.data.sync_status = SyncStatus::Pending;
            vent.entity.data.updated_at = Utc::now();
        }
        self.persist(&state);
    }

    /// Terminalize a virtual command and update its owning entity
    ///
    /// `source_data` carries the source entity's state block when the
    /// command succeeded and a fresh read was available; its
    /// desired/reported/effective are copied into the mirror. Returns
    /// `false` without touching anything if the command is gone or already
    /// terminal - a correlated event ingest that lands first wins.
    pub fn finalize_command(
        &self,
        command_id: &str,
        state_to: CommandState,
        error: Option<String>,
        source_data: Option<&EntityData>,
    ) -> bool {
        let mut state = self.state.write();
        let Some(rec) = state.commands.get_mut(command_id) else {
            return false;
        };
        if rec.status.state.is_terminal() {
            return false;
        }
        rec.status.state = state_to;
        rec.status.error = error;
        rec.status.last_updated_at = Utc::now();
        let key = rec.virtual_key.clone();

        if let Some(vent) = state.entities.get_mut(&key) {
            if state_to == CommandState::Succeeded {
                if let Some(src) = source_data {
                    vent.entity.data.desired = src.desired.clone();
                    vent.entity.data.reported = src.reported.clone();
                    vent.entity.data.effective = src.effective.clone();
                }
                vent.entity.data.sync_status = SyncStatus::InSync;
            } else {
                vent.entity.data.sync_status = SyncStatus::Failed;
            }
            vent.entity.data.last_command_id = command_id.to_string();
            vent.entity.data.updated_at = Utc::now();
        }
        self.persist(&state);
        true
    }

    /// Append an observed event to the journal
    pub fn append_observed(&self, evt: ObservedEvent) {
        let mut state = self.state.write();
        append_event_locked(&mut state, evt);
        self.persist(&state);
    }

    /// Propagate a freshly read source state block into one mirror
    ///
    /// Re-checks under the exclusive lock that the record still exists,
    /// still mirrors, and still points at the same source triple - the
    /// snapshot that selected it was taken before the lock-free source
    /// read. Journals the virtual event and persists on success.
    pub fn apply_mirror_update(
        &self,
        key: &str,
        source: (&str, &str, &str),
        data: &EntityData,
        event_id: String,
        event_name: String,
    ) -> bool {
        let mut state = self.state.write();
        let Some(rec) = state.entities.get_mut(key) else {
            return false;
        };
        let (plugin_id, device_id, entity_id) = source;
        if !rec.mirror_source
            || rec.source_plugin_id != plugin_id
            || rec.source_device_id != device_id
            || rec.source_entity_id != entity_id
        {
            return false;
        }
        rec.entity.data.desired = data.desired.clone();
        rec.entity.data.reported = data.reported.clone();
        rec.entity.data.effective = data.effective.clone();
        rec.entity.data.sync_status = SyncStatus::InSync;
        rec.entity.data.last_event_id = event_id.clone();
        rec.entity.data.updated_at = Utc::now();

        let evt = ObservedEvent {
            name: event_name,
            plugin_id: rec.owner_plugin_id.clone(),
            device_id: rec.owner_device_id.clone(),
            entity_id: rec.entity.id.clone(),
            event_id,
            created_at: Utc::now(),
        };
        append_event_locked(&mut state, evt);
        self.persist(&state);
        true
    }

    /// Apply a synchronously ingested event to a virtual entity
    ///
    /// Updates reported/effective from the payload, journals the event,
    /// and - when a correlation ID names a known virtual command that is
    /// still pending - marks that command succeeded. Returns the updated
    /// entity, or `None` if the key vanished.
    pub fn ingest_virtual_event(
        &self,
        key: &str,
        payload: &Value,
        event_id: String,
        event_name: String,
        correlation_id: Option<&str>,
    ) -> Option<Entity> {
        let mut state = self.state.write();
        let rec = state.entities.get_mut(key)?;
        rec.entity.data.reported = payload.clone();
        rec.entity.data.effective = payload.clone();
        rec.entity.data.sync_status = SyncStatus::InSync;
        rec.entity.data.last_event_id = event_id.clone();
        if let Some(correlation_id) = correlation_id {
            rec.entity.data.last_command_id = correlation_id.to_string();
        }
        rec.entity.data.updated_at = Utc::now();

        let evt = ObservedEvent {
            name: event_name,
            plugin_id: rec.owner_plugin_id.clone(),
            device_id: rec.owner_device_id.clone(),
            entity_id: rec.entity.id.clone(),
            event_id,
            created_at: Utc::now(),
        };
        let entity = rec.entity.clone();

        if let Some(correlation_id) = correlation_id {
            if let Some(cmd) = state.commands.get_mut(correlation_id) {
                if !cmd.status.state.is_terminal() {
                    cmd.status.state = CommandState::Succeeded;
                    cmd.status.last_updated_at = Utc::now();
                }
            }
        }
        append_event_locked(&mut state, evt);
        self.persist(&state);
        Some(entity)
    }

    fn persist(&self, state: &StoreState) {
        write_json(&self.data_dir.join(ENTITIES_FILE), &state.entities);
        write_json(&self.data_dir.join(COMMANDS_FILE), &state.commands);
        write_json(&self.data_dir.join(JOURNAL_FILE), &state.events);
    }
}

fn append_event_locked(state: &mut StoreState, evt: ObservedEvent) {
    state.events.push(evt);
    if state.events.len() > JOURNAL_CAP {
        let excess = state.events.len() - JOURNAL_CAP;
        state.events.drain(..excess);
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
    let data = fs::read(path).ok()?;
    match serde_json::from_slice(&data) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(file = %path.display(), error = %e, "Ignoring malformed store file");
            None
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) {
    let data = match serde_json::to_vec_pretty(value) {
        Ok(data) => data,
        Err(e) => {
            warn!(file = %path.display(), error = %e, "Failed to encode store file");
            return;
        }
    };
    if let Err(e) = fs::write(path, data) {
        warn!(file = %path.display(), error = %e, "Failed to persist store file");
    }
}
