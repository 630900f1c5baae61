//! Scripted light plugin for black-box gateway tests
//!
//! Speaks the real registry and RPC protocol over a [`Bus`]: announces
//! itself, re-announces on discovery probes, answers `entities/list`,
//! `entities/commands/create`, `commands/status/get`, `devices/list`,
//! `health` and the three search subjects. Tests drive its behavior
//! through [`LightHandle`] - scripting command IDs, flipping command
//! states, editing entity data and publishing entity events.

#![deny(unsafe_code)]

use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use silta_core::rpc::{ERR_METHOD_NOT_FOUND, ERR_UNAVAILABLE};
use silta_core::{
    methods, subjects, Bus, CommandState, CommandStatus, Device, Entity, EntityData,
    EntityEventEnvelope, Manifest, Registration, Request, Response,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Default)]
struct Script {
    devices: Vec<Device>,
    entities: Vec<Entity>,
    commands: HashMap<String, CommandStatus>,
    received: Vec<Value>,
    next_command_id: Option<String>,
    command_seq: u64,
    succeed_after: Option<u32>,
    poll_counts: HashMap<String, u32>,
}

/// A light plugin under test control
pub struct LightPlugin {
    plugin_id: String,
    script: Script,
}

impl LightPlugin {
    /// New plugin with the given registry ID
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            script: Script::default(),
        }
    }

    /// Add a device
    pub fn with_device(mut self, device: Device) -> Self {
        self.script.devices.push(device);
        self
    }

    /// Add an entity
    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.script.entities.push(entity);
        self
    }

    /// Announce on the bus and start answering RPCs
    pub async fn spawn(self, bus: Arc<dyn Bus>) -> LightHandle {
        let plugin_id = self.plugin_id;
        let rpc_subject = subjects::rpc_subject(&plugin_id);
        let script = Arc::new(Mutex::new(self.script));
        let registration = Registration {
            manifest: Manifest {
                id: plugin_id.clone(),
                name: format!("{plugin_id} light plugin"),
                version: "0.1.0".to_string(),
                description: None,
            },
            rpc_subject: rpc_subject.clone(),
        };

        let task = tokio::spawn(run_plugin(
            Arc::clone(&bus),
            rpc_subject,
            registration.clone(),
            Arc::clone(&script),
        ));

        LightHandle {
            bus,
            plugin_id,
            script,
            task,
        }
    }
}

/// Test-side control of a spawned [`LightPlugin`]
pub struct LightHandle {
    bus: Arc<dyn Bus>,
    plugin_id: String,
    script: Arc<Mutex<Script>>,
    task: JoinHandle<()>,
}

impl LightHandle {
    /// The plugin's registry ID
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Raw `entities/commands/create` params seen so far, oldest first
    pub fn received_commands(&self) -> Vec<Value> {
        self.script.lock().received.clone()
    }

    /// Force the ID of the next accepted command
    pub fn set_next_command_id(&self, id: impl Into<String>) {
        self.script.lock().next_command_id = Some(id.into());
    }

    /// Report commands succeeded after they have been polled `n` times
    pub fn succeed_after_polls(&self, n: u32) {
        self.script.lock().succeed_after = Some(n);
    }

    /// Directly set a command's state
    pub fn set_command_state(&self, command_id: &str, state: CommandState, error: Option<String>) {
        let mut script = self.script.lock();
        if let Some(status) = script.commands.get_mut(command_id) {
            status.state = state;
            status.error = error;
            status.last_updated_at = Utc::now();
        }
    }

    /// Edit an entity's data block in place
    pub fn update_entity_data(&self, entity_id: &str, edit: impl FnOnce(&mut EntityData)) {
        let mut script = self.script.lock();
        if let Some(entity) = script.entities.iter_mut().find(|e| e.id == entity_id) {
            edit(&mut entity.data);
        }
    }

    /// Publish an entity event envelope on the global event subject
    pub async fn publish_event(&self, entity_id: &str, event_id: &str, payload: Value) {
        let (device_id, entity_type) = {
            let script = self.script.lock();
            match script.entities.iter().find(|e| e.id == entity_id) {
                Some(e) => (e.device_id.clone(), e.domain.clone()),
                None => (String::new(), String::new()),
            }
        };
        let envelope = EntityEventEnvelope {
            plugin_id: self.plugin_id.clone(),
            device_id,
            entity_id: entity_id.to_string(),
            entity_type,
            event_id: event_id.to_string(),
            payload,
        };
        if let Ok(data) = serde_json::to_vec(&envelope) {
            let _ = self.bus.publish(subjects::ENTITY_EVENTS, Bytes::from(data)).await;
        }
    }
}

impl Drop for LightHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_plugin(
    bus: Arc<dyn Bus>,
    rpc_subject: String,
    registration: Registration,
    script: Arc<Mutex<Script>>,
) {
    let Ok(reg_data) = serde_json::to_vec(&registration) else {
        return;
    };
    let reg_data = Bytes::from(reg_data);

    let Ok(mut rpc_sub) = bus.subscribe(&rpc_subject).await else {
        return;
    };
    let Ok(mut probe_sub) = bus.subscribe(subjects::DISCOVERY_PROBE).await else {
        return;
    };
    let Ok(mut plugin_search) = bus.subscribe(subjects::SEARCH_PLUGINS).await else {
        return;
    };
    let Ok(mut device_search) = bus.subscribe(subjects::SEARCH_DEVICES).await else {
        return;
    };
    let Ok(mut entity_search) = bus.subscribe(subjects::SEARCH_ENTITIES).await else {
        return;
    };

    let _ = bus.publish(subjects::REGISTRATION, reg_data.clone()).await;

    loop {
        tokio::select! {
            msg = rpc_sub.next() => {
                let Some(msg) = msg else { return };
                let Some(reply_to) = msg.reply_to else { continue };
                let resp = answer_rpc(&script, &registration.manifest.id, &msg.payload);
                reply_json(&bus, &reply_to, &resp).await;
            }
            msg = probe_sub.next() => {
                if msg.is_none() { return; }
                let _ = bus.publish(subjects::REGISTRATION, reg_data.clone()).await;
            }
            msg = plugin_search.next() => {
                let Some(msg) = msg else { return };
                if let Some(reply_to) = msg.reply_to {
                    reply_json(&bus, &reply_to, &registration.manifest).await;
                }
            }
            msg = device_search.next() => {
                let Some(msg) = msg else { return };
                if let Some(reply_to) = msg.reply_to {
                    let devices = script.lock().devices.clone();
                    reply_json(&bus, &reply_to, &devices).await;
                }
            }
            msg = entity_search.next() => {
                let Some(msg) = msg else { return };
                if let Some(reply_to) = msg.reply_to {
                    let entities = script.lock().entities.clone();
                    reply_json(&bus, &reply_to, &entities).await;
                }
            }
        }
    }
}

async fn reply_json<T: serde::Serialize>(bus: &Arc<dyn Bus>, subject: &str, value: &T) {
    if let Ok(data) = serde_json::to_vec(value) {
        let _ = bus.publish(subject, Bytes::from(data)).await;
    }
}

fn answer_rpc(script: &Mutex<Script>, plugin_id: &str, payload: &[u8]) -> Response {
    let req: Request = match serde_json::from_slice(payload) {
        Ok(req) => req,
        Err(e) => return Response::error(Value::Null, ERR_UNAVAILABLE, e.to_string()),
    };
    let id = req.id.clone().unwrap_or(Value::Null);

    match req.method.as_str() {
        methods::HEALTH => {
            Response::success(id, json!({"status": "ok", "service": plugin_id}))
        }
        methods::DEVICES_LIST => {
            let devices = script.lock().devices.clone();
            match serde_json::to_value(devices) {
                Ok(result) => Response::success(id, result),
                Err(e) => Response::error(id, ERR_UNAVAILABLE, e.to_string()),
            }
        }
        methods::ENTITIES_LIST => {
            let device_id = req.params.get("device_id").and_then(Value::as_str);
            let entities: Vec<Entity> = script
                .lock()
                .entities
                .iter()
                .filter(|e| device_id.is_none_or(|d| e.device_id == d))
                .cloned()
                .collect();
            match serde_json::to_value(entities) {
                Ok(result) => Response::success(id, result),
                Err(e) => Response::error(id, ERR_UNAVAILABLE, e.to_string()),
            }
        }
        methods::COMMANDS_CREATE => create_command(script, plugin_id, id, &req.params),
        methods::COMMANDS_STATUS => command_status(script, id, &req.params),
        _ => Response::error(id, ERR_METHOD_NOT_FOUND, "method not found"),
    }
}

fn create_command(
    script: &Mutex<Script>,
    plugin_id: &str,
    id: Value,
    params: &Value,
) -> Response {
    let mut script = script.lock();
    script.received.push(params.clone());

    script.command_seq += 1;
    let command_id = script
        .next_command_id
        .take()
        .unwrap_or_else(|| format!("src-{}", script.command_seq));
    let now = Utc::now();
    let status = CommandStatus {
        command_id: command_id.clone(),
        plugin_id: plugin_id.to_string(),
        device_id: params
            .get("device_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        entity_id: params
            .get("entity_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        entity_type: "light".to_string(),
        state: CommandState::Pending,
        error: None,
        created_at: now,
        last_updated_at: now,
    };
    script.commands.insert(command_id.clone(), status.clone());
    script.poll_counts.insert(command_id, 0);

    match serde_json::to_value(status) {
        Ok(result) => Response::success(id, result),
        Err(e) => Response::error(id, ERR_UNAVAILABLE, e.to_string()),
    }
}

fn command_status(script: &Mutex<Script>, id: Value, params: &Value) -> Response {
    let Some(command_id) = params.get("command_id").and_then(Value::as_str) else {
        return Response::error(id, ERR_UNAVAILABLE, "command_id is required");
    };

    let mut script = script.lock();
    let succeed_after = script.succeed_after;
    let polls = {
        let count = script.poll_counts.entry(command_id.to_string()).or_default();
        *count += 1;
        *count
    };
    let Some(status) = script.commands.get_mut(command_id) else {
        return Response::error(id, ERR_UNAVAILABLE, "command not found");
    };
    if status.state == CommandState::Pending {
        if let Some(n) = succeed_after {
            if polls >= n {
                status.state = CommandState::Succeeded;
                status.last_updated_at = Utc::now();
            }
        }
    }
    let status = status.clone();

    match serde_json::to_value(status) {
        Ok(result) => Response::success(id, result),
        Err(e) => Response::error(id, ERR_UNAVAILABLE, e.to_string()),
    }
}
