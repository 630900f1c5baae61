//! End-to-end scenarios over an in-process bus
//!
//! Every test runs a real gateway and real scripted plugins against a
//! shared `MemoryBus`, with the tokio clock paused so monitor polls and
//! probe cadences are deterministic.

use serde_json::json;
use silta_core::{
    subjects, Bus, CommandState, Manifest, MemoryBus, Registration, Subscription, SyncStatus,
};
use silta_e2e::{light_entity, TestEnv};
use silta_gateway::{entity_key, CreateVirtualEntity, GatewayContext, GatewayError};
use silta_test_light::{LightHandle, LightPlugin};
use std::sync::Arc;
use std::time::Duration;

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

async fn drain_count(sub: &mut Subscription) -> usize {
    let mut count = 0;
    while let Ok(Some(_)) = sub.next_timeout(Duration::from_millis(1)).await {
        count += 1;
    }
    count
}

fn virtual_request(id: &str, source_plugin: &str, source_device: &str, source_entity: &str) -> CreateVirtualEntity {
    CreateVirtualEntity {
        id: id.to_string(),
        local_name: String::new(),
        actions: Vec::new(),
        source_plugin_id: source_plugin.to_string(),
        source_device_id: source_device.to_string(),
        source_entity_id: source_entity.to_string(),
        mirror_source: None,
    }
}

/// Gateway, source plugin `p1` with `e1` on `d1`, and virtual `v1` on
/// `p2/d2` mirroring it. The shared setup of scenarios 3, 4 and 5.
async fn env_with_virtual() -> (TestEnv, LightHandle) {
    let env = TestEnv::start().await.unwrap();
    let mut entity = light_entity("e1", "d1", &["turn_on", "set_brightness"]);
    entity.data.desired = json!({"on": false});
    let plugin = env
        .spawn_plugin(LightPlugin::new("p1").with_entity(entity))
        .await;

    env.ctx
        .create_virtual_entity("p2", "d2", virtual_request("v1", "p1", "d1", "e1"))
        .await
        .unwrap();
    (env, plugin)
}

// ---------------------------------------------------------------------------
// Scenario 1: registry liveness
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn registry_liveness_and_probe_cadence() {
    let bus = Arc::new(MemoryBus::new());
    let mut probes = bus.subscribe(subjects::DISCOVERY_PROBE).await.unwrap();

    let data_dir = tempfile::TempDir::new().unwrap();
    let ctx = GatewayContext::new(
        Arc::clone(&bus) as Arc<dyn Bus>,
        data_dir.path(),
        None,
    );
    let handles = ctx.start();

    let reg = Registration {
        manifest: Manifest {
            id: "p1".to_string(),
            name: "P1".to_string(),
            version: "1.0.0".to_string(),
            description: None,
        },
        rpc_subject: "silta.rpc.p1".to_string(),
    };
    bus.publish(
        subjects::REGISTRATION,
        serde_json::to_vec(&reg).unwrap().into(),
    )
    .await
    .unwrap();

    sleep_ms(50).await;
    assert_eq!(
        ctx.registry().rpc_subject("p1").as_deref(),
        Some("silta.rpc.p1")
    );

    // Nothing is published for 4 seconds; at least two probes go out.
    sleep_ms(4000).await;
    assert!(drain_count(&mut probes).await >= 2);

    for handle in handles {
        handle.abort();
    }
}

// ---------------------------------------------------------------------------
// Scenario 2: non-virtual command happy path
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn non_virtual_command_passes_through() {
    let env = TestEnv::start().await.unwrap();
    let plugin = env
        .spawn_plugin(LightPlugin::new("p1").with_entity(light_entity("e", "d", &[])))
        .await;
    plugin.set_next_command_id("c-9");

    let status = env
        .ctx
        .send_command("p1", "d", "e", json!({"type": "turn_on"}))
        .await
        .unwrap();

    assert_eq!(status.command_id, "c-9");
    assert_eq!(status.state, CommandState::Pending);
}

// ---------------------------------------------------------------------------
// Scenario 3: virtual entity creation and dispatch
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn virtual_entity_creation_and_dispatch() {
    let (env, plugin) = env_with_virtual().await;

    let created = env.ctx.store().entity(&entity_key("p2", "d2", "v1")).unwrap();
    assert_eq!(created.entity.domain, "light");
    assert_eq!(created.entity.actions, vec!["turn_on", "set_brightness"]);
    assert_eq!(created.entity.data.desired, json!({"on": false}));
    assert_eq!(created.entity.data.sync_status, SyncStatus::InSync);
    assert!(created.mirror_source);

    plugin.set_next_command_id("src-1");
    let status = env
        .ctx
        .send_command("p2", "d2", "v1", json!({"type": "set_brightness", "value": 50}))
        .await
        .unwrap();

    assert!(status.command_id.starts_with("vcmd-"));
    assert_eq!(status.state, CommandState::Pending);
    assert_eq!(status.plugin_id, "p2");
    assert_eq!(status.entity_id, "v1");

    // The source plugin received the original payload at the source ids.
    let received = plugin.received_commands();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["device_id"], "d1");
    assert_eq!(received[0]["entity_id"], "e1");
    assert_eq!(received[0]["payload"]["type"], "set_brightness");

    let rec = env.ctx.store().entity(&entity_key("p2", "d2", "v1")).unwrap();
    assert_eq!(rec.entity.data.sync_status, SyncStatus::Pending);
    assert_eq!(rec.entity.data.last_command_id, status.command_id);

    let cmd = env.ctx.store().command(&status.command_id).unwrap();
    assert_eq!(cmd.source_command_id, "src-1");
}

// ---------------------------------------------------------------------------
// Scenario 4: monitor terminalizes on source success
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn monitor_terminalizes_on_source_success() {
    let (env, plugin) = env_with_virtual().await;
    plugin.succeed_after_polls(2);

    let status = env
        .ctx
        .send_command("p2", "d2", "v1", json!({"type": "set_brightness", "value": 50}))
        .await
        .unwrap();

    // The state the monitor will copy back once the source succeeds.
    plugin.update_entity_data("e1", |data| {
        data.desired = json!({"on": true, "brightness": 50});
        data.reported = json!({"on": true, "brightness": 50});
        data.effective = json!({"on": true, "brightness": 50});
    });

    sleep_ms(1000).await;

    let polled = env
        .ctx
        .command_status("p2", &status.command_id)
        .await
        .unwrap();
    assert_eq!(polled.state, CommandState::Succeeded);

    let rec = env.ctx.store().entity(&entity_key("p2", "d2", "v1")).unwrap();
    assert_eq!(rec.entity.data.sync_status, SyncStatus::InSync);
    assert_eq!(rec.entity.data.reported, json!({"on": true, "brightness": 50}));
    assert_eq!(rec.entity.data.desired, json!({"on": true, "brightness": 50}));
    assert_eq!(rec.entity.data.last_command_id, status.command_id);
}

// ---------------------------------------------------------------------------
// Scenario 5: correlated event pre-empts the monitor
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn correlated_ingest_preempts_monitor() {
    let (env, _plugin) = env_with_virtual().await;

    let status = env
        .ctx
        .send_command("p2", "d2", "v1", json!({"type": "set_brightness", "value": 50}))
        .await
        .unwrap();

    // Before any poll returns terminal, the device reports back directly.
    let payload = json!({"type": "state", "on": true, "brightness": 50});
    let entity = env
        .ctx
        .ingest_event("p2", "d2", "v1", payload.clone(), Some(&status.command_id))
        .await
        .unwrap();
    assert_eq!(entity.data.reported, payload);
    assert_eq!(entity.data.effective, payload);

    let polled = env
        .ctx
        .command_status("p2", &status.command_id)
        .await
        .unwrap();
    assert_eq!(polled.state, CommandState::Succeeded);

    // The monitor keeps polling a still-pending source; it must observe
    // the terminal local state and leave everything alone.
    sleep_ms(2000).await;

    let polled = env
        .ctx
        .command_status("p2", &status.command_id)
        .await
        .unwrap();
    assert_eq!(polled.state, CommandState::Succeeded);
    let rec = env.ctx.store().entity(&entity_key("p2", "d2", "v1")).unwrap();
    assert_eq!(rec.entity.data.reported, payload);
    assert_eq!(rec.entity.data.sync_status, SyncStatus::InSync);
}

#[tokio::test(start_paused = true)]
async fn monitor_propagates_source_failure() {
    let (env, plugin) = env_with_virtual().await;

    let status = env
        .ctx
        .send_command("p2", "d2", "v1", json!({"type": "turn_on"}))
        .await
        .unwrap();
    let source_command_id = env
        .ctx
        .store()
        .command(&status.command_id)
        .unwrap()
        .source_command_id;

    plugin.set_command_state(
        &source_command_id,
        CommandState::Failed,
        Some("bulb unreachable".to_string()),
    );
    sleep_ms(500).await;

    let polled = env
        .ctx
        .command_status("p2", &status.command_id)
        .await
        .unwrap();
    assert_eq!(polled.state, CommandState::Failed);
    assert_eq!(polled.error.as_deref(), Some("bulb unreachable"));

    let rec = env.ctx.store().entity(&entity_key("p2", "d2", "v1")).unwrap();
    assert_eq!(rec.entity.data.sync_status, SyncStatus::Failed);
}

// ---------------------------------------------------------------------------
// Monitor poll budget
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn monitor_times_out_when_source_never_terminalizes() {
    let (env, _plugin) = env_with_virtual().await;

    let status = env
        .ctx
        .send_command("p2", "d2", "v1", json!({"type": "turn_on"}))
        .await
        .unwrap();

    // 100 polls at 100ms, then the monitor gives up.
    sleep_ms(11_000).await;

    let polled = env
        .ctx
        .command_status("p2", &status.command_id)
        .await
        .unwrap();
    assert_eq!(polled.state, CommandState::Failed);
    assert_eq!(
        polled.error.as_deref(),
        Some("timeout waiting for source command")
    );
    let rec = env.ctx.store().entity(&entity_key("p2", "d2", "v1")).unwrap();
    assert_eq!(rec.entity.data.sync_status, SyncStatus::Failed);
}

// ---------------------------------------------------------------------------
// Event mirroring
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn observed_event_propagates_into_mirror() {
    let (env, plugin) = env_with_virtual().await;

    plugin.update_entity_data("e1", |data| {
        data.reported = json!({"rgb": [255, 0, 0]});
        data.effective = json!({"rgb": [255, 0, 0]});
    });
    plugin
        .publish_event("e1", "evt-7", json!({"type": "set_rgb", "rgb": [255, 0, 0]}))
        .await;
    sleep_ms(100).await;

    let journal = env.ctx.store().journal(None, None, None);
    let names: Vec<&str> = journal.iter().map(|e| e.name.as_str()).collect();
    assert!(names.contains(&"entity.original.lightchange"));
    assert!(names.contains(&"entity.virtual.lightchange"));

    let original = journal
        .iter()
        .find(|e| e.name == "entity.original.lightchange")
        .unwrap();
    assert_eq!(original.plugin_id, "p1");
    assert_eq!(original.event_id, "evt-7");

    let mirrored = journal
        .iter()
        .find(|e| e.name == "entity.virtual.lightchange")
        .unwrap();
    assert_eq!(mirrored.plugin_id, "p2");
    assert!(mirrored.event_id.starts_with("vevt-"));

    let rec = env.ctx.store().entity(&entity_key("p2", "d2", "v1")).unwrap();
    assert_eq!(rec.entity.data.reported, json!({"rgb": [255, 0, 0]}));
    assert_eq!(rec.entity.data.sync_status, SyncStatus::InSync);
    assert!(rec.entity.data.last_event_id.starts_with("vevt-"));
}

#[tokio::test(start_paused = true)]
async fn plain_statechange_events_journal_without_light_suffix() {
    let (env, plugin) = env_with_virtual().await;

    plugin
        .publish_event("e1", "evt-8", json!({"type": "turn_on"}))
        .await;
    sleep_ms(100).await;

    let journal = env.ctx.journal(Some("p1"), None, None);
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].name, "entity.original.statechange");
}

#[tokio::test(start_paused = true)]
async fn forwarded_ingest_surfaces_plugin_errors() {
    let (env, _plugin) = env_with_virtual().await;

    // e1 belongs to p1; the scripted plugin has no ingest handler, so the
    // forwarded call surfaces its method-not-found error.
    let err = env
        .ctx
        .ingest_event("p1", "d1", "e1", json!({"type": "state"}), None)
        .await
        .unwrap_err();
    assert_eq!(err, GatewayError::Forbidden("method not found".to_string()));
}

// ---------------------------------------------------------------------------
// Virtual entity creation boundaries
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn missing_source_leaves_store_unchanged() {
    let env = TestEnv::start().await.unwrap();

    let err = env
        .ctx
        .create_virtual_entity("p2", "d2", virtual_request("v1", "ghost", "d1", "e1"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        GatewayError::Forbidden("source entity not found".to_string())
    );
    assert!(!env.ctx.store().contains_entity(&entity_key("p2", "d2", "v1")));
}

#[tokio::test(start_paused = true)]
async fn duplicate_virtual_entity_conflicts() {
    let (env, _plugin) = env_with_virtual().await;

    let err = env
        .ctx
        .create_virtual_entity("p2", "d2", virtual_request("v1", "p1", "d1", "e1"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        GatewayError::Conflict("virtual entity id already exists".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn empty_required_fields_are_rejected() {
    let env = TestEnv::start().await.unwrap();

    let mut req = virtual_request("v1", "p1", "d1", "e1");
    req.source_entity_id = String::new();
    let err = env.ctx.create_virtual_entity("p2", "d2", req).await.unwrap_err();
    assert!(matches!(err, GatewayError::BadRequest(_)));
}

// ---------------------------------------------------------------------------
// Action scoping
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn unsupported_action_is_forbidden() {
    let (env, _plugin) = env_with_virtual().await;

    let err = env
        .ctx
        .send_command("p2", "d2", "v1", json!({"type": "set_rgb"}))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        GatewayError::Forbidden(
            "action \"set_rgb\" not supported by this virtual entity".to_string()
        )
    );

    let err = env
        .ctx
        .send_command("p2", "d2", "v1", json!({"value": 50}))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        GatewayError::BadRequest("payload.type is required".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn empty_action_list_permits_everything() {
    let env = TestEnv::start().await.unwrap();
    let plugin = env
        .spawn_plugin(LightPlugin::new("p1").with_entity(light_entity("e2", "d1", &[])))
        .await;

    env.ctx
        .create_virtual_entity("p2", "d2", virtual_request("v2", "p1", "d1", "e2"))
        .await
        .unwrap();

    let status = env
        .ctx
        .send_command("p2", "d2", "v2", json!({"type": "definitely_not_listed"}))
        .await
        .unwrap();
    assert_eq!(status.state, CommandState::Pending);
    assert_eq!(plugin.received_commands().len(), 1);
}

// ---------------------------------------------------------------------------
// Command status scoping
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn virtual_status_is_owner_scoped() {
    let (env, _plugin) = env_with_virtual().await;

    let status = env
        .ctx
        .send_command("p2", "d2", "v1", json!({"type": "turn_on"}))
        .await
        .unwrap();

    // The owner reads locally, with no bus traffic.
    let polled = env
        .ctx
        .command_status("p2", &status.command_id)
        .await
        .unwrap();
    assert_eq!(polled.command_id, status.command_id);

    // Anyone else is turned away.
    let err = env
        .ctx
        .command_status("p1", &status.command_id)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        GatewayError::Forbidden("command not owned by plugin".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn unknown_command_forwards_to_plugin() {
    let env = TestEnv::start().await.unwrap();
    let err = env.ctx.command_status("ghost", "nope").await.unwrap_err();
    assert_eq!(
        err,
        GatewayError::Forbidden("plugin not registered".to_string())
    );
}

// ---------------------------------------------------------------------------
// Broadcast search
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn search_collects_from_all_plugins() {
    let env = TestEnv::start().await.unwrap();
    let _p1 = env
        .spawn_plugin(LightPlugin::new("p1").with_entity(light_entity("e1", "d1", &[])))
        .await;
    let _p2 = env
        .spawn_plugin(LightPlugin::new("p2").with_entity(light_entity("e2", "d2", &[])))
        .await;

    let manifests = env.ctx.search_plugins("*").await;
    let mut ids: Vec<&str> = manifests.iter().map(|m| m.id.as_str()).collect();
    ids.sort_unstable();
    // Reply order is arrival order; assert as a multiset.
    assert_eq!(ids, vec!["p1", "p2"]);

    let entities = env.ctx.search_entities(&[]).await;
    let mut entity_ids: Vec<&str> = entities.iter().map(|e| e.id.as_str()).collect();
    entity_ids.sort_unstable();
    assert_eq!(entity_ids, vec!["e1", "e2"]);
}

#[tokio::test(start_paused = true)]
async fn device_search_and_batch_fetch() {
    let env = TestEnv::start().await.unwrap();
    let kitchen = silta_core::Device {
        id: "d1".to_string(),
        local_name: "Kitchen".to_string(),
        labels: [("room".to_string(), "kitchen".to_string())].into(),
    };
    let _p1 = env
        .spawn_plugin(
            LightPlugin::new("p1")
                .with_device(kitchen)
                .with_entity(light_entity("e1", "d1", &[])),
        )
        .await;

    let devices = env.ctx.search_devices("*", &["room:kitchen".to_string()]).await;
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id, "d1");

    // One ref resolves, one misses, one addresses an unregistered plugin.
    let results = env
        .ctx
        .batch_get_devices(&[
            silta_gateway::DeviceRef {
                plugin_id: "p1".to_string(),
                device_id: "d1".to_string(),
            },
            silta_gateway::DeviceRef {
                plugin_id: "p1".to_string(),
                device_id: "d9".to_string(),
            },
            silta_gateway::DeviceRef {
                plugin_id: "ghost".to_string(),
                device_id: "d1".to_string(),
            },
        ])
        .await;
    assert_eq!(results.len(), 3);
    assert!(results[0].ok);
    assert_eq!(results[0].data.as_ref().unwrap()["id"], "d1");
    assert!(!results[1].ok);
    assert_eq!(results[1].error.as_deref(), Some("not found"));
    assert!(!results[2].ok);
    assert_eq!(results[2].error.as_deref(), Some("plugin not registered"));

    let results = env
        .ctx
        .batch_get_entities(&[
            silta_gateway::EntityRef {
                plugin_id: "p1".to_string(),
                device_id: "d1".to_string(),
                entity_id: "e1".to_string(),
            },
            silta_gateway::EntityRef {
                plugin_id: "p1".to_string(),
                device_id: "d1".to_string(),
                entity_id: "e9".to_string(),
            },
        ])
        .await;
    assert!(results[0].ok);
    assert!(!results[1].ok);
}

// ---------------------------------------------------------------------------
// Self-registration and health
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn gateway_answers_its_own_health_probe() {
    let env = TestEnv::start().await.unwrap();
    sleep_ms(50).await;

    // The gateway's own announcement landed in its registry.
    assert!(env.ctx.registry().contains("gateway-test"));
    assert!(env.ctx.list_plugins().contains_key("gateway-test"));

    let health = env.ctx.health(Some("gateway-test")).await.unwrap();
    assert_eq!(health["status"], "perfect");
    assert_eq!(health["service"], "gateway");

    assert_eq!(env.ctx.health(None).await.unwrap()["status"], "ok");

    let err = env.ctx.health(Some("ghost")).await.unwrap_err();
    assert_eq!(err, GatewayError::Forbidden("plugin not found".to_string()));
}

// ---------------------------------------------------------------------------
// Persistence round-trip
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn store_reloads_what_was_persisted() {
    let (env, _plugin) = env_with_virtual().await;
    let status = env
        .ctx
        .send_command("p2", "d2", "v1", json!({"type": "turn_on"}))
        .await
        .unwrap();

    let reloaded = GatewayContext::new(env.bus(), env.data_dir.path(), None);
    let key = entity_key("p2", "d2", "v1");
    assert_eq!(reloaded.store().entity(&key), env.ctx.store().entity(&key));
    assert_eq!(
        reloaded.store().command(&status.command_id),
        env.ctx.store().command(&status.command_id)
    );
}

// ---------------------------------------------------------------------------
// Entity listing
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn list_entities_merges_virtual_entities() {
    let (env, _plugin) = env_with_virtual().await;
    let _owner = env.spawn_plugin(LightPlugin::new("p2")).await;

    let entities = env.ctx.list_entities("p2", "d2").await.unwrap();
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0].id, "v1");

    let entities = env.ctx.list_entities("p1", "d1").await.unwrap();
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0].id, "e1");
}
