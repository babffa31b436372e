#![allow(dead_code)]

use hestia::backend::ScriptedBackend;
use hestia::config::HestiaConfig;
use hestia::dispatcher::Dispatcher;
use hestia::registry::memory::{MemoryRegistry, RegistrySnapshot};
use serde_json::json;
use std::sync::Arc;

pub const TURN_OFF_KITCHEN_LIGHT: &str = r#"{"action": "command", "area": "kitchen", "script_id": "script.turn_off_kitchen_light", "comment": "Kitchen light is off.", "scheduleTimeStamp": null}"#;

pub const LOCK_XYZ: &str =
    r#"{"action": "command", "script_id": "script.xyz", "comment": "Locked the xyz."}"#;

pub const LOCK_FRONT_DOOR: &str = r#"{"action": "command", "area": "hallway", "script_id": "script.lock_front_door", "comment": "Front door locked."}"#;

pub const SET_KITCHEN_LIGHT: &str = r#"{"action": "set", "entities": ["light.kitchen"], "set_value": "off", "comment": "Done."}"#;

pub const QUERY_KITCHEN_LIGHT: &str = r#"{"action": "query", "entities": ["light.kitchen"]}"#;

pub fn home() -> Arc<MemoryRegistry> {
    let snapshot: RegistrySnapshot = serde_json::from_value(json!({
        "areas": [
            {"id": "kitchen", "name": "Kitchen"},
            {"id": "hallway", "name": "Hallway"}
        ],
        "entities": [
            {"entity_id": "light.kitchen", "name": "Kitchen Light", "area": "kitchen", "state": "on",
             "attributes": {"brightness": 70}},
            {"entity_id": "lock.front_door", "name": "Front Door", "area": "hallway", "state": "unlocked"}
        ],
        "scripts": [
            {"entity_id": "script.turn_off_kitchen_light", "name": "Turn off kitchen light", "area": "kitchen"},
            {"entity_id": "script.lock_front_door", "name": "Lock front door", "area": "hallway"}
        ]
    }))
    .unwrap();
    Arc::new(MemoryRegistry::new(snapshot))
}

/// Dispatcher with separate scripted backends for classification and actions.
pub struct Harness {
    pub dispatcher: Dispatcher,
    pub classifier: Arc<ScriptedBackend>,
    pub backend: Arc<ScriptedBackend>,
    pub registry: Arc<MemoryRegistry>,
}

pub fn harness(
    config: &HestiaConfig,
    classifier: ScriptedBackend,
    backend: ScriptedBackend,
) -> Harness {
    let classifier = Arc::new(classifier);
    let backend = Arc::new(backend);
    let registry = home();
    let dispatcher = Dispatcher::new(config, backend.clone(), registry.clone())
        .with_classifier_backend(classifier.clone());
    Harness {
        dispatcher,
        classifier,
        backend,
        registry,
    }
}
