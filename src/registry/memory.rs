//! In-memory registry backed by a JSON snapshot of the home.

use anyhow::Context;
use async_trait::async_trait;
use minijinja::Environment;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use super::{Area, EntityState, Registry, ScriptInfo, TemplateContext};
use crate::error::{DispatchError, RegistryError, RenderError};
use crate::payload::{EntityRef, ScriptRef};

/// Live-state template used when the configuration does not supply one.
pub const DEFAULT_LIVE_STATE_TEMPLATE: &str = r#"Areas in the home:
{%- for area in areas %}
  - "{{ area.name }}" (id: {{ area.id }})
{%- endfor %}

Scripts in the home:
{%- for script in scripts %}
  - {{ script.entity_id }}: "{{ script.name }}"{% if script.area_name %} belongs to "{{ script.area_name }}"{% endif %}
{%- endfor %}

Entities in the home:
{%- for entity in entities %}
  - {{ entity.entity_id }}: "{{ entity.name }}" is {{ entity.state }}{% if entity.area_name %} in "{{ entity.area_name }}"{% endif %}
{%- if entity.attributes %} ({% for key, value in entity.attributes|items %}{{ key }}={{ value }}{% if not loop.last %}, {% endif %}{% endfor %}){% endif %}
{%- endfor %}
"#;

/// Serialisable inventory of a home.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// Rooms and zones
    #[serde(default)]
    pub areas: Vec<Area>,
    /// Devices and sensors
    #[serde(default)]
    pub entities: Vec<EntityState>,
    /// Runnable scripts
    #[serde(default)]
    pub scripts: Vec<ScriptInfo>,
}

impl RegistrySnapshot {
    fn area_name(&self, area_id: Option<&str>) -> Option<String> {
        let area_id = area_id?;
        self.areas
            .iter()
            .find(|area| area.id == area_id)
            .map(|area| area.name.clone())
            .or_else(|| Some(area_id.to_string()))
    }
}

/// Registry that answers from a snapshot and records invocations.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    snapshot: RwLock<RegistrySnapshot>,
    invocations: Mutex<Vec<ScriptRef>>,
    rejection: Mutex<Option<String>>,
}

impl MemoryRegistry {
    /// Create a registry over the given snapshot.
    pub fn new(snapshot: RegistrySnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
            invocations: Mutex::new(Vec::new()),
            rejection: Mutex::new(None),
        }
    }

    /// Load a snapshot from a JSON file.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read registry snapshot: {:?}", path))?;
        let snapshot: RegistrySnapshot = serde_json::from_slice(&data)
            .with_context(|| format!("Failed to parse registry snapshot: {:?}", path))?;
        Ok(Self::new(snapshot))
    }

    /// Copy of the current snapshot
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.snapshot.read().clone()
    }

    /// Update an entity's state, adding the entity if it is new.
    pub fn upsert_entity(&self, entity: EntityState) {
        let mut snapshot = self.snapshot.write();
        match snapshot
            .entities
            .iter_mut()
            .find(|existing| existing.entity_id == entity.entity_id)
        {
            Some(existing) => *existing = entity,
            None => snapshot.entities.push(entity),
        }
    }

    /// Scripts invoked so far, oldest first
    pub fn invocations(&self) -> Vec<ScriptRef> {
        self.invocations.lock().clone()
    }

    /// Make every subsequent invocation fail with `reason` (or succeed again with `None`).
    pub fn reject_invocations(&self, reason: Option<String>) {
        *self.rejection.lock() = reason;
    }
}

#[derive(Serialize)]
struct LiveStateView<'a> {
    ha_name: &'a str,
    location: &'a str,
    areas: &'a [Area],
    scripts: Vec<ScriptRow<'a>>,
    entities: Vec<EntityRow<'a>>,
}

#[derive(Serialize)]
struct ScriptRow<'a> {
    entity_id: &'a str,
    name: &'a str,
    area_name: Option<String>,
}

#[derive(Serialize)]
struct EntityRow<'a> {
    entity_id: &'a str,
    name: &'a str,
    state: &'a str,
    area_name: Option<String>,
    attributes: &'a Map<String, Value>,
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn resolve_entity(
        &self,
        entity: &EntityRef,
    ) -> Result<Option<EntityState>, RegistryError> {
        let id = entity.id();
        Ok(self
            .snapshot
            .read()
            .entities
            .iter()
            .find(|candidate| candidate.entity_id == id)
            .cloned())
    }

    async fn resolve_script(
        &self,
        script: &ScriptRef,
    ) -> Result<Option<ScriptInfo>, RegistryError> {
        let id = script.id();
        Ok(self
            .snapshot
            .read()
            .scripts
            .iter()
            .find(|candidate| candidate.entity_id == id)
            .cloned())
    }

    async fn resolve_area(&self, area: &str) -> Result<Option<Area>, RegistryError> {
        let wanted = area.trim();
        let slug = wanted.to_ascii_lowercase().replace(' ', "_");
        Ok(self
            .snapshot
            .read()
            .areas
            .iter()
            .find(|candidate| {
                candidate.id == slug || candidate.name.eq_ignore_ascii_case(wanted)
            })
            .cloned())
    }

    async fn invoke_script(&self, script: &ScriptRef) -> Result<(), DispatchError> {
        if let Some(reason) = self.rejection.lock().clone() {
            return Err(DispatchError::Rejected {
                target: script.id(),
                detail: reason,
            });
        }

        let known = self
            .snapshot
            .read()
            .scripts
            .iter()
            .any(|candidate| candidate.entity_id == script.id());
        if !known {
            return Err(DispatchError::Rejected {
                target: script.id(),
                detail: "unknown script".into(),
            });
        }

        tracing::info!(script = %script, "script invoked");
        self.invocations.lock().push(script.clone());
        Ok(())
    }

    async fn render_live_state(
        &self,
        template: Option<&str>,
        context: &TemplateContext,
    ) -> Result<String, RenderError> {
        let snapshot = self.snapshot.read().clone();
        let view = LiveStateView {
            ha_name: &context.ha_name,
            location: &context.location,
            areas: &snapshot.areas,
            scripts: snapshot
                .scripts
                .iter()
                .map(|script| ScriptRow {
                    entity_id: &script.entity_id,
                    name: &script.name,
                    area_name: snapshot.area_name(script.area.as_deref()),
                })
                .collect(),
            entities: snapshot
                .entities
                .iter()
                .map(|entity| EntityRow {
                    entity_id: &entity.entity_id,
                    name: &entity.name,
                    state: &entity.state,
                    area_name: snapshot.area_name(entity.area.as_deref()),
                    attributes: &entity.attributes,
                })
                .collect(),
        };

        let env = Environment::new();
        env.render_str(template.unwrap_or(DEFAULT_LIVE_STATE_TEMPLATE), view)
            .map_err(RenderError::new)
    }

    fn registry_name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn home() -> MemoryRegistry {
        let snapshot: RegistrySnapshot = serde_json::from_value(json!({
            "areas": [{"id": "kitchen", "name": "Kitchen"}, {"id": "living_room", "name": "Living Room"}],
            "entities": [{
                "entity_id": "light.kitchen",
                "name": "Kitchen Light",
                "area": "kitchen",
                "state": "on",
                "attributes": {"brightness": 80}
            }],
            "scripts": [{"entity_id": "script.movie_time", "name": "Movie Time", "area": "living_room"}]
        }))
        .unwrap();
        MemoryRegistry::new(snapshot)
    }

    fn context() -> TemplateContext {
        TemplateContext {
            ha_name: "Home".into(),
            location: "US".into(),
        }
    }

    #[tokio::test]
    async fn resolves_known_references_only() {
        let registry = home();
        let light = EntityRef::parse("light.kitchen").unwrap();
        let missing = EntityRef::parse("light.attic").unwrap();

        assert!(registry.resolve_entity(&light).await.unwrap().is_some());
        assert!(registry.resolve_entity(&missing).await.unwrap().is_none());
        assert!(
            registry
                .resolve_script(&ScriptRef::parse("movie_time").unwrap())
                .await
                .unwrap()
                .is_some()
        );
        assert_eq!(
            registry.resolve_area("living room").await.unwrap().unwrap().id,
            "living_room"
        );
    }

    #[tokio::test]
    async fn default_template_lists_inventory() {
        let rendered = home().render_live_state(None, &context()).await.unwrap();

        assert!(rendered.contains("\"Living Room\" (id: living_room)"));
        assert!(rendered.contains("script.movie_time: \"Movie Time\" belongs to \"Living Room\""));
        assert!(
            rendered.contains("light.kitchen: \"Kitchen Light\" is on in \"Kitchen\" (brightness=80)")
        );
    }

    #[tokio::test]
    async fn malformed_template_is_a_render_error() {
        let result = home()
            .render_live_state(Some("{% for area in areas %}"), &context())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn invocations_are_recorded_or_rejected() {
        let registry = home();
        let script = ScriptRef::parse("script.movie_time").unwrap();

        registry.invoke_script(&script).await.unwrap();
        assert_eq!(registry.invocations(), vec![script.clone()]);

        registry.reject_invocations(Some("maintenance".into()));
        assert!(matches!(
            registry.invoke_script(&script).await,
            Err(DispatchError::Rejected { .. })
        ));
    }
}
