//! Home-automation registry contract.
//!
//! The dispatcher validates every entity, script and area reference against
//! a registry before acting, invokes scripts through it, and asks it to
//! render the live-state fragment of the prompt. Two implementations ship
//! with the crate: an in-memory snapshot ([`memory::MemoryRegistry`]) and a
//! Home Assistant REST adapter ([`home_assistant::HomeAssistantRegistry`]).

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::config::{HestiaConfig, RegistryConfig};
use crate::error::{DispatchError, RegistryError, RenderError};
use crate::payload::{EntityRef, ScriptRef};

pub mod home_assistant;
pub mod memory;

pub use home_assistant::HomeAssistantRegistry;
pub use memory::MemoryRegistry;

/// A room or zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    /// Stable area id (`kitchen`)
    pub id: String,
    /// Display name (`Kitchen`)
    pub name: String,
}

/// Current state of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    /// Fully-qualified id (`light.kitchen`)
    pub entity_id: String,
    /// Friendly name
    pub name: String,
    /// Area id, if assigned
    #[serde(default)]
    pub area: Option<String>,
    /// State string (`on`, `off`, `21.5`)
    pub state: String,
    /// Extra attributes (brightness, volume_level, ...)
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// A runnable script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptInfo {
    /// Fully-qualified id (`script.movie_time`)
    pub entity_id: String,
    /// Friendly name
    pub name: String,
    /// Area id, if assigned
    #[serde(default)]
    pub area: Option<String>,
}

/// Variables made available to live-state templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateContext {
    /// Name of the home
    pub ha_name: String,
    /// Where the home is located
    pub location: String,
}

/// Capability surface the dispatcher requires from the registry.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Look up an entity; `Ok(None)` when it does not exist.
    async fn resolve_entity(
        &self,
        entity: &EntityRef,
    ) -> Result<Option<EntityState>, RegistryError>;

    /// Look up a script; `Ok(None)` when it does not exist.
    async fn resolve_script(&self, script: &ScriptRef) -> Result<Option<ScriptInfo>, RegistryError>;

    /// Look up an area by id or display name.
    async fn resolve_area(&self, area: &str) -> Result<Option<Area>, RegistryError>;

    /// Start a script. Returns once the registry accepted the call; the
    /// script's own completion is not observed.
    async fn invoke_script(&self, script: &ScriptRef) -> Result<(), DispatchError>;

    /// Render the live-state prompt fragment. `None` selects the registry's
    /// built-in template.
    async fn render_live_state(
        &self,
        template: Option<&str>,
        context: &TemplateContext,
    ) -> Result<String, RenderError>;

    /// Short registry name for logs.
    fn registry_name(&self) -> &str;
}

/// Build the registry selected by the configuration.
pub fn from_config(config: &HestiaConfig) -> anyhow::Result<Arc<dyn Registry>> {
    match &config.registry {
        RegistryConfig::Snapshot { path } => Ok(Arc::new(MemoryRegistry::from_json_file(path)?)),
        RegistryConfig::HomeAssistant { .. } => {
            let settings = config
                .home_assistant_settings()
                .context("Home Assistant settings missing")?;
            let registry = HomeAssistantRegistry::new(settings)
                .context("Failed to build Home Assistant registry")?;
            Ok(Arc::new(registry))
        }
    }
}
