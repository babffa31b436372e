//! Registry adapter for the Home Assistant REST API.
//!
//! Entity and script lookups use `GET /api/states/<id>`, area lookups and
//! live-state rendering go through `POST /api/template` so templates run
//! against the server's live state. Scripts are started with
//! `POST /api/services/script/turn_on`, which returns once the run has been
//! queued. Calling `script.<object_id>` directly would block until the
//! script finishes, so that path is only used for other domains.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::time::Duration;

use super::{Area, EntityState, Registry, ScriptInfo, TemplateContext};
use crate::error::{DispatchError, RegistryError, RenderError};
use crate::payload::{EntityRef, SCRIPT_DOMAIN, ScriptRef};

/// Live-state template rendered server-side when none is configured.
pub const DEFAULT_LIVE_STATE_TEMPLATE: &str = r#"{%- set domains = ['light', 'switch', 'climate', 'sensor', 'binary_sensor', 'lock', 'media_player'] %}
Areas in the home:
{%- for area in areas() %}
  - "{{ area_name(area) }}" (id: {{ area }})
{%- endfor %}

Scripts in the home:
{%- for script in states.script %}
  - {{ script.entity_id }}: "{{ script.name }}"{% if area_name(script.entity_id) %} belongs to "{{ area_name(script.entity_id) }}"{% endif %}
{%- endfor %}

Entities in the home:
{%- for entity in states if entity.domain in domains and area_id(entity.entity_id) %}
  - {{ entity.entity_id }}: "{{ entity.name }}" is {{ entity.state }} in "{{ area_name(entity.entity_id) }}"
{%- endfor %}
"#;

const AREA_LOOKUP_TEMPLATE: &str =
    "{% set id = area_id(wanted) %}{% if id %}{{ id }}|{{ area_name(id) }}{% endif %}";

/// Home Assistant connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeAssistantSettings {
    /// Base URL, e.g. `http://homeassistant.local:8123`
    pub base_url: String,
    /// Long-lived access token
    pub token: String,
    /// Per-request timeout
    pub timeout_secs: Option<u64>,
}

/// Registry backed by a running Home Assistant instance.
#[derive(Clone)]
pub struct HomeAssistantRegistry {
    base_url: String,
    client: Client,
}

impl HomeAssistantRegistry {
    /// Build the adapter.
    pub fn new(settings: HomeAssistantSettings) -> Result<Self, RegistryError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth = HeaderValue::from_str(&format!("Bearer {}", settings.token))
            .map_err(|_| RegistryError::Decode("invalid access token header".into()))?;
        headers.insert(AUTHORIZATION, auth);

        let mut builder = Client::builder().default_headers(headers);
        if let Some(secs) = settings.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|err| RegistryError::Transport(err.to_string()))?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn service_call(&self, script: &ScriptRef) -> (String, Value) {
        if script.domain == SCRIPT_DOMAIN {
            (
                self.url("/api/services/script/turn_on"),
                json!({ "entity_id": script.id() }),
            )
        } else {
            (
                self.url(&format!(
                    "/api/services/{}/{}",
                    script.domain, script.object_id
                )),
                json!({}),
            )
        }
    }

    async fn fetch_state(&self, entity_id: &str) -> Result<Option<HaState>, RegistryError> {
        let response = self
            .client
            .get(self.url(&format!("/api/states/{entity_id}")))
            .send()
            .await
            .map_err(|err| RegistryError::Transport(err.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<HaState>()
                .await
                .map(Some)
                .map_err(|err| RegistryError::Decode(err.to_string())),
            status => Err(RegistryError::Status(status.as_u16())),
        }
    }

    async fn render(&self, template: &str, variables: Value) -> Result<String, TemplateFailure> {
        let response = self
            .client
            .post(self.url("/api/template"))
            .json(&json!({ "template": template, "variables": variables }))
            .send()
            .await
            .map_err(|err| TemplateFailure::Transport(err.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| TemplateFailure::Transport(err.to_string()))?;
        if status.is_success() {
            Ok(text)
        } else if status == StatusCode::BAD_REQUEST {
            Err(TemplateFailure::Template(text))
        } else {
            Err(TemplateFailure::Status(status.as_u16()))
        }
    }
}

enum TemplateFailure {
    Transport(String),
    Status(u16),
    Template(String),
}

#[derive(Debug, Deserialize)]
struct HaState {
    entity_id: String,
    state: String,
    #[serde(default)]
    attributes: Map<String, Value>,
}

impl HaState {
    fn friendly_name(&self) -> String {
        self.attributes
            .get("friendly_name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.entity_id.clone())
    }

    fn into_entity(self) -> EntityState {
        let name = self.friendly_name();
        EntityState {
            entity_id: self.entity_id,
            name,
            area: None,
            state: self.state,
            attributes: self.attributes,
        }
    }

    fn into_script(self) -> ScriptInfo {
        let name = self.friendly_name();
        ScriptInfo {
            entity_id: self.entity_id,
            name,
            area: None,
        }
    }
}

fn parse_area_lookup(rendered: &str) -> Option<Area> {
    let (id, name) = rendered.trim().split_once('|')?;
    if id.is_empty() {
        return None;
    }
    Some(Area {
        id: id.to_string(),
        name: if name.is_empty() { id } else { name }.to_string(),
    })
}

#[async_trait]
impl Registry for HomeAssistantRegistry {
    async fn resolve_entity(
        &self,
        entity: &EntityRef,
    ) -> Result<Option<EntityState>, RegistryError> {
        Ok(self.fetch_state(&entity.id()).await?.map(HaState::into_entity))
    }

    async fn resolve_script(
        &self,
        script: &ScriptRef,
    ) -> Result<Option<ScriptInfo>, RegistryError> {
        Ok(self.fetch_state(&script.id()).await?.map(HaState::into_script))
    }

    async fn resolve_area(&self, area: &str) -> Result<Option<Area>, RegistryError> {
        match self
            .render(AREA_LOOKUP_TEMPLATE, json!({ "wanted": area }))
            .await
        {
            Ok(rendered) => Ok(parse_area_lookup(&rendered)),
            Err(TemplateFailure::Transport(detail)) => Err(RegistryError::Transport(detail)),
            Err(TemplateFailure::Status(status)) => Err(RegistryError::Status(status)),
            Err(TemplateFailure::Template(detail)) => Err(RegistryError::Decode(detail)),
        }
    }

    async fn invoke_script(&self, script: &ScriptRef) -> Result<(), DispatchError> {
        let (url, body) = self.service_call(script);
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|err| DispatchError::Unreachable {
                target: script.id(),
                detail: err.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(script = %script, "script call accepted");
            Ok(())
        } else {
            let detail = response.text().await.unwrap_or_default();
            Err(DispatchError::Rejected {
                target: script.id(),
                detail: format!("{status}: {detail}"),
            })
        }
    }

    async fn render_live_state(
        &self,
        template: Option<&str>,
        context: &TemplateContext,
    ) -> Result<String, RenderError> {
        let variables = serde_json::to_value(context).map_err(RenderError::new)?;
        self.render(template.unwrap_or(DEFAULT_LIVE_STATE_TEMPLATE), variables)
            .await
            .map_err(|failure| match failure {
                TemplateFailure::Template(detail) => RenderError(detail),
                TemplateFailure::Status(status) => {
                    RenderError(format!("template endpoint returned {status}"))
                }
                TemplateFailure::Transport(detail) => {
                    RenderError(format!("template endpoint unreachable: {detail}"))
                }
            })
    }

    fn registry_name(&self) -> &str {
        "home_assistant"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_payload_maps_friendly_name() {
        let state: HaState = serde_json::from_value(json!({
            "entity_id": "light.kitchen",
            "state": "off",
            "attributes": {"friendly_name": "Kitchen Light", "brightness": 0},
            "last_changed": "2026-10-16T08:00:00+00:00"
        }))
        .unwrap();
        let entity = state.into_entity();
        assert_eq!(entity.name, "Kitchen Light");
        assert_eq!(entity.state, "off");
        assert_eq!(entity.attributes["brightness"], json!(0));
    }

    #[test]
    fn area_lookup_output_is_parsed() {
        assert_eq!(
            parse_area_lookup("kitchen|Kitchen\n"),
            Some(Area {
                id: "kitchen".into(),
                name: "Kitchen".into()
            })
        );
        assert_eq!(parse_area_lookup(""), None);
        assert_eq!(parse_area_lookup("|"), None);
    }

    fn registry() -> HomeAssistantRegistry {
        HomeAssistantRegistry::new(HomeAssistantSettings {
            base_url: "http://ha.local:8123/".into(),
            token: "token".into(),
            timeout_secs: Some(5),
        })
        .unwrap()
    }

    #[test]
    fn base_url_is_normalised() {
        assert_eq!(
            registry().url("/api/states/light.x"),
            "http://ha.local:8123/api/states/light.x"
        );
    }

    #[test]
    fn scripts_start_through_turn_on() {
        let script = ScriptRef::parse("script.movie_time").unwrap();
        let (url, body) = registry().service_call(&script);
        assert_eq!(url, "http://ha.local:8123/api/services/script/turn_on");
        assert_eq!(body, json!({"entity_id": "script.movie_time"}));
    }

    #[test]
    fn other_domains_call_the_service_directly() {
        let scene = ScriptRef::parse("scene.evening").unwrap();
        let (url, body) = registry().service_call(&scene);
        assert_eq!(url, "http://ha.local:8123/api/services/scene/evening");
        assert_eq!(body, json!({}));
    }
}
