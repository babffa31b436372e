//! Dispatcher configuration.
//!
//! Persisted as pretty-printed JSON and written atomically. Environment
//! variables prefixed `HESTIA_` override file values after loading; empty
//! values are ignored.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backend::GenerationParams;
use crate::backend::openai::{DEFAULT_ENDPOINT, OpenAiSettings};
use crate::conversation::EvictionPolicy;
use crate::registry::TemplateContext;
use crate::registry::home_assistant::HomeAssistantSettings;

/// Default house location used in the persona prompt
pub const DEFAULT_LOCATION: &str = "US";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HestiaConfig {
    /// Parameters for action-producing completions
    pub model: GenerationParams,
    /// Parameters for the intent classifier call
    pub classifier: ClassifierConfig,
    /// Model endpoint
    pub backend: BackendConfig,
    /// Prompt fragments
    pub prompt: PromptConfig,
    /// Behaviour switches
    pub policy: PolicyConfig,
    /// Conversation retention
    pub store: StoreConfig,
    /// Which registry to talk to
    pub registry: RegistryConfig,
}

/// Sampling for the classifier call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Maximum tokens for the label
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_tokens: 10,
            temperature: 0.0,
        }
    }
}

/// Chat-completion endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Chat-completions URL
    pub endpoint: String,
    /// Bearer token
    pub api_key: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            timeout_secs: Some(30),
        }
    }
}

/// Prompt assembly settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Persona fragment; `None` uses the built-in persona
    pub persona: Option<String>,
    /// Where the house is
    pub location: String,
    /// Name of the home, exposed to templates as `ha_name`
    pub home_name: String,
    /// Live-state template; `None` uses the registry's built-in template
    pub live_state_template: Option<String>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            persona: None,
            location: DEFAULT_LOCATION.to_string(),
            home_name: "Home".to_string(),
            live_state_template: None,
        }
    }
}

/// How `query` payloads are answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryPolicy {
    /// Read the referenced entities and report their state
    Summarize,
    /// Reply with a fixed "not yet supported" message
    NotSupported,
}

/// When the classifier runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentPolicy {
    /// Only when the conversation has no bound intent
    Sticky,
    /// On every turn
    Reclassify,
}

/// Behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Query handling
    pub query: QueryPolicy,
    /// Intent drift handling
    pub intent: IntentPolicy,
    /// Whether `command` payloads must name an area
    pub require_command_area: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            query: QueryPolicy::NotSupported,
            intent: IntentPolicy::Sticky,
            require_command_area: false,
        }
    }
}

/// Conversation retention limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum stored conversations
    pub max_conversations: Option<usize>,
    /// Idle time after which a conversation is dropped
    pub idle_ttl_secs: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_conversations: Some(256),
            idle_ttl_secs: Some(24 * 60 * 60),
        }
    }
}

impl StoreConfig {
    /// Eviction policy for the conversation store
    pub fn eviction_policy(&self) -> EvictionPolicy {
        EvictionPolicy {
            max_conversations: self.max_conversations,
            idle_ttl: self.idle_ttl_secs.map(Duration::from_secs),
        }
    }
}

/// Registry selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistryConfig {
    /// JSON snapshot file served by the in-memory registry
    Snapshot {
        /// Snapshot path
        path: PathBuf,
    },
    /// Live Home Assistant instance
    HomeAssistant {
        /// Base URL
        base_url: String,
        /// Long-lived access token
        token: String,
    },
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig::Snapshot {
            path: PathBuf::from("registry.json"),
        }
    }
}

impl HestiaConfig {
    /// Settings for the OpenAI-compatible backend
    pub fn openai_settings(&self) -> OpenAiSettings {
        OpenAiSettings {
            endpoint: self.backend.endpoint.clone(),
            api_key: self.backend.api_key.clone(),
            timeout_secs: self.backend.timeout_secs,
        }
    }

    /// Settings for the Home Assistant registry, if selected
    pub fn home_assistant_settings(&self) -> Option<HomeAssistantSettings> {
        match &self.registry {
            RegistryConfig::HomeAssistant { base_url, token } => Some(HomeAssistantSettings {
                base_url: base_url.clone(),
                token: token.clone(),
                timeout_secs: self.backend.timeout_secs,
            }),
            RegistryConfig::Snapshot { .. } => None,
        }
    }

    /// Variables passed to live-state templates
    pub fn template_context(&self) -> TemplateContext {
        TemplateContext {
            ha_name: self.prompt.home_name.clone(),
            location: self.prompt.location.clone(),
        }
    }

    /// Classifier generation parameters (same model, classifier sampling)
    pub fn classifier_params(&self) -> GenerationParams {
        GenerationParams {
            model: self.model.model.clone(),
            max_tokens: self.classifier.max_tokens,
            top_p: self.model.top_p,
            temperature: self.classifier.temperature,
        }
    }

    /// Apply `HESTIA_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(model) = var("HESTIA_MODEL") {
            self.model.model = model;
        }
        if let Some(max_tokens) = var("HESTIA_MAX_TOKENS").and_then(|v| v.parse().ok()) {
            self.model.max_tokens = max_tokens;
        }
        if let Some(top_p) = var("HESTIA_TOP_P").and_then(|v| v.parse().ok()) {
            self.model.top_p = top_p;
        }
        if let Some(temperature) = var("HESTIA_TEMPERATURE").and_then(|v| v.parse().ok()) {
            self.model.temperature = temperature;
        }
        if let Some(endpoint) = var("HESTIA_BACKEND_ENDPOINT") {
            self.backend.endpoint = endpoint;
        }
        if let Some(api_key) = var("HESTIA_API_KEY") {
            self.backend.api_key = Some(api_key);
        }
        if let Some(timeout) = var("HESTIA_BACKEND_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.backend.timeout_secs = Some(timeout);
        }
        if let Some(location) = var("HESTIA_LOCATION") {
            self.prompt.location = location;
        }
        if let (Some(base_url), Some(token)) = (var("HESTIA_HA_URL"), var("HESTIA_HA_TOKEN")) {
            self.registry = RegistryConfig::HomeAssistant { base_url, token };
        }
    }
}

/// Load configuration from a JSON file.
pub fn load_config(path: &Path) -> Result<HestiaConfig> {
    let data = fs::read(path).with_context(|| format!("Failed to read config: {:?}", path))?;
    let config: HestiaConfig =
        serde_json::from_slice(&data).context("Failed to deserialize config")?;
    Ok(config)
}

/// Write configuration as pretty JSON, atomically.
pub fn write_config(path: &Path, config: &HestiaConfig) -> Result<()> {
    let json = serde_json::to_vec_pretty(config).context("Failed to serialize config")?;
    write_atomic(path, &json)
}

/// Write data via a synced temporary file and rename.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)
        .with_context(|| format!("Failed to create temp file: {:?}", temp_path))?;
    file.write_all(data).context("Failed to write data")?;
    file.sync_all().context("Failed to sync file")?;
    drop(file);

    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        let dir = OpenOptions::new()
            .read(true)
            .open(parent)
            .with_context(|| format!("Failed to open directory: {:?}", parent))?;
        dir.sync_all().context("Failed to sync directory")?;
    }

    Ok(())
}
