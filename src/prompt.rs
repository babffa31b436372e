//! Prompt assembly.
//!
//! The system message for a conversation is the persona fragment, then the
//! instruction fragment for the bound intent, then the live state of the
//! home rendered by the registry. Render failures are returned as-is and
//! never retried.

use chrono::Local;
use std::sync::Arc;

use crate::config::PromptConfig;
use crate::error::RenderError;
use crate::intent::Intent;
use crate::registry::{Registry, TemplateContext};

/// Persona used when the configuration does not provide one.
pub const DEFAULT_PERSONA: &str = "You are the voice of a smart home. \
If the question is about you, pretend to be the sentient brain of the smart home, a clever AI, \
and do not reveal your actual identity. Also try to help in other areas like weather, free time \
and general knowledge.";

const SET_INSTRUCTIONS: &str = r#"The user wants to change the state of one or more entities.
Respond with a JSON object and no other text:
{"action": "set", "entities": ["<domain.object_id>", ...], "set_value": <value>, "comment": "<short confirmation>"}
  - "entities" must only contain entity ids listed below.
  - "set_value" is "on", "off", a number, "up", "down", "open", "close", "lock" or "unlock".
  - If you cannot tell which entity is meant, respond with {"action": "clarify", "question": "<question>"}."#;

const COMMAND_INSTRUCTIONS: &str = r#"The user wants to run a script.
Respond with a JSON object and no other text:
{"action": "command", "area": "<area id or null>", "script_id": "<script.object_id>", "comment": "<short confirmation>", "scheduleTimeStamp": "<RFC 3339 time or null>"}
  - "script_id" must be one of the scripts listed below.
  - "area" is the area the request is about, if any.
  - "scheduleTimeStamp" is only set when the user asks for the script to run later.
  - If a request matches more than one area, respond with {"action": "clarify", "question": "<which area?>"}."#;

const QUERY_INSTRUCTIONS: &str = r#"The user wants to know the state of one or more entities.
Respond with a JSON object and no other text:
{"action": "query", "entities": ["<domain.object_id>", ...]}
  - "entities" must only contain entity ids listed below.
  - If a request is about a leak, include every "binary_sensor" entity with "moisture" in its name.
  - If a request is about low batteries, include every "sensor" entity with "low battery" in its name."#;

const ANSWER_INSTRUCTIONS: &str = r#"The request has nothing to do with the smart home. Answer it to the best of your knowledge.
Respond with a JSON object and no other text:
{"action": "answer", "answer": "<your answer>"}"#;

const HELP_INSTRUCTIONS: &str = r#"The user wants to know what you can do. Explain briefly that you can run scripts, report the state of devices and answer general questions, using the home described below for examples.
Respond with a JSON object and no other text:
{"action": "help", "answer": "<your explanation>"}"#;

const GENERAL_INSTRUCTIONS: &str = r#"Respond to user requests sent to a smart home in JSON format and no other text.
If the request is not clear, respond with {"action": "clarify", "question": "<ask the user to be more specific>"}."#;

/// Instruction fragment for an intent.
pub fn instructions_for(intent: Intent) -> &'static str {
    match intent {
        Intent::Set => SET_INSTRUCTIONS,
        Intent::Command => COMMAND_INSTRUCTIONS,
        Intent::Query => QUERY_INSTRUCTIONS,
        Intent::Answer => ANSWER_INSTRUCTIONS,
        Intent::Help => HELP_INSTRUCTIONS,
        Intent::Clarify | Intent::Unknown => GENERAL_INSTRUCTIONS,
    }
}

/// Builds system messages from persona, intent instructions and live state.
#[derive(Clone)]
pub struct PromptAssembler {
    registry: Arc<dyn Registry>,
    config: PromptConfig,
    context: TemplateContext,
}

impl PromptAssembler {
    /// Create an assembler that renders live state through `registry`.
    pub fn new(registry: Arc<dyn Registry>, config: PromptConfig) -> Self {
        let context = TemplateContext {
            ha_name: config.home_name.clone(),
            location: config.location.clone(),
        };
        Self {
            registry,
            config,
            context,
        }
    }

    /// Persona fragment with location and current local time.
    pub fn persona(&self) -> String {
        let persona = self.config.persona.as_deref().unwrap_or(DEFAULT_PERSONA);
        format!(
            "{persona}\nThe house is located in {}. The current time is: {}",
            self.config.location,
            Local::now().format("%c")
        )
    }

    /// Assemble the full system message for `intent`.
    pub async fn assemble(&self, intent: Intent) -> Result<String, RenderError> {
        let live_state = self
            .registry
            .render_live_state(self.config.live_state_template.as_deref(), &self.context)
            .await
            .inspect_err(|err| {
                tracing::error!(
                    registry = self.registry.registry_name(),
                    error = %err,
                    "live state render failed"
                )
            })?;

        Ok(format!(
            "{}\n\n{}\n\n{}",
            self.persona(),
            instructions_for(intent),
            live_state.trim_end()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::memory::{MemoryRegistry, RegistrySnapshot};
    use crate::registry::Area;

    fn registry() -> Arc<dyn Registry> {
        Arc::new(MemoryRegistry::new(RegistrySnapshot {
            areas: vec![Area {
                id: "kitchen".into(),
                name: "Kitchen".into(),
            }],
            ..RegistrySnapshot::default()
        }))
    }

    #[tokio::test]
    async fn fragments_appear_in_order() {
        let assembler = PromptAssembler::new(registry(), PromptConfig::default());
        let prompt = assembler.assemble(Intent::Command).await.unwrap();

        let persona = prompt.find("smart home").unwrap();
        let instructions = prompt.find("\"script_id\"").unwrap();
        let live_state = prompt.find("\"Kitchen\" (id: kitchen)").unwrap();
        assert!(persona < instructions && instructions < live_state);
        assert!(prompt.contains("located in US"));
    }

    #[tokio::test]
    async fn custom_persona_and_template() {
        let config = PromptConfig {
            persona: Some("You are Vesta.".into()),
            live_state_template: Some("Home {{ ha_name }} in {{ location }}".into()),
            location: "Lisbon".into(),
            ..PromptConfig::default()
        };
        let prompt = PromptAssembler::new(registry(), config)
            .assemble(Intent::Answer)
            .await
            .unwrap();
        assert!(prompt.starts_with("You are Vesta."));
        assert!(prompt.ends_with("Home Home in Lisbon"));
    }

    #[tokio::test]
    async fn broken_template_fails() {
        let config = PromptConfig {
            live_state_template: Some("{{ areas | no_such_filter }}".into()),
            ..PromptConfig::default()
        };
        let result = PromptAssembler::new(registry(), config)
            .assemble(Intent::Query)
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn unknown_and_clarify_share_general_instructions() {
        assert_eq!(
            instructions_for(Intent::Unknown),
            instructions_for(Intent::Clarify)
        );
    }
}
