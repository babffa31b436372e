//! Per-intent resolution of model replies.
//!
//! [`Resolver::resolve`] turns one raw assistant message into a
//! [`Resolution`]: a reply for the user, a [`Clarification`] the turn loop
//! may retry once, or a fatal [`TurnError`]. The only side effect happens
//! here, when a resolved `command` is handed to the registry.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{PolicyConfig, QueryPolicy};
use crate::error::TurnError;
use crate::intent::Intent;
use crate::payload::{ActionPayload, EntityRef, PayloadIssue, ScriptRef, parse_payload};
use crate::registry::{EntityState, Registry};

/// Reply used when the request cannot be understood.
pub const REPHRASE_MESSAGE: &str =
    "Sorry, I didn't understand that. Could you please rephrase your request?";

/// Reply for `set` payloads; direct device control is gated off.
pub const SET_NOT_SUPPORTED_MESSAGE: &str =
    "Sorry, I cannot directly control devices yet. Try asking me to run one of your scripts instead.";

/// Reply for `query` payloads under [`QueryPolicy::NotSupported`].
pub const QUERY_NOT_SUPPORTED_MESSAGE: &str =
    "Sorry, answering questions about the state of your devices is not yet supported.";

/// Outcome of resolving one model reply.
#[derive(Debug)]
pub enum Resolution {
    /// Final text for the user
    Reply(String),
    /// Recoverable problem; the model may be asked again
    Clarify(Clarification),
    /// The turn cannot continue
    Fatal(TurnError),
}

/// A recoverable resolution failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clarification {
    /// Reply was not a JSON object
    Unparseable(String),
    /// A required field was absent
    MissingField(&'static str),
    /// A reference was not in `domain.object_id` form
    MalformedReference {
        /// Field holding the reference
        field: &'static str,
        /// Offending value
        value: String,
    },
    /// Script id not known to the registry
    UnresolvedScript(String),
    /// Entity id not known to the registry
    UnresolvedEntity(String),
    /// Area not known to the registry
    UnresolvedArea(String),
}

impl From<PayloadIssue> for Clarification {
    fn from(issue: PayloadIssue) -> Self {
        match issue {
            PayloadIssue::Unparseable(detail) => Clarification::Unparseable(detail),
            PayloadIssue::MissingField(field) => Clarification::MissingField(field),
            PayloadIssue::MalformedReference { field, value } => {
                Clarification::MalformedReference { field, value }
            }
        }
    }
}

impl Clarification {
    /// System message appended before asking the model again. Names exactly
    /// what was wrong.
    pub fn retry_instruction(&self) -> String {
        match self {
            Clarification::Unparseable(detail) => format!(
                "Your previous reply could not be parsed ({detail}). Respond only with the JSON object described above and no other text."
            ),
            Clarification::MissingField(field) => format!(
                "Your previous reply is missing the required property \"{field}\". Respond again with every required property."
            ),
            Clarification::MalformedReference { field, value } => format!(
                "\"{value}\" in \"{field}\" is not a valid domain.object_id reference; do not suggest it again."
            ),
            Clarification::UnresolvedScript(id) => format!(
                "script `{id}` is not defined; do not suggest it again. Only use scripts listed above."
            ),
            Clarification::UnresolvedEntity(id) => format!(
                "entity `{id}` does not exist; do not suggest it again. Only use entities listed above."
            ),
            Clarification::UnresolvedArea(area) => format!(
                "area `{area}` does not exist; do not suggest it again. Only use areas listed above."
            ),
        }
    }

    /// Question put to the user once retries are exhausted. Fields only the
    /// model can fill fall back to asking for a rephrase.
    pub fn question(&self) -> String {
        match self {
            Clarification::Unparseable(_)
            | Clarification::MissingField("comment" | "answer" | "question") => {
                REPHRASE_MESSAGE.to_string()
            }
            Clarification::MissingField("script_id") => {
                "Which script would you like me to run?".to_string()
            }
            Clarification::MissingField("area") => "Which area do you mean?".to_string(),
            Clarification::MissingField("entities") => {
                "Which device do you mean?".to_string()
            }
            Clarification::MissingField("set_value") => {
                "What would you like me to set it to?".to_string()
            }
            Clarification::MissingField(field) => {
                format!("Could you tell me a bit more? I still need the {field}.")
            }
            Clarification::MalformedReference { value, .. } => {
                format!("I don't know what \"{value}\" refers to. Could you name it differently?")
            }
            Clarification::UnresolvedScript(id) => format!(
                "I couldn't find a script called \"{}\". Which script did you mean?",
                short_name(id)
            ),
            Clarification::UnresolvedEntity(id) => format!(
                "I couldn't find a device called \"{}\". Which device did you mean?",
                short_name(id)
            ),
            Clarification::UnresolvedArea(area) => {
                format!("I couldn't find an area called \"{area}\". Which area did you mean?")
            }
        }
    }
}

fn short_name(id: &str) -> &str {
    id.split_once('.').map(|(_, rest)| rest).unwrap_or(id)
}

/// Applies the per-intent rules to parsed payloads.
#[derive(Clone)]
pub struct Resolver {
    registry: Arc<dyn Registry>,
    policy: PolicyConfig,
}

impl Resolver {
    /// Create a resolver over `registry`.
    pub fn new(registry: Arc<dyn Registry>, policy: PolicyConfig) -> Self {
        Self { registry, policy }
    }

    /// Resolve one raw model reply for the bound intent.
    pub async fn resolve(&self, intent: Intent, raw: &str) -> Resolution {
        let payload = match parse_payload(intent, raw) {
            Ok(payload) => payload,
            Err(issue) => return Resolution::Clarify(issue.into()),
        };

        match self.apply(payload).await {
            Ok(resolution) => resolution,
            Err(err) => Resolution::Fatal(err),
        }
    }

    async fn apply(&self, payload: ActionPayload) -> Result<Resolution, TurnError> {
        match payload {
            ActionPayload::Answer { answer: text }
            | ActionPayload::Clarify { question: text }
            | ActionPayload::Help { text } => Ok(Resolution::Reply(text)),
            ActionPayload::Set {
                entities, set_value, ..
            } => {
                tracing::debug!(
                    value = %describe_value(&set_value),
                    entities = entities.len(),
                    "set payload received"
                );
                if let Err(clarification) = self.resolve_entities(&entities).await? {
                    return Ok(Resolution::Clarify(clarification));
                }
                Ok(Resolution::Reply(SET_NOT_SUPPORTED_MESSAGE.to_string()))
            }
            ActionPayload::Query { entities } => match self.policy.query {
                QueryPolicy::NotSupported => {
                    Ok(Resolution::Reply(QUERY_NOT_SUPPORTED_MESSAGE.to_string()))
                }
                QueryPolicy::Summarize => match self.resolve_entities(&entities).await? {
                    Ok(states) => Ok(Resolution::Reply(summarize(&states))),
                    Err(clarification) => Ok(Resolution::Clarify(clarification)),
                },
            },
            ActionPayload::Command {
                area,
                script,
                comment,
                schedule,
            } => {
                self.command(area.as_deref(), script, comment, schedule.as_deref())
                    .await
            }
        }
    }

    async fn resolve_entities(
        &self,
        entities: &[EntityRef],
    ) -> Result<Result<Vec<EntityState>, Clarification>, TurnError> {
        let mut states = Vec::with_capacity(entities.len());
        for entity in entities {
            match self.registry.resolve_entity(entity).await? {
                Some(state) => states.push(state),
                None => return Ok(Err(Clarification::UnresolvedEntity(entity.id()))),
            }
        }
        Ok(Ok(states))
    }

    async fn command(
        &self,
        area: Option<&str>,
        script: ScriptRef,
        comment: String,
        schedule: Option<&str>,
    ) -> Result<Resolution, TurnError> {
        match area {
            Some(area) => {
                if self.registry.resolve_area(area).await?.is_none() {
                    return Ok(Resolution::Clarify(Clarification::UnresolvedArea(
                        area.to_string(),
                    )));
                }
            }
            None if self.policy.require_command_area => {
                return Ok(Resolution::Clarify(Clarification::MissingField("area")));
            }
            None => {}
        }

        if self.registry.resolve_script(&script).await?.is_none() {
            return Ok(Resolution::Clarify(Clarification::UnresolvedScript(
                script.id(),
            )));
        }

        match schedule.and_then(|raw| schedule_delay(raw, Local::now())) {
            Some(delay) => {
                tracing::info!(script = %script, delay_secs = delay.as_secs(), "script scheduled");
                let registry = Arc::clone(&self.registry);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(err) = registry.invoke_script(&script).await {
                        tracing::warn!(script = %script, error = %err, "scheduled script failed");
                    }
                });
            }
            None => self.registry.invoke_script(&script).await?,
        }

        Ok(Resolution::Reply(comment))
    }
}

fn summarize(states: &[EntityState]) -> String {
    states
        .iter()
        .map(|entity| format!("{} is {}.", entity.name, entity.state))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Delay until `raw`, if it names a time after `now`.
///
/// Accepts RFC 3339 and a few local formats, including the `%c` layout the
/// persona prompt shows the model. Past or unreadable times yield `None`.
pub fn schedule_delay(raw: &str, now: DateTime<Local>) -> Option<Duration> {
    let raw = raw.trim();
    let when = DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Local))
        .ok()
        .or_else(|| {
            ["%c", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
                .and_then(|naive| Local.from_local_datetime(&naive).single())
        })?;

    (when - now).to_std().ok().filter(|delay| !delay.is_zero())
}

fn describe_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
