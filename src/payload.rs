//! Structured action payloads returned by the model, and the registry
//! references they carry.
//!
//! Model output is untrusted text. [`parse_payload`] extracts the JSON object,
//! checks the fields the bound intent requires, and reports anything missing
//! or malformed as a [`PayloadIssue`] so the dispatcher can ask again instead
//! of failing the turn.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::intent::Intent;

/// Registry-qualified entity identifier (`domain.object_id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity domain (`light`, `switch`, ...)
    pub domain: String,
    /// Object id within the domain
    pub object_id: String,
}

impl EntityRef {
    /// Parse `domain.object_id`; both halves must be non-empty.
    pub fn parse(raw: &str) -> Option<Self> {
        let (domain, object_id) = raw.trim().split_once('.')?;
        if domain.is_empty() || object_id.is_empty() || object_id.contains('.') {
            return None;
        }
        Some(Self {
            domain: domain.to_string(),
            object_id: object_id.to_string(),
        })
    }

    /// Fully-qualified id
    pub fn id(&self) -> String {
        format!("{}.{}", self.domain, self.object_id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.object_id)
    }
}

/// Registry-qualified script identifier. Bare names default to the
/// `script` domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScriptRef {
    /// Service domain, normally `script`
    pub domain: String,
    /// Script object id
    pub object_id: String,
}

/// Domain assumed for unqualified script ids.
pub const SCRIPT_DOMAIN: &str = "script";

impl ScriptRef {
    /// Parse `script.object_id` or a bare `object_id`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        match raw.split_once('.') {
            Some((domain, object_id)) => {
                if domain.is_empty() || object_id.is_empty() || object_id.contains('.') {
                    return None;
                }
                Some(Self {
                    domain: domain.to_string(),
                    object_id: object_id.to_string(),
                })
            }
            None => Some(Self {
                domain: SCRIPT_DOMAIN.to_string(),
                object_id: raw.to_string(),
            }),
        }
    }

    /// Fully-qualified id
    pub fn id(&self) -> String {
        format!("{}.{}", self.domain, self.object_id)
    }
}

impl fmt::Display for ScriptRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.object_id)
    }
}

/// Parsed action for one model reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionPayload {
    /// Change entity attributes
    Set {
        /// Target entities
        entities: Vec<EntityRef>,
        /// Requested value (`on`, `off`, a number, ...)
        set_value: Value,
        /// Model-authored confirmation
        comment: String,
    },
    /// Run a script
    Command {
        /// Area the script applies to, when the prompt asks for one
        area: Option<String>,
        /// Script to invoke
        script: ScriptRef,
        /// Model-authored confirmation
        comment: String,
        /// Deferred execution time, as written by the model
        schedule: Option<String>,
    },
    /// Read entity state
    Query {
        /// Entities to report on
        entities: Vec<EntityRef>,
    },
    /// Free answer
    Answer {
        /// Answer text
        answer: String,
    },
    /// Model asks the user something
    Clarify {
        /// Question text
        question: String,
    },
    /// Capability overview
    Help {
        /// Help text
        text: String,
    },
}

/// Why a reply could not be turned into an [`ActionPayload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadIssue {
    /// Not a JSON object at all
    Unparseable(String),
    /// Required field absent, null or empty
    MissingField(&'static str),
    /// A reference field did not look like `domain.object_id`
    MalformedReference {
        /// Field holding the reference
        field: &'static str,
        /// Offending value
        value: String,
    },
}

impl fmt::Display for PayloadIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadIssue::Unparseable(detail) => write!(f, "reply is not a JSON object: {detail}"),
            PayloadIssue::MissingField(field) => write!(f, "required field `{field}` is missing"),
            PayloadIssue::MalformedReference { field, value } => {
                write!(f, "`{value}` in `{field}` is not a domain.object_id reference")
            }
        }
    }
}

/// Reduce model text to its outermost JSON object, dropping Markdown fences
/// and surrounding prose.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```"))
        .unwrap_or(text)
        .trim();

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Parse and validate a model reply against the bound intent.
///
/// A payload whose `action` is `clarify`/`question` (with a question) or
/// `answer` (with an answer) is accepted whatever the intent, since neither
/// has side effects.
pub fn parse_payload(intent: Intent, raw: &str) -> Result<ActionPayload, PayloadIssue> {
    let json = extract_json_object(raw)
        .ok_or_else(|| PayloadIssue::Unparseable("no JSON object found".to_string()))?;
    let value: Value =
        serde_json::from_str(json).map_err(|err| PayloadIssue::Unparseable(err.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| PayloadIssue::Unparseable("top-level value is not an object".into()))?;

    match object.get("action").and_then(Value::as_str) {
        Some("clarify") | Some("question") => {
            if let Some(question) = text_field(object, &["question"]) {
                return Ok(ActionPayload::Clarify { question });
            }
        }
        Some("answer") => {
            if let Some(answer) = text_field(object, &["answer"]) {
                return Ok(ActionPayload::Answer { answer });
            }
        }
        _ => {}
    }

    match intent {
        Intent::Set => {
            let entities = entity_list(object)?;
            let set_value = object
                .get("set_value")
                .or_else(|| object.get("value"))
                .filter(|value| !is_blank(value))
                .cloned()
                .ok_or(PayloadIssue::MissingField("set_value"))?;
            let comment = required_text(object, &["comment"], "comment")?;
            Ok(ActionPayload::Set {
                entities,
                set_value,
                comment,
            })
        }
        Intent::Command => {
            let raw_script = required_text(object, &["script_id", "script"], "script_id")?;
            let script =
                ScriptRef::parse(&raw_script).ok_or_else(|| PayloadIssue::MalformedReference {
                    field: "script_id",
                    value: raw_script.clone(),
                })?;
            let comment = required_text(object, &["comment"], "comment")?;
            Ok(ActionPayload::Command {
                area: text_field(object, &["area"]),
                script,
                comment,
                schedule: text_field(object, &["scheduleTimeStamp", "schedule_time_stamp"]),
            })
        }
        Intent::Query => Ok(ActionPayload::Query {
            entities: entity_list(object)?,
        }),
        Intent::Answer => Ok(ActionPayload::Answer {
            answer: required_text(object, &["answer"], "answer")?,
        }),
        Intent::Help => Ok(ActionPayload::Help {
            text: required_text(object, &["answer", "help", "text"], "answer")?,
        }),
        Intent::Clarify | Intent::Unknown => Ok(ActionPayload::Clarify {
            question: required_text(object, &["question"], "question")?,
        }),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

fn text_field(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match object.get(*key)? {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

fn required_text(
    object: &Map<String, Value>,
    keys: &[&str],
    field: &'static str,
) -> Result<String, PayloadIssue> {
    text_field(object, keys).ok_or(PayloadIssue::MissingField(field))
}

fn entity_list(object: &Map<String, Value>) -> Result<Vec<EntityRef>, PayloadIssue> {
    let items: Vec<&Value> = match object.get("entities") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single @ Value::String(_)) => vec![single],
        _ => return Err(PayloadIssue::MissingField("entities")),
    };

    let mut entities = Vec::with_capacity(items.len());
    for item in items {
        let raw = match item {
            Value::String(text) => text.as_str(),
            Value::Object(map) => map
                .get("entity_id")
                .and_then(Value::as_str)
                .unwrap_or_default(),
            _ => "",
        };
        let entity = EntityRef::parse(raw).ok_or_else(|| PayloadIssue::MalformedReference {
            field: "entities",
            value: if raw.is_empty() {
                item.to_string()
            } else {
                raw.to_string()
            },
        })?;
        entities.push(entity);
    }

    if entities.is_empty() {
        return Err(PayloadIssue::MissingField("entities"));
    }
    Ok(entities)
}
