//! Closed intent enumeration and label normalisation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of an utterance's purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Change attributes of one or more entities
    Set,
    /// Run a script
    Command,
    /// Read entity state
    Query,
    /// General knowledge question unrelated to the home
    Answer,
    /// The model needs the user to rephrase
    Clarify,
    /// User asks what the assistant can do
    Help,
    /// Anything outside the enumeration
    Unknown,
}

impl Intent {
    /// Every variant, in prompt order.
    pub const ALL: [Intent; 7] = [
        Intent::Set,
        Intent::Command,
        Intent::Query,
        Intent::Answer,
        Intent::Clarify,
        Intent::Help,
        Intent::Unknown,
    ];

    /// Normalise free-form model output into an intent.
    ///
    /// Tolerates surrounding whitespace, quotes, trailing punctuation, a
    /// `{"intent": ...}` wrapper and the compound labels older prompts used
    /// (`query entities`, `query area`). Anything else is [`Intent::Unknown`].
    pub fn from_label(raw: &str) -> Self {
        let mut text = raw.trim();
        let unwrapped;
        if text.starts_with('{') {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
                if let Some(label) = value
                    .get("intent")
                    .or_else(|| value.get("action"))
                    .and_then(serde_json::Value::as_str)
                {
                    unwrapped = label.to_string();
                    text = unwrapped.as_str();
                }
            }
        }

        let cleaned = text
            .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.')
            .trim()
            .to_ascii_lowercase();
        let head = cleaned.split_whitespace().next().unwrap_or_default();

        match head {
            "set" => Intent::Set,
            "command" => Intent::Command,
            "query" => Intent::Query,
            "answer" => Intent::Answer,
            "clarify" | "question" => Intent::Clarify,
            "help" => Intent::Help,
            _ => Intent::Unknown,
        }
    }

    /// Wire label for this intent.
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Set => "set",
            Intent::Command => "command",
            Intent::Query => "query",
            Intent::Answer => "answer",
            Intent::Clarify => "clarify",
            Intent::Help => "help",
            Intent::Unknown => "unknown",
        }
    }

    /// Whether the intent ends the turn with a rephrase request.
    pub fn needs_rephrase(&self) -> bool {
        matches!(self, Intent::Clarify | Intent::Unknown)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
