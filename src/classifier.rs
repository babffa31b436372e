//! Intent classification.
//!
//! One backend call per classification: a system message holding only the
//! intent-detection instructions (no live state) and the utterance as the
//! user message. The reply is normalised with [`Intent::from_label`].

use std::sync::Arc;

use crate::backend::{CompletionRequest, GenerationParams, ModelBackend};
use crate::conversation::Message;
use crate::error::BackendResult;
use crate::intent::Intent;

/// Instructions sent with every classification call.
pub const CLASSIFIER_INSTRUCTIONS: &str = r#"You classify requests sent to a smart home assistant.
Reply with exactly one word from this list and nothing else:
  - set: change the state or attributes of devices (turn on a light, set the temperature)
  - command: run a routine or script (movie time, lock up the house)
  - query: ask about the state of devices or sensors
  - answer: a question that has nothing to do with the smart home
  - help: the user asks what you can do
  - clarify: the request is ambiguous and needs rephrasing"#;

/// Maps utterances to intents with a single model call.
#[derive(Clone)]
pub struct IntentClassifier {
    backend: Arc<dyn ModelBackend>,
    params: GenerationParams,
}

impl IntentClassifier {
    /// Create a classifier using `params` for every call.
    pub fn new(backend: Arc<dyn ModelBackend>, params: GenerationParams) -> Self {
        Self { backend, params }
    }

    /// Generation parameters used for classification
    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    /// Classify one utterance. Backend failures propagate unchanged.
    pub async fn classify(&self, utterance: &str, user_tag: &str) -> BackendResult<Intent> {
        let messages = [
            Message::system(CLASSIFIER_INSTRUCTIONS),
            Message::user(utterance),
        ];
        let reply = self
            .backend
            .complete(CompletionRequest {
                messages: &messages,
                params: &self.params,
                user_tag,
            })
            .await?;

        let intent = Intent::from_label(&reply.content);
        tracing::debug!(label = %reply.content.trim(), %intent, "utterance classified");
        Ok(intent)
    }
}
