//! Conversational intent dispatcher.
//!
//! [`Dispatcher::process_turn`] drives one user turn:
//!
//! 1. look up (or mint) the conversation,
//! 2. classify the utterance when no intent is bound,
//! 3. assemble the system prompt for the intent,
//! 4. ask the model for an action payload and resolve it,
//! 5. on a recoverable problem, ask once more with a note naming what was
//!    wrong, then give up with a question for the user,
//! 6. persist the history and return speech or an error.
//!
//! The intent of a turn travels in local state; the dispatcher keeps no
//! per-turn fields, so distinct conversations can be processed concurrently.
//! Turns for the same conversation must be serialised by the caller (the
//! [`crate::service`] layer does this).

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::backend::{CompletionRequest, GenerationParams, ModelBackend, OpenAiBackend};
use crate::classifier::IntentClassifier;
use crate::config::{HestiaConfig, IntentPolicy, PolicyConfig};
use crate::conversation::{Conversation, ConversationId, ConversationStore, Message};
use crate::error::{ErrorCode, TurnError, TurnResult};
use crate::prompt::PromptAssembler;
use crate::registry::{self, Registry};

pub mod resolver;

pub use resolver::{
    Clarification, QUERY_NOT_SUPPORTED_MESSAGE, REPHRASE_MESSAGE, Resolution, Resolver,
    SET_NOT_SUPPORTED_MESSAGE,
};

/// Clarification retries allowed per turn (two model calls in total).
pub const MAX_CLARIFICATION_RETRIES: usize = 1;

/// Language reported when the caller does not give one.
pub const DEFAULT_LANGUAGE: &str = "en";

/// One user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRequest {
    /// Existing conversation, if any
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    /// What the user said
    #[serde(alias = "text")]
    pub utterance: String,
    /// Language tag
    #[serde(default)]
    pub language: Option<String>,
}

impl TurnRequest {
    /// Turn in a new conversation.
    pub fn new(utterance: impl Into<String>) -> Self {
        Self {
            conversation_id: None,
            utterance: utterance.into(),
            language: None,
        }
    }

    /// Continue an existing conversation.
    pub fn in_conversation(id: ConversationId, utterance: impl Into<String>) -> Self {
        Self {
            conversation_id: Some(id),
            ..Self::new(utterance)
        }
    }
}

/// Error body returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnFailure {
    /// Stable code
    pub code: ErrorCode,
    /// Natural-language message
    pub message: String,
}

/// What the user hears, or why the turn failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnOutcome {
    /// Reply text
    Speech {
        /// Text to speak
        speech: String,
    },
    /// Fatal failure
    Error {
        /// Failure details
        error: TurnFailure,
    },
}

/// Result of [`Dispatcher::process_turn`]; always carries a usable id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnResponse {
    /// Conversation to continue with
    pub conversation_id: ConversationId,
    /// Language tag
    pub language: String,
    /// Outcome
    #[serde(flatten)]
    pub outcome: TurnOutcome,
}

impl TurnResponse {
    /// Reply text, or the error message
    pub fn text(&self) -> &str {
        match &self.outcome {
            TurnOutcome::Speech { speech } => speech,
            TurnOutcome::Error { error } => &error.message,
        }
    }

    /// Error code, when the turn failed
    pub fn error_code(&self) -> Option<ErrorCode> {
        match &self.outcome {
            TurnOutcome::Speech { .. } => None,
            TurnOutcome::Error { error } => Some(error.code),
        }
    }
}

enum Finished {
    Reply {
        conversation: Conversation,
        speech: String,
    },
    Failed {
        conversation: Conversation,
        error: TurnError,
    },
}

/// The turn state machine.
#[derive(Clone)]
pub struct Dispatcher {
    backend: Arc<dyn ModelBackend>,
    classifier: IntentClassifier,
    assembler: PromptAssembler,
    resolver: Resolver,
    store: ConversationStore,
    params: GenerationParams,
    policy: PolicyConfig,
}

impl Dispatcher {
    /// Wire a dispatcher from configuration and collaborators. The
    /// classifier shares `backend`.
    pub fn new(
        config: &HestiaConfig,
        backend: Arc<dyn ModelBackend>,
        registry: Arc<dyn Registry>,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(Arc::clone(&backend), config.classifier_params()),
            assembler: PromptAssembler::new(Arc::clone(&registry), config.prompt.clone()),
            resolver: Resolver::new(registry, config.policy.clone()),
            store: ConversationStore::new(config.store.eviction_policy()),
            params: config.model.clone(),
            policy: config.policy.clone(),
            backend,
        }
    }

    /// Build the HTTP backend and the configured registry.
    pub fn from_config(config: &HestiaConfig) -> anyhow::Result<Self> {
        let backend = OpenAiBackend::new(config.openai_settings())
            .context("Failed to build model backend")?;
        let registry = registry::from_config(config)?;
        tracing::info!(
            backend = backend.endpoint(),
            registry = registry.registry_name(),
            model = %config.model.model,
            "dispatcher configured"
        );
        Ok(Self::new(config, Arc::new(backend), registry))
    }

    /// Use a separate backend for intent classification.
    pub fn with_classifier_backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.classifier = IntentClassifier::new(backend, self.classifier_params());
        self
    }

    fn classifier_params(&self) -> GenerationParams {
        self.classifier.params().clone()
    }

    /// Conversation store
    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Prompt assembler
    pub fn assembler(&self) -> &PromptAssembler {
        &self.assembler
    }

    /// Intent classifier
    pub fn classifier(&self) -> &IntentClassifier {
        &self.classifier
    }

    /// Process one user turn.
    pub async fn process_turn(&self, request: TurnRequest) -> TurnResponse {
        let language = request
            .language
            .clone()
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

        let (id, existing) = match request.conversation_id {
            Some(id) => match self.store.get(&id) {
                Some(conversation) => (id, Some(conversation)),
                None => {
                    tracing::debug!(requested = %id, "unknown conversation, starting a new one");
                    (ConversationId::new(), None)
                }
            },
            None => (ConversationId::new(), None),
        };

        let outcome = match self.run_turn(&id, existing, &request.utterance).await {
            Ok(Finished::Reply {
                conversation,
                speech,
            }) => {
                tracing::info!(
                    conversation = %id,
                    intent = ?conversation.intent,
                    messages = conversation.messages.len(),
                    "turn completed"
                );
                self.store.put(id.clone(), conversation);
                TurnOutcome::Speech { speech }
            }
            Ok(Finished::Failed {
                conversation,
                error,
            }) => {
                tracing::warn!(conversation = %id, error = %error, "action dispatch failed");
                self.store.put(id.clone(), conversation);
                failure(&error)
            }
            Err(error) => {
                tracing::error!(conversation = %id, error = %error, "turn failed");
                failure(&error)
            }
        };

        TurnResponse {
            conversation_id: id,
            language,
            outcome,
        }
    }

    async fn run_turn(
        &self,
        id: &ConversationId,
        existing: Option<Conversation>,
        utterance: &str,
    ) -> TurnResult<Finished> {
        let bound = existing.as_ref().and_then(|conversation| conversation.intent);
        let (intent, classified) = match (self.policy.intent, bound) {
            (IntentPolicy::Sticky, Some(intent)) => (intent, false),
            _ => (self.classifier.classify(utterance, id.as_str()).await?, true),
        };

        let mut conversation = match existing {
            Some(mut conversation) => {
                if classified && !intent.needs_rephrase() {
                    conversation.refresh_system_prompt(self.assembler.assemble(intent).await?);
                }
                conversation
            }
            None => Conversation::new(self.assembler.assemble(intent).await?),
        };

        if intent.needs_rephrase() {
            tracing::info!(conversation = %id, %intent, "asking user to rephrase");
            conversation.messages.push(Message::user(utterance));
            conversation.messages.push(Message::assistant(REPHRASE_MESSAGE));
            conversation.intent = None;
            return Ok(Finished::Reply {
                conversation,
                speech: REPHRASE_MESSAGE.to_string(),
            });
        }
        conversation.intent = Some(intent);

        let mut working = conversation.messages.clone();
        working.push(Message::user(utterance));
        let mut retries = 0;

        loop {
            let reply = self
                .backend
                .complete(CompletionRequest {
                    messages: &working,
                    params: &self.params,
                    user_tag: id.as_str(),
                })
                .await?;
            tracing::debug!(conversation = %id, %intent, raw = %reply.content, "model reply");
            let raw = reply.content.clone();
            working.push(reply);

            match self.resolver.resolve(intent, &raw).await {
                Resolution::Reply(speech) => {
                    replace_last(&mut working, Message::assistant(speech.clone()));
                    conversation.messages = working;
                    return Ok(Finished::Reply {
                        conversation,
                        speech,
                    });
                }
                Resolution::Fatal(error @ TurnError::Dispatch(_)) => {
                    conversation.messages = working;
                    return Ok(Finished::Failed {
                        conversation,
                        error,
                    });
                }
                Resolution::Fatal(error) => return Err(error),
                Resolution::Clarify(clarification) if retries < MAX_CLARIFICATION_RETRIES => {
                    tracing::warn!(
                        conversation = %id,
                        %intent,
                        reason = ?clarification,
                        "model reply needs clarification, retrying"
                    );
                    working.push(Message::system(clarification.retry_instruction()));
                    working.push(Message::user(utterance));
                    retries += 1;
                }
                Resolution::Clarify(clarification) => {
                    tracing::info!(
                        conversation = %id,
                        %intent,
                        reason = ?clarification,
                        "retries exhausted, asking user"
                    );
                    let speech = clarification.question();
                    replace_last(&mut working, Message::assistant(speech.clone()));
                    conversation.intent = None;
                    conversation.messages = working;
                    return Ok(Finished::Reply {
                        conversation,
                        speech,
                    });
                }
            }
        }
    }
}

fn replace_last(messages: &mut Vec<Message>, message: Message) {
    match messages.last_mut() {
        Some(last) => *last = message,
        None => messages.push(message),
    }
}

fn failure(error: &TurnError) -> TurnOutcome {
    TurnOutcome::Error {
        error: TurnFailure {
            code: error.code(),
            message: error.user_message(),
        },
    }
}
