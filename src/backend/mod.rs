//! Language-model backend contract.
//!
//! The dispatcher only needs one capability: send an ordered list of
//! role-tagged messages plus generation parameters and receive one assistant
//! message back. Timeouts, retries and rate limiting belong to the
//! implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::conversation::Message;
use crate::error::BackendResult;

pub mod openai;
pub mod scripted;

pub use openai::OpenAiBackend;
pub use scripted::ScriptedBackend;

/// Default chat model
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
/// Default completion budget
pub const DEFAULT_MAX_TOKENS: u32 = 150;
/// Default nucleus sampling
pub const DEFAULT_TOP_P: f32 = 1.0;
/// Default sampling temperature
pub const DEFAULT_TEMPERATURE: f32 = 0.5;

/// Sampling parameters forwarded with every completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    /// Model identifier
    pub model: String,
    /// Maximum completion tokens
    pub max_tokens: u32,
    /// Nucleus sampling mass
    pub top_p: f32,
    /// Sampling temperature
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            top_p: DEFAULT_TOP_P,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

/// One completion call.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    /// Ordered conversation so far
    pub messages: &'a [Message],
    /// Sampling parameters
    pub params: &'a GenerationParams,
    /// Conversation identifier, used by the backend for per-user tracking
    pub user_tag: &'a str,
}

/// Capability surface of a chat-completion backend.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Produce one assistant message for the given conversation.
    async fn complete(&self, request: CompletionRequest<'_>) -> BackendResult<Message>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &str;
}
