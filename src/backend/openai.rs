//! OpenAI-compatible chat-completion adapter.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{CompletionRequest, ModelBackend};
use crate::conversation::Message;
use crate::error::{BackendError, BackendResult};

/// Default completion endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAiSettings {
    /// Full chat-completions URL
    pub endpoint: String,
    /// Bearer token, if the endpoint needs one
    pub api_key: Option<String>,
    /// Per-request timeout
    pub timeout_secs: Option<u64>,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            timeout_secs: Some(30),
        }
    }
}

/// Chat-completion client for OpenAI and compatible servers.
#[derive(Clone)]
pub struct OpenAiBackend {
    settings: OpenAiSettings,
    client: Client,
}

impl OpenAiBackend {
    /// Build a client; fails only if the HTTP stack cannot be initialised.
    pub fn new(settings: OpenAiSettings) -> BackendResult<Self> {
        let mut builder = Client::builder();
        if let Some(secs) = settings.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|err| {
                BackendError::InvalidRequest(format!("failed to construct HTTP client: {err}"))
            })?;
        Ok(Self { settings, client })
    }

    /// Endpoint in use
    pub fn endpoint(&self) -> &str {
        &self.settings.endpoint
    }

    fn headers(&self) -> BackendResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = self.settings.api_key.as_ref() {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|_| BackendError::InvalidRequest("invalid API key header".into()))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    async fn complete(&self, request: CompletionRequest<'_>) -> BackendResult<Message> {
        let endpoint = self.settings.endpoint.as_str();
        let body = json!({
            "model": request.params.model,
            "messages": request.messages,
            "max_tokens": request.params.max_tokens,
            "top_p": request.params.top_p,
            "temperature": request.params.temperature,
            "user": request.user_tag,
        });

        tracing::debug!(
            model = %request.params.model,
            messages = request.messages.len(),
            "sending completion request"
        );

        let response = self
            .client
            .post(endpoint)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(|err| BackendError::Transport {
                endpoint: endpoint.to_string(),
                detail: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::warn!(%status, body = %text, "completion endpoint returned an error");
            return Err(BackendError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|err| BackendError::Decode(err.to_string()))?;

        let content = extract_completion_text(&completion).ok_or(BackendError::EmptyCompletion)?;
        tracing::debug!(model = %request.params.model, %content, "completion received");
        Ok(Message::assistant(content.trim()))
    }

    fn backend_name(&self) -> &str {
        "openai"
    }
}

fn extract_completion_text(completion: &ChatCompletion) -> Option<String> {
    completion.choices.iter().find_map(|choice| {
        choice
            .message
            .as_ref()
            .and_then(|message| message.content.clone())
            .or_else(|| choice.text.clone())
    })
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
