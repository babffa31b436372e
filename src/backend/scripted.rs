//! Deterministic backend that replays canned replies.
//!
//! Used by tests and by `hestia-cli chat --dry-run`. Every request is recorded
//! so callers can assert on how many calls a turn made and what was sent.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

use super::{CompletionRequest, ModelBackend};
use crate::conversation::Message;
use crate::error::{BackendError, BackendResult};

/// One queued response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Return this text as the assistant message
    Text(String),
    /// Fail the call with a transport error
    Fail,
}

/// A request observed by the scripted backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    /// Messages sent
    pub messages: Vec<Message>,
    /// Model requested
    pub model: String,
    /// User tag (conversation id)
    pub user_tag: String,
}

#[derive(Debug, Default)]
struct ScriptState {
    queue: VecDeque<ScriptedReply>,
    fallback: Option<ScriptedReply>,
    requests: Vec<RecordedRequest>,
}

/// Backend that answers from a script.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    state: Mutex<ScriptState>,
}

impl ScriptedBackend {
    /// Create an empty script. Calls fail once the queue is exhausted unless
    /// a fallback is set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a script from texts returned in order.
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let backend = Self::new();
        for reply in replies {
            backend.push_reply(reply);
        }
        backend
    }

    /// Backend that always answers with the same text.
    pub fn always(reply: impl Into<String>) -> Self {
        let backend = Self::new();
        backend.set_fallback(ScriptedReply::Text(reply.into()));
        backend
    }

    /// Backend whose every call fails.
    pub fn failing() -> Self {
        let backend = Self::new();
        backend.set_fallback(ScriptedReply::Fail);
        backend
    }

    /// Queue a text reply.
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.state
            .lock()
            .queue
            .push_back(ScriptedReply::Text(reply.into()));
    }

    /// Queue a failing call.
    pub fn push_failure(&self) {
        self.state.lock().queue.push_back(ScriptedReply::Fail);
    }

    /// Reply used once the queue is empty.
    pub fn set_fallback(&self, reply: ScriptedReply) {
        self.state.lock().fallback = Some(reply);
    }

    /// Number of calls made so far
    pub fn call_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// All recorded requests, oldest first
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    /// Most recent request, if any
    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.state.lock().requests.last().cloned()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn complete(&self, request: CompletionRequest<'_>) -> BackendResult<Message> {
        let reply = {
            let mut state = self.state.lock();
            state.requests.push(RecordedRequest {
                messages: request.messages.to_vec(),
                model: request.params.model.clone(),
                user_tag: request.user_tag.to_string(),
            });
            state.queue.pop_front().or_else(|| state.fallback.clone())
        };

        match reply {
            Some(ScriptedReply::Text(text)) => Ok(Message::assistant(text)),
            Some(ScriptedReply::Fail) => Err(BackendError::Transport {
                endpoint: "scripted".into(),
                detail: "scripted failure".into(),
            }),
            None => Err(BackendError::EmptyCompletion),
        }
    }

    fn backend_name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::GenerationParams;

    #[tokio::test]
    async fn replays_queue_then_fallback() {
        let backend = ScriptedBackend::with_replies(["one", "two"]);
        backend.set_fallback(ScriptedReply::Text("again".into()));
        let params = GenerationParams::default();
        let messages = [Message::user("hi")];
        let request = CompletionRequest {
            messages: &messages,
            params: &params,
            user_tag: "c1",
        };

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(backend.complete(request).await.unwrap().content);
        }

        assert_eq!(seen, vec!["one", "two", "again"]);
        assert_eq!(backend.call_count(), 3);
        assert_eq!(backend.last_request().unwrap().user_tag, "c1");
    }

    #[tokio::test]
    async fn failing_backend_reports_transport_error() {
        let backend = ScriptedBackend::failing();
        let params = GenerationParams::default();
        let result = backend
            .complete(CompletionRequest {
                messages: &[],
                params: &params,
                user_tag: "c1",
            })
            .await;
        assert!(matches!(result, Err(BackendError::Transport { .. })));
    }
}
