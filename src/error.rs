//! Error types for the Hestia dispatcher
//!
//! Domain errors use thiserror, one enum per external collaborator, with a
//! single [`TurnError`] taxonomy for failures that end a turn. Recoverable
//! conditions (unparseable model output, unknown references) are not errors;
//! see [`crate::dispatcher::Clarification`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure talking to the language-model backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Request never produced a response (connect, timeout, TLS).
    #[error("request to {endpoint} failed: {detail}")]
    Transport {
        /// Endpoint that was contacted
        endpoint: String,
        /// Transport error details
        detail: String,
    },

    /// Backend answered with a non-success status.
    #[error("endpoint {endpoint} returned {status}")]
    Status {
        /// Endpoint that was contacted
        endpoint: String,
        /// HTTP status code
        status: u16,
    },

    /// Response body could not be decoded.
    #[error("failed to decode completion payload: {0}")]
    Decode(String),

    /// Completion carried no assistant text.
    #[error("completion payload missing response text")]
    EmptyCompletion,

    /// Backend rejected the request before sending (e.g. bad credentials header).
    #[error("invalid backend request: {0}")]
    InvalidRequest(String),
}

/// Convenience result alias for backend operations
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Live-state or prompt template could not be rendered.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct RenderError(pub String);

impl RenderError {
    /// Build a render error from any displayable cause.
    pub fn new(detail: impl fmt::Display) -> Self {
        Self(detail.to_string())
    }
}

/// Registry could not be queried at all (distinct from "reference absent").
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Transport-level failure reaching the registry.
    #[error("registry request failed: {0}")]
    Transport(String),

    /// Registry answered with an unexpected status.
    #[error("registry returned status {0}")]
    Status(u16),

    /// Registry payload could not be decoded.
    #[error("registry payload invalid: {0}")]
    Decode(String),
}

/// Registry rejected a script invocation.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Registry refused the call.
    #[error("registry rejected {target}: {detail}")]
    Rejected {
        /// Fully-qualified script reference
        target: String,
        /// Rejection details
        detail: String,
    },

    /// Registry could not be reached for the call.
    #[error("registry unreachable while invoking {target}: {detail}")]
    Unreachable {
        /// Fully-qualified script reference
        target: String,
        /// Transport details
        detail: String,
    },
}

/// Fatal outcome of a single turn.
#[derive(Debug, Error)]
pub enum TurnError {
    /// Backend failure; never retried by the dispatcher.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Prompt or live-state render failure (configuration defect).
    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// Registry lookups failed.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Registry rejected a dispatched action.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Stable error code surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Language-model backend failed
    BackendUnavailable,
    /// Prompt template failed to render
    TemplateError,
    /// Registry could not be queried
    RegistryUnavailable,
    /// Registry rejected the action
    DispatchFailed,
}

impl ErrorCode {
    /// Return the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BackendUnavailable => "backend_unavailable",
            ErrorCode::TemplateError => "template_error",
            ErrorCode::RegistryUnavailable => "registry_unavailable",
            ErrorCode::DispatchFailed => "dispatch_failed",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TurnError {
    /// Error code reported to the caller.
    pub fn code(&self) -> ErrorCode {
        match self {
            TurnError::Backend(_) => ErrorCode::BackendUnavailable,
            TurnError::Render(_) => ErrorCode::TemplateError,
            TurnError::Registry(_) => ErrorCode::RegistryUnavailable,
            TurnError::Dispatch(_) => ErrorCode::DispatchFailed,
        }
    }

    /// Natural-language message shown to the user.
    ///
    /// Render errors are configuration defects and are reported verbatim; all
    /// other variants use fixed wording so provider or transport text never
    /// reaches the user.
    pub fn user_message(&self) -> String {
        match self {
            TurnError::Backend(_) => {
                "Sorry, I had trouble talking to the language model backend. Please try again."
                    .to_string()
            }
            TurnError::Render(err) => format!("Sorry, I had a problem with my template: {err}"),
            TurnError::Registry(_) => {
                "Sorry, I couldn't reach your home right now. Please try again.".to_string()
            }
            TurnError::Dispatch(_) => {
                "Sorry, I wasn't able to run that action in your home.".to_string()
            }
        }
    }
}

/// Convenience result alias for turn processing
pub type TurnResult<T> = std::result::Result<T, TurnError>;
