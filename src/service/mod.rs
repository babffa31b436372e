//! NDJSON service for the Hestia dispatcher.
//!
//! Each line on the reader is a request envelope `{id, command, params}`; each
//! response is written as one line `{id, result}` or `{id, error}`. A
//! `handshake` must come first on every connection. Turns for one
//! conversation are serialised across all connections; different
//! conversations run concurrently.

use crate::PROTOCOL_VERSION;
use crate::conversation::ConversationId;
use crate::dispatcher::{Dispatcher, TurnRequest, TurnResponse};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

type Gate = Arc<tokio::sync::Mutex<()>>;

/// Service entry point shared by every connection.
#[derive(Clone)]
pub struct Service {
    dispatcher: Arc<Dispatcher>,
    gates: Arc<Mutex<HashMap<ConversationId, Gate>>>,
}

impl Service {
    /// Wrap a dispatcher.
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            gates: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Underlying dispatcher
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Process a turn, waiting for any in-flight turn on the same conversation.
    pub async fn process_turn(&self, request: TurnRequest) -> TurnResponse {
        let Some(id) = request.conversation_id.clone() else {
            return self.dispatcher.process_turn(request).await;
        };

        let gate = Arc::clone(self.gates.lock().entry(id.clone()).or_default());
        let response = {
            let _turn = gate.lock().await;
            self.dispatcher.process_turn(request).await
        };

        let mut gates = self.gates.lock();
        if Arc::strong_count(&gate) == 2 {
            gates.remove(&id);
        }
        response
    }

    /// Serve one connection until the reader is exhausted.
    pub async fn handle<R, W>(&self, reader: R, writer: W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut session = Session {
            service: self,
            writer,
            handshake_completed: false,
        };
        session.run(reader).await
    }
}

struct Session<'a, W> {
    service: &'a Service,
    writer: W,
    handshake_completed: bool,
}

impl<W: AsyncWrite + Unpin> Session<'_, W> {
    async fn run<R: AsyncBufRead + Unpin>(&mut self, reader: R) -> io::Result<()> {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<RequestEnvelope>(&line) {
                Ok(request) => self.handle_request(request).await,
                Err(err) => {
                    ResponseEnvelope::from_error(Value::Null, ServiceError::Parse(err.to_string()))
                }
            };
            self.write_response(response).await?;
        }

        Ok(())
    }

    async fn write_response(&mut self, envelope: ResponseEnvelope) -> io::Result<()> {
        let mut line = serde_json::to_vec(&envelope)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await
    }

    async fn handle_request(&mut self, request: RequestEnvelope) -> ResponseEnvelope {
        match self.dispatch(&request.command, &request.params).await {
            Ok(value) => ResponseEnvelope::success(request.id, value),
            Err(err) => ResponseEnvelope::from_error(request.id, err),
        }
    }

    async fn dispatch(&mut self, command: &str, params: &Value) -> Result<Value, ServiceError> {
        match command {
            "handshake" => self.cmd_handshake(params),
            "process_turn" => self.cmd_process_turn(params).await,
            "conversation_history" => self.cmd_conversation_history(params),
            "list_conversations" => self.cmd_list_conversations(),
            "forget_conversation" => self.cmd_forget_conversation(params),
            other => Err(ServiceError::Unsupported(other.to_string())),
        }
    }

    fn cmd_handshake(&mut self, params: &Value) -> Result<Value, ServiceError> {
        let client = params
            .get("client")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::invalid_param("client"))?;

        let requested = params
            .get("protocol_version")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::invalid_param("protocol_version"))?;

        if requested != PROTOCOL_VERSION {
            return Err(ServiceError::Protocol(format!(
                "unsupported protocol version: expected {}, got {}",
                PROTOCOL_VERSION, requested
            )));
        }

        self.handshake_completed = true;
        tracing::debug!(client, "handshake completed");

        Ok(json!({
            "protocol_version": PROTOCOL_VERSION,
            "dispatcher": {
                "version": crate::VERSION,
                "client": client,
                "features": [
                    "process_turn",
                    "conversation_history",
                    "list_conversations",
                    "forget_conversation"
                ]
            }
        }))
    }

    fn ensure_handshake(&self) -> Result<(), ServiceError> {
        if self.handshake_completed {
            Ok(())
        } else {
            Err(ServiceError::Protocol(
                "handshake required before issuing commands".into(),
            ))
        }
    }

    async fn cmd_process_turn(&mut self, params: &Value) -> Result<Value, ServiceError> {
        self.ensure_handshake()?;
        let request: TurnRequest = serde_json::from_value(params.clone())
            .map_err(|err| ServiceError::InvalidParams(err.to_string()))?;
        if request.utterance.trim().is_empty() {
            return Err(ServiceError::invalid_param("text"));
        }

        let response = self.service.process_turn(request).await;
        serde_json::to_value(response).map_err(|err| ServiceError::Internal(err.to_string()))
    }

    fn cmd_conversation_history(&mut self, params: &Value) -> Result<Value, ServiceError> {
        self.ensure_handshake()?;
        let id = conversation_param(params)?;
        let conversation = self
            .service
            .dispatcher
            .store()
            .peek(&id)
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))?;

        Ok(json!({
            "conversation_id": id,
            "intent": conversation.intent,
            "messages": conversation.messages,
        }))
    }

    fn cmd_list_conversations(&mut self) -> Result<Value, ServiceError> {
        self.ensure_handshake()?;
        Ok(json!({ "conversations": self.service.dispatcher.store().ids() }))
    }

    fn cmd_forget_conversation(&mut self, params: &Value) -> Result<Value, ServiceError> {
        self.ensure_handshake()?;
        let id = conversation_param(params)?;
        let forgotten = self.service.dispatcher.store().remove(&id).is_some();
        Ok(json!({ "conversation_id": id, "forgotten": forgotten }))
    }
}

fn conversation_param(params: &Value) -> Result<ConversationId, ServiceError> {
    params
        .get("conversation_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(ConversationId::from_string)
        .ok_or_else(|| ServiceError::invalid_param("conversation_id"))
}

enum ServiceError {
    Parse(String),
    InvalidParams(String),
    Unsupported(String),
    Protocol(String),
    NotFound(String),
    Internal(String),
}

impl ServiceError {
    fn invalid_param(name: &str) -> Self {
        ServiceError::InvalidParams(format!("missing or invalid parameter: {}", name))
    }
}

#[derive(Deserialize)]
struct RequestEnvelope {
    id: Value,
    command: String,
    #[serde(default)]
    params: Value,
}

#[derive(Serialize)]
struct ResponseEnvelope {
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorEnvelope>,
}

impl ResponseEnvelope {
    fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    fn from_error(id: Value, error: ServiceError) -> Self {
        Self {
            id,
            result: None,
            error: Some(ErrorEnvelope::from(error)),
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    code: String,
    message: String,
}

impl From<ServiceError> for ErrorEnvelope {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::Parse(message) => ErrorEnvelope {
                code: "parse_error".into(),
                message,
            },
            ServiceError::InvalidParams(message) => ErrorEnvelope {
                code: "invalid_params".into(),
                message,
            },
            ServiceError::Unsupported(command) => ErrorEnvelope {
                code: "unsupported_command".into(),
                message: format!("Command '{command}' is not supported"),
            },
            ServiceError::Protocol(message) => ErrorEnvelope {
                code: "protocol_error".into(),
                message,
            },
            ServiceError::NotFound(id) => ErrorEnvelope {
                code: "not_found".into(),
                message: format!("Conversation '{id}' not found"),
            },
            ServiceError::Internal(message) => ErrorEnvelope {
                code: "internal_error".into(),
                message,
            },
        }
    }
}
