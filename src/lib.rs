//! Hestia – a conversational intent dispatcher for the smart home
//!
//! This crate turns free-text utterances into validated home-automation
//! actions:
//! - Per-conversation dialogue state with bounded retention
//! - Intent classification through a language-model backend
//! - Intent-specific prompts combining a persona, instructions and live state
//! - Validation of the model's JSON actions against a registry, with one
//!   bounded clarification retry per turn
//! - Script dispatch through the registry, immediately or at a scheduled time
//! - An NDJSON service for hosting the dispatcher in other processes

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Language-model backend contract and adapters
pub mod backend;
/// Intent classification
pub mod classifier;
/// Configuration file and environment overrides
pub mod config;
/// Conversation state and store
pub mod conversation;
/// Turn state machine
pub mod dispatcher;
/// Error taxonomy
pub mod error;
/// Intent enumeration
pub mod intent;
/// Model action payloads
pub mod payload;
/// Prompt assembly
pub mod prompt;
/// Home-automation registry contract and adapters
pub mod registry;
/// NDJSON service layer
pub mod service;

// Re-export key types for convenience
pub use config::HestiaConfig;
pub use dispatcher::{Dispatcher, TurnOutcome, TurnRequest, TurnResponse};
pub use intent::Intent;

/// Current version of Hestia
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol version for the NDJSON service
pub const PROTOCOL_VERSION: &str = "1.0.0";
