//! Typed error hierarchy for the metaprompt orchestrator.
//!
//! Three top-level enums cover the three subsystems:
//! - `OrchestratorError`: session operation failures (the public taxonomy)
//! - `StoreError`: session persistence failures
//! - `LlmError`: text-generation backend failures

use thiserror::Error;

use crate::session::SessionStage;

/// Errors surfaced by the public orchestrator operations.
///
/// `MaxDepthReached` is deliberately absent: hitting the recursion ceiling is
/// a normal terminal outcome (the session transitions to `Completed`), not a
/// failure. It is reported via `RefineOutcome`, never as an `Err`.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Session {id} not found")]
    SessionNotFound { id: String },

    #[error("Action '{action}' is not allowed in stage {current}; allowed stages: {allowed:?}")]
    InvalidStage {
        action: &'static str,
        current: SessionStage,
        allowed: Vec<SessionStage>,
    },

    #[error("Operation '{operation}' requires non-empty prompt text")]
    MissingPrompt { operation: &'static str },

    #[error("Backend call failed during {phase}: {message}")]
    Llm { phase: &'static str, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Unexpected error: {0}")]
    Unexpected(#[from] anyhow::Error),
}

impl OrchestratorError {
    /// Wrap a backend error with the phase it occurred in.
    pub fn llm(phase: &'static str, err: LlmError) -> Self {
        Self::Llm {
            phase,
            message: err.to_string(),
        }
    }
}

/// Errors from a session store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session {id} not found")]
    NotFound { id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Errors from a text-generation backend call.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Provider '{0}' is not registered")]
    UnknownProvider(String),

    #[error("Provider misconfigured: {0}")]
    Misconfiguration(String),

    #[error("Request to {provider} failed: {message}")]
    Request { provider: String, message: String },

    #[error("{provider} returned HTTP {status}: {body}")]
    Api {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Malformed response from {provider}: {message}")]
    MalformedResponse { provider: String, message: String },
}
