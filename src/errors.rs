use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures produced while executing a tool. These are recoverable from the
/// model's point of view: they are serialized into the conversation as tool
/// results so the model can react on the next round.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Tool unavailable: {0}")]
    Unavailable(String),
}

pub type ToolResult<T> = Result<T, ToolError>;

/// Failures calling the completion service. The orchestrator does not retry
/// these; a retry policy, if any, belongs inside the provider.
#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("Completion request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Completion service error: {0}")]
    Service(String),

    #[error("Malformed completion response: {0}")]
    Response(String),
}

/// Turn-level failures that abort the whole turn.
#[derive(Error, Debug)]
pub enum TurnError {
    #[error("Invalid input: {0}")]
    Input(String),

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error("Conversation store error: {0}")]
    Store(String),

    #[error("Turn timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Internal error: {0}")]
    Internal(String),
}
