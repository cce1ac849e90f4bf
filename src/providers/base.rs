use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::CompletionError;
use crate::models::message::Message;
use crate::models::tool::Tool;

/// Token and dollar usage reported for a single completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    /// Dollar cost of the call, when the provider can price it
    pub cost: Option<f64>,
    pub currency: String,
}

impl Default for Usage {
    fn default() -> Self {
        Self::new(None, None, None)
    }
}

impl Usage {
    pub fn new(input_tokens: Option<i32>, output_tokens: Option<i32>, cost: Option<f64>) -> Self {
        Self {
            input_tokens,
            output_tokens,
            cost,
            currency: "USD".to_string(),
        }
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model produced a final textual answer
    EndTurn,
    /// The model is requesting one or more tool invocations
    ToolUse,
}

/// A single completion response: the assistant message, the stop condition,
/// and the usage the call incurred.
#[derive(Debug, Clone)]
pub struct Completion {
    pub message: Message,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

/// Base trait for completion services (OpenAI-compatible, mocks, etc)
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Generate the next assistant message for the given conversation
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<Completion, CompletionError>;

    /// Streaming variant: emits incremental text deltas on `deltas` while the
    /// response is generated, then returns the same final structure as
    /// `complete`. The default implementation completes non-incrementally and
    /// emits the final text as a single delta.
    async fn complete_streaming(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
        deltas: mpsc::Sender<String>,
    ) -> Result<Completion, CompletionError> {
        let completion = self.complete(system, messages, tools).await?;
        let text = completion.message.text();
        if !text.is_empty() {
            // A closed receiver means the caller stopped listening, which is
            // not an error for the completion itself.
            let _ = deltas.send(text).await;
        }
        Ok(completion)
    }
}
