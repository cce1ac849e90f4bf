use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::errors::CompletionError;
use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::providers::base::{Completion, CompletionProvider, StopReason, Usage};

/// A mock provider that returns pre-configured completions for testing
pub struct MockProvider {
    responses: Arc<Mutex<Vec<Completion>>>,
    calls: Arc<Mutex<u32>>,
    fail: bool,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of completions
    pub fn new(responses: Vec<Completion>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            calls: Arc::new(Mutex::new(0)),
            fail: false,
        }
    }

    /// A provider whose every call fails, for exercising turn failure paths
    pub fn failing() -> Self {
        Self::failing_after(Vec::new())
    }

    /// Serve the scripted completions, then fail every call once the script
    /// is exhausted. Lets tests observe partially-accrued turns.
    pub fn failing_after(responses: Vec<Completion>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            calls: Arc::new(Mutex::new(0)),
            fail: true,
        }
    }

    /// Shorthand for a completion carrying the given message and usage
    pub fn completion(message: Message, usage: Usage) -> Completion {
        let stop_reason = if message.tool_requests().is_empty() {
            StopReason::EndTurn
        } else {
            StopReason::ToolUse
        };
        Completion {
            message,
            stop_reason,
            usage,
        }
    }

    /// Number of complete() calls made so far
    pub fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }

    pub fn call_counter(&self) -> Arc<Mutex<u32>> {
        self.calls.clone()
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn complete(
        &self,
        _system: &str,
        _messages: &[Message],
        _tools: &[Tool],
    ) -> Result<Completion, CompletionError> {
        *self.calls.lock().unwrap() += 1;
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            if self.fail {
                return Err(CompletionError::Service("mock provider unreachable".into()));
            }
            // Return an empty final answer once the script runs out
            Ok(Completion {
                message: Message::assistant().with_text(""),
                stop_reason: StopReason::EndTurn,
                usage: Usage::default(),
            })
        } else {
            Ok(responses.remove(0))
        }
    }

    async fn complete_streaming(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
        deltas: mpsc::Sender<String>,
    ) -> Result<Completion, CompletionError> {
        let completion = self.complete(system, messages, tools).await?;
        // Stream word by word so tests can observe more than one delta
        for word in completion.message.text().split_inclusive(' ') {
            let _ = deltas.send(word.to_string()).await;
        }
        Ok(completion)
    }
}
