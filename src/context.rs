use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

use crate::models::message::Message;
use crate::store::ConversationStore;

/// Header record written as the first snapshot line, ahead of the messages
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Metadata {
    #[serde(default)]
    entries: HashMap<String, Value>,
}

/// The in-memory, ordered representation of one user's dialogue. Owned by
/// the orchestrator for the duration of a turn and persisted as an opaque
/// snapshot through the conversation store.
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    messages: Vec<Message>,
    metadata: Metadata,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a user's context from the store. Absent or corrupt data yields an
    /// empty context rather than an error: history is an aid, not a
    /// requirement, and a turn must still be able to proceed.
    pub async fn load(store: &dyn ConversationStore, user_id: &str) -> Self {
        let blob = match store.get(user_id).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return Self::new(),
            Err(e) => {
                warn!(user_id, error = %e, "conversation store read failed, starting empty");
                return Self::new();
            }
        };

        match Self::from_snapshot(&blob) {
            Ok(context) => context,
            Err(e) => {
                warn!(user_id, error = %e, "corrupt conversation snapshot, starting empty");
                Self::new()
            }
        }
    }

    fn from_snapshot(blob: &[u8]) -> anyhow::Result<Self> {
        let text = std::str::from_utf8(blob)?;
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());

        let metadata = match lines.next() {
            Some(first) => serde_json::from_str::<Metadata>(first)?,
            None => Metadata::default(),
        };

        let mut messages = Vec::new();
        for line in lines {
            messages.push(serde_json::from_str::<Message>(line)?);
        }

        Ok(Self { messages, metadata })
    }

    /// Serialize to the store's blob format: a metadata header line followed
    /// by one JSON line per message.
    pub fn snapshot(&self) -> anyhow::Result<Vec<u8>> {
        let mut out = Vec::new();
        serde_json::to_writer(&mut out, &self.metadata)?;
        out.push(b'\n');
        for message in &self.messages {
            serde_json::to_writer(&mut out, message)?;
            out.push(b'\n');
        }
        Ok(out)
    }

    pub fn append_user<S: Into<String>>(&mut self, text: S) {
        self.messages.push(Message::user().with_text(text));
    }

    pub fn append_assistant(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Record one tool round: the assistant message carrying the invocation
    /// blocks and the follow-up message carrying the matching results.
    pub fn append_tool_exchange(&mut self, request: Message, response: Message) {
        self.messages.push(request);
        self.messages.push(response);
    }

    /// The ordered sequence submitted to the completion service. Includes
    /// every historical tool exchange so the model retains awareness of its
    /// prior actions.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Truncate the dialogue. Idempotent; metadata survives.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn set_metadata<S: Into<String>>(&mut self, key: S, value: Value) {
        self.metadata.entries.insert(key.into(), value);
    }

    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.entries.get(key)
    }

    /// Refresh the last-active marker, called just before persisting
    pub fn touch(&mut self) {
        self.set_metadata("last_active", Value::from(Utc::now().to_rfc3339()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tool::ToolCall;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn sample_context() -> ConversationContext {
        let mut context = ConversationContext::new();
        context.append_user("create a task called buy milk");
        context.append_tool_exchange(
            Message::assistant()
                .with_tool_request("call_1", Ok(ToolCall::new("create_task", json!({"title": "buy milk"})))),
            Message::user().with_tool_response("call_1", Ok(json!({"task_id": "t-1"}))),
        );
        context.append_assistant(Message::assistant().with_text("Done, task created."));
        context
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let store = MemoryStore::new();
        let mut context = sample_context();
        context.touch();

        store
            .put("alice", context.snapshot().unwrap())
            .await
            .unwrap();
        let reloaded = ConversationContext::load(&store, "alice").await;

        assert_eq!(reloaded.messages(), context.messages());
        assert!(reloaded.metadata("last_active").is_some());
    }

    #[tokio::test]
    async fn test_load_missing_is_empty() {
        let store = MemoryStore::new();
        let context = ConversationContext::load(&store, "nobody").await;
        assert_eq!(context.message_count(), 0);
    }

    #[tokio::test]
    async fn test_load_corrupt_is_empty() {
        let store = MemoryStore::new();
        store
            .put("alice", b"{not valid json\n".to_vec())
            .await
            .unwrap();
        let context = ConversationContext::load(&store, "alice").await;
        assert_eq!(context.message_count(), 0);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut context = sample_context();
        context.clear();
        let after_first = context.messages().to_vec();
        context.clear();
        assert_eq!(context.messages(), after_first.as_slice());
        assert_eq!(context.message_count(), 0);
    }

    #[test]
    fn test_messages_preserve_tool_exchange_order() {
        let context = sample_context();
        let messages = context.messages();
        assert_eq!(messages.len(), 4);
        assert!(messages[1].content[0].as_tool_request().is_some());
        assert!(messages[2].content[0].as_tool_response().is_some());
    }
}
