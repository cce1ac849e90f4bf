use super::role::Role;
use super::tool::ToolCall;
use crate::errors::ToolResult;
use chrono::Utc;
use serde_json::Value;

/// A tool invocation requested by the model, with the id used to correlate
/// the eventual result back to it.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolRequest {
    pub id: String,
    pub tool_call: ToolResult<ToolCall>,
}

/// The outcome of a tool invocation, keyed by the originating request id.
/// A failed invocation is still a well-formed result so the model can see
/// what went wrong.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolResponse {
    pub id: String,
    pub tool_result: ToolResult<Value>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
/// One ordered content block within a message
pub enum MessageContent {
    Text { text: String },
    ToolRequest(ToolRequest),
    ToolResponse(ToolResponse),
}

impl MessageContent {
    pub fn text<S: Into<String>>(text: S) -> Self {
        MessageContent::Text { text: text.into() }
    }

    pub fn tool_request<S: Into<String>>(id: S, tool_call: ToolResult<ToolCall>) -> Self {
        MessageContent::ToolRequest(ToolRequest {
            id: id.into(),
            tool_call,
        })
    }

    pub fn tool_response<S: Into<String>>(id: S, tool_result: ToolResult<Value>) -> Self {
        MessageContent::ToolResponse(ToolResponse {
            id: id.into(),
            tool_result,
        })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn as_tool_request(&self) -> Option<&ToolRequest> {
        if let MessageContent::ToolRequest(ref tool_request) = self {
            Some(tool_request)
        } else {
            None
        }
    }

    pub fn as_tool_response(&self) -> Option<&ToolResponse> {
        if let MessageContent::ToolResponse(ref tool_response) = self {
            Some(tool_response)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
/// One dialogue entry: a role, a creation timestamp, and ordered content
pub struct Message {
    pub role: Role,
    pub created: i64,
    pub content: Vec<MessageContent>,
}

impl Message {
    /// Create a new user message with the current timestamp
    pub fn user() -> Self {
        Message {
            role: Role::User,
            created: Utc::now().timestamp(),
            content: Vec::new(),
        }
    }

    /// Create a new assistant message with the current timestamp
    pub fn assistant() -> Self {
        Message {
            role: Role::Assistant,
            created: Utc::now().timestamp(),
            content: Vec::new(),
        }
    }

    pub fn with_content(mut self, content: MessageContent) -> Self {
        self.content.push(content);
        self
    }

    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_content(MessageContent::text(text))
    }

    pub fn with_tool_request<S: Into<String>>(
        self,
        id: S,
        tool_call: ToolResult<ToolCall>,
    ) -> Self {
        self.with_content(MessageContent::tool_request(id, tool_call))
    }

    pub fn with_tool_response<S: Into<String>>(self, id: S, result: ToolResult<Value>) -> Self {
        self.with_content(MessageContent::tool_response(id, result))
    }

    /// Concatenated text blocks, used to extract the final answer
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.as_text())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// All tool requests in this message, in emission order
    pub fn tool_requests(&self) -> Vec<&ToolRequest> {
        self.content
            .iter()
            .filter_map(|c| c.as_tool_request())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ToolError;
    use serde_json::json;

    #[test]
    fn test_builders_preserve_block_order() {
        let message = Message::assistant()
            .with_text("Let me check that.")
            .with_tool_request("a1", Ok(ToolCall::new("create_task", json!({"title": "x"}))));

        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content.len(), 2);
        assert_eq!(message.content[0].as_text(), Some("Let me check that."));
        assert!(message.content[1].as_tool_request().is_some());
    }

    #[test]
    fn test_text_joins_only_text_blocks() {
        let message = Message::assistant()
            .with_text("first")
            .with_tool_request("a1", Err(ToolError::NotFound("nope".into())))
            .with_text("second");
        assert_eq!(message.text(), "first\nsecond");
    }

    #[test]
    fn test_message_serialization_round_trip() {
        let message = Message::user()
            .with_tool_response("a1", Ok(json!({"task_id": "t-1"})))
            .with_tool_response("a2", Err(ToolError::Unavailable("gateway".into())));

        let encoded = serde_json::to_string(&message).unwrap();
        let decoded: Message = serde_json::from_str(&encoded).unwrap();
        assert_eq!(message, decoded);
    }
}
