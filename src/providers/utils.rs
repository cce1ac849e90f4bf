use serde_json::{json, Value};

use crate::errors::{CompletionError, ToolError};
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};
use crate::providers::base::StopReason;

/// Convert internal messages to the chat-completions wire format. Tool
/// requests become `tool_calls` entries on an assistant message; tool
/// responses become `role: tool` messages keyed by `tool_call_id`.
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        let mut converted = json!({
            "role": match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            }
        });

        let mut output = Vec::new();

        for content in &message.content {
            match content {
                MessageContent::Text { text } => {
                    if !text.is_empty() {
                        converted["content"] = json!(text);
                    }
                }
                MessageContent::ToolRequest(request) => match &request.tool_call {
                    Ok(tool_call) => {
                        let tool_calls = converted
                            .as_object_mut()
                            .unwrap()
                            .entry("tool_calls")
                            .or_insert(json!([]));
                        tool_calls.as_array_mut().unwrap().push(json!({
                            "id": request.id,
                            "type": "function",
                            "function": {
                                "name": tool_call.name,
                                "arguments": tool_call.arguments.to_string(),
                            }
                        }));
                    }
                    Err(e) => {
                        output.push(json!({
                            "role": "tool",
                            "content": format!("Error: {}", e),
                            "tool_call_id": request.id
                        }));
                    }
                },
                MessageContent::ToolResponse(response) => match &response.tool_result {
                    Ok(payload) => {
                        output.push(json!({
                            "role": "tool",
                            "content": payload.to_string(),
                            "tool_call_id": response.id
                        }));
                    }
                    Err(e) => {
                        // Shown as tool output so the model can interpret the failure
                        output.push(json!({
                            "role": "tool",
                            "content": format!("The tool call returned the following error:\n{}", e),
                            "tool_call_id": response.id
                        }));
                    }
                },
            }
        }

        if converted.get("content").is_some() || converted.get("tool_calls").is_some() {
            output.insert(0, converted);
        }
        messages_spec.extend(output);
    }

    messages_spec
}

/// Convert tool definitions to the chat-completions `tools` list
pub fn tools_to_openai_spec(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema,
                }
            })
        })
        .collect()
}

/// Parse a chat-completions response body into an assistant message and stop
/// reason. A malformed `tool_calls` entry becomes a failed ToolRequest so the
/// exchange stays in the history with its error.
pub fn openai_response_to_message(
    response: &Value,
) -> Result<(Message, StopReason), CompletionError> {
    let choice = response
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| CompletionError::Response("no choices in response".to_string()))?;
    let original = choice
        .get("message")
        .ok_or_else(|| CompletionError::Response("no message in choice".to_string()))?;

    let mut message = Message::assistant();

    if let Some(text) = original.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            message = message.with_text(text);
        }
    }

    let mut saw_tool_call = false;
    if let Some(tool_calls) = original.get("tool_calls").and_then(|tc| tc.as_array()) {
        for entry in tool_calls {
            saw_tool_call = true;
            let id = entry
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let function = entry.get("function").cloned().unwrap_or(json!({}));
            let name = function.get("name").and_then(|v| v.as_str());
            let arguments = function
                .get("arguments")
                .and_then(|v| v.as_str())
                .map(serde_json::from_str::<Value>);

            let tool_call = match (name, arguments) {
                (Some(name), Some(Ok(arguments))) => Ok(ToolCall::new(name, arguments)),
                (Some(name), _) => Err(ToolError::InvalidParameters(format!(
                    "Could not interpret tool parameters for id {}: {}",
                    id, name
                ))),
                _ => Err(ToolError::NotFound(format!(
                    "Could not interpret tool call for id {}",
                    id
                ))),
            };
            message = message.with_tool_request(id, tool_call);
        }
    }

    let stop_reason = match choice.get("finish_reason").and_then(|v| v.as_str()) {
        Some("tool_calls") => StopReason::ToolUse,
        _ if saw_tool_call => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    };

    Ok((message, stop_reason))
}
