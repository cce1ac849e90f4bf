use async_trait::async_trait;
use reqwest::Client;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;

use super::base::{Completion, CompletionProvider, StopReason, Usage};
use super::utils::{messages_to_openai_spec, openai_response_to_message, tools_to_openai_spec};
use crate::errors::{CompletionError, ToolError};
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall};

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
    /// Dollar price per input token, used to compute call cost
    pub input_token_price: f64,
    /// Dollar price per output token
    pub output_token_price: f64,
}

/// Completion provider speaking the chat-completions wire format with tool
/// calling enabled.
pub struct OpenAiProvider {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(Self { client, config })
    }

    fn get_usage(&self, data: &Value) -> Result<Usage, CompletionError> {
        let usage = data
            .get("usage")
            .ok_or_else(|| CompletionError::Response("no usage data in response".to_string()))?;
        Ok(self.usage_from(usage))
    }

    fn usage_from(&self, usage: &Value) -> Usage {
        let input_tokens = usage
            .get("prompt_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32);
        let output_tokens = usage
            .get("completion_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32);

        let cost = match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(
                input as f64 * self.config.input_token_price
                    + output as f64 * self.config.output_token_price,
            ),
            _ => None,
        };

        Usage::new(input_tokens, output_tokens, cost)
    }

    fn request_payload(&self, system: &str, messages: &[Message], tools: &[Tool]) -> Value {
        let mut messages_array = vec![json!({
            "role": "system",
            "content": system
        })];
        messages_array.extend(messages_to_openai_spec(messages));

        let mut payload = json!({
            "model": self.config.model,
            "messages": messages_array
        });

        if !tools.is_empty() {
            payload
                .as_object_mut()
                .unwrap()
                .insert("tools".to_string(), json!(tools_to_openai_spec(tools)));
        }
        if let Some(temp) = self.config.temperature {
            payload
                .as_object_mut()
                .unwrap()
                .insert("temperature".to_string(), json!(temp));
        }
        if let Some(tokens) = self.config.max_tokens {
            payload
                .as_object_mut()
                .unwrap()
                .insert("max_tokens".to_string(), json!(tokens));
        }
        payload
    }

    async fn send(&self, payload: &Value) -> Result<reqwest::Response, CompletionError> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(payload)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response),
            status if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() >= 500 => {
                Err(CompletionError::Service(format!("Server error: {}", status)))
            }
            status => {
                let error_text = response.text().await.unwrap_or_default();
                Err(CompletionError::Service(format!(
                    "Request failed: {} - {}",
                    status, error_text
                )))
            }
        }
    }

    async fn post(&self, payload: Value) -> Result<Value, CompletionError> {
        Ok(self.send(&payload).await?.json().await?)
    }
}

/// What one streamed response has accumulated so far: text, per-index tool
/// call fragments (id, name, argument text arrive in pieces), the finish
/// reason, and the trailing usage record.
#[derive(Default)]
struct StreamAccumulator {
    text: String,
    tool_calls: Vec<(String, String, String)>,
    finish_reason: Option<String>,
    usage: Option<Value>,
}

impl StreamAccumulator {
    /// Fold one SSE event into the accumulated state. Returns the text delta
    /// carried by this event, if any.
    fn absorb(&mut self, event: &Value) -> Option<String> {
        if let Some(usage) = event.get("usage").filter(|u| !u.is_null()) {
            self.usage = Some(usage.clone());
        }

        let choice = event.get("choices").and_then(|c| c.get(0))?;
        if let Some(reason) = choice.get("finish_reason").and_then(|v| v.as_str()) {
            self.finish_reason = Some(reason.to_string());
        }

        let delta = choice.get("delta")?;
        if let Some(calls) = delta.get("tool_calls").and_then(|v| v.as_array()) {
            for call in calls {
                let index = call.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
                while self.tool_calls.len() <= index {
                    self.tool_calls.push(Default::default());
                }
                let (id, name, arguments) = &mut self.tool_calls[index];
                if let Some(fragment) = call.get("id").and_then(|v| v.as_str()) {
                    id.push_str(fragment);
                }
                if let Some(function) = call.get("function") {
                    if let Some(fragment) = function.get("name").and_then(|v| v.as_str()) {
                        name.push_str(fragment);
                    }
                    if let Some(fragment) = function.get("arguments").and_then(|v| v.as_str()) {
                        arguments.push_str(fragment);
                    }
                }
            }
        }

        delta
            .get("content")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    fn into_completion(self, usage: Usage) -> Completion {
        let mut message = Message::assistant();
        if !self.text.is_empty() {
            message = message.with_text(self.text.as_str());
        }

        let saw_tool_calls = !self.tool_calls.is_empty();
        for (id, name, arguments) in self.tool_calls {
            let tool_call = if name.is_empty() {
                Err(ToolError::NotFound(format!(
                    "Could not interpret tool call for id {}",
                    id
                )))
            } else {
                match serde_json::from_str::<Value>(&arguments) {
                    Ok(arguments) => Ok(ToolCall::new(name, arguments)),
                    Err(_) => Err(ToolError::InvalidParameters(format!(
                        "Could not interpret tool parameters for id {}: {}",
                        id, name
                    ))),
                }
            };
            message = message.with_tool_request(id, tool_call);
        }

        let stop_reason = match self.finish_reason.as_deref() {
            Some("tool_calls") => StopReason::ToolUse,
            _ if saw_tool_calls => StopReason::ToolUse,
            _ => StopReason::EndTurn,
        };

        Completion {
            message,
            stop_reason,
            usage,
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<Completion, CompletionError> {
        let payload = self.request_payload(system, messages, tools);
        let response = self.post(payload).await?;

        if let Some(error) = response.get("error") {
            return Err(CompletionError::Service(format!("API error: {}", error)));
        }

        let (message, stop_reason) = openai_response_to_message(&response)?;
        let usage = self.get_usage(&response)?;

        Ok(Completion {
            message,
            stop_reason,
            usage,
        })
    }

    /// Server-sent-events mode: text deltas go out on `deltas` as each chunk
    /// arrives instead of waiting for the full response.
    async fn complete_streaming(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
        deltas: mpsc::Sender<String>,
    ) -> Result<Completion, CompletionError> {
        let mut payload = self.request_payload(system, messages, tools);
        let object = payload.as_object_mut().unwrap();
        object.insert("stream".to_string(), json!(true));
        object.insert(
            "stream_options".to_string(),
            json!({"include_usage": true}),
        );

        let mut response = self.send(&payload).await?;
        let mut accumulator = StreamAccumulator::default();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = response.chunk().await? {
            buffer.extend_from_slice(&chunk);
            // SSE is line-delimited; a network chunk may split a line
            while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&line);
                let Some(data) = line.trim().strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data.is_empty() || data == "[DONE]" {
                    continue;
                }
                let event: Value = serde_json::from_str(data).map_err(|e| {
                    CompletionError::Response(format!("bad stream event: {}", e))
                })?;
                if let Some(error) = event.get("error") {
                    return Err(CompletionError::Service(format!("API error: {}", error)));
                }
                if let Some(text) = accumulator.absorb(&event) {
                    accumulator.text.push_str(&text);
                    // A closed receiver means the caller stopped listening
                    let _ = deltas.send(text).await;
                }
            }
        }

        let usage = match &accumulator.usage {
            Some(usage) => self.usage_from(usage),
            None => Usage::default(),
        };
        Ok(accumulator.into_completion(usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::base::StopReason;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup_mock_server(response_body: Value) -> (MockServer, OpenAiProvider) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(response_body))
            .mount(&mock_server)
            .await;

        let config = OpenAiConfig {
            host: mock_server.uri(),
            api_key: "test_api_key".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: None,
            max_tokens: None,
            input_token_price: 0.000001,
            output_token_price: 0.000002,
        };

        let provider = OpenAiProvider::new(config).unwrap();
        (mock_server, provider)
    }

    #[tokio::test]
    async fn test_complete_basic() {
        let response_body = json!({
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Hello! How can I assist you today?"
                },
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 100,
                "completion_tokens": 10,
                "total_tokens": 110
            }
        });
        let (_server, provider) = setup_mock_server(response_body).await;

        let messages = vec![Message::user().with_text("Hi")];
        let completion = provider.complete("You help.", &messages, &[]).await.unwrap();

        assert_eq!(completion.stop_reason, StopReason::EndTurn);
        assert_eq!(
            completion.message.text(),
            "Hello! How can I assist you today?"
        );
        assert_eq!(completion.usage.input_tokens, Some(100));
        assert_eq!(completion.usage.output_tokens, Some(10));
        let cost = completion.usage.cost.unwrap();
        assert!((cost - 0.00012).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_complete_tool_call() {
        let response_body = json!({
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "create_task",
                            "arguments": "{\"title\": \"buy milk\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {
                "prompt_tokens": 50,
                "completion_tokens": 20,
                "total_tokens": 70
            }
        });
        let (_server, provider) = setup_mock_server(response_body).await;

        let tools = vec![Tool::new(
            "create_task",
            "Create a task",
            json!({"type": "object", "properties": {"title": {"type": "string"}}}),
        )];
        let messages = vec![Message::user().with_text("create a task called buy milk")];
        let completion = provider
            .complete("You help.", &messages, &tools)
            .await
            .unwrap();

        assert_eq!(completion.stop_reason, StopReason::ToolUse);
        let requests = completion.message.tool_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].id, "call_1");
    }

    async fn setup_streaming_server(body: &str) -> (MockServer, OpenAiProvider) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/event-stream"),
            )
            .mount(&mock_server)
            .await;

        let config = OpenAiConfig {
            host: mock_server.uri(),
            api_key: "test_api_key".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: None,
            max_tokens: None,
            input_token_price: 0.000001,
            output_token_price: 0.000002,
        };

        let provider = OpenAiProvider::new(config).unwrap();
        (mock_server, provider)
    }

    #[tokio::test]
    async fn test_streaming_emits_incremental_deltas() {
        let body = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo!\"}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":100,\"completion_tokens\":10}}\n\n",
            "data: [DONE]\n\n",
        );
        let (_server, provider) = setup_streaming_server(body).await;

        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let messages = vec![Message::user().with_text("Hi")];
        let completion = provider
            .complete_streaming("You help.", &messages, &[], tx)
            .await
            .unwrap();

        let mut deltas = Vec::new();
        while let Some(delta) = rx.recv().await {
            deltas.push(delta);
        }
        assert_eq!(deltas, vec!["Hel", "lo!"]);

        assert_eq!(completion.message.text(), "Hello!");
        assert_eq!(completion.stop_reason, StopReason::EndTurn);
        assert_eq!(completion.usage.input_tokens, Some(100));
        assert_eq!(completion.usage.output_tokens, Some(10));
        let cost = completion.usage.cost.unwrap();
        assert!((cost - 0.00012).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_streaming_assembles_fragmented_tool_call() {
        let body = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"create_task\",\"arguments\":\"\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"title\\\": \"}}]}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"buy milk\\\"}\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        let (_server, provider) = setup_streaming_server(body).await;

        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let messages = vec![Message::user().with_text("create a task called buy milk")];
        let completion = provider
            .complete_streaming("You help.", &messages, &[], tx)
            .await
            .unwrap();

        assert!(rx.recv().await.is_none());
        assert_eq!(completion.stop_reason, StopReason::ToolUse);
        let requests = completion.message.tool_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].id, "call_1");
        let call = requests[0].tool_call.as_ref().unwrap();
        assert_eq!(call.name, "create_task");
        assert_eq!(call.arguments["title"], "buy milk");
    }

    #[tokio::test]
    async fn test_server_error_surfaces() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let provider = OpenAiProvider::new(OpenAiConfig {
            host: mock_server.uri(),
            api_key: "k".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: None,
            max_tokens: None,
            input_token_price: 0.0,
            output_token_price: 0.0,
        })
        .unwrap();

        let messages = vec![Message::user().with_text("Hi")];
        let result = provider.complete("You help.", &messages, &[]).await;
        assert!(matches!(result, Err(CompletionError::Service(_))));
    }
}
