use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, warn};

use crate::context::ConversationContext;
use crate::cost::{CostAggregator, CostSink, TurnCostRecord};
use crate::errors::{CompletionError, TurnError};
use crate::events::TurnEvent;
use crate::models::message::{Message, ToolRequest, ToolResponse};
use crate::models::tool::Tool;
use crate::prompt::{self, ContextHints};
use crate::providers::base::{Completion, CompletionProvider, StopReason};
use crate::registry::ToolRegistry;
use crate::store::ConversationStore;

const ROUND_CAP_ANSWER: &str = "I ran out of action rounds before finishing everything you asked \
for. The steps I already took are done; please ask again if you'd like me to continue with the \
rest.";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum MODEL_CALL -> TOOL_ROUND cycles per turn
    pub max_tool_rounds: u32,
    /// Wall-clock bound on the whole cycle, covering stalled providers
    pub turn_timeout: Duration,
    /// Provider label stamped onto cost records
    pub provider_name: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 5,
            turn_timeout: Duration::from_secs(120),
            provider_name: "openai".to_string(),
        }
    }
}

/// One user turn as submitted by the caller.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub user_id: String,
    pub message: String,
    pub hints: ContextHints,
    pub allow_tools: bool,
}

impl TurnRequest {
    pub fn new<U: Into<String>, M: Into<String>>(user_id: U, message: M) -> Self {
        Self {
            user_id: user_id.into(),
            message: message.into(),
            hints: ContextHints::default(),
            allow_tools: true,
        }
    }
}

/// The non-streaming response for a completed turn.
#[derive(Debug, Clone)]
pub struct TurnReply {
    pub answer: String,
    pub tool_results: Vec<ToolResponse>,
    pub cost: TurnCostRecord,
    pub message_count: usize,
}

/// Drives one user turn through bounded rounds of model calls and tool
/// execution, streaming events as they happen and accounting cost across
/// every model call. Turns for different users run independently; turns for
/// the same user serialize on a per-user lock so context writes never
/// interleave.
pub struct Orchestrator {
    provider: Arc<dyn CompletionProvider>,
    registry: Arc<ToolRegistry>,
    store: Arc<dyn ConversationStore>,
    cost_sink: Arc<dyn CostSink>,
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        registry: Arc<ToolRegistry>,
        store: Arc<dyn ConversationStore>,
        cost_sink: Arc<dyn CostSink>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            provider,
            registry,
            store,
            cost_sink,
            locks: StdMutex::new(HashMap::new()),
            config,
        }
    }

    /// Run a turn to completion and return the full answer at once.
    pub async fn chat(&self, request: TurnRequest) -> Result<TurnReply, TurnError> {
        self.run(&request, "chat", None).await
    }

    /// Run a turn on a background task and stream its events. The receiver
    /// may be dropped at any point; tool side effects already dispatched
    /// still complete and the context still persists.
    pub fn chat_stream(self: Arc<Self>, request: TurnRequest) -> ReceiverStream<TurnEvent> {
        let (tx, rx) = mpsc::channel(100);
        let orchestrator = self;
        tokio::spawn(async move {
            match orchestrator.run(&request, "chat-stream", Some(&tx)).await {
                Ok(reply) => {
                    let _ = tx
                        .send(TurnEvent::Done {
                            cost: reply.cost,
                            message_count: reply.message_count,
                        })
                        .await;
                }
                Err(e) => {
                    error!(user_id = %request.user_id, error = %e, "turn failed");
                    let _ = tx
                        .send(TurnEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                }
            }
        });
        ReceiverStream::new(rx)
    }

    /// Truncate a user's conversation. Idempotent.
    pub async fn clear(&self, user_id: &str) -> Result<(), TurnError> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let mut context = ConversationContext::load(self.store.as_ref(), user_id).await;
        context.clear();
        context.touch();
        let blob = context
            .snapshot()
            .map_err(|e| TurnError::Store(e.to_string()))?;
        self.store
            .put(user_id, blob)
            .await
            .map_err(|e| TurnError::Store(e.to_string()))
    }

    fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn run(
        &self,
        request: &TurnRequest,
        trigger: &str,
        events: Option<&mpsc::Sender<TurnEvent>>,
    ) -> Result<TurnReply, TurnError> {
        let text = request.message.trim();
        if text.is_empty() {
            // Rejected before any model call
            return Err(TurnError::Input("message must not be empty".to_string()));
        }

        let lock = self.user_lock(&request.user_id);
        let _guard = lock.lock().await;

        let mut context = ConversationContext::load(self.store.as_ref(), &request.user_id).await;
        context.append_user(text);
        let system = prompt::system_prompt(&request.hints)?;

        let mut aggregator = CostAggregator::new();
        let mut rounds_done = 0u32;
        let outcome = match timeout(
            self.config.turn_timeout,
            self.run_rounds(
                &mut context,
                &system,
                request,
                &mut aggregator,
                &mut rounds_done,
                events,
            ),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(TurnError::Timeout(self.config.turn_timeout)),
        };

        match outcome {
            Ok((answer, tool_results)) => {
                context.touch();
                // A failed save degrades to "answered but not remembered"
                match context.snapshot() {
                    Ok(blob) => {
                        if let Err(e) = self.store.put(&request.user_id, blob).await {
                            warn!(user_id = %request.user_id, error = %e,
                                "turn completed but context was not saved");
                        }
                    }
                    Err(e) => {
                        warn!(user_id = %request.user_id, error = %e,
                            "turn completed but context could not be serialized");
                    }
                }

                let message_count = context.message_count();
                let used_tools = rounds_done > 0;
                let cost = aggregator
                    .finalize(
                        self.cost_sink.as_ref(),
                        &request.user_id,
                        &self.config.provider_name,
                        trigger,
                        used_tools,
                        message_count,
                    )
                    .await;

                Ok(TurnReply {
                    answer,
                    tool_results,
                    cost,
                    message_count,
                })
            }
            Err(e) => {
                // The context is not persisted with the failed attempt, but
                // compute already spent is still billed.
                let used_tools = rounds_done > 0;
                aggregator
                    .finalize(
                        self.cost_sink.as_ref(),
                        &request.user_id,
                        &self.config.provider_name,
                        trigger,
                        used_tools,
                        context.message_count(),
                    )
                    .await;
                Err(e)
            }
        }
    }

    /// The MODEL_CALL <-> TOOL_ROUND cycle. Returns the final answer text and
    /// every tool result produced along the way.
    async fn run_rounds(
        &self,
        context: &mut ConversationContext,
        system: &str,
        request: &TurnRequest,
        aggregator: &mut CostAggregator,
        rounds_done: &mut u32,
        events: Option<&mpsc::Sender<TurnEvent>>,
    ) -> Result<(String, Vec<ToolResponse>), TurnError> {
        let tools = if request.allow_tools {
            self.registry.tool_specs()
        } else {
            Vec::new()
        };

        let mut tool_results: Vec<ToolResponse> = Vec::new();

        loop {
            let completion = self
                .model_call(system, context.messages(), &tools, events)
                .await?;
            aggregator.record(&completion.usage);

            let requests: Vec<ToolRequest> = completion
                .message
                .tool_requests()
                .into_iter()
                .cloned()
                .collect();
            let wants_tools =
                completion.stop_reason == StopReason::ToolUse && !requests.is_empty();

            if !wants_tools {
                let answer = completion.message.text();
                context.append_assistant(completion.message);
                return Ok((answer, tool_results));
            }

            if *rounds_done >= self.config.max_tool_rounds {
                // Designed termination: drop the pending requests and close
                // the turn with an explanation rather than looping on.
                warn!(
                    user_id = %request.user_id,
                    rounds = *rounds_done,
                    "tool round cap reached, synthesizing final answer"
                );
                if let Some(tx) = events {
                    let _ = tx
                        .send(TurnEvent::TextDelta {
                            text: ROUND_CAP_ANSWER.to_string(),
                        })
                        .await;
                }
                context.append_assistant(Message::assistant().with_text(ROUND_CAP_ANSWER));
                return Ok((ROUND_CAP_ANSWER.to_string(), tool_results));
            }

            debug!(user_id = %request.user_id, round = *rounds_done, calls = requests.len(),
                "entering tool round");

            // Execute in emission order: the model may have phrased later
            // calls assuming earlier ones already ran.
            let mut response = Message::user();
            for tool_request in &requests {
                let name = match &tool_request.tool_call {
                    Ok(call) => call.name.clone(),
                    Err(_) => "invalid".to_string(),
                };
                if let Some(tx) = events {
                    let _ = tx
                        .send(TurnEvent::ToolStarted {
                            id: tool_request.id.clone(),
                            name,
                        })
                        .await;
                }

                let result = match &tool_request.tool_call {
                    Ok(call) => self.registry.dispatch(call, &request.user_id).await,
                    Err(e) => Err(e.clone()),
                };

                if let Some(tx) = events {
                    let _ = tx
                        .send(TurnEvent::ToolFinished {
                            id: tool_request.id.clone(),
                            ok: result.is_ok(),
                        })
                        .await;
                }
                response = response.with_tool_response(tool_request.id.clone(), result);
            }

            tool_results.extend(
                response
                    .content
                    .iter()
                    .filter_map(|c| c.as_tool_response())
                    .cloned(),
            );
            context.append_tool_exchange(completion.message, response);
            *rounds_done += 1;
        }
    }

    /// One completion call. When streaming, text deltas are forwarded to the
    /// event channel as they arrive, interleaved correctly with the round's
    /// other events because everything runs on this task.
    async fn model_call(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
        events: Option<&mpsc::Sender<TurnEvent>>,
    ) -> Result<Completion, TurnError> {
        let Some(tx) = events else {
            return Ok(self.provider.complete(system, messages, tools).await?);
        };

        let (delta_tx, mut delta_rx) = mpsc::channel::<String>(32);
        let call = self
            .provider
            .complete_streaming(system, messages, tools, delta_tx);
        tokio::pin!(call);

        let mut outcome: Option<Result<Completion, CompletionError>> = None;
        loop {
            tokio::select! {
                result = &mut call, if outcome.is_none() => {
                    outcome = Some(result);
                }
                delta = delta_rx.recv() => {
                    match delta {
                        Some(text) => {
                            let _ = tx.send(TurnEvent::TextDelta { text }).await;
                        }
                        // Channel closed and buffered deltas drained
                        None => break,
                    }
                }
            }
        }

        // The provider may have dropped the sender before returning, so wait
        // out the call if it is still in flight.
        let result = match outcome {
            Some(result) => result,
            None => call.await,
        };
        Ok(result?)
    }
}
