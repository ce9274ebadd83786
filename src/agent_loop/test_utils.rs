use crate::events::AgentEventEnvelope;
use crate::llm::{
    ChatOutcome, ChatRequest, FinishReason, ParsedResponse, ProviderAdapter, Role, StreamBox,
    StreamDelta, ToolCall, Usage,
};
use crate::tools::Tool;
use crate::types::ToolResult;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

// ===================
// Mock LLM Provider
// ===================

/// Replays scripted outcomes, one per call, and records every request.
///
/// Past the end of the script it answers "Done", or repeats the last outcome when built
/// with [`MockProvider::repeating`].
pub struct MockProvider {
    responses: RwLock<Vec<ChatOutcome>>,
    call_count: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
    repeat_last: bool,
}

impl MockProvider {
    pub fn new(responses: Vec<ChatOutcome>) -> Self {
        Self {
            responses: RwLock::new(responses),
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            repeat_last: false,
        }
    }

    pub fn repeating(outcome: ChatOutcome) -> Self {
        Self {
            repeat_last: true,
            ..Self::new(vec![outcome])
        }
    }

    pub fn text_response(text: &str) -> ChatOutcome {
        ChatOutcome::Success(ParsedResponse {
            token_consumption: Some(30),
            ..ParsedResponse::text(text)
        })
    }

    pub fn tool_call_response(id: &str, name: &str, arguments: Value) -> ChatOutcome {
        Self::tool_calls_response(vec![(id, name, arguments)])
    }

    pub fn tool_calls_response(calls: Vec<(&str, &str, Value)>) -> ChatOutcome {
        ChatOutcome::Success(ParsedResponse {
            role: Role::Assistant,
            content: None,
            token_consumption: Some(30),
            tool_calls: calls
                .into_iter()
                .map(|(id, name, arguments)| ToolCall::new(id, name, arguments.to_string()))
                .collect(),
            thinking: Some("I should call a tool".to_string()),
            finish_reason: Some(FinishReason::ToolCalls),
        })
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn next_outcome(&self, request: ChatRequest) -> Result<ChatOutcome> {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .ok()
            .context("lock poisoned")?
            .push(request);

        let responses = self.responses.read().ok().context("lock poisoned")?;
        let outcome = match responses.get(idx) {
            Some(outcome) => outcome.clone(),
            None if self.repeat_last => responses.last().cloned().context("empty script")?,
            None => Self::text_response("Done"),
        };
        Ok(outcome)
    }
}

/// The deltas a real provider would stream for `outcome`.
pub fn outcome_to_deltas(outcome: ChatOutcome) -> Vec<StreamDelta> {
    let response = match outcome {
        ChatOutcome::Success(response) => response,
        ChatOutcome::RateLimited => {
            return vec![StreamDelta::Error {
                message: "rate limited".to_string(),
                recoverable: true,
            }];
        }
        ChatOutcome::ServerError(message) => {
            return vec![StreamDelta::Error {
                message,
                recoverable: true,
            }];
        }
        ChatOutcome::InvalidRequest(message) => {
            return vec![StreamDelta::Error {
                message,
                recoverable: false,
            }];
        }
    };

    let mut deltas = vec![StreamDelta::Role {
        role: Role::Assistant,
    }];
    if let Some(thinking) = response.thinking {
        deltas.push(StreamDelta::ThinkingDelta { delta: thinking });
    }
    if let Some(content) = response.content {
        let (head, tail) = split_in_half(&content);
        for part in [head, tail].into_iter().filter(|p| !p.is_empty()) {
            deltas.push(StreamDelta::TextDelta {
                delta: part.to_string(),
            });
        }
    }
    for (index, call) in response.tool_calls.into_iter().enumerate() {
        let (head, tail) = split_in_half(&call.arguments);
        deltas.push(StreamDelta::ToolCallDelta {
            index,
            id: Some(call.id),
            name: Some(call.name),
            arguments: Some(head.to_string()),
        });
        deltas.push(StreamDelta::ToolCallDelta {
            index,
            id: None,
            name: None,
            arguments: Some(tail.to_string()),
        });
    }
    if let Some(total) = response.token_consumption {
        deltas.push(StreamDelta::Usage(Usage {
            prompt_tokens: total / 2,
            completion_tokens: total - total / 2,
            total_tokens: total,
        }));
    }
    deltas.push(StreamDelta::Done {
        finish_reason: response.finish_reason,
    });
    deltas
}

fn split_in_half(s: &str) -> (&str, &str) {
    let mid = s
        .char_indices()
        .nth(s.chars().count() / 2)
        .map_or(s.len(), |(i, _)| i);
    s.split_at(mid)
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn provider(&self) -> &'static str {
        "mock"
    }

    fn model(&self) -> &'static str {
        "mock-model"
    }

    fn to_messages(&self, request: &ChatRequest) -> Result<Vec<Value>> {
        request
            .messages
            .iter()
            .map(|m| serde_json::to_value(m).context("serialize message"))
            .collect()
    }

    fn parse_response(&self, body: &[u8]) -> Result<ParsedResponse> {
        serde_json::from_slice(body).context("parse response")
    }

    async fn invoke(&self, request: ChatRequest) -> Result<ChatOutcome> {
        self.next_outcome(request)
    }

    fn invoke_stream(&self, request: ChatRequest) -> StreamBox<'_> {
        let deltas = self.next_outcome(request).map(outcome_to_deltas);
        Box::pin(async_stream::stream! {
            match deltas {
                Ok(deltas) => {
                    for delta in deltas {
                        yield Ok(delta);
                    }
                }
                Err(e) => yield Err(e),
            }
        })
    }
}

pub async fn drain_events(
    mut rx: tokio::sync::mpsc::Receiver<AgentEventEnvelope>,
) -> Vec<AgentEventEnvelope> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

// ===================
// Mock Tools
// ===================

/// `get_weather(city)`; counts its executions.
#[derive(Default, Clone)]
pub struct WeatherTool {
    pub calls: Arc<AtomicUsize>,
}

impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Current weather for a city"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "city": { "type": "string" } },
            "required": ["city"]
        })
    }

    async fn execute(&self, input: Value) -> Result<ToolResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let city = input["city"].as_str().context("city is required")?;
        Ok(ToolResult::success(format!("Sunny, 22°C in {city}")))
    }
}

/// Sleeps for an hour; only cancellation ends it early.
pub struct StallTool;

impl Tool for StallTool {
    fn name(&self) -> &str {
        "stall"
    }

    fn description(&self) -> &str {
        "Never finishes in time"
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn execute(&self, _input: Value) -> Result<ToolResult> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(ToolResult::success("woke up"))
    }
}
