//! `OpenAI` Chat Completions provider.
//!
//! Works against the `OpenAI` API and `OpenAI`-compatible endpoints (Ollama, vLLM, and
//! similar) through [`OpenAiAdapter::with_base_url`].

use crate::llm::{
    ChatOutcome, ChatRequest, ContentPart, FinishReason, Message, MessageContent,
    ParsedResponse, ProviderAdapter, Role, StreamBox, StreamDelta, ToolCall, ToolChoice,
    ToolDefinition, Usage,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub const MODEL_GPT4O: &str = "gpt-4o";
pub const MODEL_GPT4O_MINI: &str = "gpt-4o-mini";

/// Provider for the Chat Completions API.
#[derive(Clone)]
pub struct OpenAiAdapter {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiAdapter {
    #[must_use]
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL.to_owned())
    }

    /// Create a provider for an OpenAI-compatible endpoint.
    #[must_use]
    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_body(&self, request: &ChatRequest, stream: bool) -> Result<Value> {
        let options = &request.options;
        let tools: Vec<ApiTool> = request.tools.iter().map(convert_tool).collect();

        let api_request = ApiChatRequest {
            model: &self.model,
            messages: build_api_messages(request),
            tools: (!tools.is_empty()).then_some(tools),
            tool_choice: options.tool_choice.as_ref().map(convert_tool_choice),
            parallel_tool_calls: options.parallel_tool_calls,
            temperature: options.temperature,
            top_p: options.top_p,
            max_tokens: options.max_tokens,
            stream,
            stream_options: stream.then_some(ApiStreamOptions {
                include_usage: true,
            }),
        };

        let mut body = serde_json::to_value(&api_request).context("Failed to serialize request")?;
        if let Value::Object(map) = &mut body {
            for (key, value) in &options.extra {
                map.insert(key.clone(), value.clone());
            }
        }
        Ok(body)
    }

    fn post(&self, body: &Value) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn provider(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn to_messages(&self, request: &ChatRequest) -> Result<Vec<Value>> {
        build_api_messages(request)
            .iter()
            .map(|m| serde_json::to_value(m).context("Failed to serialize message"))
            .collect()
    }

    fn parse_response(&self, body: &[u8]) -> Result<ParsedResponse> {
        parse_chat_response(body)
    }

    async fn invoke(&self, request: ChatRequest) -> Result<ChatOutcome> {
        let body = self.build_body(&request, false)?;

        log::debug!(
            "OpenAI request: model={} messages={} tools={}",
            self.model,
            request.messages.len(),
            request.tools.len()
        );

        let response = self.post(&body).send().await.context("request failed")?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .context("failed to read response body")?;

        log::debug!("OpenAI response: status={status} body_len={}", bytes.len());

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(ChatOutcome::RateLimited);
        }

        if status.is_server_error() {
            let body = String::from_utf8_lossy(&bytes);
            log::error!("OpenAI server error: status={status} body={body}");
            return Ok(ChatOutcome::ServerError(body.into_owned()));
        }

        if status.is_client_error() {
            let body = String::from_utf8_lossy(&bytes);
            log::warn!("OpenAI client error: status={status} body={body}");
            return Ok(ChatOutcome::InvalidRequest(body.into_owned()));
        }

        Ok(ChatOutcome::Success(self.parse_response(&bytes)?))
    }

    fn invoke_stream(&self, request: ChatRequest) -> StreamBox<'_> {
        Box::pin(async_stream::stream! {
            let body = match self.build_body(&request, true) {
                Ok(body) => body,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            log::debug!(
                "OpenAI streaming request: model={} messages={}",
                self.model,
                request.messages.len()
            );

            let response = match self.post(&body).send().await {
                Ok(response) => response,
                Err(e) => {
                    yield Err(anyhow::Error::new(e).context("request failed"));
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let recoverable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                log::warn!("OpenAI streaming error: status={status} body={body}");
                yield Ok(StreamDelta::Error { message: body, recoverable });
                return;
            }

            let mut parser = SseParser::default();
            let mut stream = response.bytes_stream();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(anyhow::Error::new(e).context("stream error"));
                        return;
                    }
                };
                for delta in parser.push(&chunk) {
                    yield Ok(delta);
                }
                if parser.is_done() {
                    return;
                }
            }

            // Stream ended without [DONE]
            for delta in parser.finish() {
                yield Ok(delta);
            }
        })
    }
}

fn api_role(role: Role) -> ApiRole {
    match role {
        Role::User => ApiRole::User,
        Role::Assistant => ApiRole::Assistant,
        Role::Tool => ApiRole::Tool,
        Role::System => ApiRole::System,
        Role::Developer => ApiRole::Developer,
    }
}

fn convert_content(content: &MessageContent) -> ApiContent {
    match content {
        MessageContent::Text(text) => ApiContent::Text(text.clone()),
        MessageContent::Parts(parts) => {
            ApiContent::Parts(parts.iter().map(convert_part).collect())
        }
    }
}

fn convert_part(part: &ContentPart) -> ApiContentPart {
    match part {
        ContentPart::Text { text } => ApiContentPart::Text { text: text.clone() },
        ContentPart::Image { url } => ApiContentPart::ImageUrl {
            image_url: ApiUrl { url: url.clone() },
        },
        ContentPart::Video { url } => ApiContentPart::VideoUrl {
            video_url: ApiUrl { url: url.clone() },
        },
        ContentPart::Audio {
            data: Some(data),
            format,
            ..
        } => ApiContentPart::InputAudio {
            input_audio: ApiInputAudio {
                data: data.clone(),
                format: format.clone().unwrap_or_else(|| "wav".to_owned()),
            },
        },
        ContentPart::Audio { transcript, .. } => ApiContentPart::Text {
            text: transcript.clone().unwrap_or_default(),
        },
    }
}

fn convert_message(message: &Message) -> ApiMessage {
    let tool_calls = (!message.tool_calls.is_empty()).then(|| {
        message
            .tool_calls
            .iter()
            .map(|call| ApiToolCall {
                id: call.id.clone(),
                r#type: "function".to_owned(),
                function: ApiFunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            })
            .collect()
    });

    // An assistant message carrying only tool calls sends `content: null`.
    let content = message
        .content
        .as_ref()
        .filter(|c| !(tool_calls.is_some() && c.is_empty()))
        .map(convert_content);

    ApiMessage {
        role: api_role(message.role),
        content,
        tool_calls,
        tool_call_id: message.tool_call_id.clone(),
        name: message
            .name
            .clone()
            .filter(|_| message.role != Role::Tool),
    }
}

fn build_api_messages(request: &ChatRequest) -> Vec<ApiMessage> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = request.system.as_deref().filter(|s| !s.is_empty()) {
        messages.push(ApiMessage {
            role: ApiRole::System,
            content: Some(ApiContent::Text(system.to_owned())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        });
    }

    messages.extend(request.messages.iter().map(convert_message));
    messages
}

fn convert_tool(t: &ToolDefinition) -> ApiTool {
    ApiTool {
        r#type: "function".to_owned(),
        function: ApiFunction {
            name: t.name.clone(),
            description: t.description.clone(),
            parameters: t.parameters.clone(),
        },
    }
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::None => Value::from("none"),
        ToolChoice::Auto => Value::from("auto"),
        ToolChoice::Required => Value::from("required"),
        ToolChoice::Function(name) => serde_json::json!({
            "type": "function",
            "function": { "name": name }
        }),
    }
}

fn convert_finish_reason(reason: ApiFinishReason) -> FinishReason {
    match reason {
        ApiFinishReason::Stop => FinishReason::Stop,
        ApiFinishReason::ToolCalls | ApiFinishReason::FunctionCall => FinishReason::ToolCalls,
        ApiFinishReason::Length => FinishReason::Length,
        ApiFinishReason::ContentFilter => FinishReason::ContentFilter,
        ApiFinishReason::Other => FinishReason::Other,
    }
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Self {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens.unwrap_or(u.prompt_tokens + u.completion_tokens),
        }
    }
}

fn parse_chat_response(body: &[u8]) -> Result<ParsedResponse> {
    let api_response: ApiChatResponse =
        serde_json::from_slice(body).context("failed to parse response")?;

    let choice = api_response
        .choices
        .into_iter()
        .next()
        .context("no choices in response")?;
    let message = choice.message;

    let tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCall {
            id: tc.id,
            name: tc.function.name,
            arguments: tc.function.arguments,
        })
        .collect();

    Ok(ParsedResponse {
        role: Role::Assistant,
        content: message.content.filter(|c| !c.is_empty()),
        token_consumption: api_response.usage.map(|u| Usage::from(u).total_tokens),
        tool_calls,
        thinking: message.reasoning_content.filter(|t| !t.is_empty()),
        finish_reason: choice.finish_reason.map(convert_finish_reason),
    })
}

/// Incremental parser for the server-sent events of a streaming completion.
#[derive(Debug, Default)]
struct SseParser {
    buffer: Vec<u8>,
    finish_reason: Option<FinishReason>,
    done: bool,
}

impl SseParser {
    const fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes; returns the deltas of every complete line.
    fn push(&mut self, bytes: &[u8]) -> Vec<StreamDelta> {
        self.buffer.extend_from_slice(bytes);
        let mut deltas = Vec::new();

        while !self.done {
            let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.parse_line(&String::from_utf8_lossy(&line), &mut deltas);
        }
        deltas
    }

    /// Flush a trailing partial line and close the stream.
    fn finish(mut self) -> Vec<StreamDelta> {
        let mut deltas = Vec::new();
        if !self.done {
            let rest = std::mem::take(&mut self.buffer);
            self.parse_line(&String::from_utf8_lossy(&rest), &mut deltas);
        }
        if !self.done {
            deltas.push(StreamDelta::Done {
                finish_reason: self.finish_reason,
            });
        }
        deltas
    }

    fn parse_line(&mut self, line: &str, deltas: &mut Vec<StreamDelta>) {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
            return;
        };

        if data == "[DONE]" {
            self.done = true;
            deltas.push(StreamDelta::Done {
                finish_reason: self.finish_reason,
            });
            return;
        }

        let chunk: ApiStreamChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                log::debug!("Skipping unparseable stream chunk: {e}");
                return;
            }
        };

        for choice in chunk.choices {
            let delta = choice.delta;
            if delta.role.is_some() {
                deltas.push(StreamDelta::Role {
                    role: Role::Assistant,
                });
            }
            if let Some(text) = delta.reasoning_content.filter(|t| !t.is_empty()) {
                deltas.push(StreamDelta::ThinkingDelta { delta: text });
            }
            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                deltas.push(StreamDelta::TextDelta { delta: text });
            }
            for call in delta.tool_calls.unwrap_or_default() {
                let (name, arguments) = call
                    .function
                    .map_or((None, None), |f| (f.name, f.arguments));
                deltas.push(StreamDelta::ToolCallDelta {
                    index: call.index,
                    id: call.id,
                    name,
                    arguments,
                });
            }
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(convert_finish_reason(reason));
            }
        }

        if let Some(usage) = chunk.usage {
            deltas.push(StreamDelta::Usage(usage.into()));
        }
    }
}

// ============================================================================
// API Request Types
// ============================================================================

#[derive(Serialize)]
struct ApiChatRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<ApiStreamOptions>,
}

#[derive(Serialize)]
struct ApiStreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: ApiRole,
    content: Option<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum ApiRole {
    System,
    Developer,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Parts(Vec<ApiContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentPart {
    Text { text: String },
    ImageUrl { image_url: ApiUrl },
    VideoUrl { video_url: ApiUrl },
    InputAudio { input_audio: ApiInputAudio },
}

#[derive(Debug, Serialize)]
struct ApiUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ApiInputAudio {
    data: String,
    format: String,
}

#[derive(Debug, Serialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunctionCall,
}

#[derive(Debug, Serialize)]
struct ApiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct ApiTool {
    r#type: String,
    function: ApiFunction,
}

#[derive(Serialize)]
struct ApiFunction {
    name: String,
    description: String,
    parameters: Value,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Deserialize)]
struct ApiChatResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
    finish_reason: Option<ApiFinishReason>,
}

#[derive(Deserialize)]
struct ApiResponseMessage {
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiResponseToolCall>>,
}

#[derive(Deserialize)]
struct ApiResponseToolCall {
    id: String,
    function: ApiResponseFunctionCall,
}

#[derive(Deserialize)]
struct ApiResponseFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ApiFinishReason {
    Stop,
    ToolCalls,
    FunctionCall,
    Length,
    ContentFilter,
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ApiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct ApiStreamChunk {
    #[serde(default)]
    choices: Vec<ApiStreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiStreamChoice {
    delta: ApiStreamDelta,
    #[serde(default)]
    finish_reason: Option<ApiFinishReason>,
}

#[derive(Deserialize)]
struct ApiStreamDelta {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiStreamToolCall>>,
}

#[derive(Deserialize)]
struct ApiStreamToolCall {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ApiStreamFunction>,
}

#[derive(Deserialize)]
struct ApiStreamFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
