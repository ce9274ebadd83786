//! Core types shared across the crate.
//!
//! - [`SessionId`]: Identifier of a persisted conversation session
//! - [`AgentConfig`]: Configuration for the agent loop
//! - [`RetryConfig`]: Optional retry policy for transient provider failures
//! - [`RequestOptions`]: Sampling and tool-choice options sent with each model call
//! - [`ToolResult`]: Result returned from tool execution
//! - [`AgentError`] / [`ErrorKind`]: Failure taxonomy of the loop

use crate::context::CompactionConfig;
use crate::llm::ToolChoice;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a conversation session
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configuration for the agent loop
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum number of model calls in one invocation
    pub max_iterations: usize,
    /// Pause between a tool-execution round and the next model call
    pub iteration_delay_ms: u64,
    /// Forward incremental chunks to the caller instead of buffering
    pub stream: bool,
    /// Optional system prompt sent ahead of the assembled messages
    pub system_prompt: Option<String>,
    /// Sampling and tool options for each model call
    pub request: RequestOptions,
    /// Retry policy for rate limits and server errors
    pub retry: RetryConfig,
    /// Compaction thresholds
    pub compaction: CompactionConfig,
    /// Capacity of the streaming event channel
    pub event_buffer: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            iteration_delay_ms: 1500,
            stream: false,
            system_prompt: None,
            request: RequestOptions::default(),
            retry: RetryConfig::default(),
            compaction: CompactionConfig::default(),
            event_buffer: 100,
        }
    }
}

impl AgentConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    #[must_use]
    pub const fn with_iteration_delay_ms(mut self, delay_ms: u64) -> Self {
        self.iteration_delay_ms = delay_ms;
        self
    }

    #[must_use]
    pub const fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    #[must_use]
    pub fn with_request(mut self, request: RequestOptions) -> Self {
        self.request = request;
        self
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub const fn with_compaction(mut self, compaction: CompactionConfig) -> Self {
        self.compaction = compaction;
        self
    }

    #[must_use]
    pub const fn iteration_delay(&self) -> Duration {
        Duration::from_millis(self.iteration_delay_ms)
    }
}

/// Configuration for retry behavior on transient errors.
///
/// Retries are off unless `max_retries` is raised. Invalid requests are never retried.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff with the given number of attempts.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Create a retry config with fast retries (for testing)
    #[must_use]
    pub const fn fast(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay_ms: 10,
            max_delay_ms: 100,
        }
    }
}

/// Per-call request options forwarded to the provider.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub tool_choice: Option<ToolChoice>,
    pub parallel_tool_calls: Option<bool>,
    /// Extra body fields merged into the request as-is.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RequestOptions {
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub const fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    #[must_use]
    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    #[must_use]
    pub const fn with_parallel_tool_calls(mut self, parallel: bool) -> Self {
        self.parallel_tool_calls = Some(parallel);
        self
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Result of a tool execution
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool execution succeeded
    pub success: bool,
    /// Output content fed back to the model
    pub output: String,
}

impl ToolResult {
    #[must_use]
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
        }
    }
}

/// Category of an [`AgentError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or invalid input, raised before any external call.
    Configuration,
    /// The model call failed or returned an unusable response.
    Provider,
    /// Reading or writing the session store failed.
    Storage,
    /// A compaction could not be anchored or summarized.
    Compaction,
    /// The iteration ceiling was reached.
    IterationLimit,
    /// The caller cancelled the invocation.
    Cancelled,
}

/// Error from the agent loop.
#[derive(Debug, Clone)]
pub struct AgentError {
    /// Error category
    pub kind: ErrorKind,
    /// Error message
    pub message: String,
    /// Whether the error is potentially recoverable
    pub recoverable: bool,
}

impl AgentError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            recoverable,
        }
    }

    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message, false)
    }

    #[must_use]
    pub fn provider(message: impl Into<String>, recoverable: bool) -> Self {
        Self::new(ErrorKind::Provider, message, recoverable)
    }

    #[must_use]
    pub fn storage(err: &anyhow::Error) -> Self {
        Self::new(ErrorKind::Storage, format!("storage error: {err:#}"), false)
    }

    #[must_use]
    pub fn compaction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Compaction, message, false)
    }

    #[must_use]
    pub fn iteration_limit(limit: usize) -> Self {
        Self::new(
            ErrorKind::IterationLimit,
            format!("agent loop exceeded the iteration limit of {limit}"),
            false,
        )
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "agent invocation cancelled", false)
    }
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AgentError {}
