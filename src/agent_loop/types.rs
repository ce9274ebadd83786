use crate::events::AgentEventEnvelope;
use crate::llm::{ParsedResponse, ProviderAdapter};
use crate::stores::SessionStore;
use crate::tools::ToolRegistry;
use crate::types::{AgentConfig, AgentError, SessionId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Which registered store a session is read from or written to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// A JSON document on the local filesystem.
    #[serde(rename = "localfile", alias = "local_file")]
    LocalFile,
    /// A database-backed store.
    #[default]
    Database,
}

impl StorageMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalFile => "localfile",
            Self::Database => "database",
        }
    }
}

/// Input for one agent invocation.
///
/// # Example
///
/// ```
/// use veloca_agent::{AgentInput, SessionId, StorageMode};
///
/// let input = AgentInput::new(SessionId::from_string("s-1"), 128_000)
///     .with_user_message("What's the weather in NYC?")
///     .with_storage(StorageMode::LocalFile)
///     .with_max_iterations(5);
/// ```
#[derive(Clone, Debug)]
pub struct AgentInput {
    pub session_id: SessionId,
    /// Store the conversation context is loaded from.
    pub context_load: StorageMode,
    /// Store new entries are appended to.
    pub storage: StorageMode,
    /// Context window of the model in tokens. Required.
    pub context_window: Option<usize>,
    /// Overrides `CompactionConfig::threshold_fraction`.
    pub threshold_fraction: Option<f64>,
    /// Overrides `AgentConfig::max_iterations`.
    pub max_iterations: Option<usize>,
    /// Appended as a user entry before the first iteration.
    pub user_message: Option<String>,
    pub cancel: CancellationToken,
}

impl AgentInput {
    #[must_use]
    pub fn new(session_id: SessionId, context_window: usize) -> Self {
        Self {
            session_id,
            context_load: StorageMode::default(),
            storage: StorageMode::default(),
            context_window: Some(context_window),
            threshold_fraction: None,
            max_iterations: None,
            user_message: None,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = Some(message.into());
        self
    }

    /// Use `mode` for both loading and appending.
    #[must_use]
    pub const fn with_storage(mut self, mode: StorageMode) -> Self {
        self.context_load = mode;
        self.storage = mode;
        self
    }

    #[must_use]
    pub const fn with_context_load(mut self, mode: StorageMode) -> Self {
        self.context_load = mode;
        self
    }

    #[must_use]
    pub const fn with_threshold_fraction(mut self, fraction: f64) -> Self {
        self.threshold_fraction = Some(fraction);
        self
    }

    #[must_use]
    pub const fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// A streaming invocation: events as they happen, then the final response.
pub struct AgentStream {
    pub events: mpsc::Receiver<AgentEventEnvelope>,
    handle: JoinHandle<Result<ParsedResponse, AgentError>>,
}

impl AgentStream {
    pub(super) const fn new(
        events: mpsc::Receiver<AgentEventEnvelope>,
        handle: JoinHandle<Result<ParsedResponse, AgentError>>,
    ) -> Self {
        Self { events, handle }
    }

    /// Wait for the loop to finish. Undelivered events are dropped.
    ///
    /// # Errors
    /// Returns the error that ended the loop.
    pub async fn response(self) -> Result<ParsedResponse, AgentError> {
        let Self { events, handle } = self;
        drop(events);
        Self::join(handle).await
    }

    /// Collect every event, then the final response.
    pub async fn collect(self) -> (Vec<AgentEventEnvelope>, Result<ParsedResponse, AgentError>) {
        let Self { mut events, handle } = self;
        let mut collected = Vec::new();
        while let Some(event) = events.recv().await {
            collected.push(event);
        }
        (collected, Self::join(handle).await)
    }

    async fn join(
        handle: JoinHandle<Result<ParsedResponse, AgentError>>,
    ) -> Result<ParsedResponse, AgentError> {
        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(AgentError::cancelled()),
        }
    }
}

/// Result of [`AgentLoop::invoke_agent`](super::AgentLoop::invoke_agent).
pub enum AgentInvocation {
    Buffered(ParsedResponse),
    Streaming(AgentStream),
}

/// Everything one run needs, validated and owned so it can move into a task.
pub(super) struct RunParameters {
    pub(super) session_id: SessionId,
    pub(super) provider: Arc<dyn ProviderAdapter>,
    pub(super) tools: Arc<ToolRegistry>,
    pub(super) context_store: Arc<dyn SessionStore>,
    pub(super) storage: Arc<dyn SessionStore>,
    pub(super) config: AgentConfig,
    pub(super) context_window: usize,
    pub(super) threshold_fraction: f64,
    pub(super) max_iterations: usize,
    pub(super) user_message: Option<String>,
    pub(super) cancel: CancellationToken,
}

/// Mutable per-run state.
pub(super) struct TurnContext {
    pub(super) iteration: usize,
    pub(super) start_time: Instant,
}

impl TurnContext {
    pub(super) fn new() -> Self {
        Self {
            iteration: 0,
            start_time: Instant::now(),
        }
    }
}

/// Internal result of executing a single iteration.
pub(super) enum InternalTurnResult {
    /// Tools were executed; the model must be called again.
    Continue,
    /// The model answered without tool calls.
    Done(ParsedResponse),
}

/// Error type for stream processing.
pub(super) enum StreamError {
    Recoverable(String),
    Fatal(String),
}
