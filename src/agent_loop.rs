//! The agent loop: call the model, run the tools it asks for, persist, repeat.
//!
//! Each iteration reloads the session, assembles its context (compacting it when it
//! reaches the threshold), calls the model, appends the assistant entry, and runs any
//! requested tools. The loop ends when the model answers without tool calls, or with an
//! [`ErrorKind::IterationLimit`](crate::ErrorKind::IterationLimit) error after
//! `max_iterations` model calls.
//!
//! # Example
//!
//! ```no_run
//! use veloca_agent::{AgentInput, AgentLoop, ProviderConfig, SessionId};
//!
//! # async fn run() -> Result<(), veloca_agent::AgentError> {
//! let agent = AgentLoop::builder()
//!     .provider_config(ProviderConfig::openai("sk-...", "https://api.openai.com/v1", "gpt-4o"))
//!     .build()?;
//!
//! let input = AgentInput::new(SessionId::new(), 128_000).with_user_message("hi");
//! let response = agent.invoke(input).await?;
//! println!("{}", response.content_text());
//! # Ok(())
//! # }
//! ```

mod builder;
mod helpers;
mod llm;
mod run_loop;
#[cfg(test)]
pub(crate) mod test_utils;
#[cfg(test)]
mod tests;
mod tool_execution;
mod turn;
mod types;

pub use builder::AgentLoopBuilder;
pub use types::{AgentInput, AgentInvocation, AgentStream, StorageMode};

use crate::llm::{ParsedResponse, ProviderAdapter};
use crate::stores::SessionStore;
use crate::tools::ToolRegistry;
use crate::types::{AgentConfig, AgentError};
use helpers::EventSink;
use run_loop::run_loop;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use types::RunParameters;

/// The main agent loop that orchestrates model calls and tool execution.
pub struct AgentLoop {
    provider: Arc<dyn ProviderAdapter>,
    tools: Arc<ToolRegistry>,
    stores: HashMap<StorageMode, Arc<dyn SessionStore>>,
    config: AgentConfig,
}

impl AgentLoop {
    /// Create a new builder for constructing an `AgentLoop`.
    #[must_use]
    pub fn builder() -> AgentLoopBuilder {
        AgentLoopBuilder::new()
    }

    #[must_use]
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    #[must_use]
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// The store registered for `mode`.
    ///
    /// # Errors
    /// Returns a configuration error if no store is registered for `mode`.
    pub fn store(&self, mode: StorageMode) -> Result<&Arc<dyn SessionStore>, AgentError> {
        self.stores.get(&mode).ok_or_else(|| {
            AgentError::configuration(format!(
                "no session store registered for storage mode '{}'",
                mode.as_str()
            ))
        })
    }

    /// Run until the model answers without tool calls, using the provider's
    /// non-streaming API. No events are produced.
    ///
    /// # Errors
    /// Returns a configuration error for invalid input before anything is called or
    /// stored; otherwise the error that ended the run.
    pub async fn invoke(&self, input: AgentInput) -> Result<ParsedResponse, AgentError> {
        let params = self.prepare(input)?;
        run_loop(params, EventSink::disabled()).await
    }

    /// Run on a background task using the provider's streaming API.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns a configuration error for invalid input; run failures arrive as an
    /// `Error` event and through [`AgentStream::response`].
    pub fn invoke_streaming(&self, input: AgentInput) -> Result<AgentStream, AgentError> {
        let params = self.prepare(input)?;
        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));
        let handle = tokio::spawn(run_loop(params, EventSink::channel(tx)));
        Ok(AgentStream::new(rx, handle))
    }

    /// Invoke in the mode selected by [`AgentConfig::stream`].
    ///
    /// # Errors
    /// See [`invoke`](Self::invoke) and [`invoke_streaming`](Self::invoke_streaming).
    pub async fn invoke_agent(&self, input: AgentInput) -> Result<AgentInvocation, AgentError> {
        if self.config.stream {
            self.invoke_streaming(input).map(AgentInvocation::Streaming)
        } else {
            self.invoke(input).await.map(AgentInvocation::Buffered)
        }
    }

    fn prepare(&self, input: AgentInput) -> Result<RunParameters, AgentError> {
        if input.session_id.as_str().trim().is_empty() {
            return Err(AgentError::configuration("session id is required"));
        }

        let context_window = match input.context_window {
            Some(window) if window > 0 => window,
            _ => {
                return Err(AgentError::configuration(
                    "context window must be a positive token count",
                ));
            }
        };

        let threshold_fraction = input
            .threshold_fraction
            .unwrap_or(self.config.compaction.threshold_fraction);
        if !(threshold_fraction.is_finite() && threshold_fraction > 0.0) {
            return Err(AgentError::configuration(format!(
                "threshold fraction must be positive, got {threshold_fraction}"
            )));
        }

        let max_iterations = input.max_iterations.unwrap_or(self.config.max_iterations);
        if max_iterations == 0 {
            return Err(AgentError::configuration(
                "max iterations must be at least 1",
            ));
        }

        Ok(RunParameters {
            context_store: Arc::clone(self.store(input.context_load)?),
            storage: Arc::clone(self.store(input.storage)?),
            session_id: input.session_id,
            provider: Arc::clone(&self.provider),
            tools: Arc::clone(&self.tools),
            config: self.config.clone(),
            context_window,
            threshold_fraction,
            max_iterations,
            user_message: input.user_message,
            cancel: input.cancel,
        })
    }
}
