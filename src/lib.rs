//! Veloca Agent - an LLM agent loop with persistent sessions and context compaction.
//!
//! The crate provides:
//! - An iterative agent loop that calls the model, runs the tools it requests, and
//!   persists every turn
//! - Automatic context compaction once a session nears the model's context window
//! - Buffered and streaming invocation, the latter as a sequenced event stream
//! - An OpenAI-compatible provider adapter and pluggable session stores
//!
//! # Example
//!
//! ```no_run
//! use veloca_agent::{AgentConfig, AgentInput, AgentLoop, ProviderConfig, SessionId, ToolRegistry};
//!
//! # async fn run() -> Result<(), veloca_agent::AgentError> {
//! let agent = AgentLoop::builder()
//!     .provider_config(ProviderConfig::openai("sk-...", "https://api.openai.com/v1", "gpt-4o"))
//!     .tools(ToolRegistry::new())
//!     .config(AgentConfig::default().with_stream(true))
//!     .build()?;
//!
//! let input = AgentInput::new(SessionId::new(), 128_000).with_user_message("Hello!");
//! let stream = agent.invoke_streaming(input)?;
//! let (events, result) = stream.collect().await;
//! for envelope in &events {
//!     println!("{:?}", envelope.event);
//! }
//! println!("{}", result?.content_text());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

mod agent_loop;
pub mod context;
mod events;
pub mod llm;
pub mod providers;
pub mod stores;
mod tools;
mod types;

pub use agent_loop::{AgentInput, AgentInvocation, AgentLoop, AgentLoopBuilder, AgentStream, StorageMode};
pub use events::{AgentEvent, AgentEventEnvelope, SequenceCounter};
pub use llm::{ParsedResponse, ProviderAdapter};
pub use providers::{OpenAiAdapter, ProviderConfig};
pub use stores::{InMemoryStore, JsonFileStore, SessionStore};
pub use tools::{ErasedTool, Tool, ToolRegistry};
pub use types::{
    AgentConfig, AgentError, ErrorKind, RequestOptions, RetryConfig, SessionId, ToolResult,
};
