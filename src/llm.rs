pub mod streaming;
pub mod types;

pub use streaming::{StreamAccumulator, StreamBox, StreamDelta, ToolCallAccumulator};
pub use types::*;

use anyhow::Result;
use async_trait::async_trait;

/// Provider capability: message shaping, response parsing, and invocation.
///
/// One implementation exists per provider; it is chosen once when the agent is
/// configured, never by matching on a provider name at call sites.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Short provider identifier, e.g. `"openai"`.
    fn provider(&self) -> &'static str;

    fn model(&self) -> &str;

    /// Convert a request's system prompt and messages into the provider's wire messages.
    ///
    /// # Errors
    /// Returns an error if a message cannot be represented by the provider.
    fn to_messages(&self, request: &ChatRequest) -> Result<Vec<serde_json::Value>>;

    /// Parse a raw, non-streaming response body.
    ///
    /// # Errors
    /// Returns an error if the body does not have the expected shape.
    fn parse_response(&self, body: &[u8]) -> Result<ParsedResponse>;

    /// Send a request and wait for the complete response.
    ///
    /// # Errors
    /// Returns an error on transport failure or a malformed response.
    async fn invoke(&self, request: ChatRequest) -> Result<ChatOutcome>;

    /// Send a request and stream the response incrementally.
    fn invoke_stream(&self, request: ChatRequest) -> StreamBox<'_>;
}
