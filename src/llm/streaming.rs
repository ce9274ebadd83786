//! Streaming types for LLM responses.
//!
//! [`StreamDelta`] is one incremental event from a provider stream.
//! [`StreamAccumulator`] folds deltas into the final [`ParsedResponse`]; folding is a pure
//! function of the delta so it can be exercised without any transport.

use crate::llm::{FinishReason, ParsedResponse, Role, ToolCall, Usage};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::pin::Pin;

/// Events yielded during streaming LLM responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamDelta {
    /// The role of the message being streamed.
    Role { role: Role },

    /// A fragment of the response text.
    TextDelta { delta: String },

    /// A fragment of reasoning text.
    ThinkingDelta { delta: String },

    /// A fragment of the tool call at `index`. Id and name usually arrive once, in the
    /// first fragment; arguments arrive in pieces.
    ToolCallDelta {
        index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments: Option<String>,
    },

    /// Usage information (typically at stream end).
    Usage(Usage),

    /// Stream completed.
    Done {
        finish_reason: Option<FinishReason>,
    },

    /// Error during streaming.
    Error {
        message: String,
        /// Whether the error is recoverable (e.g., rate limit)
        recoverable: bool,
    },
}

/// Type alias for a boxed stream of stream deltas.
pub type StreamBox<'a> = Pin<Box<dyn Stream<Item = anyhow::Result<StreamDelta>> + Send + 'a>>;

/// Collects [`StreamDelta`] events into a final response.
#[derive(Debug, Default, Clone)]
pub struct StreamAccumulator {
    role: Option<Role>,
    content: String,
    thinking: String,
    /// In-progress tool calls keyed by their stream index.
    tool_calls: BTreeMap<usize, ToolCallAccumulator>,
    usage: Option<Usage>,
    finish_reason: Option<FinishReason>,
}

/// Accumulator for a single tool call during streaming.
#[derive(Debug, Default, Clone)]
pub struct ToolCallAccumulator {
    pub id: String,
    pub name: String,
    /// Accumulated JSON arguments (may be incomplete during streaming)
    pub arguments: String,
}

impl StreamAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a stream delta to the accumulator.
    pub fn apply(&mut self, delta: &StreamDelta) {
        match delta {
            StreamDelta::Role { role } => self.role = Some(*role),
            StreamDelta::TextDelta { delta } => self.content.push_str(delta),
            StreamDelta::ThinkingDelta { delta } => self.thinking.push_str(delta),
            StreamDelta::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => {
                let call = self.tool_calls.entry(*index).or_default();
                if let Some(id) = id.as_deref().filter(|s| !s.is_empty()) {
                    id.clone_into(&mut call.id);
                }
                if let Some(name) = name.as_deref().filter(|s| !s.is_empty()) {
                    name.clone_into(&mut call.name);
                }
                if let Some(arguments) = arguments {
                    call.arguments.push_str(arguments);
                }
            }
            StreamDelta::Usage(u) => self.usage = Some(u.clone()),
            StreamDelta::Done { finish_reason } => {
                if finish_reason.is_some() {
                    self.finish_reason = *finish_reason;
                }
            }
            StreamDelta::Error { .. } => {}
        }
    }

    #[must_use]
    pub const fn usage(&self) -> Option<&Usage> {
        self.usage.as_ref()
    }

    #[must_use]
    pub const fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    /// Whether any tool call fragment has been seen.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Convert the accumulated state into a normalized response, tool calls ordered by index.
    #[must_use]
    pub fn into_response(self) -> ParsedResponse {
        let tool_calls = self
            .tool_calls
            .into_values()
            .map(|call| ToolCall {
                id: call.id,
                name: call.name,
                arguments: call.arguments,
            })
            .collect();

        ParsedResponse {
            role: self.role.unwrap_or(Role::Assistant),
            content: (!self.content.is_empty()).then_some(self.content),
            token_consumption: self.usage.map(|u| u.total_tokens),
            tool_calls,
            thinking: (!self.thinking.is_empty()).then_some(self.thinking),
            finish_reason: self.finish_reason,
        }
    }
}
