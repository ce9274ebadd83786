//! Agent events for real-time streaming.
//!
//! The [`AgentEvent`] enum represents all events that can occur during agent
//! execution. In streaming mode these events are sent over an async channel, each
//! wrapped in an [`AgentEventEnvelope`].
//!
//! # Event Flow
//!
//! A typical event sequence looks like:
//! 1. `Start` - An iteration begins
//! 2. `ContextCompacted` - Old history was summarized (only when the threshold is hit)
//! 3. `Chunk` - Every delta of the model stream, as it arrives
//! 4. `Thinking` / `ToolCalls` - Markers sent once the stream has drained, so they carry
//!    the complete thinking text and fully assembled tool-call arguments
//! 5. `ToolResult` - One per executed tool call, in call order
//! 6. `IterationComplete` - One model round-trip finished
//! 7. `Done` - The model answered without tool calls, or `Error` if the run failed

use crate::llm::{ParsedResponse, StreamDelta, ToolCall};
use crate::stores::ToolCallResult;
use crate::types::{AgentError, ErrorKind, SessionId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use time::OffsetDateTime;

/// Events emitted by the agent loop during execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// An iteration has started
    Start {
        session_id: SessionId,
        iteration: usize,
    },

    /// One provider stream delta, forwarded unchanged
    Chunk { delta: StreamDelta },

    /// Complete reasoning text of the streamed response
    Thinking { text: String },

    /// The streamed response requested tool calls
    ToolCalls { calls: Vec<ToolCall> },

    /// A tool call finished
    ToolResult { result: ToolCallResult },

    /// Context was compacted to reduce size
    ContextCompacted {
        /// Number of messages before compaction
        original_count: usize,
        /// Number of messages after compaction
        new_count: usize,
        /// Estimated tokens before compaction
        original_tokens: usize,
        /// Estimated tokens after compaction
        new_tokens: usize,
        trigger_entry_id: String,
    },

    /// A transient provider failure is being retried
    Retry {
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },

    /// One model round-trip finished
    IterationComplete {
        iteration: usize,
        token_consumption: Option<u64>,
    },

    /// The run finished with a final response
    Done {
        session_id: SessionId,
        iterations: usize,
        response: ParsedResponse,
        duration: Duration,
    },

    /// The run failed
    Error {
        kind: ErrorKind,
        message: String,
        recoverable: bool,
    },
}

impl AgentEvent {
    #[must_use]
    pub const fn start(session_id: SessionId, iteration: usize) -> Self {
        Self::Start {
            session_id,
            iteration,
        }
    }

    #[must_use]
    pub const fn chunk(delta: StreamDelta) -> Self {
        Self::Chunk { delta }
    }

    #[must_use]
    pub fn thinking(text: impl Into<String>) -> Self {
        Self::Thinking { text: text.into() }
    }

    #[must_use]
    pub const fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self::ToolCalls { calls }
    }

    #[must_use]
    pub const fn tool_result(result: ToolCallResult) -> Self {
        Self::ToolResult { result }
    }

    #[must_use]
    pub fn context_compacted(
        original_count: usize,
        new_count: usize,
        original_tokens: usize,
        new_tokens: usize,
        trigger_entry_id: impl Into<String>,
    ) -> Self {
        Self::ContextCompacted {
            original_count,
            new_count,
            original_tokens,
            new_tokens,
            trigger_entry_id: trigger_entry_id.into(),
        }
    }

    #[must_use]
    pub fn retry(attempt: u32, delay: Duration, reason: impl Into<String>) -> Self {
        Self::Retry {
            attempt,
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn iteration_complete(iteration: usize, token_consumption: Option<u64>) -> Self {
        Self::IterationComplete {
            iteration,
            token_consumption,
        }
    }

    #[must_use]
    pub const fn done(
        session_id: SessionId,
        iterations: usize,
        response: ParsedResponse,
        duration: Duration,
    ) -> Self {
        Self::Done {
            session_id,
            iterations,
            response,
            duration,
        }
    }

    #[must_use]
    pub fn error(error: &AgentError) -> Self {
        Self::Error {
            kind: error.kind,
            message: error.message.clone(),
            recoverable: error.recoverable,
        }
    }
}

/// Monotonically increasing per-run counter for event ordering.
///
/// Each invocation creates a fresh counter starting at 0. `Ordering::Relaxed` is
/// sufficient because the mpsc channel provides the happens-before ordering
/// between sender and receiver.
#[derive(Clone, Debug)]
pub struct SequenceCounter(Arc<AtomicU64>);

impl SequenceCounter {
    /// Create a new counter starting at 0.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(0)))
    }

    /// Get the next sequence number, incrementing the counter.
    #[must_use]
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Envelope wrapping every [`AgentEvent`] with delivery metadata.
///
/// `event_id` identifies one emission, `sequence` orders events within a run, and
/// `timestamp` records when it was emitted. The event is flattened in JSON so its
/// `type` discriminant sits next to those fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentEventEnvelope {
    pub event_id: uuid::Uuid,
    pub sequence: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(flatten)]
    pub event: AgentEvent,
}

impl AgentEventEnvelope {
    /// Wrap an [`AgentEvent`], assigning it a unique ID, the next sequence number,
    /// and the current UTC timestamp.
    #[must_use]
    pub fn wrap(event: AgentEvent, seq: &SequenceCounter) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4(),
            sequence: seq.next(),
            timestamp: OffsetDateTime::now_utc(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn sequence_counter_increments_monotonically() {
        let seq = SequenceCounter::new();
        for expected in 0..100 {
            assert_eq!(seq.next(), expected);
        }
    }

    #[test]
    fn sequence_counter_clones_share_state() {
        let seq = SequenceCounter::new();
        let clone = seq.clone();

        assert_eq!(seq.next(), 0);
        assert_eq!(clone.next(), 1);
        assert_eq!(seq.next(), 2);
    }

    #[tokio::test]
    async fn sequence_counter_unique_across_concurrent_tasks() -> anyhow::Result<()> {
        let seq = SequenceCounter::new();
        let n = 200;

        let mut handles = Vec::new();
        for _ in 0..n {
            let seq_clone = seq.clone();
            handles.push(tokio::spawn(async move { seq_clone.next() }));
        }

        let mut values = HashSet::new();
        for handle in handles {
            let val = handle.await?;
            assert!(values.insert(val), "duplicate sequence number: {val}");
        }
        assert_eq!(values.len(), n);
        Ok(())
    }

    #[test]
    fn wrap_assigns_unique_ids_and_incrementing_sequences() {
        let seq = SequenceCounter::new();
        let envelopes: Vec<_> = (0..10)
            .map(|_| AgentEventEnvelope::wrap(AgentEvent::thinking("hmm"), &seq))
            .collect();

        let ids: HashSet<uuid::Uuid> = envelopes.iter().map(|e| e.event_id).collect();
        assert_eq!(ids.len(), 10);
        for (i, env) in envelopes.iter().enumerate() {
            assert_eq!(env.sequence, i as u64);
        }
    }

    #[test]
    fn envelope_serializes_flat_json() -> anyhow::Result<()> {
        let seq = SequenceCounter::new();
        let envelope = AgentEventEnvelope::wrap(
            AgentEvent::chunk(StreamDelta::TextDelta {
                delta: "hi".to_string(),
            }),
            &seq,
        );
        let json = serde_json::to_value(&envelope)?;

        assert!(json.get("event_id").is_some());
        assert_eq!(json["sequence"], 0);
        assert_eq!(json["type"], "chunk");
        assert_eq!(json["delta"]["kind"], "text_delta");
        assert_eq!(json["delta"]["delta"], "hi");
        assert!(json.get("event").is_none());

        let ts = json["timestamp"].as_str().unwrap_or_default();
        time::OffsetDateTime::parse(ts, &time::format_description::well_known::Rfc3339)?;
        Ok(())
    }

    #[test]
    fn error_event_carries_kind() -> anyhow::Result<()> {
        let event = AgentEvent::error(&AgentError::iteration_limit(3));
        let json = serde_json::to_value(&event)?;
        assert_eq!(json["type"], "error");
        assert_eq!(json["kind"], "iteration_limit");
        assert_eq!(json["recoverable"], false);
        Ok(())
    }

    #[test]
    fn envelope_roundtrip_serde() -> anyhow::Result<()> {
        let seq = SequenceCounter::new();
        let original = AgentEventEnvelope::wrap(
            AgentEvent::tool_calls(vec![ToolCall::new("c1", "get_weather", "{}")]),
            &seq,
        );

        let restored: AgentEventEnvelope =
            serde_json::from_str(&serde_json::to_string(&original)?)?;
        assert_eq!(restored.event_id, original.event_id);
        assert_eq!(restored.timestamp, original.timestamp);
        match &restored.event {
            AgentEvent::ToolCalls { calls } => assert_eq!(calls[0].name, "get_weather"),
            other => panic!("expected ToolCalls, got {other:?}"),
        }
        Ok(())
    }
}
