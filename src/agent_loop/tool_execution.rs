use super::helpers::{EventSink, cancellable};
use crate::events::AgentEvent;
use crate::llm::ToolCall;
use crate::stores::{NewEntry, SessionStore, ToolCallResult};
use crate::tools::ToolRegistry;
use crate::types::{AgentError, SessionId};
use log::debug;
use tokio_util::sync::CancellationToken;

/// Execute one turn's tool calls concurrently.
///
/// Results come back in call order, whatever order the tools finish in. Tool failures
/// are captured in the results; only cancellation is an error.
pub(super) async fn execute_tool_calls(
    tools: &ToolRegistry,
    calls: &[ToolCall],
    cancel: &CancellationToken,
) -> Result<Vec<ToolCallResult>, AgentError> {
    debug!(
        "Executing {} tool call(s): {}",
        calls.len(),
        calls
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    cancellable(cancel, tools.execute_all(calls)).await
}

/// Persist one tool entry per result, in the order given, announcing each.
pub(super) async fn append_tool_results(
    storage: &dyn SessionStore,
    session_id: &SessionId,
    results: Vec<ToolCallResult>,
    events: &EventSink,
) -> Result<(), AgentError> {
    for result in results {
        if result.is_error() {
            log::warn!(
                "Tool {} ({}) failed: {}",
                result.name,
                result.call_id,
                result.error.as_deref().unwrap_or_default()
            );
        }
        storage
            .append_entry(session_id, NewEntry::tool(result.clone()))
            .await
            .map_err(|e| AgentError::storage(&e))?;
        events.send(AgentEvent::tool_result(result)).await;
    }
    Ok(())
}
