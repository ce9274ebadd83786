use super::helpers::{EventSink, cancellable};
use super::llm::{call_llm_streaming, call_llm_with_retry};
use super::tool_execution::{append_tool_results, execute_tool_calls};
use super::types::{InternalTurnResult, RunParameters, TurnContext};

use crate::context::{CompactionInput, Compactor, ThresholdCheck, assemble_context};
use crate::events::AgentEvent;
use crate::llm::{ChatRequest, Message};
use crate::stores::NewEntry;
use crate::types::AgentError;

use log::{debug, info, warn};
use std::sync::Arc;

pub(super) async fn begin_turn(
    ctx: &mut TurnContext,
    params: &RunParameters,
    events: &EventSink,
) -> Result<(), AgentError> {
    if params.cancel.is_cancelled() {
        return Err(AgentError::cancelled());
    }

    ctx.iteration += 1;
    if ctx.iteration > params.max_iterations {
        warn!(
            "Iteration limit reached (iteration={}, max={})",
            ctx.iteration, params.max_iterations
        );
        return Err(AgentError::iteration_limit(params.max_iterations));
    }

    events
        .send(AgentEvent::start(params.session_id.clone(), ctx.iteration))
        .await;
    Ok(())
}

/// Assemble the messages for this iteration, compacting first when the context has
/// reached the threshold.
pub(super) async fn load_turn_messages(
    ctx: &TurnContext,
    params: &RunParameters,
    events: &EventSink,
) -> Result<Vec<Message>, AgentError> {
    let snapshot = cancellable(
        &params.cancel,
        params.context_store.read_session(&params.session_id),
    )
    .await?
    .map_err(|e| AgentError::storage(&e))?;

    let context = assemble_context(&snapshot);
    let compaction = &params.config.compaction;
    let used_tokens = context.estimate_tokens(compaction.usage_lookback);

    let needs_compaction = ThresholdCheck::new(used_tokens, params.context_window)
        .with_fraction(Some(params.threshold_fraction))
        .evaluate()?;

    debug!(
        "Context assembled (iteration={}, messages={}, estimated_tokens={used_tokens}, window={})",
        ctx.iteration,
        context.messages.len(),
        params.context_window
    );

    if !needs_compaction || !compaction.auto_compact {
        return Ok(context.messages);
    }

    debug!(
        "Context compaction triggered (iteration={}, message_count={})",
        ctx.iteration,
        context.messages.len()
    );

    let compactor = Compactor::new(Arc::clone(&params.provider), compaction.clone());
    let input = CompactionInput {
        messages: &context.messages,
        entries: &context.entries,
        used_tokens,
        window: params.context_window,
        compact_ratio: compaction.compact_ratio,
        has_existing_summary: context.has_summary(),
        previous_summary: context.summary.as_deref(),
    };

    let outcome = match cancellable(&params.cancel, compactor.compact(input)).await? {
        Ok(outcome) => outcome,
        Err(error) if error.recoverable => {
            warn!("Context compaction failed, continuing with full history: {error}");
            return Ok(context.messages);
        }
        Err(error) => return Err(error),
    };

    let Some(summary) = outcome.compaction else {
        return Ok(outcome.messages);
    };

    // The anchor names an entry of the store the context came from.
    params
        .context_store
        .append_compaction_record(
            &params.session_id,
            summary.summary,
            summary.trigger_entry_id.clone(),
        )
        .await
        .map_err(|e| AgentError::storage(&e))?;

    info!(
        "Context compacted (original_count={}, new_count={}, original_tokens={}, new_tokens={})",
        outcome.original_count, outcome.new_count, outcome.original_tokens, outcome.new_tokens
    );
    events
        .send(AgentEvent::context_compacted(
            outcome.original_count,
            outcome.new_count,
            outcome.original_tokens,
            outcome.new_tokens,
            summary.trigger_entry_id,
        ))
        .await;

    Ok(outcome.messages)
}

/// One iteration: assemble, call the model, persist, run tools.
pub(super) async fn execute_turn(
    ctx: &TurnContext,
    params: &RunParameters,
    events: &EventSink,
) -> Result<InternalTurnResult, AgentError> {
    let messages = load_turn_messages(ctx, params, events).await?;

    let request = ChatRequest {
        system: params.config.system_prompt.clone(),
        messages,
        tools: params.tools.definitions(),
        options: params.config.request.clone(),
    };

    debug!(
        "Calling model (iteration={}, provider={}, model={})",
        ctx.iteration,
        params.provider.provider(),
        params.provider.model()
    );
    let response = if events.is_streaming() {
        call_llm_streaming(
            params.provider.as_ref(),
            request,
            &params.config.retry,
            events,
            &params.cancel,
        )
        .await?
    } else {
        call_llm_with_retry(
            params.provider.as_ref(),
            request,
            &params.config.retry,
            &params.cancel,
        )
        .await?
    };

    params
        .storage
        .append_entry(
            &params.session_id,
            NewEntry::assistant(
                response.content.clone().filter(|c| !c.is_empty()),
                response.tool_calls.clone(),
                response.token_consumption,
            ),
        )
        .await
        .map_err(|e| AgentError::storage(&e))?;

    if response.has_tool_calls() {
        let results = execute_tool_calls(&params.tools, &response.tool_calls, &params.cancel).await?;
        append_tool_results(params.storage.as_ref(), &params.session_id, results, events).await?;
    }

    events
        .send(AgentEvent::iteration_complete(
            ctx.iteration,
            response.token_consumption,
        ))
        .await;

    if response.has_tool_calls() {
        Ok(InternalTurnResult::Continue)
    } else {
        info!("Agent completed (iteration={})", ctx.iteration);
        Ok(InternalTurnResult::Done(response))
    }
}
