use super::helpers::{EventSink, cancellable};
use super::turn::{begin_turn, execute_turn};
use super::types::{InternalTurnResult, RunParameters, TurnContext};

use crate::events::AgentEvent;
use crate::llm::ParsedResponse;
use crate::stores::NewEntry;
use crate::types::AgentError;

use log::{debug, error};
use tokio::time::sleep;

/// Drive a run to completion.
///
/// Every failure is announced with an `Error` event before it is returned.
pub(super) async fn run_loop(
    params: RunParameters,
    events: EventSink,
) -> Result<ParsedResponse, AgentError> {
    let result = run_iterations(&params, &events).await;
    if let Err(error) = &result {
        error!(
            "Agent run failed (session={}, kind={:?}): {}",
            params.session_id, error.kind, error.message
        );
        events.send(AgentEvent::error(error)).await;
    }
    result
}

async fn run_iterations(
    params: &RunParameters,
    events: &EventSink,
) -> Result<ParsedResponse, AgentError> {
    let mut ctx = TurnContext::new();

    if let Some(message) = params.user_message.as_deref() {
        params
            .storage
            .append_entry(&params.session_id, NewEntry::user(message))
            .await
            .map_err(|e| AgentError::storage(&e))?;
    }

    loop {
        begin_turn(&mut ctx, params, events).await?;

        match execute_turn(&ctx, params, events).await? {
            InternalTurnResult::Done(response) => {
                events
                    .send(AgentEvent::done(
                        params.session_id.clone(),
                        ctx.iteration,
                        response.clone(),
                        ctx.start_time.elapsed(),
                    ))
                    .await;
                return Ok(response);
            }
            InternalTurnResult::Continue => {
                // No model call follows the last permitted iteration.
                if ctx.iteration < params.max_iterations {
                    let delay = params.config.iteration_delay();
                    debug!(
                        "Waiting {}ms before the next iteration",
                        delay.as_millis()
                    );
                    cancellable(&params.cancel, sleep(delay)).await?;
                }
            }
        }
    }
}
