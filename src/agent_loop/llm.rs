use super::helpers::{EventSink, calculate_backoff_delay, cancellable};
use super::types::StreamError;
use crate::events::AgentEvent;
use crate::llm::{
    ChatOutcome, ChatRequest, ParsedResponse, ProviderAdapter, StreamAccumulator, StreamDelta,
};
use crate::types::{AgentError, RetryConfig};
use futures::StreamExt;
use log::{error, warn};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Call the model with the non-streaming API, retrying rate limits and server errors.
pub(super) async fn call_llm_with_retry(
    provider: &dyn ProviderAdapter,
    request: ChatRequest,
    retry: &RetryConfig,
    cancel: &CancellationToken,
) -> Result<ParsedResponse, AgentError> {
    let max_retries = retry.max_retries;
    let mut attempt = 0u32;

    loop {
        let outcome = match cancellable(cancel, provider.invoke(request.clone())).await? {
            Ok(o) => o,
            Err(e) => {
                error!("Model call failed: {e:#}");
                return Err(AgentError::provider(format!("model call failed: {e:#}"), false));
            }
        };

        let (reason, recoverable_error) = match outcome {
            ChatOutcome::Success(response) => return Ok(response),
            ChatOutcome::InvalidRequest(msg) => {
                error!("Invalid request to model: {msg}");
                return Err(AgentError::provider(format!("invalid request: {msg}"), false));
            }
            ChatOutcome::RateLimited => (
                "rate limited".to_string(),
                format!("rate limited after {max_retries} retries"),
            ),
            ChatOutcome::ServerError(msg) => (
                format!("server error: {msg}"),
                format!("server error after {max_retries} retries: {msg}"),
            ),
        };

        attempt += 1;
        if attempt > max_retries {
            error!("Model call failed: {recoverable_error}");
            return Err(AgentError::provider(recoverable_error, true));
        }
        let delay = calculate_backoff_delay(attempt, retry);
        warn!(
            "Model call failed, retrying (attempt={attempt}, delay_ms={}, reason={reason})",
            delay.as_millis()
        );
        cancellable(cancel, sleep(delay)).await?;
    }
}

/// Call the model with the streaming API, forwarding every delta as it arrives.
///
/// Recoverable stream failures restart the stream with a fresh accumulator when retries
/// are configured; each restart is announced with a `Retry` event.
pub(super) async fn call_llm_streaming(
    provider: &dyn ProviderAdapter,
    request: ChatRequest,
    retry: &RetryConfig,
    events: &EventSink,
    cancel: &CancellationToken,
) -> Result<ParsedResponse, AgentError> {
    let max_retries = retry.max_retries;
    let mut attempt = 0u32;

    loop {
        match process_stream(provider, &request, events, cancel).await? {
            Ok(response) => {
                emit_markers(&response, events).await;
                return Ok(response);
            }
            Err(StreamError::Recoverable(msg)) => {
                attempt += 1;
                if attempt > max_retries {
                    error!("Streaming error after {max_retries} retries: {msg}");
                    return Err(AgentError::provider(
                        format!("streaming error after {max_retries} retries: {msg}"),
                        true,
                    ));
                }
                let delay = calculate_backoff_delay(attempt, retry);
                warn!(
                    "Streaming error, retrying (attempt={attempt}, delay_ms={}, error={msg})",
                    delay.as_millis()
                );
                events.send(AgentEvent::retry(attempt, delay, msg)).await;
                cancellable(cancel, sleep(delay)).await?;
            }
            Err(StreamError::Fatal(msg)) => {
                error!("Streaming error (non-recoverable): {msg}");
                return Err(AgentError::provider(format!("streaming error: {msg}"), false));
            }
        }
    }
}

/// Markers sent once the stream has been folded.
async fn emit_markers(response: &ParsedResponse, events: &EventSink) {
    if let Some(thinking) = response.thinking.as_deref().filter(|t| !t.is_empty()) {
        events.send(AgentEvent::thinking(thinking)).await;
    }
    if response.has_tool_calls() {
        events
            .send(AgentEvent::tool_calls(response.tool_calls.clone()))
            .await;
    }
}

/// Process a single streaming attempt.
///
/// The outer `Result` carries cancellation; the inner one the stream outcome.
async fn process_stream(
    provider: &dyn ProviderAdapter,
    request: &ChatRequest,
    events: &EventSink,
    cancel: &CancellationToken,
) -> Result<Result<ParsedResponse, StreamError>, AgentError> {
    let mut stream = provider.invoke_stream(request.clone());
    let mut accumulator = StreamAccumulator::new();
    let mut delta_count: u64 = 0;
    let mut channel_closed = false;

    log::debug!("Starting to consume model stream");

    while let Some(result) = cancellable(cancel, stream.next()).await? {
        // Log progress every 50 deltas to show stream is alive
        if delta_count > 0 && delta_count.is_multiple_of(50) {
            log::debug!("Stream progress: delta_count={delta_count}");
        }

        let delta = match result {
            Ok(delta) => delta,
            Err(e) => {
                log::error!("Stream iteration error delta_count={delta_count} error={e:#}");
                return Ok(Err(StreamError::Recoverable(format!("stream error: {e:#}"))));
            }
        };
        delta_count += 1;

        if let StreamDelta::Error {
            message,
            recoverable,
        } = &delta
        {
            log::warn!(
                "Stream error received delta_count={delta_count} message={message} recoverable={recoverable}"
            );
            return Ok(Err(if *recoverable {
                StreamError::Recoverable(message.clone())
            } else {
                StreamError::Fatal(message.clone())
            }));
        }

        accumulator.apply(&delta);

        if !channel_closed {
            if events.is_closed() {
                log::warn!(
                    "Event channel closed by receiver at delta_count={delta_count} - consumer may have disconnected"
                );
                channel_closed = true;
            } else {
                events.send(AgentEvent::chunk(delta)).await;
            }
        }
    }

    let response = accumulator.into_response();
    log::debug!(
        "Model stream completed delta_count={delta_count} finish_reason={:?} tool_calls={} token_consumption={:?}",
        response.finish_reason,
        response.tool_calls.len(),
        response.token_consumption
    );

    Ok(Ok(response))
}
