use crate::events::{AgentEvent, AgentEventEnvelope, SequenceCounter};
use crate::types::{AgentError, RetryConfig};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Convert u128 milliseconds to u64, capping at `u64::MAX`
#[allow(clippy::cast_possible_truncation)]
pub(super) const fn millis_to_u64(millis: u128) -> u64 {
    if millis > u64::MAX as u128 {
        u64::MAX
    } else {
        millis as u64
    }
}

/// Calculate exponential backoff delay with jitter.
///
/// Uses exponential backoff with the formula: `base * 2^(attempt-1) + jitter`,
/// capped at the maximum delay.
pub(super) fn calculate_backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let base_delay = config
        .base_delay_ms
        .saturating_mul(1u64 << attempt.saturating_sub(1).min(63));

    // Jitter is at most 1000ms or the base delay, whichever is smaller
    let max_jitter = config.base_delay_ms.min(1000);
    let jitter = if max_jitter > 0 {
        u64::from(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos(),
        ) % max_jitter
    } else {
        0
    };

    let delay_ms = base_delay.saturating_add(jitter).min(config.max_delay_ms);
    Duration::from_millis(delay_ms)
}

/// Run `future` unless `cancel` fires first.
pub(super) async fn cancellable<F>(
    cancel: &CancellationToken,
    future: F,
) -> Result<F::Output, AgentError>
where
    F: Future,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(AgentError::cancelled()),
        output = future => Ok(output),
    }
}

/// Where a run's events go. Buffered runs have nowhere to send them.
#[derive(Clone)]
pub(super) struct EventSink {
    channel: Option<(mpsc::Sender<AgentEventEnvelope>, SequenceCounter)>,
}

impl EventSink {
    pub(super) const fn disabled() -> Self {
        Self { channel: None }
    }

    pub(super) fn channel(tx: mpsc::Sender<AgentEventEnvelope>) -> Self {
        Self {
            channel: Some((tx, SequenceCounter::new())),
        }
    }

    /// Whether this run streams, and so consumes the provider's streaming API.
    pub(super) const fn is_streaming(&self) -> bool {
        self.channel.is_some()
    }

    /// Whether the consumer dropped its receiver.
    pub(super) fn is_closed(&self) -> bool {
        self.channel.as_ref().is_some_and(|(tx, _)| tx.is_closed())
    }

    pub(super) async fn send(&self, event: AgentEvent) {
        if let Some((tx, seq)) = &self.channel {
            send_event(tx, seq, event).await;
        }
    }
}

/// Send an event to the consumer channel with non-blocking behavior.
///
/// The sending behavior is designed to be resilient to slow or disconnected
/// consumers:
///
/// 1. First attempts a non-blocking send via `try_send`
/// 2. If the channel is full, waits up to 30 seconds for space
/// 3. If the channel is closed, logs and continues without blocking
/// 4. On timeout, logs an error and continues
pub(super) async fn send_event(
    tx: &mpsc::Sender<AgentEventEnvelope>,
    seq: &SequenceCounter,
    event: AgentEvent,
) {
    let envelope = AgentEventEnvelope::wrap(event, seq);

    match tx.try_send(envelope) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(envelope)) => {
            log::debug!("Event channel full, waiting for consumer...");
            match tokio::time::timeout(Duration::from_secs(30), tx.send(envelope)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    log::warn!("Event channel closed while sending - consumer disconnected");
                }
                Err(_) => {
                    log::error!("Timeout waiting to send event - consumer may be deadlocked");
                }
            }
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            log::debug!("Event channel closed - consumer disconnected");
        }
    }
}
