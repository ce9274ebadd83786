//! Compaction trigger predicate.

use crate::types::AgentError;

/// Default fraction of the context window at which compaction triggers.
pub const DEFAULT_THRESHOLD_FRACTION: f64 = 0.8;

/// Returns whether `used_tokens` has reached `fraction` of `context_window`.
///
/// `fraction` defaults to [`DEFAULT_THRESHOLD_FRACTION`].
///
/// # Errors
/// Returns a configuration error when `used_tokens` is missing or the window is
/// missing or zero.
#[allow(clippy::cast_precision_loss)]
pub fn should_compact(
    used_tokens: Option<usize>,
    context_window: Option<usize>,
    fraction: Option<f64>,
) -> Result<bool, AgentError> {
    let Some(used) = used_tokens else {
        return Err(AgentError::configuration("used token count is required"));
    };
    let window = match context_window {
        Some(w) if w > 0 => w,
        _ => {
            return Err(AgentError::configuration(
                "context window must be a positive token count",
            ));
        }
    };

    let fraction = fraction.unwrap_or(DEFAULT_THRESHOLD_FRACTION);
    Ok(used as f64 >= window as f64 * fraction)
}

/// Arguments of [`should_compact`] gathered in one value.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ThresholdCheck {
    pub used_tokens: Option<usize>,
    pub context_window: Option<usize>,
    pub fraction: Option<f64>,
}

impl ThresholdCheck {
    #[must_use]
    pub const fn new(used_tokens: usize, context_window: usize) -> Self {
        Self {
            used_tokens: Some(used_tokens),
            context_window: Some(context_window),
            fraction: None,
        }
    }

    #[must_use]
    pub const fn with_fraction(mut self, fraction: Option<f64>) -> Self {
        self.fraction = fraction;
        self
    }

    /// # Errors
    /// See [`should_compact`].
    pub fn evaluate(self) -> Result<bool, AgentError> {
        should_compact(self.used_tokens, self.context_window, self.fraction)
    }
}
