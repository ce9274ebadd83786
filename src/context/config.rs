//! Configuration for context compaction.

use serde::{Deserialize, Serialize};

/// Configuration for context compaction.
///
/// `compact_ratio` must stay below `threshold_fraction`, otherwise every turn
/// past the threshold compacts again.
///
/// # Example
///
/// ```
/// use veloca_agent::context::CompactionConfig;
///
/// let config = CompactionConfig::default()
///     .with_threshold_fraction(0.75)
///     .with_compact_ratio(0.3);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Fraction of the context window at which compaction triggers.
    /// Default: 0.8
    pub threshold_fraction: f64,

    /// Fraction of the context window kept verbatim after compaction.
    /// Default: 0.4
    pub compact_ratio: f64,

    /// How many recent assistant entries to inspect for a provider-reported
    /// token count before falling back to estimation.
    /// Default: 3
    pub usage_lookback: usize,

    /// Completion budget for the summarization call.
    /// Default: 2048
    pub summary_max_tokens: u32,

    /// Whether the loop compacts automatically when the threshold is reached.
    /// Default: true
    pub auto_compact: bool,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            threshold_fraction: 0.8,
            compact_ratio: 0.4,
            usage_lookback: 3,
            summary_max_tokens: 2048,
            auto_compact: true,
        }
    }
}

impl CompactionConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_threshold_fraction(mut self, fraction: f64) -> Self {
        self.threshold_fraction = fraction;
        self
    }

    #[must_use]
    pub const fn with_compact_ratio(mut self, ratio: f64) -> Self {
        self.compact_ratio = ratio;
        self
    }

    #[must_use]
    pub const fn with_usage_lookback(mut self, count: usize) -> Self {
        self.usage_lookback = count;
        self
    }

    #[must_use]
    pub const fn with_summary_max_tokens(mut self, tokens: u32) -> Self {
        self.summary_max_tokens = tokens;
        self
    }

    /// Set whether to auto-compact.
    #[must_use]
    pub const fn with_auto_compact(mut self, auto: bool) -> Self {
        self.auto_compact = auto;
        self
    }
}
