//! Context assembly and compaction for long-running conversations.
//!
//! Every iteration of the agent loop rebuilds the message list from stored entries:
//! 1. [`resolve_chain`] finds the active compaction summary and the oldest entry still
//!    replayed verbatim
//! 2. [`assemble_context`] turns the retained entries into messages, summary first
//! 3. [`should_compact`] compares the estimated size against the context window
//! 4. [`Compactor::compact`] summarizes the oldest messages with the model
//!
//! Sizes come from [`TokenEstimator`] unless the provider reported a token count on a
//! recent assistant entry.
//!
//! # Configuration
//!
//! Use [`CompactionConfig`] to customize compaction behavior:
//! - `threshold_fraction`: fraction of the window that triggers compaction
//! - `compact_ratio`: fraction of the window kept verbatim afterwards
//! - `usage_lookback`: assistant entries searched for a reported token count
//! - `auto_compact`: whether the loop compacts on its own

mod assembler;
mod chain;
mod compactor;
mod config;
mod estimator;
mod prompts;
mod threshold;

pub use assembler::{
    AssembledContext, DEFAULT_USAGE_LOOKBACK, SUMMARY_HEADER, assemble, assemble_context,
    entry_to_message, retain_from, summary_message,
};
pub use chain::{ChainResolution, MAX_CHAIN_DEPTH, resolve_chain, resolve_chain_with_depth};
pub use compactor::{
    CompactionInput, CompactionOutcome, CompactionSummary, Compactor, find_cutoff,
    render_transcript,
};
pub use config::CompactionConfig;
pub use estimator::TokenEstimator;
pub use prompts::{SUMMARIZATION_SYSTEM_PROMPT, initial_summary_prompt, update_summary_prompt};
pub use threshold::{DEFAULT_THRESHOLD_FRACTION, ThresholdCheck, should_compact};
