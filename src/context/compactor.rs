//! Context compaction implementation.

use crate::llm::{ChatOutcome, ChatRequest, Message, ProviderAdapter, Role};
use crate::stores::Entry;
use crate::types::{AgentError, ErrorKind, RequestOptions};
use std::sync::Arc;

use super::assembler::summary_message;
use super::config::CompactionConfig;
use super::estimator::TokenEstimator;
use super::prompts::{SUMMARIZATION_SYSTEM_PROMPT, initial_summary_prompt, update_summary_prompt};

/// Everything the compactor needs about the current context.
#[derive(Debug, Clone, Copy)]
pub struct CompactionInput<'a> {
    /// Assembled messages, the summary message first when one exists.
    pub messages: &'a [Message],
    /// Entries behind `messages`, one per message after the summary.
    pub entries: &'a [Entry],
    /// Current size of `messages` in tokens.
    pub used_tokens: usize,
    /// Context window of the model in tokens.
    pub window: usize,
    /// Fraction of the window kept verbatim.
    pub compact_ratio: f64,
    /// Whether `messages[0]` is a summary message.
    pub has_existing_summary: bool,
    pub previous_summary: Option<&'a str>,
}

/// The summary produced by a compaction, ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionSummary {
    pub summary: String,
    /// Entry behind the last summarized message.
    pub trigger_entry_id: String,
    /// Number of messages folded into the summary.
    pub compacted_count: usize,
}

/// Result of a compaction operation.
#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    /// The message list to send to the model.
    pub messages: Vec<Message>,
    /// `None` when nothing was compacted.
    pub compaction: Option<CompactionSummary>,
    pub original_count: usize,
    pub new_count: usize,
    pub original_tokens: usize,
    pub new_tokens: usize,
}

impl CompactionOutcome {
    fn unchanged(messages: &[Message], used_tokens: usize) -> Self {
        Self {
            messages: messages.to_vec(),
            compaction: None,
            original_count: messages.len(),
            new_count: messages.len(),
            original_tokens: used_tokens,
            new_tokens: used_tokens,
        }
    }

    #[must_use]
    pub const fn is_compacted(&self) -> bool {
        self.compaction.is_some()
    }
}

/// Longest suffix of `messages` whose estimate fits in `keep_budget`, as a start index.
///
/// Returns 0 when everything fits or when the newest message alone does not.
#[allow(clippy::cast_precision_loss)]
fn scan_cutoff(messages: &[Message], keep_budget: f64) -> usize {
    let mut kept = 0usize;
    let mut cutoff = 0usize;
    for (index, message) in messages.iter().enumerate().rev() {
        let tokens = TokenEstimator::estimate_message(message);
        if (kept + tokens) as f64 > keep_budget {
            break;
        }
        kept += tokens;
        cutoff = index;
    }
    cutoff
}

/// Index of the first message to keep verbatim.
///
/// A cutoff that lands on an assistant reply or a tool result is moved to just after the
/// user message they answer, or to 0 when there is none, so a tool result never outlives
/// its call. Everything before the returned index is summarized; 0 means nothing is.
#[must_use]
pub fn find_cutoff(messages: &[Message], keep_budget: f64) -> usize {
    let cutoff = scan_cutoff(messages, keep_budget);
    if cutoff == 0 || !matches!(messages[cutoff].role, Role::Assistant | Role::Tool) {
        return cutoff;
    }
    messages[..cutoff]
        .iter()
        .rposition(|m| m.role == Role::User)
        .map_or(0, |user| user + 1)
}

/// Render messages as a plain-text transcript for summarization.
#[must_use]
pub fn render_transcript(messages: &[Message]) -> String {
    let mut blocks = Vec::with_capacity(messages.len());

    for message in messages {
        let text = message.text().unwrap_or_default();
        match message.role {
            Role::User => blocks.push(format!("[User]: {text}")),
            Role::Assistant => {
                if text.is_empty() {
                    blocks.push("[Assistant]: (no text reply)".to_string());
                } else {
                    blocks.push(format!("[Assistant]: {text}"));
                }
                if !message.tool_calls.is_empty() {
                    let calls = message
                        .tool_calls
                        .iter()
                        .map(|call| {
                            let name = if call.name.is_empty() { "unknown" } else { &call.name };
                            let args = if call.arguments.is_empty() { "{}" } else { &call.arguments };
                            format!("  - {name}({args})")
                        })
                        .collect::<Vec<_>>()
                        .join("\n");
                    blocks.push(format!("[Tool Calls]:\n{calls}"));
                }
            }
            Role::Tool => {
                let name = message.name.as_deref().unwrap_or("unknown_tool");
                blocks.push(format!("[Tool Result - {name}]: {text}"));
            }
            Role::System => blocks.push(format!("[System]: {text}")),
            Role::Developer => blocks.push(format!("[Developer]: {text}")),
        }
    }

    blocks.join("\n\n")
}

/// Summarizes old messages with the model so the rest fits the context window.
pub struct Compactor {
    provider: Arc<dyn ProviderAdapter>,
    config: CompactionConfig,
}

impl Compactor {
    #[must_use]
    pub fn new(provider: Arc<dyn ProviderAdapter>, config: CompactionConfig) -> Self {
        Self { provider, config }
    }

    #[must_use]
    pub const fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Compact `input.messages`.
    ///
    /// The caller persists the returned [`CompactionSummary`], if any. Nothing is
    /// compacted when the summary would be anchored on the entry the context already
    /// starts from.
    ///
    /// # Errors
    /// Returns a configuration error for a zero window, a compaction error when the last
    /// summarized message has no entry behind it, and a compaction error when the
    /// summarization call fails or returns no text.
    #[allow(clippy::cast_precision_loss)]
    pub async fn compact(&self, input: CompactionInput<'_>) -> Result<CompactionOutcome, AgentError> {
        if input.window == 0 {
            return Err(AgentError::configuration(
                "context window must be a positive token count",
            ));
        }
        let messages = input.messages;
        if messages.is_empty() {
            return Ok(CompactionOutcome::unchanged(messages, input.used_tokens));
        }

        let keep_budget = input.window as f64 * input.compact_ratio;
        let cutoff = find_cutoff(messages, keep_budget);

        let offset = usize::from(input.has_existing_summary);
        // Only the summary message would be folded; there is no entry to anchor on.
        if cutoff <= offset {
            log::debug!("Nothing to compact (cutoff {cutoff}, {} messages)", messages.len());
            return Ok(CompactionOutcome::unchanged(messages, input.used_tokens));
        }

        let (to_compact, to_keep) = messages.split_at(cutoff);

        let anchor_index = cutoff - 1 - offset;
        let Some(anchor) = input.entries.get(anchor_index) else {
            return Err(AgentError::compaction(format!(
                "no entry at index {anchor_index} to anchor compaction of {} messages",
                to_compact.len()
            )));
        };
        let trigger_entry_id = anchor.id.clone();

        // The anchor is replayed on the next assembly, so only entries before it leave
        // the context.
        if anchor_index == 0 {
            log::debug!(
                "Compaction would only re-anchor on entry {trigger_entry_id}; skipping ({} messages)",
                messages.len()
            );
            return Ok(CompactionOutcome::unchanged(messages, input.used_tokens));
        }

        let summary = self
            .summarize(to_compact, input.previous_summary.filter(|_| input.has_existing_summary))
            .await?;

        let mut new_messages = Vec::with_capacity(1 + to_keep.len());
        new_messages.push(summary_message(&summary));
        new_messages.extend_from_slice(to_keep);

        let new_tokens = TokenEstimator::estimate_history(&new_messages);
        log::debug!(
            "Compacted {} messages into a summary; kept {} (~{} -> ~{} tokens)",
            to_compact.len(),
            to_keep.len(),
            input.used_tokens,
            new_tokens
        );

        Ok(CompactionOutcome {
            original_count: messages.len(),
            new_count: new_messages.len(),
            original_tokens: input.used_tokens,
            new_tokens,
            messages: new_messages,
            compaction: Some(CompactionSummary {
                summary,
                trigger_entry_id,
                compacted_count: to_compact.len(),
            }),
        })
    }

    async fn summarize(
        &self,
        messages: &[Message],
        previous_summary: Option<&str>,
    ) -> Result<String, AgentError> {
        let transcript = render_transcript(messages);
        let prompt = match previous_summary {
            Some(previous) => update_summary_prompt(previous, &transcript),
            None => initial_summary_prompt(&transcript),
        };

        let request = ChatRequest {
            system: Some(SUMMARIZATION_SYSTEM_PROMPT.to_string()),
            messages: vec![Message::user(prompt)],
            tools: Vec::new(),
            options: RequestOptions::default().with_max_tokens(self.config.summary_max_tokens),
        };

        let outcome = self.provider.invoke(request).await.map_err(|e| {
            AgentError::new(
                ErrorKind::Compaction,
                format!("summarization call failed: {e:#}"),
                true,
            )
        })?;

        match outcome {
            ChatOutcome::Success(response) => response
                .content
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| AgentError::compaction("summarization returned no text")),
            ChatOutcome::RateLimited => Err(AgentError::new(
                ErrorKind::Compaction,
                "rate limited during summarization",
                true,
            )),
            ChatOutcome::InvalidRequest(msg) => Err(AgentError::compaction(format!(
                "invalid summarization request: {msg}"
            ))),
            ChatOutcome::ServerError(msg) => Err(AgentError::new(
                ErrorKind::Compaction,
                format!("server error during summarization: {msg}"),
                true,
            )),
        }
    }
}
