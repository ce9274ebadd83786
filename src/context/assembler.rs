//! Rebuilds the model-facing message list from stored entries.

use super::chain::resolve_chain;
use super::estimator::TokenEstimator;
use crate::llm::{Message, MessageContent, Role};
use crate::stores::{Entry, SessionSnapshot};

/// Prefix of the synthetic user message that carries a compaction summary.
pub const SUMMARY_HEADER: &str = "[Previous conversation summary]";

/// Number of recent assistant entries searched for a recorded token count.
pub const DEFAULT_USAGE_LOOKBACK: usize = 3;

/// Build the synthetic user message that stands in for summarized history.
#[must_use]
pub fn summary_message(summary: &str) -> Message {
    Message::user(format!("{SUMMARY_HEADER}\n\n{summary}"))
}

/// Entries from `start_entry_id` (inclusive) onward.
///
/// An unknown id keeps every entry.
#[must_use]
pub fn retain_from<'a>(entries: &'a [Entry], start_entry_id: Option<&str>) -> &'a [Entry] {
    let Some(start) = start_entry_id else {
        return entries;
    };
    if let Some(index) = entries.iter().position(|e| e.id == start) {
        &entries[index..]
    } else {
        log::warn!("Start entry {start} not found; assembling full history");
        entries
    }
}

/// Convert one stored entry into a chat message.
#[must_use]
pub fn entry_to_message(entry: &Entry) -> Message {
    let content = entry.content.clone().map(MessageContent::Text);

    match entry.role {
        Role::Assistant if !entry.tool_calls().is_empty() => {
            let content = content.filter(|c| !c.is_empty());
            Message {
                tool_calls: entry.tool_calls().to_vec(),
                ..Message::new(Role::Assistant, content)
            }
        }
        Role::Tool => {
            let mut message = Message::new(Role::Tool, content);
            if let Some(result) = entry.tool_result() {
                message.tool_call_id = Some(result.call_id.clone());
                message.name = Some(result.name.clone());
            }
            message
        }
        role => Message::new(role, content),
    }
}

/// Turn entries into messages, dropping everything before `start_entry_id` and
/// prepending `summary` when it is non-empty.
#[must_use]
pub fn assemble(entries: &[Entry], start_entry_id: Option<&str>, summary: Option<&str>) -> Vec<Message> {
    let retained = retain_from(entries, start_entry_id);
    let summary = summary.filter(|s| !s.trim().is_empty());

    let mut messages = Vec::with_capacity(retained.len() + usize::from(summary.is_some()));
    if let Some(summary) = summary {
        messages.push(summary_message(summary));
    }
    messages.extend(retained.iter().map(entry_to_message));
    messages
}

/// Messages for the next model call, with the entries they were built from.
#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    pub messages: Vec<Message>,
    /// Entries behind `messages`, one per message after the summary.
    pub entries: Vec<Entry>,
    pub summary: Option<String>,
}

impl AssembledContext {
    #[must_use]
    pub const fn has_summary(&self) -> bool {
        self.summary.is_some()
    }

    /// Index in `messages` of the first entry-backed message.
    #[must_use]
    pub const fn message_offset(&self) -> usize {
        if self.has_summary() { 1 } else { 0 }
    }

    /// Estimated size of `messages` in tokens.
    ///
    /// The newest of the last `lookback` assistant entries that recorded a token count
    /// supplies the total up to and including itself; only later messages are estimated.
    /// Without such an entry the whole list is estimated.
    #[must_use]
    pub fn estimate_tokens(&self, lookback: usize) -> usize {
        match self.cached_usage(lookback) {
            Some((index, used)) => {
                let after = index + self.message_offset() + 1;
                let rest = self
                    .messages
                    .get(after..)
                    .map_or(0, TokenEstimator::estimate_history);
                used.saturating_add(rest)
            }
            None => TokenEstimator::estimate_history(&self.messages),
        }
    }

    fn cached_usage(&self, lookback: usize) -> Option<(usize, usize)> {
        self.entries
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, e)| e.role == Role::Assistant)
            .take(lookback)
            .find_map(|(index, e)| {
                e.token_consumption
                    .map(|tokens| (index, usize::try_from(tokens).unwrap_or(usize::MAX)))
            })
    }
}

/// Resolve the compaction chain of a session and assemble its messages.
#[must_use]
pub fn assemble_context(snapshot: &SessionSnapshot) -> AssembledContext {
    let resolution = resolve_chain(&snapshot.entries, &snapshot.compaction_records);
    let summary = resolution.summary.filter(|s| !s.trim().is_empty());

    let entries = retain_from(&snapshot.entries, resolution.start_entry_id.as_deref()).to_vec();
    let messages = assemble(&entries, None, summary.as_deref());

    AssembledContext {
        messages,
        entries,
        summary,
    }
}
