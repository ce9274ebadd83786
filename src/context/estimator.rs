//! Token estimation for context size calculation.

use crate::llm::{ContentPart, Message, MessageContent, Role};

/// Estimates token count for messages without a tokenizer.
///
/// CJK ideographs count about 1.5 characters per token, everything else about 4.
/// Non-text parts have fixed costs. The estimate is deterministic and never
/// decreases when content is added.
pub struct TokenEstimator;

impl TokenEstimator {
    /// Characters per token for non-CJK text.
    const CHARS_PER_TOKEN: usize = 4;

    /// 5000 characters worth of text.
    pub const IMAGE_TOKENS: usize = 1250;

    /// A 5 minute clip at 263 tokens per second.
    pub const VIDEO_TOKENS: usize = 300 * 263;

    /// An 8 minute clip at 32 tokens per second.
    pub const AUDIO_TOKENS: usize = 480 * 32;

    const fn is_cjk(c: char) -> bool {
        matches!(c, '\u{4E00}'..='\u{9FA5}')
    }

    /// Estimate tokens for a text string.
    #[must_use]
    pub fn estimate_text(text: &str) -> usize {
        let (cjk, other) = text.chars().fold((0usize, 0usize), |(cjk, other), c| {
            if Self::is_cjk(c) {
                (cjk + 1, other)
            } else {
                (cjk, other + 1)
            }
        });

        // ceil(cjk / 1.5) == ceil(2 * cjk / 3)
        (cjk * 2).div_ceil(3) + other.div_ceil(Self::CHARS_PER_TOKEN)
    }

    /// Estimate tokens for a content part.
    #[must_use]
    pub fn estimate_part(part: &ContentPart) -> usize {
        match part {
            ContentPart::Text { text } => Self::estimate_text(text),
            ContentPart::Image { .. } => Self::IMAGE_TOKENS,
            ContentPart::Video { .. } => Self::VIDEO_TOKENS,
            ContentPart::Audio { transcript, .. } => {
                Self::AUDIO_TOKENS + transcript.as_deref().map_or(0, Self::estimate_text)
            }
        }
    }

    fn estimate_content(content: Option<&MessageContent>) -> usize {
        match content {
            None => 0,
            Some(MessageContent::Text(text)) => Self::estimate_text(text),
            Some(MessageContent::Parts(parts)) => parts.iter().map(Self::estimate_part).sum(),
        }
    }

    /// Estimate tokens for a single message.
    #[must_use]
    pub fn estimate_message(message: &Message) -> usize {
        let content = message.content.as_ref();
        match message.role {
            Role::User => Self::estimate_content(content),
            Role::Assistant => {
                let thinking = message.thinking.as_deref().map_or(0, Self::estimate_text);
                let calls: usize = message
                    .tool_calls
                    .iter()
                    .map(|call| Self::estimate_text(&call.name) + Self::estimate_text(&call.arguments))
                    .sum();
                Self::estimate_content(content) + thinking + calls
            }
            Role::Tool => {
                Self::estimate_content(content)
                    + message.name.as_deref().map_or(0, Self::estimate_text)
            }
            Role::System | Role::Developer => {
                content.map_or(0, |c| Self::estimate_text(&c.text()))
            }
        }
    }

    /// Estimate total tokens for a message history.
    #[must_use]
    pub fn estimate_history(messages: &[Message]) -> usize {
        messages.iter().map(Self::estimate_message).sum()
    }
}
