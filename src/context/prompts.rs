//! Prompts used to summarize compacted history.

/// System prompt for every summarization call.
pub const SUMMARIZATION_SYSTEM_PROMPT: &str = "You are a context summarization assistant. \
You read a transcript of an earlier part of a conversation between a user and an AI agent \
and write a summary that lets the agent continue the conversation without the transcript. \
Do not continue the conversation and do not answer any question in the transcript. \
Only output the summary.";

const SUMMARY_FORMAT: &str = "## Goal
[What the user is trying to accomplish]

## Progress
- [Decisions made, work completed, tool results that still matter]

## Open Items
- [Unanswered questions, pending steps, constraints the user stated]

## Key Facts
- [Names, paths, values, and identifiers needed later]

Be concise. Keep exact identifiers and numbers. Omit pleasantries.";

/// User prompt for the first summary of a session.
#[must_use]
pub fn initial_summary_prompt(transcript: &str) -> String {
    format!(
        "Summarize the following conversation so it can replace the original messages.\n\n\
         <conversation>\n{transcript}\n</conversation>\n\n\
         Use this format:\n\n{SUMMARY_FORMAT}"
    )
}

/// User prompt that folds newer messages into an existing summary.
#[must_use]
pub fn update_summary_prompt(previous_summary: &str, transcript: &str) -> String {
    format!(
        "An earlier part of this conversation was already summarized:\n\n\
         <previous-summary>\n{previous_summary}\n</previous-summary>\n\n\
         The conversation then continued:\n\n\
         <conversation>\n{transcript}\n</conversation>\n\n\
         Write one updated summary covering both. Keep facts from the previous summary \
         that still matter and drop ones that were superseded.\n\n\
         Use this format:\n\n{SUMMARY_FORMAT}"
    )
}
