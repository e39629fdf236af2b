use tabletalk_memory::RetrievedDocument;
use tabletalk_provider::LlmMessage;

use crate::session::Turn;

/// Documents retrieved per question.
pub const TOP_K: usize = 5;

/// Most recent turns injected into the prompt, regardless of total history.
pub const HISTORY_WINDOW: usize = 10;

/// Context used when retrieval comes back empty.
pub const NO_DATA_SENTINEL: &str = "No data found in the database.";

const SYSTEM_PROMPT: &str = "\
You are an assistant specialized in analyzing tabular data uploaded to this system.
You have access to records from files users have loaded.
Use ONLY the data provided in the context below to answer questions.
If you cannot find the information in the data, say clearly that you did not find it.
Always answer in English.
Be concise and direct.

Data context:
{context}";

/// Join retrieved document bodies into one context block, falling back to
/// the sentinel when nothing useful came back.
pub fn join_context(docs: &[RetrievedDocument]) -> String {
    let joined = docs
        .iter()
        .map(|doc| doc.body.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    if joined.trim().is_empty() {
        NO_DATA_SENTINEL.to_string()
    } else {
        joined
    }
}

pub fn system_prompt(context: &str) -> String {
    SYSTEM_PROMPT.replace("{context}", context)
}

/// Windowed history as user/assistant pairs, followed by the new question.
pub fn build_messages(history: &[Turn], question: &str) -> Vec<LlmMessage> {
    let start = history.len().saturating_sub(HISTORY_WINDOW);
    let mut messages = Vec::with_capacity((history.len() - start) * 2 + 1);
    for turn in &history[start..] {
        messages.push(LlmMessage::user(turn.question.clone()));
        messages.push(LlmMessage::assistant(turn.answer.clone()));
    }
    messages.push(LlmMessage::user(question));
    messages
}
