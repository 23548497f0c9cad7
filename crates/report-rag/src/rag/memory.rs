//! Conversation memory splicing.
//!
//! The caller owns the history. Each request builds its message list from the
//! history it is handed and nothing else, so concurrent sessions never share
//! turns.

use crate::llm::ChatMessage;
use crate::types::ConversationTurn;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert assistant answering questions about official assessment reports.

Use only the provided context to answer the user's question. Do not invent information or cite external knowledge.

When answering:
- Provide clear, concise, and fact-based explanations.
- Cite specific data points, scenarios, or mechanisms if available in the context, using their reference tags.
- If the context does not contain a direct answer, say \"The provided documents do not contain enough information to answer this question precisely.\"

Never assume facts outside the given documents, and do not speculate.";

const EMPTY_CONTEXT_PLACEHOLDER: &str = "(no relevant passages were found)";

pub struct MemorySplicer {
    max_turns: usize,
    system_prompt: String,
}

impl MemorySplicer {
    pub fn new(max_turns: usize, system_prompt: Option<String>) -> Self {
        Self {
            max_turns,
            system_prompt: system_prompt.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }

    /// System message, then the last `max_turns` completed turns as user/assistant
    /// pairs, then one user message with the tagged context and the question.
    pub fn build_messages(
        &self,
        history: &[ConversationTurn],
        context: &str,
        question: &str,
    ) -> Vec<ChatMessage> {
        let completed: Vec<&ConversationTurn> = history
            .iter()
            .filter(|turn| !turn.assistant.trim().is_empty())
            .collect();
        let recent = &completed[completed.len().saturating_sub(self.max_turns)..];

        let mut messages = Vec::with_capacity(2 + recent.len() * 2);
        messages.push(ChatMessage::system(self.system_prompt.as_str()));
        for turn in recent {
            messages.push(ChatMessage::user(turn.user.as_str()));
            messages.push(ChatMessage::assistant(turn.assistant.as_str()));
        }
        messages.push(ChatMessage::user(answer_prompt(context, question)));
        messages
    }
}

fn answer_prompt(context: &str, question: &str) -> String {
    let context = context.trim_end();
    let context = if context.is_empty() {
        EMPTY_CONTEXT_PLACEHOLDER
    } else {
        context
    };
    format!(
        "Use the context below to answer the question precisely. \
         Cite the passages you rely on by their reference tags, e.g. (2).\n\n\
         Context:\n{}\n\n\
         Question: {}\n\n\
         Provide a detailed answer:",
        context, question
    )
}
