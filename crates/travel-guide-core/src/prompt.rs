//! Grounded prompt composition.
//!
//! A [`Prompt`] is the single request sent to the LLM: a system block
//! (instructions followed by the retrieved context) and an ordered list
//! of [`PromptMessage`]s holding prior turns and the new question.
//!
//! ```text
//! system:    <instructions>
//!            Context:
//!            [1] <best chunk>
//!            [2] <next chunk>
//! user:      Q1            ┐
//! assistant: A1            ┘ one pair per prior turn, oldest first
//! user:      <new question>
//! ```
//!
//! Providers send `system` and `messages` as-is.

use serde::Serialize;

use crate::models::{RetrievedChunk, Turn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prompt {
    pub system: String,
    pub messages: Vec<PromptMessage>,
}

const NO_CONTEXT: &str = "(no matching passages)";

impl Prompt {
    /// A prompt with no system block and a single user message.
    pub fn user_only(text: impl Into<String>) -> Self {
        Self {
            system: String::new(),
            messages: vec![PromptMessage::user(text)],
        }
    }

    /// Compose the retrieval-augmented prompt for one question.
    pub fn grounded(
        instructions: &str,
        context: &[RetrievedChunk],
        history: &[Turn],
        query: &str,
    ) -> Self {
        let mut system = String::from(instructions.trim_end());
        system.push_str("\n\nContext:\n");
        system.push_str(&format_context(context));

        let mut messages = Vec::with_capacity(history.len() * 2 + 1);
        for turn in history {
            messages.push(PromptMessage::user(turn.query.as_str()));
            messages.push(PromptMessage::assistant(turn.answer.as_str()));
        }
        messages.push(PromptMessage::user(query));

        Self { system, messages }
    }

    /// The final user message, i.e. the question being asked.
    pub fn question(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

fn format_context(context: &[RetrievedChunk]) -> String {
    if context.is_empty() {
        return NO_CONTEXT.to_string();
    }
    context
        .iter()
        .map(|c| format!("[{}] {}", c.rank, c.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn hit(rank: usize, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            rank,
            chunk_index: rank - 1,
            text: text.to_string(),
            score: 1.0 / rank as f32,
        }
    }

    fn turn(q: &str, a: &str) -> Turn {
        Turn {
            session_id: "s".into(),
            query: q.into(),
            answer: a.into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_grounded_layout() {
        let prompt = Prompt::grounded(
            "You are a travel expert.",
            &[hit(1, "Eiffel Tower"), hit(2, "Louvre")],
            &[turn("Q1", "A1")],
            "Q2",
        );
        assert!(prompt.system.starts_with("You are a travel expert."));
        assert!(prompt.system.contains("Context:\n[1] Eiffel Tower\n\n[2] Louvre"));
        assert_eq!(
            prompt.messages,
            vec![
                PromptMessage::user("Q1"),
                PromptMessage::assistant("A1"),
                PromptMessage::user("Q2"),
            ]
        );
        assert_eq!(prompt.question(), Some("Q2"));
    }

    #[test]
    fn test_empty_context_marker() {
        let prompt = Prompt::grounded("Be helpful.", &[], &[], "Anything?");
        assert!(prompt.system.ends_with(NO_CONTEXT));
    }

    #[test]
    fn test_user_only() {
        let prompt = Prompt::user_only("Plan 3 days in Kyoto.");
        assert!(prompt.system.is_empty());
        assert_eq!(prompt.question(), Some("Plan 3 days in Kyoto."));
    }
}
