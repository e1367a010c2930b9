use crate::database::ScoredChunk;
use crate::session::{Role, SessionMessage};
use log::debug;
use std::fmt::Write;

const INSTRUCTION: &str =
    "Answer the question based only on the following context and history.";

/// A generation prompt and what went into it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledPrompt {
    pub text: String,
    /// Retrieved chunks included, from the most similar down
    pub chunks_used: usize,
    /// Most recent history messages included
    pub history_used: usize,
}

/// Builds prompts from retrieved context and session history within a character budget
#[derive(Debug, Clone, Copy)]
pub struct PromptBuilder {
    budget_chars: usize,
}

impl PromptBuilder {
    pub fn new(budget_chars: usize) -> Self {
        PromptBuilder { budget_chars }
    }

    /// Assemble a prompt for `question`.
    ///
    /// `chunks` must be ordered by descending similarity. While the prompt is over
    /// budget the oldest history message is dropped, then the least similar chunk.
    /// The question itself is never cut.
    pub fn assemble(
        &self,
        question: &str,
        chunks: &[ScoredChunk],
        history: &[SessionMessage],
    ) -> AssembledPrompt {
        let mut history_start = 0;
        let mut chunk_count = chunks.len();

        loop {
            let text = render(question, &chunks[..chunk_count], &history[history_start..]);
            let exhausted = history_start == history.len() && chunk_count == 0;

            if text.chars().count() <= self.budget_chars || exhausted {
                if history_start > 0 || chunk_count < chunks.len() {
                    debug!(
                        "Prompt budget of {} chars: dropped {} history messages and {} chunks",
                        self.budget_chars,
                        history_start,
                        chunks.len() - chunk_count
                    );
                }
                return AssembledPrompt {
                    text,
                    chunks_used: chunk_count,
                    history_used: history.len() - history_start,
                };
            }

            if history_start < history.len() {
                history_start += 1;
            } else {
                chunk_count -= 1;
            }
        }
    }
}

fn render(question: &str, chunks: &[ScoredChunk], history: &[SessionMessage]) -> String {
    let mut prompt = String::new();
    prompt.push_str(INSTRUCTION);

    prompt.push_str("\n\nContext:\n");
    if chunks.is_empty() {
        prompt.push_str("(none)\n");
    }
    for (i, chunk) in chunks.iter().enumerate() {
        let _ = writeln!(prompt, "[{}] {}", i + 1, chunk.record.text);
    }

    prompt.push_str("\nHistory:\n");
    if history.is_empty() {
        prompt.push_str("(none)\n");
    }
    for message in history {
        let speaker = match message.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        let _ = writeln!(prompt, "{}: {}", speaker, message.text);
    }

    let _ = write!(prompt, "\nQuestion: {}", question);
    prompt
}
