//! Text-generation contract and prompt assembly.

use async_trait::async_trait;

use crate::error::BackendError;

/// A chat-style prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// A text-generation backend.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &Prompt) -> Result<String, BackendError>;
}

/// One numbered passage handed to the generator.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextPassage {
    pub title: String,
    pub file_path: String,
    pub text: String,
}

/// Question plus the material to answer it from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynthesisRequest {
    pub query: String,
    /// Passages in relevance order; numbered from 1 in the prompt.
    pub passages: Vec<ContextPassage>,
    /// `(name, description)` pairs for concepts found near the passages.
    pub concept_notes: Vec<(String, String)>,
}

const SYSTEM_PROMPT: &str = "You answer questions about a documentation set. \
Use only the numbered sources provided. Cite sources inline as [n]. \
If the sources do not contain the answer, say so.";

impl SynthesisRequest {
    pub fn to_prompt(&self) -> Prompt {
        let mut user = String::new();
        user.push_str("Sources:\n\n");
        for (i, p) in self.passages.iter().enumerate() {
            let heading = if p.title.is_empty() {
                p.file_path.as_str()
            } else {
                p.title.as_str()
            };
            user.push_str(&format!("[{}] {} ({})\n{}\n\n", i + 1, heading, p.file_path, p.text.trim()));
        }
        if !self.concept_notes.is_empty() {
            user.push_str("Related concepts:\n");
            for (name, description) in &self.concept_notes {
                user.push_str(&format!("- {}: {}\n", name, description.trim()));
            }
            user.push('\n');
        }
        user.push_str("Question: ");
        user.push_str(self.query.trim());
        Prompt {
            system: SYSTEM_PROMPT.to_string(),
            user,
        }
    }
}
