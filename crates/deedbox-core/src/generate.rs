//! Answer synthesis capability, prompt construction and output cleanup.

use async_trait::async_trait;

use crate::models::{document_name, ScoredChunk};

/// Answer returned when the index holds nothing to ground an answer on.
pub const NO_RELEVANT_DOCUMENTS: &str = "No relevant documents found.";

/// Produces a natural-language answer from a query and retrieved context.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    fn name(&self) -> &str;

    /// `context` is the output of [`build_context`]; `prompt` the full
    /// instruction built by [`build_prompt`].
    async fn generate(&self, query: &str, context: &str, prompt: &str) -> anyhow::Result<String>;
}

/// Render retrieved chunks as `[Document: <name>]` blocks separated by
/// blank lines, in ranking order.
pub fn build_context(hits: &[ScoredChunk]) -> String {
    hits.iter()
        .map(|h| format!("[Document: {}]\n{}", document_name(&h.document_path), h.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_prompt(query: &str, context: &str) -> String {
    format!(
        "You are an assistant for a real-estate company. You help analyse property \
documents such as leases, purchase agreements and loan agreements.\n\n\
Use ONLY the following context to answer the question. If the answer is not in \
the context, say honestly that you do not know instead of speculating.\n\n\
CONTEXT:\n{context}\n\nQUESTION:\n{query}\n\nANSWER:"
    )
}

/// Strip reasoning preamble some models emit before the actual answer.
///
/// Removes lines starting with "I need to", "I already know that" or
/// "The user", and any span from "Okay, so I need to" through the next
/// "First,". Returns `None` when nothing is left.
pub fn clean_output(raw: &str) -> Option<String> {
    let mut text = raw.to_string();
    while let Some(start) = text.find("Okay, so I need to") {
        match text[start..].find("First,") {
            Some(rel) => text.replace_range(start..start + rel + "First,".len(), ""),
            None => break,
        }
    }

    const PREAMBLES: [&str; 3] = ["I need to", "I already know that", "The user"];
    let kept: Vec<&str> = text
        .lines()
        .filter(|line| {
            let l = line.trim_start();
            !PREAMBLES.iter().any(|p| l.starts_with(p))
        })
        .collect();

    let cleaned = kept.join("\n").trim().to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(path: &str, text: &str) -> ScoredChunk {
        ScoredChunk {
            document_path: path.to_string(),
            chunk_index: 0,
            text: text.to_string(),
            score: 0.5,
        }
    }

    #[test]
    fn test_build_context_names_documents() {
        let ctx = build_context(&[
            hit("leases/unit5.txt", "Rent is 900 EUR."),
            hit("sales/house.pdf", "Price 250k."),
        ]);
        assert_eq!(
            ctx,
            "[Document: unit5.txt]\nRent is 900 EUR.\n\n[Document: house.pdf]\nPrice 250k."
        );
    }

    #[test]
    fn test_prompt_contains_query_and_context() {
        let p = build_prompt("What is the rent?", "[Document: a.txt]\nRent 900");
        assert!(p.contains("QUESTION:\nWhat is the rent?"));
        assert!(p.contains("CONTEXT:\n[Document: a.txt]\nRent 900"));
        assert!(p.ends_with("ANSWER:"));
    }

    #[test]
    fn test_clean_output_strips_reasoning() {
        let raw = "Okay, so I need to find the rent. First, the answer:\nI need to check.\nThe rent is 900 EUR.";
        assert_eq!(clean_output(raw).unwrap(), "the answer:\nThe rent is 900 EUR.");
    }

    #[test]
    fn test_clean_output_plain_answer_untouched() {
        assert_eq!(clean_output("  The deposit is 3 months.  ").unwrap(), "The deposit is 3 months.");
    }

    #[test]
    fn test_clean_output_empty() {
        assert!(clean_output("I need to think about this.\n").is_none());
        assert!(clean_output("   ").is_none());
    }
}
