//! Condensing several notes into one within a token budget

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::Result;
use crate::llm::LlmProvider;
use crate::llm::prompts::{SUMMARY_PROMPT, SUMMARY_SYSTEM_PROMPT};
use crate::memory::{estimate_tokens, truncate_to_tokens};

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summary of `contents` in at most roughly `max_tokens` tokens
    async fn summarize(&self, contents: &[String], max_tokens: usize) -> Result<String>;
}

/// Keeps whole sentences in order, dropping repeats, until the budget is spent
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractiveSummarizer;

impl ExtractiveSummarizer {
    pub fn condense(&self, contents: &[String], max_tokens: usize) -> String {
        let mut seen = HashSet::new();
        let mut summary = String::new();

        for sentence in contents.iter().flat_map(|c| split_sentences(c)) {
            let key = sentence.to_lowercase();
            if !seen.insert(key) {
                continue;
            }

            let candidate = if summary.is_empty() {
                sentence.to_string()
            } else {
                format!("{summary} {sentence}")
            };
            if estimate_tokens(&candidate) > max_tokens {
                break;
            }
            summary = candidate;
        }

        if summary.is_empty() {
            // first sentence alone is over budget
            let first = contents
                .iter()
                .flat_map(|c| split_sentences(c))
                .next()
                .unwrap_or_default();
            return truncate_to_tokens(first, max_tokens).trim_end().to_string();
        }
        summary
    }
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(&self, contents: &[String], max_tokens: usize) -> Result<String> {
        Ok(self.condense(contents, max_tokens))
    }
}

/// Split at sentence terminators. ASCII periods only end a sentence before
/// whitespace so decimals like 3.80 stay intact.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((index, c)) = chars.next() {
        let next = chars.peek().map(|(_, n)| *n);
        let ends = match c {
            '。' | '！' | '？' | '；' | ';' | '\n' => true,
            '.' | '!' | '?' => next.is_none_or(char::is_whitespace),
            _ => false,
        };
        if ends {
            let end = index + c.len_utf8();
            push_trimmed(&mut sentences, &text[start..end]);
            start = end;
        }
    }
    push_trimmed(&mut sentences, &text[start..]);
    sentences
}

fn push_trimmed<'a>(sentences: &mut Vec<&'a str>, sentence: &'a str) {
    let sentence = sentence.trim();
    if !sentence.is_empty() {
        sentences.push(sentence);
    }
}

/// Asks the LLM for a summary and falls back to extraction when it cannot
pub struct LlmSummarizer {
    llm: Arc<dyn LlmProvider>,
    fallback: ExtractiveSummarizer,
}

impl LlmSummarizer {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            fallback: ExtractiveSummarizer,
        }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, contents: &[String], max_tokens: usize) -> Result<String> {
        if !self.llm.is_available() {
            return Ok(self.fallback.condense(contents, max_tokens));
        }

        let notes = contents
            .iter()
            .map(|c| format!("- {}", c.trim()))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = SUMMARY_PROMPT
            .replace("{max_tokens}", &max_tokens.to_string())
            .replace("{contents}", &notes);

        match self.llm.complete(SUMMARY_SYSTEM_PROMPT, &prompt).await {
            Ok(summary) if !summary.trim().is_empty() => {
                debug!("LLM summary via {}", self.llm.name());
                Ok(summary.trim().to_string())
            }
            Ok(_) => {
                warn!("LLM returned an empty summary, using extractive fallback");
                Ok(self.fallback.condense(contents, max_tokens))
            }
            Err(e) => {
                warn!("LLM summary failed, using extractive fallback: {}", e);
                Ok(self.fallback.condense(contents, max_tokens))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::NoopLlm;
    use crate::testing::ScriptedLlm;

    fn notes(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_sentences_keep_decimals() {
        assert_eq!(
            split_sentences("GPA is 3.80. Wants MIT! 想学计算机。预算有限"),
            vec!["GPA is 3.80.", "Wants MIT!", "想学计算机。", "预算有限"]
        );
    }

    #[test]
    fn test_extractive_drops_repeats_and_respects_budget() {
        let contents = notes(&[
            "Likes Boston. Wants a big campus.",
            "likes boston. Prefers research universities.",
        ]);

        let full = ExtractiveSummarizer.condense(&contents, 100);
        assert_eq!(
            full,
            "Likes Boston. Wants a big campus. Prefers research universities."
        );

        let tight = ExtractiveSummarizer.condense(&contents, 5);
        assert_eq!(tight, "Likes Boston.");
        assert!(estimate_tokens(&tight) <= 5);
    }

    #[test]
    fn test_extractive_truncates_oversized_first_sentence() {
        let contents = notes(&["abcdefghijklmnopqrstuvwxyz"]);
        let summary = ExtractiveSummarizer.condense(&contents, 2);
        assert_eq!(summary, "abcdefgh");
    }

    #[tokio::test]
    async fn test_llm_summary_is_used() {
        let llm = Arc::new(ScriptedLlm::new().with_response("  Boston, big campus.  "));
        let summarizer = LlmSummarizer::new(llm.clone());

        let summary = summarizer
            .summarize(&notes(&["Likes Boston", "Wants a big campus"]), 20)
            .await
            .unwrap();

        assert_eq!(summary, "Boston, big campus.");
        let prompt = &llm.prompts()[0];
        assert!(prompt.contains("at most 20 tokens"));
        assert!(prompt.contains("- Likes Boston\n- Wants a big campus"));
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back() {
        let llm = Arc::new(ScriptedLlm::new().with_error("timeout"));
        let summary = LlmSummarizer::new(llm)
            .summarize(&notes(&["Likes Boston."]), 20)
            .await
            .unwrap();
        assert_eq!(summary, "Likes Boston.");
    }

    #[tokio::test]
    async fn test_unavailable_llm_is_not_called() {
        let summary = LlmSummarizer::new(Arc::new(NoopLlm))
            .summarize(&notes(&["Likes Boston."]), 20)
            .await
            .unwrap();
        assert_eq!(summary, "Likes Boston.");
    }
}
