//! Chat completion providers used for extraction fallback and summaries

pub mod prompts;
mod remote;

use async_trait::async_trait;

use crate::error::{KeepsakeError, Result};

pub use remote::RemoteLlm;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Run one completion and return the assistant text
    async fn complete(&self, system: &str, user: &str) -> Result<String>;

    /// False when calls would certainly fail (unconfigured or circuit open)
    fn is_available(&self) -> bool;

    fn name(&self) -> &str;
}

/// Provider used when no LLM is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLlm;

#[async_trait]
impl LlmProvider for NoopLlm {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        Err(KeepsakeError::Llm("No LLM configured".to_string()))
    }

    fn is_available(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "none"
    }
}
