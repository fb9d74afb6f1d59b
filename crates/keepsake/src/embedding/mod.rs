//! Text embedding providers
//!
//! Embeddings are optional: a provider error or an empty vector both mean
//! "no vector right now". Callers degrade to lexical matching and the
//! scheduler backfills later.

mod cache;
mod local;
mod remote;

use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;

pub use cache::CachedEmbedder;
pub use local::{DEFAULT_DIMENSION, FastEmbedProvider};
pub use remote::RemoteEmbedder;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for a batch of texts, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

/// Embed `text`, mapping failures and empty vectors to `None`
pub async fn embed_or_none(provider: &dyn EmbeddingProvider, text: &str) -> Option<Vec<f32>> {
    match provider.embed(text).await {
        Ok(embedding) if !embedding.is_empty() => Some(embedding),
        Ok(_) => None,
        Err(e) => {
            warn!("Embedding via {} unavailable: {}", provider.name(), e);
            None
        }
    }
}

/// Provider used when embeddings are switched off
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEmbedder {
    dimension: usize,
}

impl NoopEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for NoopEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(Vec::new())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(vec![Vec::new(); texts.len()])
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "none"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingEmbedder, MockEmbedder};

    #[tokio::test]
    async fn test_noop_returns_empty() {
        let noop = NoopEmbedder::new(384);
        assert!(noop.embed("hello").await.unwrap().is_empty());
        assert_eq!(noop.embed_batch(&["a".into(), "b".into()]).await.unwrap().len(), 2);
        assert!(embed_or_none(&noop, "hello").await.is_none());
    }

    #[tokio::test]
    async fn test_embed_or_none_swallows_errors() {
        assert!(embed_or_none(&FailingEmbedder, "hello").await.is_none());
        let mock = MockEmbedder::new(16);
        assert_eq!(embed_or_none(&mock, "hello").await.map(|v| v.len()), Some(16));
    }
}
