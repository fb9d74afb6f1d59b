use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};
use tracing::info;

use crate::embedding::EmbeddingProvider;
use crate::error::{KeepsakeError, Result};

/// Output size of MultilingualE5Small
pub const DEFAULT_DIMENSION: usize = 384;

/// Local multilingual embeddings via fastembed.
///
/// Inference is CPU-bound, so calls run on the blocking pool.
pub struct FastEmbedProvider {
    model: Arc<Mutex<TextEmbedding>>,
}

impl FastEmbedProvider {
    pub fn new() -> Result<Self> {
        info!("Loading MultilingualE5Small embedding model");
        let model = TextEmbedding::try_new(InitOptions::new(FastEmbedModel::MultilingualE5Small))
            .map_err(|e| KeepsakeError::Embedding(e.to_string()))?;
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
        })
    }

    async fn run(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        tokio::task::spawn_blocking(move || {
            let mut model = model.lock().unwrap_or_else(|e| e.into_inner());
            model
                .embed(texts, None)
                .map_err(|e| KeepsakeError::Embedding(e.to_string()))
        })
        .await
        .map_err(|e| KeepsakeError::Embedding(format!("Embedding task failed: {e}")))?
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.run(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| KeepsakeError::Embedding("No embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.run(texts.to_vec()).await
    }

    fn dimension(&self) -> usize {
        DEFAULT_DIMENSION
    }

    fn name(&self) -> &str {
        "fastembed"
    }
}

#[cfg(all(test, feature = "ml-tests"))]
mod tests {
    use super::*;
    use crate::storage::cosine_similarity;

    #[tokio::test]
    async fn test_embed_returns_correct_dimension() {
        let provider = FastEmbedProvider::new().expect("Failed to load model");
        let embedding = provider.embed("我的 GPA 是 3.8").await.expect("Failed to embed");
        assert_eq!(embedding.len(), DEFAULT_DIMENSION);
    }

    #[tokio::test]
    async fn test_similar_texts_have_high_similarity() {
        let provider = FastEmbedProvider::new().expect("Failed to load model");

        let a = provider.embed("I want to study computer science").await.unwrap();
        let b = provider.embed("My intended major is computer science").await.unwrap();
        let c = provider.embed("The weather is rainy today").await.unwrap();

        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[tokio::test]
    async fn test_batch_embedding() {
        let provider = FastEmbedProvider::new().expect("Failed to load model");
        let texts = vec!["First".to_string(), "Second".to_string(), "第三".to_string()];
        let embeddings = provider.embed_batch(&texts).await.unwrap();
        assert_eq!(embeddings.len(), 3);
        assert!(embeddings.iter().all(|e| e.len() == DEFAULT_DIMENSION));
    }
}
