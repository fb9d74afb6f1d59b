//! Building a memory manager from configuration

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{Config, EmbeddingProviderKind, LockProviderKind, StorageBackend};
use crate::embedding::{
    CachedEmbedder, DEFAULT_DIMENSION, EmbeddingProvider, FastEmbedProvider, NoopEmbedder,
    RemoteEmbedder,
};
use crate::error::{KeepsakeError, Result};
use crate::lifecycle::{FileLockProvider, InMemoryLockProvider, LlmSummarizer, LockProvider};
use crate::llm::{LlmProvider, NoopLlm, RemoteLlm};
use crate::manager::MemoryManager;
use crate::memory::Scorer;
use crate::storage::{InMemoryStore, LanceStore, MemoryStore};

/// Embedding provider named by the config, wrapped in the content-hash cache
pub fn build_embedder(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let embedding = &config.embedding;
    let provider: Arc<dyn EmbeddingProvider> = match embedding.provider {
        EmbeddingProviderKind::Fastembed => {
            if embedding.dimension != DEFAULT_DIMENSION {
                warn!(
                    "Local model produces {} dimensions, ignoring configured {}",
                    DEFAULT_DIMENSION, embedding.dimension
                );
            }
            info!("Initializing embedding model (this may take a moment on first run)...");
            Arc::new(FastEmbedProvider::new()?)
        }
        EmbeddingProviderKind::Remote => Arc::new(RemoteEmbedder::new(embedding)?),
        EmbeddingProviderKind::None => {
            info!("Embeddings disabled, recall will match text");
            return Ok(Arc::new(NoopEmbedder::new(embedding.dimension)));
        }
    };

    if embedding.cache_size == 0 {
        return Ok(provider);
    }
    Ok(Arc::new(CachedEmbedder::new(provider, embedding.cache_size)))
}

pub fn build_llm(config: &Config) -> Result<Arc<dyn LlmProvider>> {
    if !config.llm.enabled {
        return Ok(Arc::new(NoopLlm));
    }
    if config.llm.api_url.trim().is_empty() {
        return Err(KeepsakeError::Config(
            "llm.enabled requires llm.api_url".to_string(),
        ));
    }
    info!("Using LLM {} at {}", config.llm.model, config.llm.api_url);
    Ok(Arc::new(RemoteLlm::new(&config.llm)?))
}

/// Open the configured store sized for `dimension`-wide vectors
pub async fn build_store(config: &Config, dimension: usize) -> Result<Arc<dyn MemoryStore>> {
    match config.storage.backend {
        StorageBackend::Lance => {
            let path = config.storage.data_dir.join("lance");
            info!("Initializing storage at: {}", path.display());
            Ok(Arc::new(LanceStore::open(&path, dimension).await?))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage; memories are lost on exit");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

pub fn build_locks(config: &Config) -> Arc<dyn LockProvider> {
    match config.lock.provider {
        LockProviderKind::Memory => Arc::new(InMemoryLockProvider::new()),
        LockProviderKind::File => Arc::new(FileLockProvider::new(config.lock_dir())),
    }
}

/// Every collaborator the config describes, wired into one manager
pub async fn build_manager(config: &Config) -> Result<MemoryManager> {
    let embedder = build_embedder(config)?;
    let store = build_store(config, embedder.dimension()).await?;
    let llm = build_llm(config)?;

    Ok(MemoryManager::builder(store)
        .with_embedder(embedder)
        .with_llm(llm.clone())
        .with_scorer(Arc::new(Scorer::new(config.scoring.clone())))
        .with_locks(build_locks(config))
        .with_summarizer(Arc::new(LlmSummarizer::new(llm)))
        .with_extraction_config(config.extraction.clone())
        .with_conflict_config(config.conflict.clone())
        .with_decay_config(config.decay.clone())
        .with_compaction_config(config.compaction.clone())
        .with_recall_config(config.recall.clone())
        .with_context_config(config.context.clone())
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::RememberOptions;
    use crate::memory::{MemoryInput, MemoryType};

    fn offline_config(data_dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.storage.data_dir = data_dir.to_path_buf();
        config.embedding.provider = EmbeddingProviderKind::None;
        config
    }

    #[test]
    fn test_enabled_llm_without_url_is_rejected() {
        let mut config = Config::default();
        config.llm.enabled = true;
        assert!(build_llm(&config).is_err());
    }

    #[test]
    fn test_disabled_embeddings_use_noop() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = build_embedder(&offline_config(dir.path())).unwrap();
        assert_eq!(embedder.name(), "none");
    }

    #[tokio::test]
    async fn test_memory_backend_manager_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = offline_config(dir.path());
        config.storage.backend = StorageBackend::Memory;

        let manager = build_manager(&config).await.unwrap();
        let memory = manager
            .remember(
                "u1",
                MemoryInput::new(MemoryType::Fact, "academic", "GPA: 3.80"),
                RememberOptions::default(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(manager.get_memory("u1", memory.id).await.unwrap(), Some(memory));
    }

    #[tokio::test]
    async fn test_lance_backend_creates_tables_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = offline_config(dir.path());

        build_manager(&config).await.unwrap();
        assert!(dir.path().join("lance").exists());
    }
}
