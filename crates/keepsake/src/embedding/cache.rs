use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lru::LruCache;
use sha2::{Digest, Sha256};

use crate::embedding::EmbeddingProvider;
use crate::error::Result;

const DEFAULT_CACHE_CAPACITY: usize = 1024;

type ContentHash = [u8; 32];

/// LRU cache in front of another provider, keyed by the SHA-256 of the
/// provider name and the text. Empty vectors are never cached.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    cache: Mutex<LruCache<ContentHash, Vec<f32>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity)
            .or_else(|| NonZeroUsize::new(DEFAULT_CACHE_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(cap)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn key(&self, text: &str) -> ContentHash {
        let mut hasher = Sha256::new();
        hasher.update(self.inner.name().as_bytes());
        hasher.update(b":");
        hasher.update(text.as_bytes());
        hasher.finalize().into()
    }

    fn lookup(&self, key: &ContentHash) -> Option<Vec<f32>> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let found = cache.get(key).cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    fn store(&self, key: ContentHash, embedding: &[f32]) {
        if embedding.is_empty() {
            return;
        }
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.put(key, embedding.to_vec());
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (hits, misses) since construction
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = self.key(text);
        if let Some(hit) = self.lookup(&key) {
            return Ok(hit);
        }

        let embedding = self.inner.embed(text).await?;
        self.store(key, &embedding);
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let keys: Vec<ContentHash> = texts.iter().map(|t| self.key(t)).collect();
        let mut results: Vec<Option<Vec<f32>>> = keys.iter().map(|k| self.lookup(k)).collect();

        let missing: Vec<usize> = results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.is_none().then_some(i))
            .collect();

        if !missing.is_empty() {
            let pending: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let fresh = self.inner.embed_batch(&pending).await?;
            for (&i, embedding) in missing.iter().zip(fresh) {
                self.store(keys[i], &embedding);
                results[i] = Some(embedding);
            }
        }

        Ok(results.into_iter().map(Option::unwrap_or_default).collect())
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::NoopEmbedder;
    use crate::testing::MockEmbedder;

    #[tokio::test]
    async fn test_repeat_embed_hits_cache() {
        let mock = Arc::new(MockEmbedder::new(8));
        let cached = CachedEmbedder::new(mock.clone(), 4);

        let first = cached.embed("GPA 3.8").await.unwrap();
        let second = cached.embed("GPA 3.8").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(mock.calls(), 1);
        assert_eq!(cached.stats(), (1, 1));
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let mock = Arc::new(MockEmbedder::new(8));
        let cached = CachedEmbedder::new(mock.clone(), 2);

        cached.embed("a").await.unwrap();
        cached.embed("b").await.unwrap();
        cached.embed("c").await.unwrap();
        assert_eq!(cached.len(), 2);

        cached.embed("a").await.unwrap();
        assert_eq!(mock.calls(), 4, "evicted entry is recomputed");
    }

    #[tokio::test]
    async fn test_batch_only_computes_misses() {
        let mock = Arc::new(MockEmbedder::new(8));
        let cached = CachedEmbedder::new(mock.clone(), 16);

        cached.embed("known").await.unwrap();
        let batch = cached
            .embed_batch(&["known".to_string(), "new".to_string()])
            .await
            .unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], mock.embed("known").await.unwrap());
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_empty_vectors_not_cached() {
        let cached = CachedEmbedder::new(Arc::new(NoopEmbedder::new(8)), 16);
        cached.embed("x").await.unwrap();
        assert!(cached.is_empty());
    }
}
