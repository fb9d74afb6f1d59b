//! Test utilities for keepsake - deterministic collaborators and fixtures
//!
//! This module provides stand-ins for the external collaborators so the
//! lifecycle engines can be exercised without a model download or network:
//! - Hash-based embedder whose vectors overlap for texts sharing words
//! - An embedder that always fails
//! - A scripted LLM that replays canned completions

use std::collections::VecDeque;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::embedding::EmbeddingProvider;
use crate::error::{KeepsakeError, Result};
use crate::llm::LlmProvider;
use crate::memory::{Memory, MemoryType};

/// Mock embedding provider for fast tests that don't need real ML.
///
/// Each lowercase word is hashed into one bucket of the vector and the result
/// is L2-normalized, so identical texts have cosine similarity 1.0 and texts
/// sharing most of their words land close together.
#[derive(Debug, Default)]
pub struct MockEmbedder {
    dimension: usize,
    calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `embed` invocations so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The vector `embed` would return, without counting a call
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in text.split_whitespace() {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            vector[0] = 1.0;
            return vector;
        }
        vector.iter_mut().for_each(|v| *v /= norm);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Embedder that fails every call, for exercising degraded paths
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(KeepsakeError::Embedding("embedding service unavailable".to_string()))
    }

    fn dimension(&self) -> usize {
        384
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// LLM that replays queued completions in order.
///
/// Once the queue is drained every call fails, mimicking an outage.
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, response: impl Into<String>) -> Self {
        self.push(Ok(response.into()));
        self
    }

    pub fn with_error(self, message: impl Into<String>) -> Self {
        self.push(Err(KeepsakeError::Llm(message.into())));
        self
    }

    fn push(&self, response: Result<String>) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
    }

    /// Number of completions requested so far
    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// User prompts received, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn complete(&self, _system: &str, user: &str) -> Result<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(user.to_string());
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err(KeepsakeError::Llm("script exhausted".to_string())))
    }

    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// A memory created `age_days` before `now`
pub fn aged_memory(
    owner_id: &str,
    memory_type: MemoryType,
    category: &str,
    content: &str,
    importance: f32,
    age_days: i64,
    now: DateTime<Utc>,
) -> Memory {
    Memory::new_at(
        owner_id,
        memory_type,
        category,
        content,
        now - Duration::days(age_days),
    )
    .with_importance(importance)
}
