//! Persistence for memories and entities
//!
//! [`MemoryStore`] is the seam every engine talks to. [`LanceStore`] keeps data
//! in LanceDB tables on disk; [`InMemoryStore`] backs tests and ephemeral runs.

pub mod filter;
pub mod in_memory;
pub mod lance;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::memory::types::{Entity, EntityType, Memory, MemoryType};

pub use filter::{MemoryQuery, QueryOrder};
pub use in_memory::InMemoryStore;
pub use lance::LanceStore;

/// Nearest-neighbor search scoped to one owner
#[derive(Debug, Clone)]
pub struct SimilarityQuery {
    pub owner_id: String,
    pub embedding: Vec<f32>,
    pub memory_types: Option<Vec<MemoryType>>,
    pub category: Option<String>,
    /// Cosine similarity floor, inclusive
    pub min_similarity: f32,
    pub limit: usize,
    pub include_archived: bool,
    pub include_pending: bool,
}

impl SimilarityQuery {
    pub fn new(owner_id: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            owner_id: owner_id.into(),
            embedding,
            memory_types: None,
            category: None,
            min_similarity: 0.0,
            limit: 10,
            include_archived: false,
            include_pending: false,
        }
    }

    pub fn with_memory_types(mut self, types: Vec<MemoryType>) -> Self {
        self.memory_types = Some(types);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn include_archived(mut self, include: bool) -> Self {
        self.include_archived = include;
        self
    }

    pub fn include_pending(mut self, include: bool) -> Self {
        self.include_pending = include;
        self
    }

    /// Attribute filter equivalent to this query's scope
    pub fn scope(&self) -> MemoryQuery {
        let mut query = MemoryQuery::for_owner(self.owner_id.clone()).with_has_embedding(true);
        query.memory_types = self.memory_types.clone();
        query.category = self.category.clone();
        if !self.include_archived {
            query.archived = Some(false);
        }
        if !self.include_pending {
            query.pending = Some(false);
        }
        query
    }
}

/// A memory paired with its cosine similarity to the query vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub memory: Memory,
    pub similarity: f32,
}

/// Durable store for memories and entities.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn insert(&self, memory: &Memory) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Memory>>;

    /// Replace a stored memory by id. Returns false if it does not exist.
    async fn update(&self, memory: &Memory) -> Result<bool>;

    /// Returns true if a memory was deleted, false if not found
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Newest non-pending memory of `owner_id` carrying `key` in its metadata
    async fn find_by_dedupe_key(&self, owner_id: &str, key: &str) -> Result<Option<Memory>>;

    /// Non-pending memory with identical owner, type and content
    async fn find_exact(
        &self,
        owner_id: &str,
        memory_type: MemoryType,
        content: &str,
    ) -> Result<Option<Memory>>;

    /// Most similar first, filtered by the similarity floor
    async fn search_similar(&self, query: &SimilarityQuery) -> Result<Vec<ScoredMemory>>;

    async fn list(&self, query: &MemoryQuery) -> Result<Vec<Memory>>;

    async fn count(&self, query: &MemoryQuery) -> Result<usize>;

    /// Memory count per owner
    async fn owner_counts(&self) -> Result<Vec<(String, usize)>>;

    /// Insert or merge an entity keyed on (owner, type, case-insensitive name)
    async fn upsert_entity(&self, entity: Entity) -> Result<Entity>;

    async fn get_entity(
        &self,
        owner_id: &str,
        entity_type: EntityType,
        name: &str,
    ) -> Result<Option<Entity>>;

    async fn list_entities(&self, owner_id: &str) -> Result<Vec<Entity>>;
}

/// Cosine similarity in [-1, 1]; 0 for mismatched lengths or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, na, nb), (x, y)| {
            (dot + x * y, na + x * x, nb + y * y)
        });

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Score, filter and rank candidates against a similarity query
pub(crate) fn rank_by_similarity(
    query: &SimilarityQuery,
    candidates: impl IntoIterator<Item = Memory>,
) -> Vec<ScoredMemory> {
    let mut scored: Vec<ScoredMemory> = candidates
        .into_iter()
        .filter_map(|memory| {
            let similarity = cosine_similarity(&query.embedding, memory.embedding.as_deref()?);
            (similarity >= query.min_similarity).then_some(ScoredMemory { memory, similarity })
        })
        .collect();

    scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    scored.truncate(query.limit);
    scored
}
