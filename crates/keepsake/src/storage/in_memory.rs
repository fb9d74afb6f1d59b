//! Process-local store backed by concurrent maps.
//!
//! Similarity search is brute force over the owner's vectored memories.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::Result;
use crate::memory::types::{Entity, EntityType, Memory, MemoryType, entity_name_key};
use crate::storage::{
    MemoryQuery, MemoryStore, ScoredMemory, SimilarityQuery, rank_by_similarity,
};

type EntityKey = (String, EntityType, String);

#[derive(Debug, Default)]
pub struct InMemoryStore {
    memories: DashMap<Uuid, Memory>,
    entities: DashMap<EntityKey, Entity>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.memories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
    }

    fn collect(&self, predicate: impl Fn(&Memory) -> bool) -> Vec<Memory> {
        self.memories
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn newest(mut found: Vec<Memory>) -> Option<Memory> {
        found.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        found.into_iter().next()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn insert(&self, memory: &Memory) -> Result<()> {
        self.memories.insert(memory.id, memory.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Memory>> {
        Ok(self.memories.get(&id).map(|m| m.value().clone()))
    }

    async fn update(&self, memory: &Memory) -> Result<bool> {
        match self.memories.get_mut(&memory.id) {
            Some(mut slot) => {
                *slot = memory.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.memories.remove(&id).is_some())
    }

    async fn find_by_dedupe_key(&self, owner_id: &str, key: &str) -> Result<Option<Memory>> {
        let found = self.collect(|m| {
            m.owner_id == owner_id && !m.is_pending() && m.dedupe_key() == Some(key)
        });
        Ok(Self::newest(found))
    }

    async fn find_exact(
        &self,
        owner_id: &str,
        memory_type: MemoryType,
        content: &str,
    ) -> Result<Option<Memory>> {
        let found = self.collect(|m| {
            m.owner_id == owner_id
                && m.memory_type == memory_type
                && !m.is_pending()
                && m.content == content
        });
        Ok(Self::newest(found))
    }

    async fn search_similar(&self, query: &SimilarityQuery) -> Result<Vec<ScoredMemory>> {
        let scope = query.scope();
        Ok(rank_by_similarity(query, self.collect(|m| scope.matches(m))))
    }

    async fn list(&self, query: &MemoryQuery) -> Result<Vec<Memory>> {
        Ok(query.finish(self.collect(|m| query.matches(m))))
    }

    async fn count(&self, query: &MemoryQuery) -> Result<usize> {
        let query = query.unbounded();
        Ok(self
            .memories
            .iter()
            .filter(|entry| query.matches(entry.value()))
            .count())
    }

    async fn owner_counts(&self) -> Result<Vec<(String, usize)>> {
        let mut counts: std::collections::BTreeMap<String, usize> = Default::default();
        for entry in self.memories.iter() {
            *counts.entry(entry.value().owner_id.clone()).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn upsert_entity(&self, entity: Entity) -> Result<Entity> {
        let key = (entity.owner_id.clone(), entity.entity_type, entity.name_key());
        let merged = match self.entities.get_mut(&key) {
            Some(mut existing) => {
                existing.absorb(entity);
                existing.clone()
            }
            None => {
                self.entities.insert(key, entity.clone());
                entity
            }
        };
        Ok(merged)
    }

    async fn get_entity(
        &self,
        owner_id: &str,
        entity_type: EntityType,
        name: &str,
    ) -> Result<Option<Entity>> {
        let key = (owner_id.to_string(), entity_type, entity_name_key(name));
        Ok(self.entities.get(&key).map(|e| e.value().clone()))
    }

    async fn list_entities(&self, owner_id: &str) -> Result<Vec<Entity>> {
        let mut entities: Vec<Entity> = self
            .entities
            .iter()
            .filter(|entry| entry.value().owner_id == owner_id)
            .map(|entry| entry.value().clone())
            .collect();
        entities.sort_by(|a, b| (a.entity_type, a.name_key()).cmp(&(b.entity_type, b.name_key())));
        Ok(entities)
    }
}
