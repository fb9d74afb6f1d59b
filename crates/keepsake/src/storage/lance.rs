use std::path::Path;
use std::sync::Arc;

use arrow_array::{
    Array, BooleanArray, FixedSizeListArray, Float32Array, Int32Array, RecordBatch,
    RecordBatchIterator, StringArray, TimestampMicrosecondArray,
};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::TryStreamExt;
use lancedb::DistanceType;
use lancedb::Table;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use uuid::Uuid;

use crate::error::{KeepsakeError, Result};
use crate::memory::types::{
    Entity, EntityRelation, EntityType, Memory, MemoryType, Metadata, entity_name_key,
};
use crate::storage::filter::{MemoryQuery, escape_sql};
use crate::storage::{MemoryStore, ScoredMemory, SimilarityQuery, rank_by_similarity};

const MEMORIES_TABLE: &str = "memories";
const ENTITIES_TABLE: &str = "entities";

/// LanceDB-backed store.
///
/// Memories without a vector are written with a zero vector and
/// `has_embedding = false` so the fixed-size column stays dense.
pub struct LanceStore {
    connection: Connection,
    dimension: i32,
    memories_table: Option<Table>,
    entities_table: Option<Table>,
}

impl LanceStore {
    pub async fn connect(path: &Path, dimension: usize) -> Result<Self> {
        let uri = path
            .to_str()
            .ok_or_else(|| KeepsakeError::Storage("Invalid path encoding".to_string()))?;

        let dimension = i32::try_from(dimension)
            .ok()
            .filter(|d| *d > 0)
            .ok_or_else(|| {
                KeepsakeError::Storage(format!("Invalid embedding dimension: {dimension}"))
            })?;

        let connection = lancedb::connect(uri)
            .execute()
            .await
            .map_err(|e| KeepsakeError::Storage(format!("Failed to connect to LanceDB: {e}")))?;

        Ok(Self {
            connection,
            dimension,
            memories_table: None,
            entities_table: None,
        })
    }

    /// Connect and open both tables, creating them on first use
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        std::fs::create_dir_all(path)?;
        let mut store = Self::connect(path, dimension).await?;

        if store.table_exists(MEMORIES_TABLE).await? {
            store.open_memories_table().await?;
        } else {
            store.create_memories_table().await?;
        }

        if store.table_exists(ENTITIES_TABLE).await? {
            store.open_entities_table().await?;
        } else {
            store.create_entities_table().await?;
        }

        tracing::debug!("Opened LanceDB store at {}", path.display());
        Ok(store)
    }

    pub fn dimension(&self) -> usize {
        self.dimension as usize
    }

    fn memories_schema(dimension: i32) -> Arc<Schema> {
        let timestamp = DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()));
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("owner_id", DataType::Utf8, false),
            Field::new("memory_type", DataType::Utf8, false),
            Field::new("category", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("importance", DataType::Float32, false),
            Field::new("access_count", DataType::Int32, false),
            Field::new("last_accessed_at", timestamp.clone(), true),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension,
                ),
                false,
            ),
            Field::new("has_embedding", DataType::Boolean, false),
            Field::new("dedupe_key", DataType::Utf8, true),
            Field::new("archived", DataType::Boolean, false),
            Field::new("pending", DataType::Boolean, false),
            Field::new("metadata", DataType::Utf8, false),
            Field::new("expires_at", timestamp.clone(), true),
            Field::new("created_at", timestamp.clone(), false),
            Field::new("updated_at", timestamp, false),
        ]))
    }

    fn entities_schema() -> Arc<Schema> {
        let timestamp = DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()));
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("owner_id", DataType::Utf8, false),
            Field::new("entity_type", DataType::Utf8, false),
            Field::new("name", DataType::Utf8, false),
            Field::new("name_key", DataType::Utf8, false),
            Field::new("description", DataType::Utf8, false),
            Field::new("attributes", DataType::Utf8, false),
            Field::new("relations", DataType::Utf8, false),
            Field::new("created_at", timestamp.clone(), false),
            Field::new("updated_at", timestamp, false),
        ]))
    }

    pub async fn create_memories_table(&mut self) -> Result<()> {
        let schema = Self::memories_schema(self.dimension);
        let batch = self.memories_to_batch(&[], schema.clone())?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        let table = self
            .connection
            .create_table(MEMORIES_TABLE, Box::new(batches))
            .execute()
            .await
            .map_err(|e| KeepsakeError::Storage(format!("Failed to create memories table: {e}")))?;

        self.memories_table = Some(table);
        Ok(())
    }

    pub async fn create_entities_table(&mut self) -> Result<()> {
        let schema = Self::entities_schema();
        let batch = Self::entities_to_batch(&[], schema.clone())?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        let table = self
            .connection
            .create_table(ENTITIES_TABLE, Box::new(batches))
            .execute()
            .await
            .map_err(|e| KeepsakeError::Storage(format!("Failed to create entities table: {e}")))?;

        self.entities_table = Some(table);
        Ok(())
    }

    pub async fn open_memories_table(&mut self) -> Result<()> {
        let table = self
            .connection
            .open_table(MEMORIES_TABLE)
            .execute()
            .await
            .map_err(|e| KeepsakeError::Storage(format!("Failed to open memories table: {e}")))?;

        self.memories_table = Some(table);
        Ok(())
    }

    pub async fn open_entities_table(&mut self) -> Result<()> {
        let table = self
            .connection
            .open_table(ENTITIES_TABLE)
            .execute()
            .await
            .map_err(|e| KeepsakeError::Storage(format!("Failed to open entities table: {e}")))?;

        self.entities_table = Some(table);
        Ok(())
    }

    pub async fn table_exists(&self, name: &str) -> Result<bool> {
        let names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| KeepsakeError::Storage(format!("Failed to list tables: {e}")))?;

        Ok(names.contains(&name.to_string()))
    }

    fn memories(&self) -> Result<&Table> {
        self.memories_table
            .as_ref()
            .ok_or_else(|| KeepsakeError::Storage("Memories table not initialized".to_string()))
    }

    fn entities(&self) -> Result<&Table> {
        self.entities_table
            .as_ref()
            .ok_or_else(|| KeepsakeError::Storage("Entities table not initialized".to_string()))
    }

    /// Convert memories to an Arrow RecordBatch
    fn memories_to_batch(&self, memories: &[Memory], schema: Arc<Schema>) -> Result<RecordBatch> {
        let dimension = self.dimension as usize;

        for memory in memories {
            if let Some(embedding) = memory.embedding.as_ref().filter(|e| !e.is_empty()) {
                if embedding.len() != dimension {
                    return Err(KeepsakeError::Storage(format!(
                        "Embedding dimension mismatch for {}: expected {}, got {}",
                        memory.id,
                        dimension,
                        embedding.len()
                    )));
                }
            }
        }

        let ids: Vec<String> = memories.iter().map(|m| m.id.to_string()).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let owners: Vec<&str> = memories.iter().map(|m| m.owner_id.as_str()).collect();
        let memory_types: Vec<&str> = memories.iter().map(|m| m.memory_type.as_str()).collect();
        let categories: Vec<&str> = memories.iter().map(|m| m.category.as_str()).collect();
        let contents: Vec<&str> = memories.iter().map(|m| m.content.as_str()).collect();
        let importances: Vec<f32> = memories.iter().map(|m| m.importance).collect();
        let access_counts: Vec<i32> = memories
            .iter()
            .map(|m| i32::try_from(m.access_count).unwrap_or(i32::MAX))
            .collect();
        let last_accessed: Vec<Option<i64>> = memories
            .iter()
            .map(|m| m.last_accessed_at.map(|t| t.timestamp_micros()))
            .collect();

        let embeddings: Vec<Option<Vec<Option<f32>>>> = memories
            .iter()
            .map(|m| match m.embedding.as_ref().filter(|e| !e.is_empty()) {
                Some(embedding) => Some(embedding.iter().map(|&v| Some(v)).collect()),
                None => Some(vec![Some(0.0); dimension]),
            })
            .collect();
        let has_embedding: Vec<bool> = memories.iter().map(Memory::has_embedding).collect();

        let dedupe_keys: Vec<Option<&str>> = memories.iter().map(|m| m.dedupe_key()).collect();
        let archived: Vec<bool> = memories.iter().map(Memory::is_archived).collect();
        let pending: Vec<bool> = memories.iter().map(Memory::is_pending).collect();
        let metadata: Vec<String> = memories
            .iter()
            .map(|m| serde_json::to_string(&m.metadata))
            .collect::<std::result::Result<_, _>>()?;
        let metadata_refs: Vec<&str> = metadata.iter().map(String::as_str).collect();

        let expires_at: Vec<Option<i64>> = memories
            .iter()
            .map(|m| m.expires_at.map(|t| t.timestamp_micros()))
            .collect();
        let created_at: Vec<i64> = memories
            .iter()
            .map(|m| m.created_at.timestamp_micros())
            .collect();
        let updated_at: Vec<i64> = memories
            .iter()
            .map(|m| m.updated_at.timestamp_micros())
            .collect();

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(id_refs)),
                Arc::new(StringArray::from(owners)),
                Arc::new(StringArray::from(memory_types)),
                Arc::new(StringArray::from(categories)),
                Arc::new(StringArray::from(contents)),
                Arc::new(Float32Array::from(importances)),
                Arc::new(Int32Array::from(access_counts)),
                Arc::new(TimestampMicrosecondArray::from(last_accessed).with_timezone("UTC")),
                Arc::new(FixedSizeListArray::from_iter_primitive::<
                    arrow_array::types::Float32Type,
                    _,
                    _,
                >(embeddings, self.dimension)),
                Arc::new(BooleanArray::from(has_embedding)),
                Arc::new(StringArray::from(dedupe_keys)),
                Arc::new(BooleanArray::from(archived)),
                Arc::new(BooleanArray::from(pending)),
                Arc::new(StringArray::from(metadata_refs)),
                Arc::new(TimestampMicrosecondArray::from(expires_at).with_timezone("UTC")),
                Arc::new(TimestampMicrosecondArray::from(created_at).with_timezone("UTC")),
                Arc::new(TimestampMicrosecondArray::from(updated_at).with_timezone("UTC")),
            ],
        )
        .map_err(|e| KeepsakeError::Storage(format!("Failed to create RecordBatch: {e}")))
    }

    /// Convert an Arrow RecordBatch row back to a Memory struct
    fn batch_to_memory(batch: &RecordBatch, row: usize) -> Result<Memory> {
        let id = column::<StringArray>(batch, "id")?.value(row);
        let id = Uuid::parse_str(id)
            .map_err(|e| KeepsakeError::Storage(format!("Failed to parse UUID: {e}")))?;

        let memory_type: MemoryType = column::<StringArray>(batch, "memory_type")?
            .value(row)
            .parse()
            .map_err(|e| KeepsakeError::Storage(format!("{e}")))?;

        let embedding = if column::<BooleanArray>(batch, "has_embedding")?.value(row) {
            let list = column::<FixedSizeListArray>(batch, "embedding")?.value(row);
            let values = list
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| {
                    KeepsakeError::Storage("Failed to get embedding values".to_string())
                })?;
            Some((0..values.len()).map(|i| values.value(i)).collect())
        } else {
            None
        };

        let metadata: Metadata =
            serde_json::from_str(column::<StringArray>(batch, "metadata")?.value(row))?;

        Ok(Memory {
            id,
            owner_id: column::<StringArray>(batch, "owner_id")?.value(row).to_string(),
            memory_type,
            category: column::<StringArray>(batch, "category")?.value(row).to_string(),
            content: column::<StringArray>(batch, "content")?.value(row).to_string(),
            importance: column::<Float32Array>(batch, "importance")?.value(row),
            access_count: column::<Int32Array>(batch, "access_count")?
                .value(row)
                .max(0) as u32,
            last_accessed_at: optional_timestamp(batch, "last_accessed_at", row)?,
            embedding,
            metadata,
            expires_at: optional_timestamp(batch, "expires_at", row)?,
            created_at: timestamp(batch, "created_at", row)?,
            updated_at: timestamp(batch, "updated_at", row)?,
        })
    }

    fn entities_to_batch(entities: &[Entity], schema: Arc<Schema>) -> Result<RecordBatch> {
        let ids: Vec<String> = entities.iter().map(|e| e.id.to_string()).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let owners: Vec<&str> = entities.iter().map(|e| e.owner_id.as_str()).collect();
        let types: Vec<&str> = entities.iter().map(|e| e.entity_type.as_str()).collect();
        let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        let name_keys: Vec<String> = entities.iter().map(Entity::name_key).collect();
        let name_key_refs: Vec<&str> = name_keys.iter().map(String::as_str).collect();
        let descriptions: Vec<&str> = entities.iter().map(|e| e.description.as_str()).collect();
        let attributes: Vec<String> = entities
            .iter()
            .map(|e| serde_json::to_string(&e.attributes))
            .collect::<std::result::Result<_, _>>()?;
        let attribute_refs: Vec<&str> = attributes.iter().map(String::as_str).collect();
        let relations: Vec<String> = entities
            .iter()
            .map(|e| serde_json::to_string(&e.relations))
            .collect::<std::result::Result<_, _>>()?;
        let relation_refs: Vec<&str> = relations.iter().map(String::as_str).collect();
        let created_at: Vec<i64> = entities
            .iter()
            .map(|e| e.created_at.timestamp_micros())
            .collect();
        let updated_at: Vec<i64> = entities
            .iter()
            .map(|e| e.updated_at.timestamp_micros())
            .collect();

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(id_refs)),
                Arc::new(StringArray::from(owners)),
                Arc::new(StringArray::from(types)),
                Arc::new(StringArray::from(names)),
                Arc::new(StringArray::from(name_key_refs)),
                Arc::new(StringArray::from(descriptions)),
                Arc::new(StringArray::from(attribute_refs)),
                Arc::new(StringArray::from(relation_refs)),
                Arc::new(TimestampMicrosecondArray::from(created_at).with_timezone("UTC")),
                Arc::new(TimestampMicrosecondArray::from(updated_at).with_timezone("UTC")),
            ],
        )
        .map_err(|e| KeepsakeError::Storage(format!("Failed to create entity RecordBatch: {e}")))
    }

    fn batch_to_entity(batch: &RecordBatch, row: usize) -> Result<Entity> {
        let id = Uuid::parse_str(column::<StringArray>(batch, "id")?.value(row))
            .map_err(|e| KeepsakeError::Storage(format!("Failed to parse UUID: {e}")))?;
        let entity_type: EntityType = column::<StringArray>(batch, "entity_type")?
            .value(row)
            .parse()
            .map_err(|e| KeepsakeError::Storage(format!("{e}")))?;
        let attributes: Metadata =
            serde_json::from_str(column::<StringArray>(batch, "attributes")?.value(row))?;
        let relations: Vec<EntityRelation> =
            serde_json::from_str(column::<StringArray>(batch, "relations")?.value(row))?;

        Ok(Entity {
            id,
            owner_id: column::<StringArray>(batch, "owner_id")?.value(row).to_string(),
            entity_type,
            name: column::<StringArray>(batch, "name")?.value(row).to_string(),
            description: column::<StringArray>(batch, "description")?
                .value(row)
                .to_string(),
            attributes,
            relations,
            created_at: timestamp(batch, "created_at", row)?,
            updated_at: timestamp(batch, "updated_at", row)?,
        })
    }

    async fn query_memories(&self, filter: Option<String>) -> Result<Vec<Memory>> {
        let table = self.memories()?;

        let mut query = table.query();
        if let Some(sql) = filter {
            query = query.only_if(sql);
        }

        let stream = query
            .execute()
            .await
            .map_err(|e| KeepsakeError::Storage(format!("Failed to query memories: {e}")))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| KeepsakeError::Storage(format!("Failed to collect query results: {e}")))?;

        let mut memories = Vec::new();
        for batch in &batches {
            for row in 0..batch.num_rows() {
                memories.push(Self::batch_to_memory(batch, row)?);
            }
        }
        Ok(memories)
    }

    async fn query_entities(&self, filter: String) -> Result<Vec<Entity>> {
        let table = self.entities()?;

        let stream = table
            .query()
            .only_if(filter)
            .execute()
            .await
            .map_err(|e| KeepsakeError::Storage(format!("Failed to query entities: {e}")))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| KeepsakeError::Storage(format!("Failed to collect entities: {e}")))?;

        let mut entities = Vec::new();
        for batch in &batches {
            for row in 0..batch.num_rows() {
                entities.push(Self::batch_to_entity(batch, row)?);
            }
        }
        Ok(entities)
    }

    async fn add_memories(&self, memories: &[Memory]) -> Result<()> {
        let table = self.memories()?;
        let schema = Self::memories_schema(self.dimension);
        let batch = self.memories_to_batch(memories, schema.clone())?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        table
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|e| KeepsakeError::Storage(format!("Failed to insert memory: {e}")))?;
        Ok(())
    }

    /// Insert multiple memories in batch
    pub async fn insert_batch(&self, memories: &[Memory]) -> Result<()> {
        if memories.is_empty() {
            return Ok(());
        }
        self.add_memories(memories).await
    }

    async fn add_entity(&self, entity: &Entity) -> Result<()> {
        let table = self.entities()?;
        let schema = Self::entities_schema();
        let batch = Self::entities_to_batch(std::slice::from_ref(entity), schema.clone())?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        table
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|e| KeepsakeError::Storage(format!("Failed to insert entity: {e}")))?;
        Ok(())
    }

    fn newest(mut found: Vec<Memory>) -> Option<Memory> {
        found.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        found.into_iter().next()
    }
}

#[async_trait]
impl MemoryStore for LanceStore {
    async fn insert(&self, memory: &Memory) -> Result<()> {
        self.add_memories(std::slice::from_ref(memory)).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Memory>> {
        let mut found = self.query_memories(Some(format!("id = '{id}'"))).await?;
        Ok(found.pop())
    }

    async fn update(&self, memory: &Memory) -> Result<bool> {
        if self.get(memory.id).await?.is_none() {
            return Ok(false);
        }

        // validate before the old row disappears
        let schema = Self::memories_schema(self.dimension);
        self.memories_to_batch(std::slice::from_ref(memory), schema)?;

        self.memories()?
            .delete(&format!("id = '{}'", memory.id))
            .await
            .map_err(|e| KeepsakeError::Storage(format!("Failed to replace memory: {e}")))?;
        self.add_memories(std::slice::from_ref(memory)).await?;
        Ok(true)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let table = self.memories()?;

        // First check if the memory exists
        let exists = self.get(id).await?.is_some();

        if exists {
            table
                .delete(&format!("id = '{id}'"))
                .await
                .map_err(|e| KeepsakeError::Storage(format!("Failed to delete memory: {e}")))?;
        }

        Ok(exists)
    }

    async fn find_by_dedupe_key(&self, owner_id: &str, key: &str) -> Result<Option<Memory>> {
        let filter = format!(
            "owner_id = '{}' AND dedupe_key = '{}' AND pending = false",
            escape_sql(owner_id),
            escape_sql(key)
        );
        Ok(Self::newest(self.query_memories(Some(filter)).await?))
    }

    async fn find_exact(
        &self,
        owner_id: &str,
        memory_type: MemoryType,
        content: &str,
    ) -> Result<Option<Memory>> {
        let filter = format!(
            "owner_id = '{}' AND memory_type = '{}' AND content = '{}' AND pending = false",
            escape_sql(owner_id),
            memory_type.as_str(),
            escape_sql(content)
        );
        let found = self
            .query_memories(Some(filter))
            .await?
            .into_iter()
            .filter(|m| m.content == content)
            .collect();
        Ok(Self::newest(found))
    }

    async fn search_similar(&self, query: &SimilarityQuery) -> Result<Vec<ScoredMemory>> {
        if query.embedding.len() != self.dimension as usize {
            tracing::warn!(
                "Skipping similarity search: query vector has {} dimensions, store expects {}",
                query.embedding.len(),
                self.dimension
            );
            return Ok(Vec::new());
        }

        let table = self.memories()?;
        let scope = query.scope();

        let mut search = table
            .query()
            .nearest_to(query.embedding.as_slice())
            .map_err(|e| KeepsakeError::Storage(format!("Failed to create vector query: {e}")))?
            .distance_type(DistanceType::Cosine)
            .limit(query.limit.max(1));

        if let Some(sql_filter) = scope.to_sql_clause() {
            search = search.only_if(sql_filter);
        }

        let stream = search
            .execute()
            .await
            .map_err(|e| KeepsakeError::Storage(format!("Failed to execute search: {e}")))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| KeepsakeError::Storage(format!("Failed to collect search results: {e}")))?;

        let mut candidates = Vec::new();
        for batch in &batches {
            for row in 0..batch.num_rows() {
                let memory = Self::batch_to_memory(batch, row)?;
                if scope.matches(&memory) {
                    candidates.push(memory);
                }
            }
        }

        Ok(rank_by_similarity(query, candidates))
    }

    async fn list(&self, query: &MemoryQuery) -> Result<Vec<Memory>> {
        let found = self.query_memories(query.to_sql_clause()).await?;
        Ok(query.finish(found.into_iter().filter(|m| query.matches(m)).collect()))
    }

    async fn count(&self, query: &MemoryQuery) -> Result<usize> {
        let query = query.unbounded();
        if query.content_contains.is_none() {
            let count = self
                .memories()?
                .count_rows(query.to_sql_clause())
                .await
                .map_err(|e| KeepsakeError::Storage(format!("Failed to count memories: {e}")))?;
            return Ok(count);
        }
        Ok(self.list(&query).await?.len())
    }

    async fn owner_counts(&self) -> Result<Vec<(String, usize)>> {
        let table = self.memories()?;

        let stream = table
            .query()
            .select(lancedb::query::Select::columns(&["owner_id"]))
            .execute()
            .await
            .map_err(|e| KeepsakeError::Storage(format!("Failed to query owners: {e}")))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| KeepsakeError::Storage(format!("Failed to collect owners: {e}")))?;

        let mut counts: std::collections::BTreeMap<String, usize> = Default::default();
        for batch in &batches {
            let owners = column::<StringArray>(batch, "owner_id")?;
            for row in 0..batch.num_rows() {
                *counts.entry(owners.value(row).to_string()).or_default() += 1;
            }
        }
        Ok(counts.into_iter().collect())
    }

    async fn upsert_entity(&self, entity: Entity) -> Result<Entity> {
        let existing = self
            .get_entity(&entity.owner_id, entity.entity_type, &entity.name)
            .await?;

        let merged = match existing {
            Some(mut current) => {
                current.absorb(entity);
                self.entities()?
                    .delete(&format!("id = '{}'", current.id))
                    .await
                    .map_err(|e| KeepsakeError::Storage(format!("Failed to replace entity: {e}")))?;
                current
            }
            None => entity,
        };

        self.add_entity(&merged).await?;
        Ok(merged)
    }

    async fn get_entity(
        &self,
        owner_id: &str,
        entity_type: EntityType,
        name: &str,
    ) -> Result<Option<Entity>> {
        let filter = format!(
            "owner_id = '{}' AND entity_type = '{}' AND name_key = '{}'",
            escape_sql(owner_id),
            entity_type.as_str(),
            escape_sql(&entity_name_key(name))
        );
        let mut found = self.query_entities(filter).await?;
        Ok(found.pop())
    }

    async fn list_entities(&self, owner_id: &str) -> Result<Vec<Entity>> {
        let mut entities = self
            .query_entities(format!("owner_id = '{}'", escape_sql(owner_id)))
            .await?;
        entities.sort_by(|a, b| (a.entity_type, a.name_key()).cmp(&(b.entity_type, b.name_key())));
        Ok(entities)
    }
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| KeepsakeError::Storage(format!("Failed to get {name} column")))
}

fn timestamp(batch: &RecordBatch, name: &str, row: usize) -> Result<DateTime<Utc>> {
    let micros = column::<TimestampMicrosecondArray>(batch, name)?.value(row);
    Utc.timestamp_micros(micros)
        .single()
        .ok_or_else(|| KeepsakeError::Storage(format!("Failed to parse {name} timestamp")))
}

fn optional_timestamp(batch: &RecordBatch, name: &str, row: usize) -> Result<Option<DateTime<Utc>>> {
    let array = column::<TimestampMicrosecondArray>(batch, name)?;
    if array.is_null(row) {
        return Ok(None);
    }
    timestamp(batch, name, row).map(Some)
}
