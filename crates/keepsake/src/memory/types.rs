//! Memory types for keepsake
//!
//! Defines the persisted memory record, the candidate shape that flows through
//! extraction and conflict resolution, entities, and the enums used to
//! classify them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::KeepsakeError;

/// Open-ended metadata attached to memories and entities.
pub type Metadata = serde_json::Map<String, Value>;

/// Well-known metadata keys.
pub mod meta {
    pub const DEDUPE_KEY: &str = "dedupe_key";
    pub const SCORE: &str = "score";
    pub const SOURCE: &str = "source";
    pub const RULE_ID: &str = "rule_id";
    pub const CONFIDENCE: &str = "confidence";
    pub const STRATEGY: &str = "strategy";
    pub const ARCHIVED: &str = "archived";
    pub const ARCHIVED_AT: &str = "archived_at";
    pub const MERGED: &str = "merged";
    pub const MERGED_FROM: &str = "merged_from";
    pub const MERGE_COUNT: &str = "merge_count";
    pub const SUMMARIZED: &str = "summarized";
    pub const PENDING_CONFLICT: &str = "pending_conflict";
    pub const CONFLICT_WITH: &str = "conflict_with";
    pub const PREVIOUS_CONTENT: &str = "previous_content";
    pub const LAST_DECAYED_AT: &str = "last_decayed_at";
    pub const ATTRIBUTES: &str = "attributes";
}

/// Kind of knowledge a memory holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoryType {
    /// Stable facts about the user (scores, profile)
    Fact,
    /// Likes, targets, constraints
    Preference,
    /// Commitments the user has made
    Decision,
    /// Condensed content produced by compaction
    Summary,
    /// Reactions to the agent's advice
    Feedback,
}

impl MemoryType {
    pub const ALL: [MemoryType; 5] = [
        MemoryType::Fact,
        MemoryType::Preference,
        MemoryType::Decision,
        MemoryType::Summary,
        MemoryType::Feedback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Fact => "FACT",
            MemoryType::Preference => "PREFERENCE",
            MemoryType::Decision => "DECISION",
            MemoryType::Summary => "SUMMARY",
            MemoryType::Feedback => "FEEDBACK",
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryType {
    type Err = KeepsakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FACT" => Ok(MemoryType::Fact),
            "PREFERENCE" => Ok(MemoryType::Preference),
            "DECISION" => Ok(MemoryType::Decision),
            "SUMMARY" => Ok(MemoryType::Summary),
            "FEEDBACK" => Ok(MemoryType::Feedback),
            other => Err(KeepsakeError::Memory(format!("Unknown memory type: {other}"))),
        }
    }
}

/// Storage tier derived from the composite score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    Working,
    Short,
    Long,
    Archive,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Working => "WORKING",
            Tier::Short => "SHORT",
            Tier::Long => "LONG",
            Tier::Archive => "ARCHIVE",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a conflict between a candidate and an existing memory is settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictStrategy {
    /// Overwrite the existing memory with the candidate
    KeepLatest,
    /// Keep whichever carries the higher numeric score
    KeepHighest,
    /// Keep the existing memory, drop the candidate
    KeepOldest,
    /// Combine both contents into the existing memory
    Merge,
    /// Store the candidate alongside the existing memory
    KeepBoth,
    /// Store the candidate flagged for user confirmation
    AskUser,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::KeepLatest => "KEEP_LATEST",
            ConflictStrategy::KeepHighest => "KEEP_HIGHEST",
            ConflictStrategy::KeepOldest => "KEEP_OLDEST",
            ConflictStrategy::Merge => "MERGE",
            ConflictStrategy::KeepBoth => "KEEP_BOTH",
            ConflictStrategy::AskUser => "ASK_USER",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = KeepsakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "KEEP_LATEST" => Ok(ConflictStrategy::KeepLatest),
            "KEEP_HIGHEST" => Ok(ConflictStrategy::KeepHighest),
            "KEEP_OLDEST" => Ok(ConflictStrategy::KeepOldest),
            "MERGE" => Ok(ConflictStrategy::Merge),
            "KEEP_BOTH" => Ok(ConflictStrategy::KeepBoth),
            "ASK_USER" => Ok(ConflictStrategy::AskUser),
            other => Err(KeepsakeError::Memory(format!(
                "Unknown conflict strategy: {other}"
            ))),
        }
    }
}

/// A single memory unit owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: Uuid,
    pub owner_id: String,
    pub memory_type: MemoryType,
    /// Free-text grouping such as `academic` or `target_school`
    pub category: String,
    pub content: String,
    /// Always within [0, 1]
    pub importance: f32,
    pub access_count: u32,
    pub last_accessed_at: Option<DateTime<Utc>>,
    /// Absent until an embedding provider has vectored the content
    pub embedding: Option<Vec<f32>>,
    pub metadata: Metadata,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Memory {
    /// Create a new memory stamped with the current time
    pub fn new(
        owner_id: impl Into<String>,
        memory_type: MemoryType,
        category: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::new_at(owner_id, memory_type, category, content, Utc::now())
    }

    /// Create a new memory stamped with an explicit time
    pub fn new_at(
        owner_id: impl Into<String>,
        memory_type: MemoryType,
        category: impl Into<String>,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            memory_type,
            category: category.into(),
            content: content.into(),
            importance: 0.5,
            access_count: 0,
            last_accessed_at: None,
            embedding: None,
            metadata: Metadata::new(),
            expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.set_importance(importance);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }

    pub fn set_importance(&mut self, importance: f32) {
        self.importance = clamp_unit(importance);
    }

    pub fn dedupe_key(&self) -> Option<&str> {
        self.metadata
            .get(meta::DEDUPE_KEY)
            .and_then(Value::as_str)
            .filter(|k| !k.is_empty())
    }

    pub fn set_dedupe_key(&mut self, key: &str) {
        self.metadata
            .insert(meta::DEDUPE_KEY.to_string(), Value::String(key.to_string()));
    }

    pub fn is_archived(&self) -> bool {
        flag(&self.metadata, meta::ARCHIVED)
    }

    pub fn is_pending(&self) -> bool {
        flag(&self.metadata, meta::PENDING_CONFLICT)
    }

    /// Id of the memory a pending candidate conflicts with
    pub fn conflict_with(&self) -> Option<Uuid> {
        self.metadata
            .get(meta::CONFLICT_WITH)
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    /// Confidence recorded when the memory was persisted, defaulting to 1.0
    pub fn confidence(&self) -> f32 {
        self.metadata
            .get(meta::CONFIDENCE)
            .and_then(Value::as_f64)
            .map(|c| clamp_unit(c as f32))
            .unwrap_or(1.0)
    }

    pub fn last_decayed_at(&self) -> Option<DateTime<Utc>> {
        self.metadata
            .get(meta::LAST_DECAYED_AT)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn has_embedding(&self) -> bool {
        self.embedding.as_ref().is_some_and(|e| !e.is_empty())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Age in fractional days, never negative
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        days_between(self.created_at, now)
    }

    /// Mark this memory as accessed, updating access count and timestamp
    pub fn mark_accessed(&mut self, now: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed_at = Some(now);
    }
}

/// A memory that has not been persisted yet.
///
/// Produced by extraction or supplied directly by callers of `remember`.
/// Confidence lives only here and in the persisted score snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryInput {
    pub memory_type: MemoryType,
    pub category: String,
    pub content: String,
    pub importance: f32,
    pub confidence: f32,
    pub dedupe_key: Option<String>,
    /// Strategy suggested by the rule that produced this candidate
    pub strategy: Option<ConflictStrategy>,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Metadata,
    pub expires_at: Option<DateTime<Utc>>,
}

impl MemoryInput {
    pub fn new(
        memory_type: MemoryType,
        category: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            memory_type,
            category: category.into(),
            content: content.into(),
            importance: 0.5,
            confidence: 1.0,
            dedupe_key: None,
            strategy: None,
            embedding: None,
            metadata: Metadata::new(),
            expires_at: None,
        }
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = clamp_unit(importance);
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = clamp_unit(confidence);
        self
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    pub fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Key used to spot duplicates inside one extraction batch.
    ///
    /// Falls back to type plus normalized content when no rule key exists.
    pub fn batch_key(&self) -> String {
        match &self.dedupe_key {
            Some(key) if !key.is_empty() => key.clone(),
            _ => content_key(self.memory_type, &self.content),
        }
    }

    /// Materialize the candidate as a memory owned by `owner_id`
    pub fn into_memory(self, owner_id: &str, now: DateTime<Utc>) -> Memory {
        let mut memory = Memory::new_at(
            owner_id,
            self.memory_type,
            self.category,
            self.content,
            now,
        );
        memory.set_importance(self.importance);
        memory.embedding = self.embedding.filter(|e| !e.is_empty());
        memory.expires_at = self.expires_at;
        memory.metadata = self.metadata;
        memory
            .metadata
            .insert(meta::CONFIDENCE.to_string(), Value::from(self.confidence));
        if let Some(key) = self.dedupe_key.filter(|k| !k.is_empty()) {
            memory.set_dedupe_key(&key);
        }
        if let Some(strategy) = self.strategy {
            memory.metadata.insert(
                meta::STRATEGY.to_string(),
                Value::String(strategy.as_str().to_string()),
            );
        }
        memory
    }
}

/// Fallback duplicate key: type plus whitespace-collapsed lowercase content
pub fn content_key(memory_type: MemoryType, content: &str) -> String {
    let normalized = content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    format!("{}:{}", memory_type.as_str(), normalized)
}

/// Kinds of named things tracked alongside memories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    School,
    Person,
    Event,
    Topic,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::School => "SCHOOL",
            EntityType::Person => "PERSON",
            EntityType::Event => "EVENT",
            EntityType::Topic => "TOPIC",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = KeepsakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SCHOOL" => Ok(EntityType::School),
            "PERSON" => Ok(EntityType::Person),
            "EVENT" => Ok(EntityType::Event),
            "TOPIC" => Ok(EntityType::Topic),
            other => Err(KeepsakeError::Memory(format!("Unknown entity type: {other}"))),
        }
    }
}

/// Named link from one entity to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRelation {
    pub relation: String,
    /// Target entity name
    pub target: String,
}

/// A named thing the user talked about.
///
/// Unique per (owner, type, name) with names compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub owner_id: String,
    pub entity_type: EntityType,
    pub name: String,
    pub description: String,
    pub attributes: Metadata,
    pub relations: Vec<EntityRelation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(owner_id: impl Into<String>, entity_type: EntityType, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            entity_type,
            name: name.into().trim().to_string(),
            description: String::new(),
            attributes: Metadata::new(),
            relations: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn name_key(&self) -> String {
        entity_name_key(&self.name)
    }

    /// Fold a newer observation of the same entity into this one.
    ///
    /// Attributes are overlaid, relations are unioned and the longer
    /// description wins.
    pub fn absorb(&mut self, other: Entity) {
        for (key, value) in other.attributes {
            self.attributes.insert(key, value);
        }
        for relation in other.relations {
            if !self.relations.contains(&relation) {
                self.relations.push(relation);
            }
        }
        if other.description.chars().count() > self.description.chars().count() {
            self.description = other.description;
        }
        self.updated_at = other.updated_at.max(self.updated_at);
    }
}

/// Candidate entity emitted by extraction, before it has an owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityInput {
    pub entity_type: EntityType,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub attributes: Metadata,
    #[serde(default)]
    pub relations: Vec<EntityRelation>,
}

impl EntityInput {
    pub fn new(entity_type: EntityType, name: impl Into<String>) -> Self {
        Self {
            entity_type,
            name: name.into(),
            description: String::new(),
            attributes: Metadata::new(),
            relations: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn into_entity(self, owner_id: &str, now: DateTime<Utc>) -> Entity {
        let mut entity = Entity::new(owner_id, self.entity_type, self.name);
        entity.description = self.description;
        entity.attributes = self.attributes;
        entity.relations = self.relations;
        entity.created_at = now;
        entity.updated_at = now;
        entity
    }
}

/// Case-insensitive, trimmed entity name used for uniqueness
pub fn entity_name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Fractional days from `from` to `to`, clamped at zero
pub fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let elapsed: Duration = to - from;
    (elapsed.num_milliseconds() as f64 / 86_400_000.0).max(0.0)
}

fn flag(metadata: &Metadata, key: &str) -> bool {
    metadata.get(key).and_then(Value::as_bool).unwrap_or(false)
}
