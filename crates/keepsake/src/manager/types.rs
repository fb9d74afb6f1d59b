//! Options, configs and reports exchanged with the memory manager

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::extraction::ExtractionStats;
use crate::memory::{ConflictStrategy, ConversationTurn, Entity, Memory, MemoryType, Tier};
use crate::storage::MemoryQuery;

/// Recall configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallConfig {
    /// Cosine floor for semantic recall (default: 0.5)
    pub min_similarity: f32,
    pub default_limit: usize,
    /// Semantic candidates fetched per requested hit before reranking
    pub candidate_multiplier: usize,
    /// Weight of similarity in the ranking score (default: 0.7)
    pub similarity_weight: f32,
    /// Weight of the memory's composite score in the ranking score (default: 0.3)
    pub rerank_weight: f32,
    /// Similarity reported for substring matches when vectors are unavailable
    pub lexical_similarity: f32,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            min_similarity: 0.5,
            default_limit: 10,
            candidate_multiplier: 3,
            similarity_weight: 0.7,
            rerank_weight: 0.3,
            lexical_similarity: 0.5,
        }
    }
}

/// Context assembly limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_memories: usize,
    pub max_preferences: usize,
    pub recent_turns: usize,
    pub max_entities: usize,
    /// Memories and preferences are dropped from the tail past this estimate
    pub token_budget: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_memories: 8,
            max_preferences: 5,
            recent_turns: 6,
            max_entities: 10,
            token_budget: 2000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RememberOptions {
    /// Persist as a new memory without looking for conflicts
    pub skip_conflict_check: bool,
    /// Strategy to apply instead of the one the detection suggests
    pub strategy: Option<ConflictStrategy>,
}

impl RememberOptions {
    pub fn skip_conflict_check(mut self) -> Self {
        self.skip_conflict_check = true;
        self
    }

    pub fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

/// What `remember` did with one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RememberAction {
    Created,
    Updated,
    Merged,
    Skipped,
    Pending,
    /// Scored too low to keep
    Dropped,
}

impl RememberAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RememberAction::Created => "CREATED",
            RememberAction::Updated => "UPDATED",
            RememberAction::Merged => "MERGED",
            RememberAction::Skipped => "SKIPPED",
            RememberAction::Pending => "PENDING",
            RememberAction::Dropped => "DROPPED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RememberOutcome {
    pub action: RememberAction,
    /// The persisted memory, absent for skipped and dropped candidates
    pub memory: Option<Memory>,
    /// Existing memory the candidate collided with
    pub existing_id: Option<Uuid>,
    pub reason: Option<String>,
}

impl RememberOutcome {
    pub(crate) fn persisted(action: RememberAction, memory: Memory) -> Self {
        Self {
            action,
            memory: Some(memory),
            existing_id: None,
            reason: None,
        }
    }
}

/// Result of running one message through extraction and `remember`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageReport {
    pub outcomes: Vec<RememberOutcome>,
    pub entities: Vec<Entity>,
    pub stats: ExtractionStats,
}

impl MessageReport {
    pub fn count(&self, action: RememberAction) -> usize {
        self.outcomes.iter().filter(|o| o.action == action).count()
    }
}

/// Recall request. With a query and `semantic` set, recall searches by
/// vector; otherwise it filters by attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct RecallOptions {
    pub query: Option<String>,
    pub semantic: bool,
    pub memory_types: Option<Vec<MemoryType>>,
    pub category: Option<String>,
    pub min_importance: Option<f32>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub min_similarity: Option<f32>,
    pub limit: Option<usize>,
    pub include_archived: bool,
    pub include_pending: bool,
    /// Record an access on every returned memory
    pub reinforce: bool,
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self {
            query: None,
            semantic: true,
            memory_types: None,
            category: None,
            min_importance: None,
            created_after: None,
            created_before: None,
            min_similarity: None,
            limit: None,
            include_archived: false,
            include_pending: false,
            reinforce: true,
        }
    }
}

impl RecallOptions {
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::default()
        }
    }

    pub fn lexical(mut self) -> Self {
        self.semantic = false;
        self
    }

    pub fn with_memory_types(mut self, types: Vec<MemoryType>) -> Self {
        self.memory_types = Some(types);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_min_importance(mut self, importance: f32) -> Self {
        self.min_importance = Some(importance);
        self
    }

    pub fn created_between(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.created_after = after;
        self.created_before = before;
        self
    }

    pub fn with_min_similarity(mut self, similarity: f32) -> Self {
        self.min_similarity = Some(similarity);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn include_archived(mut self) -> Self {
        self.include_archived = true;
        self
    }

    pub fn include_pending(mut self) -> Self {
        self.include_pending = true;
        self
    }

    pub fn without_reinforcement(mut self) -> Self {
        self.reinforce = false;
        self
    }

    /// Attribute filter for `owner_id` matching these options
    pub fn to_query(&self, owner_id: &str) -> MemoryQuery {
        let mut query = MemoryQuery::for_owner(owner_id);
        query.memory_types = self.memory_types.clone();
        query.category = self.category.clone();
        query.min_importance = self.min_importance;
        query.created_after = self.created_after;
        query.created_before = self.created_before;
        if !self.include_archived {
            query.archived = Some(false);
        }
        if !self.include_pending {
            query.pending = Some(false);
        }
        query
    }
}

/// How a recall was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecallMode {
    Semantic,
    /// Substring fallback for a semantic request without vectors
    Lexical,
    Filter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallHit {
    pub memory: Memory,
    /// Cosine similarity, or the fixed lexical similarity; absent for filters
    pub similarity: Option<f32>,
    /// Ranking score blending similarity and the composite memory score
    pub score: f32,
    pub mode: RecallMode,
}

/// Everything an agent turn needs about its user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalContext {
    pub recent_turns: Vec<ConversationTurn>,
    pub memories: Vec<RecallHit>,
    pub preferences: Vec<Memory>,
    pub entities: Vec<Entity>,
    pub estimated_tokens: usize,
}

/// Per-owner statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub owner_id: String,
    pub total: usize,
    pub by_type: BTreeMap<MemoryType, usize>,
    pub by_tier: BTreeMap<Tier, usize>,
    pub archived: usize,
    pub pending: usize,
    pub unvectored: usize,
    pub average_importance: f32,
    pub estimated_tokens: usize,
    pub entities: usize,
}

/// Result of an embedding backfill pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillResult {
    pub scanned: usize,
    pub embedded: usize,
    pub failed: usize,
}
