//! Memory manager - the public surface over extraction, conflicts, scoring
//! and the lifecycle engines
//!
//! The manager owns no state of its own beyond its collaborators, so one
//! instance is shared behind an `Arc` by request handlers and the scheduler.

mod types;

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::conflict::{ConflictConfig, ConflictPolicy, ConflictResolver, Resolution};
use crate::embedding::{DEFAULT_DIMENSION, EmbeddingProvider, NoopEmbedder, embed_or_none};
use crate::error::{KeepsakeError, Result};
use crate::extraction::{ExtractionConfig, ExtractionEngine, ExtractionOptions, ExtractionResult};
use crate::lifecycle::{
    AccessTracker, Clock, CompactionConfig, CompactionEngine, CompactionReport, DecayConfig,
    DecayEngine, DecayResult, InMemoryLockProvider, LlmSummarizer, LockProvider, Summarizer,
    SystemClock,
};
use crate::llm::{LlmProvider, NoopLlm};
use crate::memory::{
    ConversationBuffer, Entity, EntityInput, Memory, MemoryInput, MemoryScoring, MemoryType,
    ScoreInput, ScoreResult, Scorer, Tier, estimate_tokens, meta,
};
use crate::storage::{MemoryQuery, MemoryStore, QueryOrder, SimilarityQuery};

pub use types::{
    BackfillResult, ContextConfig, MemoryStats, MessageReport, RecallConfig, RecallHit,
    RecallMode, RecallOptions, RememberAction, RememberOptions, RememberOutcome,
    RetrievalContext,
};

/// Fresh candidates scoring below this in the archive tier are not kept
const MIN_PERSIST_SCORE: f32 = 0.1;

/// Page size for owner-wide scans
const SCAN_PAGE: usize = 500;

pub struct MemoryManager {
    store: Arc<dyn MemoryStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    extraction: ExtractionEngine,
    conflicts: Arc<dyn ConflictPolicy>,
    scorer: Arc<dyn MemoryScoring>,
    access: Arc<dyn AccessTracker>,
    decay: Arc<DecayEngine>,
    compaction: Arc<CompactionEngine>,
    clock: Arc<dyn Clock>,
    recall_config: RecallConfig,
    context_config: ContextConfig,
}

impl MemoryManager {
    pub fn builder(store: Arc<dyn MemoryStore>) -> MemoryManagerBuilder {
        MemoryManagerBuilder::new(store)
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn recall_config(&self) -> &RecallConfig {
        &self.recall_config
    }

    /// Persist one candidate, resolving conflicts with what the owner
    /// already has. `None` when the candidate was skipped or dropped.
    pub async fn remember(
        &self,
        owner_id: &str,
        input: MemoryInput,
        options: RememberOptions,
    ) -> Result<Option<Memory>> {
        Ok(self.remember_detailed(owner_id, input, options).await?.memory)
    }

    /// Like [`remember`](Self::remember), reporting what happened
    pub async fn remember_detailed(
        &self,
        owner_id: &str,
        mut input: MemoryInput,
        options: RememberOptions,
    ) -> Result<RememberOutcome> {
        let now = self.clock.now();

        if !input.embedding.as_ref().is_some_and(|e| !e.is_empty()) {
            input.embedding = embed_or_none(self.embedder.as_ref(), &input.content).await;
        }

        let resolution = if options.skip_conflict_check {
            Resolution::Create(input)
        } else {
            let detection = self.conflicts.detect_conflict(owner_id, &input).await?;
            if let Some(conflict_type) = detection.conflict_type {
                debug!(
                    "Conflict {:?} for {} (similarity {:.2})",
                    conflict_type, owner_id, detection.similarity
                );
            }
            self.conflicts
                .resolve_conflict(input, &detection, options.strategy, now)
        };

        match resolution {
            Resolution::Skip {
                existing_id,
                reason,
            } => {
                debug!("Skipped candidate for {}: {}", owner_id, reason);
                Ok(RememberOutcome {
                    action: RememberAction::Skipped,
                    memory: None,
                    existing_id: Some(existing_id),
                    reason: Some(reason),
                })
            }
            Resolution::Update(memory) => {
                let memory = self.persist_existing(memory).await?;
                info!("Updated memory {} for {}", memory.id, owner_id);
                Ok(RememberOutcome::persisted(RememberAction::Updated, memory))
            }
            Resolution::Merge(memory) => {
                let memory = self.persist_existing(memory).await?;
                info!("Merged into memory {} for {}", memory.id, owner_id);
                Ok(RememberOutcome::persisted(RememberAction::Merged, memory))
            }
            Resolution::Pending(input) => {
                let mut memory = input.into_memory(owner_id, now);
                self.rescore(&mut memory);
                self.store.insert(&memory).await?;
                info!(
                    "Memory {} for {} awaits confirmation against {:?}",
                    memory.id,
                    owner_id,
                    memory.conflict_with()
                );
                let existing_id = memory.conflict_with();
                Ok(RememberOutcome {
                    existing_id,
                    ..RememberOutcome::persisted(RememberAction::Pending, memory)
                })
            }
            Resolution::Create(input) => {
                let mut memory = input.into_memory(owner_id, now);
                let score = self.rescore(&mut memory);
                if score.total < MIN_PERSIST_SCORE && score.tier == Tier::Archive {
                    debug!(
                        "Dropped candidate for {} scoring {:.3}",
                        owner_id, score.total
                    );
                    return Ok(RememberOutcome {
                        action: RememberAction::Dropped,
                        memory: None,
                        existing_id: None,
                        reason: Some(format!("score {:.3} below {MIN_PERSIST_SCORE}", score.total)),
                    });
                }
                self.store.insert(&memory).await?;
                info!(
                    "Stored {} memory {} for {}",
                    memory.memory_type, memory.id, owner_id
                );
                Ok(RememberOutcome::persisted(RememberAction::Created, memory))
            }
        }
    }

    /// Re-score, re-embed when needed and write back under the existing id
    async fn persist_existing(&self, mut memory: Memory) -> Result<Memory> {
        if !memory.has_embedding() {
            memory.embedding = embed_or_none(self.embedder.as_ref(), &memory.content).await;
        }
        self.rescore(&mut memory);
        if !self.store.update(&memory).await? {
            // deleted between detection and write
            warn!("Memory {} vanished before update, re-inserting", memory.id);
            self.store.insert(&memory).await?;
        }
        Ok(memory)
    }

    /// Rewrite importance from the score and keep a snapshot in metadata
    fn rescore(&self, memory: &mut Memory) -> ScoreResult {
        let score = self
            .scorer
            .score(&ScoreInput::from_memory(memory, memory.confidence()), self.clock.now());
        memory.set_importance(score.breakdown.importance);
        memory
            .metadata
            .insert(meta::SCORE.to_string(), score.to_json());
        score
    }

    /// Find memories relevant to a query or matching attribute filters
    pub async fn recall(&self, owner_id: &str, options: RecallOptions) -> Result<Vec<RecallHit>> {
        let limit = options
            .limit
            .unwrap_or(self.recall_config.default_limit)
            .max(1);
        let query = options
            .query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty());

        let hits = match query {
            Some(text) if options.semantic => {
                match embed_or_none(self.embedder.as_ref(), text).await {
                    Some(vector) => {
                        self.semantic_recall(owner_id, vector, &options, limit)
                            .await?
                    }
                    None => {
                        debug!("No query vector, falling back to substring recall");
                        self.filter_recall(owner_id, Some(text), &options, limit, RecallMode::Lexical)
                            .await?
                    }
                }
            }
            _ => {
                self.filter_recall(owner_id, query, &options, limit, RecallMode::Filter)
                    .await?
            }
        };

        debug!(
            "Recalled {} memories for {} (limit {})",
            hits.len(),
            owner_id,
            limit
        );

        if options.reinforce {
            self.reinforce(&hits);
        }
        Ok(hits)
    }

    async fn semantic_recall(
        &self,
        owner_id: &str,
        vector: Vec<f32>,
        options: &RecallOptions,
        limit: usize,
    ) -> Result<Vec<RecallHit>> {
        let now = self.clock.now();
        let mut query = SimilarityQuery::new(owner_id, vector)
            .with_min_similarity(
                options
                    .min_similarity
                    .unwrap_or(self.recall_config.min_similarity),
            )
            .with_limit(limit.saturating_mul(self.recall_config.candidate_multiplier.max(1)))
            .include_archived(options.include_archived)
            .include_pending(options.include_pending);
        if let Some(ref types) = options.memory_types {
            query = query.with_memory_types(types.clone());
        }
        if let Some(ref category) = options.category {
            query = query.with_category(category.clone());
        }

        let scope = options.to_query(owner_id);
        let mut hits: Vec<RecallHit> = self
            .store
            .search_similar(&query)
            .await?
            .into_iter()
            .filter(|scored| scope.matches(&scored.memory) && !scored.memory.is_expired(now))
            .map(|scored| {
                let score = self.rank(&scored.memory, Some(scored.similarity));
                RecallHit {
                    memory: scored.memory,
                    similarity: Some(scored.similarity),
                    score,
                    mode: RecallMode::Semantic,
                }
            })
            .collect();

        sort_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn filter_recall(
        &self,
        owner_id: &str,
        text: Option<&str>,
        options: &RecallOptions,
        limit: usize,
        mode: RecallMode,
    ) -> Result<Vec<RecallHit>> {
        let now = self.clock.now();
        let mut query = options
            .to_query(owner_id)
            .ordered_by(QueryOrder::ImportanceDesc)
            .with_limit(limit.saturating_mul(self.recall_config.candidate_multiplier.max(1)));
        if let Some(text) = text {
            query = query.containing(text);
        }

        let similarity = (mode == RecallMode::Lexical).then_some(self.recall_config.lexical_similarity);
        let mut hits: Vec<RecallHit> = self
            .store
            .list(&query)
            .await?
            .into_iter()
            .filter(|memory| !memory.is_expired(now))
            .map(|memory| {
                let score = self.rank(&memory, similarity);
                RecallHit {
                    memory,
                    similarity,
                    score,
                    mode,
                }
            })
            .collect();

        sort_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    /// Blend similarity with the composite score. Without a similarity the
    /// composite score alone ranks.
    fn rank(&self, memory: &Memory, similarity: Option<f32>) -> f32 {
        let total = self
            .scorer
            .score(&ScoreInput::from_memory(memory, memory.confidence()), self.clock.now())
            .total;
        match similarity {
            Some(similarity) => {
                similarity * self.recall_config.similarity_weight
                    + total * self.recall_config.rerank_weight
            }
            None => total,
        }
    }

    fn reinforce(&self, hits: &[RecallHit]) {
        if hits.is_empty() {
            return;
        }
        let ids: Vec<Uuid> = hits.iter().map(|h| h.memory.id).collect();
        let access = self.access.clone();
        tokio::spawn(async move {
            let result = access.record_access_batch(&ids).await;
            if result.failed > 0 {
                warn!(
                    "Access reinforcement failed for {} of {} memories",
                    result.failed,
                    ids.len()
                );
            }
        });
    }

    /// Recent turns, relevant memories, top preferences and the entities
    /// named in `query`, trimmed to the context token budget
    pub async fn build_context(
        &self,
        owner_id: &str,
        query: &str,
        conversation: &ConversationBuffer,
    ) -> Result<RetrievalContext> {
        let config = &self.context_config;
        let now = self.clock.now();

        let memories = if query.trim().is_empty() || config.max_memories == 0 {
            Vec::new()
        } else {
            self.recall(
                owner_id,
                RecallOptions::query(query).with_limit(config.max_memories),
            )
            .await?
        };
        let recalled: HashSet<Uuid> = memories.iter().map(|h| h.memory.id).collect();

        let preferences: Vec<Memory> = if config.max_preferences == 0 {
            Vec::new()
        } else {
            let query = MemoryQuery::for_owner(owner_id)
                .with_memory_types(vec![MemoryType::Preference])
                .with_archived(false)
                .with_pending(false)
                .ordered_by(QueryOrder::ImportanceDesc)
                .with_limit(config.max_preferences + recalled.len());
            self.store
                .list(&query)
                .await?
                .into_iter()
                .filter(|m| !recalled.contains(&m.id) && !m.is_expired(now))
                .take(config.max_preferences)
                .collect()
        };

        let lowered = query.to_lowercase();
        let entities: Vec<Entity> = self
            .store
            .list_entities(owner_id)
            .await?
            .into_iter()
            .filter(|e| {
                let key = e.name_key();
                !key.is_empty() && lowered.contains(&key)
            })
            .take(config.max_entities)
            .collect();

        let mut context = RetrievalContext {
            recent_turns: conversation.recent(config.recent_turns),
            memories,
            preferences,
            entities,
            estimated_tokens: 0,
        };
        fit_to_budget(&mut context, config.token_budget);
        Ok(context)
    }

    /// Run one decay pass over every owner
    pub async fn trigger_decay(&self) -> DecayResult {
        self.decay.run().await
    }

    /// Compact one owner, or sweep every owner above the threshold
    pub async fn trigger_compaction(&self, owner_id: Option<&str>) -> CompactionReport {
        match owner_id {
            Some(owner) => {
                let result = self.compaction.compact_owner(owner).await;
                CompactionReport {
                    owners_scanned: 1,
                    errors: result.errors,
                    results: vec![result],
                }
            }
            None => self.compaction.run().await,
        }
    }

    pub async fn get_stats(&self, owner_id: &str) -> Result<MemoryStats> {
        let now = self.clock.now();
        let mut stats = MemoryStats {
            owner_id: owner_id.to_string(),
            ..MemoryStats::default()
        };
        let mut importance_sum = 0.0f64;
        let mut cursor: Option<Uuid> = None;

        loop {
            let mut query = MemoryQuery::for_owner(owner_id).with_limit(SCAN_PAGE);
            if let Some(after) = cursor {
                query = query.after(after);
            }
            let page = self.store.list(&query).await?;
            let full = page.len() == SCAN_PAGE;
            cursor = page.last().map(|m| m.id);

            for memory in &page {
                stats.total += 1;
                *stats.by_type.entry(memory.memory_type).or_default() += 1;
                let tier = if memory.is_archived() {
                    stats.archived += 1;
                    Tier::Archive
                } else {
                    self.scorer
                        .score(&ScoreInput::from_memory(memory, memory.confidence()), now)
                        .tier
                };
                *stats.by_tier.entry(tier).or_default() += 1;
                if memory.is_pending() {
                    stats.pending += 1;
                }
                if !memory.has_embedding() {
                    stats.unvectored += 1;
                }
                importance_sum += f64::from(memory.importance);
                stats.estimated_tokens += estimate_tokens(&memory.content);
            }

            if !full {
                break;
            }
        }

        if stats.total > 0 {
            stats.average_importance = (importance_sum / stats.total as f64) as f32;
        }
        stats.entities = self.store.list_entities(owner_id).await?.len();
        Ok(stats)
    }

    /// Memory `id` if it belongs to `owner_id`
    pub async fn get_memory(&self, owner_id: &str, id: Uuid) -> Result<Option<Memory>> {
        Ok(self
            .store
            .get(id)
            .await?
            .filter(|m| m.owner_id == owner_id))
    }

    async fn owned(&self, owner_id: &str, id: Uuid) -> Result<Memory> {
        self.get_memory(owner_id, id)
            .await?
            .ok_or_else(|| KeepsakeError::Memory(format!("Memory {id} not found for {owner_id}")))
    }

    /// Settle a pending conflict. Accepting makes the candidate live and
    /// retires the memory it conflicted with; rejecting deletes the candidate.
    pub async fn confirm_pending(
        &self,
        owner_id: &str,
        id: Uuid,
        accept: bool,
    ) -> Result<Option<Memory>> {
        let mut memory = self.owned(owner_id, id).await?;
        if !memory.is_pending() {
            return Err(KeepsakeError::Memory(format!(
                "Memory {id} is not awaiting confirmation"
            )));
        }

        if !accept {
            self.store.delete(id).await?;
            info!("Rejected pending memory {} for {}", id, owner_id);
            return Ok(None);
        }

        let replaced = memory.conflict_with();
        memory.metadata.remove(meta::PENDING_CONFLICT);
        memory.metadata.remove(meta::CONFLICT_WITH);
        memory.updated_at = self.clock.now();

        if let Some(old_id) = replaced {
            if let Some(old) = self.get_memory(owner_id, old_id).await? {
                memory.metadata.insert(
                    meta::PREVIOUS_CONTENT.to_string(),
                    Value::String(old.content),
                );
                self.store.delete(old_id).await?;
            }
        }

        if !self.store.update(&memory).await? {
            return Err(KeepsakeError::Memory(format!(
                "Memory {id} disappeared during confirmation"
            )));
        }
        info!("Confirmed pending memory {} for {}", id, owner_id);
        Ok(Some(memory))
    }

    /// Delete one memory. `false` when it does not exist for this owner.
    pub async fn forget(&self, owner_id: &str, id: Uuid) -> Result<bool> {
        if self.get_memory(owner_id, id).await?.is_none() {
            return Ok(false);
        }
        let deleted = self.store.delete(id).await?;
        if deleted {
            info!("Forgot memory {} for {}", id, owner_id);
        }
        Ok(deleted)
    }

    /// Extract candidates from a message without persisting anything
    pub async fn extract(&self, message: &str) -> ExtractionResult {
        self.extraction
            .extract(message, ExtractionOptions::default())
            .await
    }

    /// Extract from one message, remember every candidate and upsert the
    /// entities it names
    pub async fn remember_message(
        &self,
        owner_id: &str,
        message: &str,
        options: RememberOptions,
    ) -> Result<MessageReport> {
        let extracted = self.extract(message).await;
        let mut report = MessageReport {
            stats: extracted.stats,
            ..MessageReport::default()
        };

        for candidate in extracted.memories {
            let outcome = self.remember_detailed(owner_id, candidate, options).await?;
            report.outcomes.push(outcome);
        }
        for entity in extracted.entities {
            report.entities.push(self.upsert_entity(owner_id, entity).await?);
        }

        info!(
            "Message for {}: {} created, {} updated, {} merged, {} skipped, {} pending, {} entities",
            owner_id,
            report.count(RememberAction::Created),
            report.count(RememberAction::Updated),
            report.count(RememberAction::Merged),
            report.count(RememberAction::Skipped),
            report.count(RememberAction::Pending),
            report.entities.len()
        );
        Ok(report)
    }

    /// Vector up to `limit` memories persisted without an embedding
    pub async fn backfill_embeddings(&self, limit: usize) -> Result<BackfillResult> {
        let query = MemoryQuery::new()
            .with_has_embedding(false)
            .with_limit(limit.max(1));
        let memories = self.store.list(&query).await?;
        let mut result = BackfillResult {
            scanned: memories.len(),
            ..BackfillResult::default()
        };
        if memories.is_empty() {
            return Ok(result);
        }

        let texts: Vec<String> = memories.iter().map(|m| m.content.clone()).collect();
        let vectors = match self.embedder.embed_batch(&texts).await {
            Ok(vectors) if vectors.len() == texts.len() => vectors,
            Ok(vectors) => {
                warn!(
                    "Embedder {} returned {} vectors for {} texts",
                    self.embedder.name(),
                    vectors.len(),
                    texts.len()
                );
                result.failed = result.scanned;
                return Ok(result);
            }
            Err(e) => {
                warn!("Backfill via {} unavailable: {}", self.embedder.name(), e);
                result.failed = result.scanned;
                return Ok(result);
            }
        };

        for (mut memory, vector) in memories.into_iter().zip(vectors) {
            if vector.is_empty() {
                result.failed += 1;
                continue;
            }
            memory.embedding = Some(vector);
            match self.store.update(&memory).await {
                Ok(true) => result.embedded += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to store embedding for {}: {}", memory.id, e);
                    result.failed += 1;
                }
            }
        }

        if result.embedded > 0 {
            info!("Backfilled {} embeddings", result.embedded);
        }
        Ok(result)
    }

    pub async fn upsert_entity(&self, owner_id: &str, input: EntityInput) -> Result<Entity> {
        if input.name.trim().is_empty() {
            return Err(KeepsakeError::Memory("Entity name is empty".to_string()));
        }
        self.store
            .upsert_entity(input.into_entity(owner_id, self.clock.now()))
            .await
    }

    pub async fn list_entities(&self, owner_id: &str) -> Result<Vec<Entity>> {
        self.store.list_entities(owner_id).await
    }
}

fn sort_hits(hits: &mut [RecallHit]) {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(b.memory.created_at.cmp(&a.memory.created_at))
    });
}

fn context_tokens(context: &RetrievalContext) -> usize {
    let turns: usize = context.recent_turns.iter().map(|t| t.estimate_tokens()).sum();
    let memories: usize = context
        .memories
        .iter()
        .map(|h| estimate_tokens(&h.memory.content))
        .sum();
    let preferences: usize = context
        .preferences
        .iter()
        .map(|m| estimate_tokens(&m.content))
        .sum();
    let entities: usize = context
        .entities
        .iter()
        .map(|e| estimate_tokens(&e.name) + estimate_tokens(&e.description))
        .sum();
    turns + memories + preferences + entities
}

/// Drop the least relevant memories, then preferences, until the estimate
/// fits. Conversation turns and entities are never dropped.
fn fit_to_budget(context: &mut RetrievalContext, budget: usize) {
    let mut tokens = context_tokens(context);
    while tokens > budget {
        if let Some(hit) = context.memories.pop() {
            tokens -= estimate_tokens(&hit.memory.content);
        } else if let Some(preference) = context.preferences.pop() {
            tokens -= estimate_tokens(&preference.content);
        } else {
            break;
        }
    }
    context.estimated_tokens = tokens;
}

/// Wires the manager's collaborators, defaulting everything but the store
pub struct MemoryManagerBuilder {
    store: Arc<dyn MemoryStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    scorer: Arc<dyn MemoryScoring>,
    conflicts: Option<Arc<dyn ConflictPolicy>>,
    access: Option<Arc<dyn AccessTracker>>,
    locks: Arc<dyn LockProvider>,
    summarizer: Option<Arc<dyn Summarizer>>,
    clock: Arc<dyn Clock>,
    extraction_config: ExtractionConfig,
    conflict_config: ConflictConfig,
    decay_config: DecayConfig,
    compaction_config: CompactionConfig,
    recall_config: RecallConfig,
    context_config: ContextConfig,
}

impl MemoryManagerBuilder {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self {
            store,
            embedder: Arc::new(NoopEmbedder::new(DEFAULT_DIMENSION)),
            llm: Arc::new(NoopLlm),
            scorer: Arc::new(Scorer::default()),
            conflicts: None,
            access: None,
            locks: Arc::new(InMemoryLockProvider::new()),
            summarizer: None,
            clock: Arc::new(SystemClock),
            extraction_config: ExtractionConfig::default(),
            conflict_config: ConflictConfig::default(),
            decay_config: DecayConfig::default(),
            compaction_config: CompactionConfig::default(),
            recall_config: RecallConfig::default(),
            context_config: ContextConfig::default(),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = llm;
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn MemoryScoring>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Replace the store-backed conflict resolver
    pub fn with_conflict_policy(mut self, policy: Arc<dyn ConflictPolicy>) -> Self {
        self.conflicts = Some(policy);
        self
    }

    /// Replace the decay engine as the recipient of recall reinforcement
    pub fn with_access_tracker(mut self, tracker: Arc<dyn AccessTracker>) -> Self {
        self.access = Some(tracker);
        self
    }

    pub fn with_locks(mut self, locks: Arc<dyn LockProvider>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_extraction_config(mut self, config: ExtractionConfig) -> Self {
        self.extraction_config = config;
        self
    }

    pub fn with_conflict_config(mut self, config: ConflictConfig) -> Self {
        self.conflict_config = config;
        self
    }

    pub fn with_decay_config(mut self, config: DecayConfig) -> Self {
        self.decay_config = config;
        self
    }

    pub fn with_compaction_config(mut self, config: CompactionConfig) -> Self {
        self.compaction_config = config;
        self
    }

    pub fn with_recall_config(mut self, config: RecallConfig) -> Self {
        self.recall_config = config;
        self
    }

    pub fn with_context_config(mut self, config: ContextConfig) -> Self {
        self.context_config = config;
        self
    }

    pub fn build(self) -> MemoryManager {
        let extraction = ExtractionEngine::new(self.extraction_config)
            .with_llm(self.llm.clone())
            .with_scorer(self.scorer.clone())
            .with_clock(self.clock.clone());

        let conflicts = self.conflicts.unwrap_or_else(|| {
            Arc::new(ConflictResolver::new(
                self.store.clone(),
                self.conflict_config,
            ))
        });

        let decay = Arc::new(
            DecayEngine::new(self.store.clone(), self.decay_config)
                .with_scorer(self.scorer.clone())
                .with_locks(self.locks.clone())
                .with_clock(self.clock.clone()),
        );

        let summarizer = self
            .summarizer
            .unwrap_or_else(|| Arc::new(LlmSummarizer::new(self.llm.clone())));
        let compaction = Arc::new(
            CompactionEngine::new(self.store.clone(), self.compaction_config)
                .with_summarizer(summarizer)
                .with_embedder(self.embedder.clone())
                .with_locks(self.locks)
                .with_clock(self.clock.clone()),
        );

        let access = self
            .access
            .unwrap_or_else(|| decay.clone() as Arc<dyn AccessTracker>);

        MemoryManager {
            store: self.store,
            embedder: self.embedder,
            extraction,
            conflicts,
            scorer: self.scorer,
            access,
            decay,
            compaction,
            clock: self.clock,
            recall_config: self.recall_config,
            context_config: self.context_config,
        }
    }
}
