//! Per-owner compaction: semantic dedup, group merge, summarize or prune
//!
//! Each owner is compacted under its own lease. Work is done on a snapshot of
//! the owner's memories; every store write is checked and failures are
//! counted rather than raised.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::embedding::{EmbeddingProvider, embed_or_none};
use crate::lifecycle::clock::{Clock, SystemClock};
use crate::lifecycle::lock::{InMemoryLockProvider, LockProvider, lease_ttl};
use crate::lifecycle::summarizer::{ExtractiveSummarizer, Summarizer};
use crate::memory::tokens::is_cjk;
use crate::memory::{Memory, MemoryType, estimate_tokens, meta};
use crate::storage::{MemoryQuery, MemoryStore, QueryOrder, cosine_similarity};

/// Compaction configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    pub enabled: bool,
    /// Sweeps only compact owners holding more memories than this
    pub owner_threshold: usize,
    /// Similarity at or above which two memories of a type are duplicates
    pub dedup_threshold: f32,
    pub merge_importance_below: f32,
    pub merge_min_age_days: u32,
    pub merge_min_group: usize,
    /// Merge accepted only when the summary is below this share of the originals
    pub merge_max_ratio: f32,
    pub summarize_min_age_days: u32,
    pub summarize_importance_below: f32,
    pub summarize_access_below: u32,
    /// Memories at or below this size are pruned rather than summarized
    pub summarize_min_tokens: usize,
    pub summarize_max_ratio: f32,
    pub prune_importance_below: f32,
    /// Memories loaded per owner and run
    pub max_memories_per_owner: usize,
    pub lock_ttl_secs: u64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            owner_threshold: 500,
            dedup_threshold: 0.92,
            merge_importance_below: 0.5,
            merge_min_age_days: 7,
            merge_min_group: 3,
            merge_max_ratio: 0.7,
            summarize_min_age_days: 30,
            summarize_importance_below: 0.3,
            summarize_access_below: 3,
            summarize_min_tokens: 100,
            summarize_max_ratio: 0.5,
            prune_importance_below: 0.1,
            max_memories_per_owner: 5000,
            lock_ttl_secs: 600,
        }
    }
}

/// What one owner's compaction did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionResult {
    pub owner_id: String,
    pub skipped: bool,
    pub deduplicated: usize,
    pub merged_groups: usize,
    /// Originals replaced by merged memories
    pub merged_memories: usize,
    pub summarized: usize,
    pub pruned: usize,
    pub memories_before: usize,
    pub memories_after: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub tokens_saved: usize,
    pub errors: usize,
    pub duration_ms: u64,
}

impl CompactionResult {
    fn skipped(owner_id: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            skipped: true,
            ..Self::default()
        }
    }
}

/// Outcome of a sweep over every oversized owner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionReport {
    pub owners_scanned: usize,
    pub results: Vec<CompactionResult>,
    pub errors: usize,
}

impl CompactionReport {
    pub fn tokens_saved(&self) -> usize {
        self.results.iter().map(|r| r.tokens_saved).sum()
    }
}

pub struct CompactionEngine {
    store: Arc<dyn MemoryStore>,
    summarizer: Arc<dyn Summarizer>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    locks: Arc<dyn LockProvider>,
    clock: Arc<dyn Clock>,
    config: CompactionConfig,
}

/// Working copy of one owner's memories
struct Snapshot {
    memories: Vec<Memory>,
    removed: HashSet<Uuid>,
}

impl Snapshot {
    fn live(&self) -> impl Iterator<Item = &Memory> {
        self.memories.iter().filter(|m| !self.removed.contains(&m.id))
    }

    fn tokens(&self) -> usize {
        self.live().map(|m| estimate_tokens(&m.content)).sum()
    }
}

impl CompactionEngine {
    pub fn new(store: Arc<dyn MemoryStore>, config: CompactionConfig) -> Self {
        Self {
            store,
            summarizer: Arc::new(ExtractiveSummarizer),
            embedder: None,
            locks: Arc::new(InMemoryLockProvider::new()),
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    /// Vector merged and summarized content right away instead of leaving it to backfill
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_locks(mut self, locks: Arc<dyn LockProvider>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Compact every owner above the memory ceiling
    pub async fn run(&self) -> CompactionReport {
        let mut report = CompactionReport::default();
        if !self.config.enabled {
            info!("Compaction disabled, skipping sweep");
            return report;
        }

        let owners = match self.store.owner_counts().await {
            Ok(owners) => owners,
            Err(e) => {
                error!("Failed to list owners for compaction: {}", e);
                report.errors += 1;
                return report;
            }
        };
        report.owners_scanned = owners.len();

        for (owner_id, count) in owners {
            if count <= self.config.owner_threshold {
                continue;
            }
            debug!("Owner {} holds {} memories, compacting", owner_id, count);
            let result = self.compact_owner(&owner_id).await;
            report.errors += result.errors;
            report.results.push(result);
        }

        info!(
            "Compaction sweep finished: {} of {} owners compacted, {} tokens saved",
            report.results.len(),
            report.owners_scanned,
            report.tokens_saved()
        );
        report
    }

    /// Compact one owner regardless of size
    pub async fn compact_owner(&self, owner_id: &str) -> CompactionResult {
        if !self.config.enabled {
            return CompactionResult::skipped(owner_id);
        }

        let key = format!("compaction:{owner_id}");
        let lease = match self
            .locks
            .acquire(&key, lease_ttl(self.config.lock_ttl_secs))
            .await
        {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                info!("Compaction of {} already running, skipping", owner_id);
                return CompactionResult::skipped(owner_id);
            }
            Err(e) => {
                error!("Failed to acquire compaction lease for {}: {}", owner_id, e);
                return CompactionResult {
                    errors: 1,
                    ..CompactionResult::skipped(owner_id)
                };
            }
        };

        let result = self.compact_locked(owner_id).await;

        if let Err(e) = self.locks.release(&lease).await {
            warn!("Failed to release compaction lease for {}: {}", owner_id, e);
        }
        result
    }

    async fn compact_locked(&self, owner_id: &str) -> CompactionResult {
        let started = Instant::now();
        let now = self.clock.now();
        let mut result = CompactionResult {
            owner_id: owner_id.to_string(),
            ..CompactionResult::default()
        };

        let query = MemoryQuery::for_owner(owner_id)
            .with_pending(false)
            .ordered_by(QueryOrder::Id)
            .with_limit(self.config.max_memories_per_owner);
        let memories = match self.store.list(&query).await {
            Ok(memories) => memories,
            Err(e) => {
                error!("Failed to load memories of {}: {}", owner_id, e);
                result.errors += 1;
                return result;
            }
        };

        let mut snapshot = Snapshot {
            memories,
            removed: HashSet::new(),
        };
        result.memories_before = snapshot.memories.len();
        result.tokens_before = snapshot.tokens();

        self.dedup_phase(&mut snapshot, &mut result).await;
        self.merge_phase(owner_id, now, &mut snapshot, &mut result).await;
        self.summarize_phase(now, &mut snapshot, &mut result).await;

        result.memories_after = snapshot.live().count();
        result.tokens_after = snapshot.tokens();
        result.tokens_saved = result.tokens_before.saturating_sub(result.tokens_after);
        result.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            "Compacted {}: {} -> {} memories, {} deduplicated, {} groups merged, {} summarized, {} pruned, {} tokens saved",
            owner_id,
            result.memories_before,
            result.memories_after,
            result.deduplicated,
            result.merged_groups,
            result.summarized,
            result.pruned,
            result.tokens_saved
        );
        result
    }

    async fn dedup_phase(&self, snapshot: &mut Snapshot, result: &mut CompactionResult) {
        for memory_type in MemoryType::ALL {
            let indices: Vec<usize> = snapshot
                .memories
                .iter()
                .enumerate()
                .filter(|(_, m)| m.memory_type == memory_type)
                .map(|(i, _)| i)
                .collect();

            for (pos, &i) in indices.iter().enumerate() {
                for &j in &indices[pos + 1..] {
                    let (a, b) = (&snapshot.memories[i], &snapshot.memories[j]);
                    if snapshot.removed.contains(&a.id) {
                        break;
                    }
                    if snapshot.removed.contains(&b.id) {
                        continue;
                    }
                    let similarity = similarity(a, b);
                    if similarity < self.config.dedup_threshold {
                        continue;
                    }

                    let loser = if survives(a, b) { b.id } else { a.id };
                    debug!(
                        "Duplicate pair {} / {} (similarity {:.3}), dropping {}",
                        a.id, b.id, similarity, loser
                    );
                    match self.store.delete(loser).await {
                        Ok(_) => {
                            snapshot.removed.insert(loser);
                            result.deduplicated += 1;
                        }
                        Err(e) => {
                            warn!("Failed to delete duplicate {}: {}", loser, e);
                            result.errors += 1;
                        }
                    }
                }
            }
        }
    }

    async fn merge_phase(
        &self,
        owner_id: &str,
        now: DateTime<Utc>,
        snapshot: &mut Snapshot,
        result: &mut CompactionResult,
    ) {
        let cutoff = now - Duration::days(i64::from(self.config.merge_min_age_days));
        let mut groups: BTreeMap<(MemoryType, String), Vec<usize>> = BTreeMap::new();
        for (i, memory) in snapshot.memories.iter().enumerate() {
            if snapshot.removed.contains(&memory.id)
                || memory.importance >= self.config.merge_importance_below
                || memory.created_at >= cutoff
            {
                continue;
            }
            groups
                .entry((memory.memory_type, memory.category.clone()))
                .or_default()
                .push(i);
        }

        for ((memory_type, category), indices) in groups {
            if indices.len() < self.config.merge_min_group.max(2) {
                continue;
            }
            let group: Vec<Memory> = indices.iter().map(|&i| snapshot.memories[i].clone()).collect();
            let contents: Vec<String> = group.iter().map(|m| m.content.clone()).collect();
            let combined: usize = contents.iter().map(|c| estimate_tokens(c)).sum();

            let Some(summary) = self
                .accepted_summary(&contents, combined, self.config.merge_max_ratio, result)
                .await
            else {
                debug!(
                    "Merge of {} {}/{} memories rejected",
                    group.len(),
                    memory_type,
                    category
                );
                continue;
            };

            let summary_tokens = estimate_tokens(&summary);
            let mut merged = Memory::new_at(owner_id, memory_type, category.clone(), summary, now)
                .with_importance(group.iter().map(|m| m.importance).fold(0.0, f32::max))
                .with_metadata(meta::MERGED, true)
                .with_metadata(
                    meta::MERGED_FROM,
                    group.iter().map(|m| Value::String(m.id.to_string())).collect::<Vec<_>>(),
                );
            merged.access_count = group.iter().map(|m| m.access_count).max().unwrap_or(0);
            merged.embedding = self.embed(&merged.content).await;

            if let Err(e) = self.store.insert(&merged).await {
                warn!("Failed to insert merged memory for {}: {}", owner_id, e);
                result.errors += 1;
                continue;
            }

            let mut replaced = 0;
            for original in &group {
                match self.store.delete(original.id).await {
                    Ok(_) => {
                        snapshot.removed.insert(original.id);
                        replaced += 1;
                    }
                    Err(e) => {
                        warn!("Failed to delete merged original {}: {}", original.id, e);
                        result.errors += 1;
                    }
                }
            }

            if replaced == 0 {
                // never leave the owner with more memories than before
                if let Err(e) = self.store.delete(merged.id).await {
                    warn!("Failed to roll back merged memory {}: {}", merged.id, e);
                    result.errors += 1;
                }
                continue;
            }

            info!(
                "Merged {} {}/{} memories, compression {:.2}",
                replaced,
                memory_type,
                category,
                summary_tokens as f64 / combined.max(1) as f64
            );
            result.merged_groups += 1;
            result.merged_memories += replaced;
            snapshot.memories.push(merged);
        }
    }

    async fn summarize_phase(
        &self,
        now: DateTime<Utc>,
        snapshot: &mut Snapshot,
        result: &mut CompactionResult,
    ) {
        let cutoff = now - Duration::days(i64::from(self.config.summarize_min_age_days));

        for i in 0..snapshot.memories.len() {
            let memory = &snapshot.memories[i];
            if snapshot.removed.contains(&memory.id)
                || memory.created_at >= cutoff
                || memory.importance >= self.config.summarize_importance_below
                || memory.access_count >= self.config.summarize_access_below
            {
                continue;
            }

            let tokens = estimate_tokens(&memory.content);
            if tokens > self.config.summarize_min_tokens {
                let contents = vec![memory.content.clone()];
                let Some(summary) = self
                    .accepted_summary(&contents, tokens, self.config.summarize_max_ratio, result)
                    .await
                else {
                    continue;
                };

                let mut updated = snapshot.memories[i].clone();
                updated.content = summary;
                updated.embedding = self.embed(&updated.content).await;
                updated
                    .metadata
                    .insert(meta::SUMMARIZED.to_string(), Value::Bool(true));
                updated.updated_at = now;

                match self.store.update(&updated).await {
                    Ok(true) => {
                        debug!("Summarized memory {} in place", updated.id);
                        result.summarized += 1;
                        snapshot.memories[i] = updated;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Failed to store summary of {}: {}", updated.id, e);
                        result.errors += 1;
                    }
                }
            } else if memory.importance < self.config.prune_importance_below
                && memory.access_count == 0
            {
                let id = memory.id;
                match self.store.delete(id).await {
                    Ok(_) => {
                        debug!("Pruned memory {}", id);
                        snapshot.removed.insert(id);
                        result.pruned += 1;
                    }
                    Err(e) => {
                        warn!("Failed to prune memory {}: {}", id, e);
                        result.errors += 1;
                    }
                }
            }
        }
    }

    /// Summary strictly below `ratio` of `original_tokens`, or `None`
    async fn accepted_summary(
        &self,
        contents: &[String],
        original_tokens: usize,
        ratio: f32,
        result: &mut CompactionResult,
    ) -> Option<String> {
        let limit = original_tokens as f64 * f64::from(ratio);
        let budget = (limit.ceil() as usize).saturating_sub(1).max(1);

        let summary = match self.summarizer.summarize(contents, budget).await {
            Ok(summary) => summary.trim().to_string(),
            Err(e) => {
                warn!("Summarizer failed: {}", e);
                result.errors += 1;
                return None;
            }
        };

        (!summary.is_empty() && (estimate_tokens(&summary) as f64) < limit).then_some(summary)
    }

    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        match &self.embedder {
            Some(embedder) => embed_or_none(embedder.as_ref(), text).await,
            None => None,
        }
    }
}

/// Cosine when both sides are vectored, word Jaccard otherwise
fn similarity(a: &Memory, b: &Memory) -> f32 {
    match (a.embedding.as_deref(), b.embedding.as_deref()) {
        (Some(x), Some(y)) if !x.is_empty() && !y.is_empty() => cosine_similarity(x, y),
        _ => jaccard(&a.content, &b.content),
    }
}

/// Whitespace words. Words holding CJK text are split further: digit runs
/// stay whole and CJK runs become ordered character bigrams, so "10万" and
/// "100万" or "喜欢" and "不喜欢" stay apart.
fn terms(text: &str) -> HashSet<String> {
    let mut out = HashSet::new();
    for word in text.split_whitespace() {
        let word = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if word.is_empty() {
            continue;
        }
        if word.chars().any(is_cjk) {
            cjk_terms(&word, &mut out);
        } else {
            out.insert(word);
        }
    }
    out
}

fn cjk_terms(word: &str, out: &mut HashSet<String>) {
    let mut run: Vec<char> = Vec::new();
    let mut other = String::new();

    for c in word.chars() {
        if is_cjk(c) && c.is_alphanumeric() {
            flush_other(&mut other, out);
            run.push(c);
        } else if c.is_alphanumeric()
            || (c == '.' && other.chars().last().is_some_and(|p| p.is_ascii_digit()))
        {
            flush_run(&mut run, out);
            other.push(c);
        } else {
            flush_run(&mut run, out);
            flush_other(&mut other, out);
        }
    }
    flush_run(&mut run, out);
    flush_other(&mut other, out);
}

fn flush_run(run: &mut Vec<char>, out: &mut HashSet<String>) {
    match run.len() {
        0 => {}
        1 => {
            out.insert(run[0].to_string());
        }
        _ => out.extend(run.windows(2).map(|pair| pair.iter().collect::<String>())),
    }
    run.clear();
}

fn flush_other(other: &mut String, out: &mut HashSet<String>) {
    let token = other.trim_end_matches('.');
    if !token.is_empty() {
        out.insert(token.to_string());
    }
    other.clear();
}

pub fn jaccard(a: &str, b: &str) -> f32 {
    let (a, b) = (terms(a), terms(b));
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared = a.intersection(&b).count();
    let total = a.union(&b).count();
    shared as f32 / total as f32
}

/// Whether `a` outranks `b` by importance, then access count, then recency
fn survives(a: &Memory, b: &Memory) -> bool {
    a.importance
        .total_cmp(&b.importance)
        .then(a.access_count.cmp(&b.access_count))
        .then(a.updated_at.cmp(&b.updated_at))
        .is_ge()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{KeepsakeError, Result};
    use crate::lifecycle::clock::ManualClock;
    use crate::storage::InMemoryStore;
    use crate::testing::{MockEmbedder, aged_memory};
    use async_trait::async_trait;

    struct Harness {
        engine: CompactionEngine,
        store: Arc<InMemoryStore>,
        now: DateTime<Utc>,
    }

    fn harness(config: CompactionConfig) -> Harness {
        let now = Utc::now();
        let store = Arc::new(InMemoryStore::new());
        let engine = CompactionEngine::new(store.clone(), config)
            .with_clock(Arc::new(ManualClock::new(now)));
        Harness { engine, store, now }
    }

    async fn seed(store: &InMemoryStore, memories: Vec<Memory>) -> Vec<Uuid> {
        let mut ids = Vec::new();
        for memory in memories {
            store.insert(&memory).await.unwrap();
            ids.push(memory.id);
        }
        ids
    }

    async fn count(store: &InMemoryStore, owner: &str) -> usize {
        store.count(&MemoryQuery::for_owner(owner)).await.unwrap()
    }

    struct BrokenSummarizer;

    #[async_trait]
    impl Summarizer for BrokenSummarizer {
        async fn summarize(&self, _contents: &[String], _max_tokens: usize) -> Result<String> {
            Err(KeepsakeError::Llm("offline".to_string()))
        }
    }

    mod dedup {
        use super::*;

        #[tokio::test]
        async fn test_embedding_duplicates_keep_the_stronger() {
            let h = harness(CompactionConfig::default());
            let embedder = MockEmbedder::new(128);
            let weak = aged_memory("u1", MemoryType::Preference, "location", "Likes Boston", 0.4, 2, h.now)
                .with_embedding(embedder.vector("Likes Boston"));
            let strong = aged_memory("u1", MemoryType::Preference, "location", "likes boston", 0.8, 2, h.now)
                .with_embedding(embedder.vector("likes boston"));
            let ids = seed(&h.store, vec![weak, strong]).await;

            let result = h.engine.compact_owner("u1").await;

            assert_eq!(result.deduplicated, 1);
            assert!(h.store.get(ids[0]).await.unwrap().is_none());
            assert!(h.store.get(ids[1]).await.unwrap().is_some());
            assert!(result.tokens_saved > 0);
        }

        #[tokio::test]
        async fn test_jaccard_without_embeddings() {
            let h = harness(CompactionConfig::default());
            let a = aged_memory("u1", MemoryType::Fact, "profile", "Lives near Boston, MA", 0.5, 1, h.now);
            let mut b = aged_memory("u1", MemoryType::Fact, "profile", "lives near boston ma", 0.5, 1, h.now);
            b.access_count = 2;
            let other_type = aged_memory("u1", MemoryType::Preference, "profile", "Lives near Boston, MA", 0.5, 1, h.now);
            let ids = seed(&h.store, vec![a, b, other_type]).await;

            let result = h.engine.compact_owner("u1").await;

            assert_eq!(result.deduplicated, 1);
            assert!(h.store.get(ids[0]).await.unwrap().is_none());
            assert!(h.store.get(ids[2]).await.unwrap().is_some());
        }

        #[test]
        fn test_jaccard_cjk_uses_ordered_bigrams() {
            assert!((jaccard("想学计算机", "想学计算机。") - 1.0).abs() < 1e-6);
            assert!(jaccard("想学计算机", "预算有限") < 0.2);
            assert!(jaccard("我的预算是10万美元", "我的预算是100万美元") < 0.8);
            assert!(jaccard("托福105", "托福150") < 0.5);
            assert!(jaccard("我喜欢大城市的学校", "我不喜欢大城市的学校") < 0.8);
            assert!(jaccard("学计算", "计算学") < 0.5);
        }

        #[tokio::test]
        async fn test_distinct_cjk_facts_survive() {
            let h = harness(CompactionConfig::default());
            let facts = [
                ("budget", "我的预算是10万美元"),
                ("budget", "我的预算是100万美元"),
                ("preference", "我喜欢大城市的学校"),
                ("preference", "我不喜欢大城市的学校"),
            ];
            let memories = facts
                .iter()
                .map(|(category, text)| aged_memory("u1", MemoryType::Fact, category, text, 0.8, 1, h.now))
                .collect();
            let ids = seed(&h.store, memories).await;

            let result = h.engine.compact_owner("u1").await;

            assert_eq!(result.deduplicated, 0);
            for id in ids {
                assert!(h.store.get(id).await.unwrap().is_some());
            }
        }
    }

    mod merge {
        use super::*;

        fn notes(h: &Harness, importances: &[f32], age_days: i64) -> Vec<Memory> {
            let texts = [
                "Mentioned visiting campuses in California during the spring break trip with family.",
                "Said the weather in Seattle was too rainy for comfort on the last visit there.",
                "Talked about enjoying the food scene in Chicago when touring schools last fall.",
                "Noted that a long flight home from the east coast would be tiring every semester.",
            ];
            texts
                .iter()
                .zip(importances)
                .map(|(t, &i)| aged_memory("u1", MemoryType::Preference, "location", t, i, age_days, h.now))
                .collect()
        }

        #[tokio::test]
        async fn test_low_value_group_is_merged() {
            let h = harness(CompactionConfig::default());
            let ids = seed(&h.store, notes(&h, &[0.2, 0.3, 0.4, 0.25], 10)).await;

            let result = h.engine.compact_owner("u1").await;

            assert_eq!(result.merged_groups, 1);
            assert_eq!(result.merged_memories, 4);
            assert_eq!(count(&h.store, "u1").await, 1);
            assert!(result.memories_after < result.memories_before);

            let merged = h
                .store
                .list(&MemoryQuery::for_owner("u1"))
                .await
                .unwrap()
                .remove(0);
            assert_eq!(merged.metadata.get(meta::MERGED).unwrap(), true);
            let from = merged.metadata.get(meta::MERGED_FROM).unwrap().as_array().unwrap();
            assert_eq!(from.len(), 4);
            assert!(from.contains(&Value::String(ids[0].to_string())));
            assert_eq!(merged.importance, 0.4);
            assert_eq!(merged.category, "location");
            assert!(result.tokens_saved > 0);
        }

        #[tokio::test]
        async fn test_small_recent_or_important_groups_are_left() {
            let h = harness(CompactionConfig::default());
            seed(&h.store, notes(&h, &[0.2, 0.3], 10)).await;
            assert_eq!(h.engine.compact_owner("u1").await.merged_groups, 0);

            let h = harness(CompactionConfig::default());
            seed(&h.store, notes(&h, &[0.2, 0.3, 0.4, 0.25], 3)).await;
            assert_eq!(h.engine.compact_owner("u1").await.merged_groups, 0);

            let h = harness(CompactionConfig::default());
            seed(&h.store, notes(&h, &[0.2, 0.6, 0.7, 0.25], 10)).await;
            assert_eq!(h.engine.compact_owner("u1").await.merged_groups, 0);
            assert_eq!(count(&h.store, "u1").await, 4);
        }

        #[tokio::test]
        async fn test_summarizer_failure_keeps_originals() {
            let h = harness(CompactionConfig::default());
            seed(&h.store, notes(&h, &[0.2, 0.3, 0.4, 0.25], 10)).await;
            let engine = h.engine.with_summarizer(Arc::new(BrokenSummarizer));

            let result = engine.compact_owner("u1").await;

            assert_eq!(result.merged_groups, 0);
            assert_eq!(result.errors, 1);
            assert_eq!(count(&h.store, "u1").await, 4);
        }

        #[tokio::test]
        async fn test_merged_memory_is_vectored_when_embedder_set() {
            let h = harness(CompactionConfig::default());
            seed(&h.store, notes(&h, &[0.2, 0.3, 0.4, 0.25], 10)).await;
            let engine = h.engine.with_embedder(Arc::new(MockEmbedder::new(32)));

            engine.compact_owner("u1").await;

            let merged = h.store.list(&MemoryQuery::for_owner("u1")).await.unwrap();
            assert!(merged[0].has_embedding());
        }
    }

    mod summarize_or_prune {
        use super::*;

        fn long_note() -> String {
            (1..=12)
                .map(|i| format!("Detail number {i} about the student's extracurricular robotics season."))
                .collect::<Vec<_>>()
                .join(" ")
        }

        #[tokio::test]
        async fn test_long_stale_memory_is_summarized_in_place() {
            let h = harness(CompactionConfig::default());
            let content = long_note();
            assert!(estimate_tokens(&content) > 100);
            let ids = seed(&h.store, vec![aged_memory("u1", MemoryType::Fact, "activities", &content, 0.2, 40, h.now)]).await;

            let result = h.engine.compact_owner("u1").await;

            assert_eq!(result.summarized, 1);
            let memory = h.store.get(ids[0]).await.unwrap().unwrap();
            assert!(estimate_tokens(&memory.content) * 2 < estimate_tokens(&content));
            assert_eq!(memory.metadata.get(meta::SUMMARIZED).unwrap(), true);
            assert!(result.tokens_saved > 0);
        }

        #[tokio::test]
        async fn test_tiny_unused_memory_is_pruned() {
            let h = harness(CompactionConfig::default());
            let unused = aged_memory("u1", MemoryType::Feedback, "advice", "ok", 0.05, 40, h.now);
            let mut used = aged_memory("u1", MemoryType::Feedback, "tips", "fine", 0.05, 40, h.now);
            used.access_count = 1;
            let recent = aged_memory("u1", MemoryType::Feedback, "other", "sure", 0.05, 5, h.now);
            let ids = seed(&h.store, vec![unused, used, recent]).await;

            let result = h.engine.compact_owner("u1").await;

            assert_eq!(result.pruned, 1);
            assert!(h.store.get(ids[0]).await.unwrap().is_none());
            assert!(h.store.get(ids[1]).await.unwrap().is_some());
            assert!(h.store.get(ids[2]).await.unwrap().is_some());
        }
    }

    mod runs {
        use super::*;

        #[tokio::test]
        async fn test_held_lease_skips_owner() {
            let h = harness(CompactionConfig::default());
            let locks = Arc::new(InMemoryLockProvider::new());
            locks
                .acquire("compaction:u1", Duration::minutes(10))
                .await
                .unwrap()
                .unwrap();
            let engine = h.engine.with_locks(locks);

            assert!(engine.compact_owner("u1").await.skipped);
            assert!(!engine.compact_owner("u2").await.skipped);
        }

        #[tokio::test]
        async fn test_sweep_only_visits_oversized_owners() {
            let h = harness(CompactionConfig {
                owner_threshold: 2,
                ..CompactionConfig::default()
            });
            for i in 0..3 {
                let memory = aged_memory("big", MemoryType::Fact, "misc", &format!("unrelated fact {i} {}", "x".repeat(i)), 0.9, 1, h.now);
                seed(&h.store, vec![memory]).await;
            }
            seed(&h.store, vec![aged_memory("small", MemoryType::Fact, "misc", "alone", 0.9, 1, h.now)]).await;

            let report = h.engine.run().await;

            assert_eq!(report.owners_scanned, 2);
            assert_eq!(report.results.len(), 1);
            assert_eq!(report.results[0].owner_id, "big");
        }

        #[tokio::test]
        async fn test_count_never_increases_and_tokens_saved_non_negative() {
            let h = harness(CompactionConfig::default());
            let mut memories = Vec::new();
            for i in 0..6 {
                memories.push(aged_memory(
                    "u1",
                    MemoryType::Preference,
                    "misc",
                    &format!("Preference note {i} describing a different campus feature in some detail."),
                    0.3,
                    40,
                    h.now,
                ));
            }
            memories.push(aged_memory("u1", MemoryType::Decision, "plan", "Applying ED to Rice", 0.9, 40, h.now));
            seed(&h.store, memories).await;

            let before = count(&h.store, "u1").await;
            let result = h.engine.compact_owner("u1").await;
            let after = count(&h.store, "u1").await;

            assert!(after <= before);
            assert_eq!(result.memories_after, after);
            assert!(result.tokens_after <= result.tokens_before);
        }

        #[tokio::test]
        async fn test_disabled_engine_does_nothing() {
            let h = harness(CompactionConfig {
                enabled: false,
                ..CompactionConfig::default()
            });
            seed(&h.store, vec![aged_memory("u1", MemoryType::Feedback, "advice", "ok", 0.05, 40, h.now)]).await;

            assert!(h.engine.compact_owner("u1").await.skipped);
            assert!(h.engine.run().await.results.is_empty());
            assert_eq!(count(&h.store, "u1").await, 1);
        }
    }
}
