use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::conflict::rules::{DEFAULT_DEDUPE_RULES, DedupeRule};
use crate::conflict::score::sniff_score;
use crate::conflict::{ConflictConfig, ConflictDetection, ConflictPolicy, ConflictType, Resolution};
use crate::error::Result;
use crate::memory::types::content_key;
use crate::memory::{ConflictStrategy, Memory, MemoryInput, meta};
use crate::storage::{MemoryStore, SimilarityQuery};

const MERGE_SEPARATOR: &str = "; ";

/// Store-backed conflict detection with the strategy table applied on top
pub struct ConflictResolver {
    store: Arc<dyn MemoryStore>,
    rules: Vec<DedupeRule>,
    config: ConflictConfig,
}

impl ConflictResolver {
    pub fn new(store: Arc<dyn MemoryStore>, config: ConflictConfig) -> Self {
        Self {
            store,
            rules: DEFAULT_DEDUPE_RULES.to_vec(),
            config,
        }
    }

    pub fn with_rules(mut self, rules: Vec<DedupeRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Keys to look up, dedupe rule first, each with the strategy it implies
    fn candidate_keys(&self, candidate: &MemoryInput) -> Vec<(String, ConflictStrategy)> {
        let mut keys = Vec::with_capacity(2);

        if let Some((key, strategy)) = self
            .rules
            .iter()
            .filter(|rule| rule.applies_to(candidate))
            .find_map(|rule| Some((rule.key.generate(&candidate.content)?, rule.strategy)))
        {
            keys.push((key, strategy));
        }

        if let Some(own) = candidate.dedupe_key.as_ref().filter(|k| !k.is_empty()) {
            if !keys.iter().any(|(key, _)| key == own) {
                let strategy = candidate.strategy.unwrap_or(ConflictStrategy::KeepLatest);
                keys.push((own.clone(), strategy));
            }
        }

        keys
    }
}

#[async_trait]
impl ConflictPolicy for ConflictResolver {
    async fn detect_conflict(
        &self,
        owner_id: &str,
        candidate: &MemoryInput,
    ) -> Result<ConflictDetection> {
        for (key, strategy) in self.candidate_keys(candidate) {
            if let Some(existing) = self.store.find_by_dedupe_key(owner_id, &key).await? {
                debug!("Key conflict on {} with memory {}", key, existing.id);
                return Ok(ConflictDetection {
                    conflict_type: Some(ConflictType::Key),
                    existing: Some(existing),
                    similarity: 1.0,
                    suggested_strategy: strategy,
                    dedupe_key: Some(key),
                });
            }
        }

        if let Some(existing) = self
            .store
            .find_exact(owner_id, candidate.memory_type, &candidate.content)
            .await?
        {
            debug!("Exact duplicate of memory {}", existing.id);
            return Ok(ConflictDetection {
                conflict_type: Some(ConflictType::Exact),
                existing: Some(existing),
                similarity: 1.0,
                suggested_strategy: ConflictStrategy::KeepLatest,
                dedupe_key: candidate.dedupe_key.clone(),
            });
        }

        if let Some(embedding) = candidate.embedding.as_ref().filter(|e| !e.is_empty()) {
            let query = SimilarityQuery::new(owner_id, embedding.clone())
                .with_memory_types(vec![candidate.memory_type])
                .with_min_similarity(self.config.semantic_threshold)
                .with_limit(self.config.semantic_limit.max(1));

            if let Some(nearest) = self.store.search_similar(&query).await?.into_iter().next() {
                debug!(
                    "Semantic duplicate of memory {} (similarity {:.3})",
                    nearest.memory.id, nearest.similarity
                );
                return Ok(ConflictDetection {
                    conflict_type: Some(ConflictType::Semantic),
                    existing: Some(nearest.memory),
                    similarity: nearest.similarity,
                    suggested_strategy: ConflictStrategy::Merge,
                    dedupe_key: candidate.dedupe_key.clone(),
                });
            }
        }

        Ok(ConflictDetection::none())
    }

    fn resolve_conflict(
        &self,
        candidate: MemoryInput,
        detection: &ConflictDetection,
        strategy_override: Option<ConflictStrategy>,
        now: DateTime<Utc>,
    ) -> Resolution {
        let Some(existing) = detection.existing.clone() else {
            return Resolution::Create(candidate);
        };
        let strategy = strategy_override.unwrap_or(detection.suggested_strategy);

        match strategy {
            ConflictStrategy::KeepLatest => {
                Resolution::Update(overwrite(existing, candidate, detection, now))
            }
            ConflictStrategy::KeepHighest => {
                let incoming = sniff_score(&candidate.category, &candidate.content);
                let current = sniff_score(&existing.category, &existing.content);
                match (incoming, current) {
                    (Some(incoming), Some(current)) if incoming.scaled > current.scaled => {
                        Resolution::Update(overwrite(existing, candidate, detection, now))
                    }
                    (Some(_), None) => {
                        Resolution::Update(overwrite(existing, candidate, detection, now))
                    }
                    (None, _) => Resolution::Skip {
                        existing_id: existing.id,
                        reason: "candidate carries no comparable score".to_string(),
                    },
                    (Some(incoming), Some(current)) => Resolution::Skip {
                        existing_id: existing.id,
                        reason: format!(
                            "stored score {} is not below {}",
                            current.raw, incoming.raw
                        ),
                    },
                }
            }
            ConflictStrategy::KeepOldest => Resolution::Skip {
                existing_id: existing.id,
                reason: "existing memory kept".to_string(),
            },
            ConflictStrategy::Merge => Resolution::Merge(merge(existing, candidate, now)),
            ConflictStrategy::KeepBoth => Resolution::Create(candidate),
            ConflictStrategy::AskUser => {
                if content_key(existing.memory_type, &existing.content)
                    == content_key(candidate.memory_type, &candidate.content)
                {
                    return Resolution::Skip {
                        existing_id: existing.id,
                        reason: "already recorded".to_string(),
                    };
                }
                Resolution::Pending(
                    candidate
                        .with_metadata(meta::PENDING_CONFLICT, true)
                        .with_metadata(meta::CONFLICT_WITH, existing.id.to_string()),
                )
            }
        }
    }
}

/// Rewrite `existing` with the candidate's content and metadata, keeping its id
fn overwrite(
    mut memory: Memory,
    candidate: MemoryInput,
    detection: &ConflictDetection,
    now: DateTime<Utc>,
) -> Memory {
    let previous = std::mem::replace(&mut memory.content, candidate.content);
    memory.category = candidate.category;
    memory.set_importance(candidate.importance);
    memory.embedding = candidate.embedding.filter(|e| !e.is_empty());
    memory.expires_at = candidate.expires_at;

    for (key, value) in candidate.metadata {
        memory.metadata.insert(key, value);
    }
    memory.metadata.remove(meta::ARCHIVED);
    memory.metadata.remove(meta::ARCHIVED_AT);
    memory
        .metadata
        .insert(meta::CONFIDENCE.to_string(), Value::from(candidate.confidence));
    if let Some(strategy) = candidate.strategy {
        memory.metadata.insert(
            meta::STRATEGY.to_string(),
            Value::String(strategy.as_str().to_string()),
        );
    }
    if let Some(key) = candidate.dedupe_key.or_else(|| detection.dedupe_key.clone()) {
        memory.set_dedupe_key(&key);
    }
    memory
        .metadata
        .insert(meta::PREVIOUS_CONTENT.to_string(), Value::String(previous));
    memory.updated_at = now;
    memory
}

fn merge(mut memory: Memory, candidate: MemoryInput, now: DateTime<Utc>) -> Memory {
    let merged = merge_content(&memory.content, &candidate.content);
    if merged != memory.content {
        // The stored vector describes the old text
        memory.embedding = if merged == candidate.content {
            candidate.embedding.filter(|e| !e.is_empty())
        } else {
            None
        };
        memory.content = merged;
    }

    memory.set_importance(memory.importance.max(candidate.importance));

    let merge_count = memory
        .metadata
        .get(meta::MERGE_COUNT)
        .and_then(Value::as_u64)
        .unwrap_or(0);
    memory
        .metadata
        .insert(meta::MERGE_COUNT.to_string(), Value::from(merge_count + 1));
    memory.updated_at = now;
    memory
}

/// Keep the longer side when one contains the other, else join both
pub fn merge_content(existing: &str, incoming: &str) -> String {
    let (a, b) = (existing.to_lowercase(), incoming.to_lowercase());
    if a.contains(&b) {
        existing.to_string()
    } else if b.contains(&a) {
        incoming.to_string()
    } else {
        format!("{existing}{MERGE_SEPARATOR}{incoming}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ResolutionAction;
    use crate::memory::MemoryType;
    use crate::storage::InMemoryStore;
    use crate::testing::MockEmbedder;

    async fn setup(existing: Vec<Memory>) -> (ConflictResolver, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        for memory in &existing {
            store.insert(memory).await.unwrap();
        }
        (
            ConflictResolver::new(store.clone(), ConflictConfig::default()),
            store,
        )
    }

    fn sat(score: u32) -> MemoryInput {
        MemoryInput::new(MemoryType::Fact, "academic", format!("SAT: {score}"))
            .with_dedupe_key("user:sat")
            .with_strategy(ConflictStrategy::KeepHighest)
    }

    fn stored(input: MemoryInput) -> Memory {
        input.into_memory("u1", Utc::now())
    }

    mod detect {
        use super::*;

        #[tokio::test]
        async fn test_identical_content_is_exact() {
            let existing = stored(MemoryInput::new(MemoryType::Feedback, "advice", "liked the essay tips"));
            let (resolver, _) = setup(vec![existing.clone()]).await;

            let candidate = MemoryInput::new(MemoryType::Feedback, "advice", "liked the essay tips");
            let detection = resolver.detect_conflict("u1", &candidate).await.unwrap();

            assert_eq!(detection.conflict_type, Some(ConflictType::Exact));
            assert_eq!(detection.similarity, 1.0);
            assert_eq!(detection.suggested_strategy, ConflictStrategy::KeepLatest);
            assert_eq!(detection.existing.unwrap().id, existing.id);
        }

        #[tokio::test]
        async fn test_key_conflict_uses_rule_strategy() {
            let (resolver, _) = setup(vec![stored(sat(1400))]).await;

            let detection = resolver.detect_conflict("u1", &sat(1350)).await.unwrap();

            assert_eq!(detection.conflict_type, Some(ConflictType::Key));
            assert_eq!(detection.suggested_strategy, ConflictStrategy::KeepHighest);
            assert_eq!(detection.dedupe_key.as_deref(), Some("user:sat"));
        }

        #[tokio::test]
        async fn test_dedupe_rule_keys_unkeyed_candidates() {
            let (resolver, _) = setup(vec![stored(sat(1400))]).await;

            let candidate =
                MemoryInput::new(MemoryType::Fact, "academic", "Retook the SAT and got 1480");
            let detection = resolver.detect_conflict("u1", &candidate).await.unwrap();

            assert_eq!(detection.conflict_type, Some(ConflictType::Key));
            assert_eq!(detection.suggested_strategy, ConflictStrategy::KeepHighest);
        }

        #[tokio::test]
        async fn test_owner_isolation() {
            let (resolver, _) = setup(vec![stored(sat(1400))]).await;
            let detection = resolver.detect_conflict("u2", &sat(1400)).await.unwrap();
            assert!(!detection.has_conflict());
        }

        #[tokio::test]
        async fn test_semantic_conflict_suggests_merge() {
            let embedder = MockEmbedder::new(256);
            let text = "Prefers small liberal arts colleges in New England area";
            let existing = stored(
                MemoryInput::new(MemoryType::Preference, "location", text)
                    .with_embedding(embedder.vector(text)),
            );
            let (resolver, _) = setup(vec![existing.clone()]).await;

            let incoming = "Prefers small liberal arts colleges in New England";
            let candidate = MemoryInput::new(MemoryType::Preference, "location", incoming)
                .with_embedding(embedder.vector(incoming));
            let detection = resolver.detect_conflict("u1", &candidate).await.unwrap();

            assert_eq!(detection.conflict_type, Some(ConflictType::Semantic));
            assert_eq!(detection.suggested_strategy, ConflictStrategy::Merge);
            assert!(detection.similarity >= 0.9);

            let resolution = resolver.resolve_conflict(candidate, &detection, None, Utc::now());
            match resolution {
                Resolution::Merge(memory) => {
                    assert_eq!(memory.id, existing.id);
                    assert_eq!(memory.content, text);
                }
                other => panic!("expected merge, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_no_embedding_skips_semantic() {
            let embedder = MockEmbedder::new(64);
            let text = "Prefers warm weather";
            let existing = stored(
                MemoryInput::new(MemoryType::Preference, "location", text)
                    .with_embedding(embedder.vector(text)),
            );
            let (resolver, _) = setup(vec![existing]).await;

            let candidate = MemoryInput::new(MemoryType::Preference, "location", "Prefers warm weather!");
            let detection = resolver.detect_conflict("u1", &candidate).await.unwrap();

            assert!(!detection.has_conflict());
            assert_eq!(detection.suggested_strategy, ConflictStrategy::KeepBoth);
            assert_eq!(
                resolver
                    .resolve_conflict(candidate, &detection, None, Utc::now())
                    .action(),
                ResolutionAction::Create
            );
        }
    }

    mod resolve {
        use super::*;

        fn detection_for(existing: &Memory, strategy: ConflictStrategy) -> ConflictDetection {
            ConflictDetection {
                conflict_type: Some(ConflictType::Key),
                existing: Some(existing.clone()),
                similarity: 1.0,
                suggested_strategy: strategy,
                dedupe_key: existing.dedupe_key().map(str::to_string),
            }
        }

        async fn resolver() -> ConflictResolver {
            setup(Vec::new()).await.0
        }

        #[tokio::test]
        async fn test_keep_latest_overwrites_and_records_previous() {
            let existing = stored(
                MemoryInput::new(MemoryType::Fact, "academic", "GPA: 3.80").with_dedupe_key("user:gpa"),
            );
            let candidate = MemoryInput::new(MemoryType::Fact, "academic", "GPA: 3.90")
                .with_importance(0.9)
                .with_confidence(0.95);
            let now = Utc::now();

            let resolution = resolver().await.resolve_conflict(
                candidate,
                &detection_for(&existing, ConflictStrategy::KeepLatest),
                None,
                now,
            );

            let Resolution::Update(updated) = resolution else {
                panic!("expected update");
            };
            assert_eq!(updated.id, existing.id);
            assert_eq!(updated.content, "GPA: 3.90");
            assert_eq!(updated.importance, 0.9);
            assert_eq!(updated.dedupe_key(), Some("user:gpa"));
            assert_eq!(updated.metadata.get(meta::PREVIOUS_CONTENT).unwrap(), "GPA: 3.80");
            assert_eq!(updated.updated_at, now);
            assert_eq!(updated.created_at, existing.created_at);
        }

        #[tokio::test]
        async fn test_keep_highest_never_decreases() {
            let resolver = resolver().await;
            let existing = stored(sat(1400));
            let detection = detection_for(&existing, ConflictStrategy::KeepHighest);

            let lower = resolver.resolve_conflict(sat(1350), &detection, None, Utc::now());
            assert_eq!(lower.action(), ResolutionAction::Skip);

            let equal = resolver.resolve_conflict(sat(1400), &detection, None, Utc::now());
            assert_eq!(equal.action(), ResolutionAction::Skip);

            match resolver.resolve_conflict(sat(1500), &detection, None, Utc::now()) {
                Resolution::Update(memory) => assert_eq!(memory.content, "SAT: 1500"),
                other => panic!("expected update, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_keep_highest_missing_scores() {
            let resolver = resolver().await;

            let existing = stored(sat(1400));
            let no_score = MemoryInput::new(MemoryType::Fact, "academic", "SAT: pending");
            let resolution = resolver.resolve_conflict(
                no_score,
                &detection_for(&existing, ConflictStrategy::KeepHighest),
                None,
                Utc::now(),
            );
            assert_eq!(resolution.action(), ResolutionAction::Skip);

            let unscored = stored(MemoryInput::new(MemoryType::Fact, "academic", "SAT: not taken yet"));
            let resolution = resolver.resolve_conflict(
                sat(1300),
                &detection_for(&unscored, ConflictStrategy::KeepHighest),
                None,
                Utc::now(),
            );
            assert_eq!(resolution.action(), ResolutionAction::Update);
        }

        #[tokio::test]
        async fn test_keep_oldest_and_keep_both_overrides() {
            let resolver = resolver().await;
            let existing = stored(sat(1400));
            let detection = detection_for(&existing, ConflictStrategy::KeepHighest);

            let oldest = resolver.resolve_conflict(
                sat(1600),
                &detection,
                Some(ConflictStrategy::KeepOldest),
                Utc::now(),
            );
            assert_eq!(oldest.action(), ResolutionAction::Skip);

            let both = resolver.resolve_conflict(
                sat(1200),
                &detection,
                Some(ConflictStrategy::KeepBoth),
                Utc::now(),
            );
            assert_eq!(both.action(), ResolutionAction::Create);
        }

        #[tokio::test]
        async fn test_merge_concatenates_and_counts() {
            let resolver = resolver().await;
            let existing = stored(
                MemoryInput::new(MemoryType::Preference, "location", "Likes Boston").with_importance(0.4),
            );
            let candidate =
                MemoryInput::new(MemoryType::Preference, "location", "Wants a big city").with_importance(0.7);

            let Resolution::Merge(merged) = resolver.resolve_conflict(
                candidate,
                &detection_for(&existing, ConflictStrategy::Merge),
                None,
                Utc::now(),
            ) else {
                panic!("expected merge");
            };
            assert_eq!(merged.content, "Likes Boston; Wants a big city");
            assert_eq!(merged.importance, 0.7);
            assert_eq!(merged.metadata.get(meta::MERGE_COUNT).unwrap(), 1);

            let again = resolver.resolve_conflict(
                MemoryInput::new(MemoryType::Preference, "location", "likes boston"),
                &detection_for(&merged, ConflictStrategy::Merge),
                None,
                Utc::now(),
            );
            let Resolution::Merge(merged) = again else {
                panic!("expected merge");
            };
            assert_eq!(merged.content, "Likes Boston; Wants a big city");
            assert_eq!(merged.metadata.get(meta::MERGE_COUNT).unwrap(), 2);
        }

        #[tokio::test]
        async fn test_ask_user_flags_pending() {
            let resolver = resolver().await;
            let existing = stored(
                MemoryInput::new(MemoryType::Decision, "application_plan", "Early application: Duke")
                    .with_dedupe_key("user:early_plan"),
            );
            let detection = detection_for(&existing, ConflictStrategy::AskUser);

            let candidate =
                MemoryInput::new(MemoryType::Decision, "application_plan", "Early application: Rice");
            let Resolution::Pending(pending) =
                resolver.resolve_conflict(candidate, &detection, None, Utc::now())
            else {
                panic!("expected pending");
            };
            let memory = pending.into_memory("u1", Utc::now());
            assert!(memory.is_pending());
            assert_eq!(memory.conflict_with(), Some(existing.id));

            let same =
                MemoryInput::new(MemoryType::Decision, "application_plan", "early application: duke");
            assert_eq!(
                resolver
                    .resolve_conflict(same, &detection, None, Utc::now())
                    .action(),
                ResolutionAction::Skip
            );
        }
    }

    #[test]
    fn test_merge_content() {
        assert_eq!(merge_content("abc def", "ABC"), "abc def");
        assert_eq!(merge_content("abc", "abc def"), "abc def");
        assert_eq!(merge_content("x", "y"), "x; y");
    }
}
