use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::extraction::llm::extract_with_llm;
use crate::extraction::rules::{CompiledRule, ExtractionRule, RULES};
use crate::lifecycle::clock::{Clock, SystemClock};
use crate::llm::{LlmProvider, NoopLlm};
use crate::memory::types::{content_key, entity_name_key};
use crate::memory::{
    EntityInput, EntityType, Memory, MemoryInput, MemoryScoring, ScoreInput, Scorer, meta,
};

/// Configuration for extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Ask the LLM when rules produce fewer candidates than this (default: 2)
    pub llm_fallback_threshold: usize,
    /// Candidates below this confidence are dropped (default: 0.5)
    pub min_confidence: f32,
    /// Confidence assigned to rule matches (default: 0.95)
    pub rule_confidence: f32,
    /// Confidence assigned to LLM proposals (default: 0.7)
    pub llm_confidence: f32,
    /// Longest message prefix sent to the LLM, in characters
    pub max_llm_input_chars: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            llm_fallback_threshold: 2,
            min_confidence: 0.5,
            rule_confidence: 0.95,
            llm_confidence: 0.7,
            max_llm_input_chars: 4000,
        }
    }
}

/// Per-call knobs
#[derive(Debug, Clone, Copy)]
pub struct ExtractionOptions<'a> {
    /// Overrides the configured minimum confidence
    pub min_confidence: Option<f32>,
    /// Memories the caller already holds; candidates duplicating them are dropped
    pub existing: &'a [Memory],
    pub allow_llm: bool,
}

impl Default for ExtractionOptions<'_> {
    fn default() -> Self {
        Self {
            min_confidence: None,
            existing: &[],
            allow_llm: true,
        }
    }
}

impl<'a> ExtractionOptions<'a> {
    pub fn with_existing(mut self, existing: &'a [Memory]) -> Self {
        self.existing = existing;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = Some(min_confidence);
        self
    }

    pub fn without_llm(mut self) -> Self {
        self.allow_llm = false;
        self
    }
}

/// Counters describing one extraction run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Validated rule matches
    pub rule_matches: usize,
    /// Rule matches the validator refused
    pub rejected: usize,
    pub llm_invoked: bool,
    pub llm_candidates: usize,
    pub below_confidence: usize,
    pub duplicates: usize,
    pub duplicate_entities: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    pub memories: Vec<MemoryInput>,
    pub entities: Vec<EntityInput>,
    pub stats: ExtractionStats,
}

/// Output of the rule pass alone
#[derive(Debug, Clone, Default)]
pub struct RuleMatches {
    pub memories: Vec<MemoryInput>,
    pub entities: Vec<EntityInput>,
    pub rejected: usize,
}

/// Turns messages into candidate memories and entities.
///
/// Rules run first; the LLM is consulted only when they come up short.
pub struct ExtractionEngine {
    rules: Vec<CompiledRule>,
    llm: Arc<dyn LlmProvider>,
    scorer: Arc<dyn MemoryScoring>,
    clock: Arc<dyn Clock>,
    config: ExtractionConfig,
}

impl ExtractionEngine {
    pub fn new(config: ExtractionConfig) -> Self {
        Self {
            rules: compile(RULES),
            llm: Arc::new(NoopLlm),
            scorer: Arc::new(Scorer::default()),
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = llm;
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn MemoryScoring>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the default rule table
    pub fn with_rules(mut self, rules: &'static [ExtractionRule]) -> Self {
        self.rules = compile(rules);
        self
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.rule.id).collect()
    }

    /// Run every rule over the message, in declaration order
    pub fn apply_rules(&self, message: &str) -> RuleMatches {
        let now = self.clock.now();
        let mut output = RuleMatches::default();

        for compiled in &self.rules {
            let rule = compiled.rule;
            let mut values = HashSet::new();

            for pattern in &compiled.patterns {
                for caps in pattern.captures_iter(message) {
                    let Some(whole) = caps.get(0) else {
                        continue;
                    };
                    let raw = caps.get(1).unwrap_or(whole).as_str();

                    let value = match rule.validator.validate(raw, whole.as_str(), message) {
                        Ok(value) => value,
                        Err(reason) => {
                            debug!("Rule {} rejected '{}': {}", rule.id, raw, reason);
                            output.rejected += 1;
                            continue;
                        }
                    };

                    // Two patterns of one rule agreeing is still one fact
                    if !values.insert(value.clone()) {
                        continue;
                    }

                    let mut candidate =
                        MemoryInput::new(rule.memory_type, rule.category, rule.render(&value))
                            .with_importance(rule.importance_for(message))
                            .with_confidence(self.config.rule_confidence)
                            .with_strategy(rule.strategy)
                            .with_metadata(meta::SOURCE, "rule")
                            .with_metadata(meta::RULE_ID, rule.id);
                    if let Some(key) = rule.key.generate(&value) {
                        candidate = candidate.with_dedupe_key(key);
                    }
                    if let Some(days) = rule.ttl_days {
                        candidate = candidate.with_expiry(now + Duration::days(days));
                    }
                    if let Some(emitter) = rule.entity {
                        output.entities.push(
                            EntityInput::new(emitter.entity_type, value.clone())
                                .with_description(emitter.description),
                        );
                    }
                    output.memories.push(candidate);
                }
            }
        }

        output
    }

    /// Extract candidates from a message. Never fails: collaborator problems
    /// shrink the result instead.
    pub async fn extract(&self, message: &str, options: ExtractionOptions<'_>) -> ExtractionResult {
        let mut stats = ExtractionStats::default();

        let matches = self.apply_rules(message);
        stats.rule_matches = matches.memories.len();
        stats.rejected = matches.rejected;

        let mut memories = matches.memories;
        let mut entities = matches.entities;

        if memories.len() < self.config.llm_fallback_threshold
            && options.allow_llm
            && self.llm.is_available()
        {
            stats.llm_invoked = true;
            let proposed = extract_with_llm(
                self.llm.as_ref(),
                message,
                self.config.llm_confidence,
                self.config.max_llm_input_chars,
            )
            .await;
            stats.llm_candidates = proposed.memories.len();
            memories.extend(proposed.memories);
            entities.extend(proposed.entities);
        }

        let min_confidence = options
            .min_confidence
            .unwrap_or(self.config.min_confidence);
        let before = memories.len();
        memories.retain(|m| m.confidence >= min_confidence);
        stats.below_confidence = before - memories.len();

        let mut seen: HashSet<String> = HashSet::new();
        for memory in options.existing {
            if let Some(key) = memory.dedupe_key() {
                seen.insert(key.to_string());
            }
            seen.insert(content_key(memory.memory_type, &memory.content));
        }
        let before = memories.len();
        memories.retain(|m| seen.insert(m.batch_key()));
        stats.duplicates = before - memories.len();

        let now = self.clock.now();
        for memory in &mut memories {
            let score = self.scorer.score(
                &ScoreInput {
                    memory_type: memory.memory_type,
                    content: &memory.content,
                    importance: memory.importance,
                    confidence: memory.confidence,
                    access_count: 0,
                    created_at: now,
                },
                now,
            );
            memory.metadata.insert(meta::SCORE.to_string(), score.to_json());
        }

        let mut seen_entities: HashSet<(EntityType, String)> = HashSet::new();
        let before = entities.len();
        entities.retain(|e| {
            let key = entity_name_key(&e.name);
            !key.is_empty() && seen_entities.insert((e.entity_type, key))
        });
        stats.duplicate_entities = before - entities.len();

        if !memories.is_empty() || stats.llm_invoked {
            info!(
                "Extracted {} memories and {} entities (rules: {}, rejected: {}, llm: {})",
                memories.len(),
                entities.len(),
                stats.rule_matches,
                stats.rejected,
                stats.llm_invoked
            );
        }

        ExtractionResult {
            memories,
            entities,
            stats,
        }
    }
}

fn compile(rules: &'static [ExtractionRule]) -> Vec<CompiledRule> {
    rules
        .iter()
        .map(|rule| CompiledRule {
            rule,
            patterns: rule
                .patterns
                .iter()
                .filter_map(|pattern| match Regex::new(pattern) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!("Skipping invalid pattern in rule {}: {}", rule.id, e);
                        None
                    }
                })
                .collect(),
        })
        .collect()
}
