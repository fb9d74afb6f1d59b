//! Composite scoring for memory importance, freshness and retention tier
//!
//! The scorer blends the caller's importance with a per-type base and keyword
//! boosts, applies exponential freshness decay by age, and adds a capped bonus
//! for repeated access. All knobs live in [`ScoringConfig`] and can be tuned
//! at runtime through the [`Scorer`] setters.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::types::{Memory, MemoryType, Tier, clamp_unit, days_between};

/// Per-type importance bases. `None` means the caller's importance passes through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeBase {
    pub fact: Option<f32>,
    pub preference: Option<f32>,
    pub decision: Option<f32>,
    pub summary: Option<f32>,
    pub feedback: Option<f32>,
}

impl Default for TypeBase {
    fn default() -> Self {
        Self {
            fact: Some(0.6),
            preference: Some(0.7),
            decision: Some(0.8),
            summary: None,
            feedback: Some(0.5),
        }
    }
}

impl TypeBase {
    pub fn get(&self, memory_type: MemoryType) -> Option<f32> {
        match memory_type {
            MemoryType::Fact => self.fact,
            MemoryType::Preference => self.preference,
            MemoryType::Decision => self.decision,
            MemoryType::Summary => self.summary,
            MemoryType::Feedback => self.feedback,
        }
    }

    pub fn set(&mut self, memory_type: MemoryType, base: Option<f32>) {
        let slot = match memory_type {
            MemoryType::Fact => &mut self.fact,
            MemoryType::Preference => &mut self.preference,
            MemoryType::Decision => &mut self.decision,
            MemoryType::Summary => &mut self.summary,
            MemoryType::Feedback => &mut self.feedback,
        };
        *slot = base.map(clamp_unit);
    }
}

/// A keyword that lifts importance when it appears in the content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordBoost {
    pub keyword: String,
    pub boost: f32,
}

impl KeywordBoost {
    pub fn new(keyword: impl Into<String>, boost: f32) -> Self {
        Self {
            keyword: keyword.into(),
            boost,
        }
    }
}

/// Configuration for score calculation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Weight of importance in the total (default: 0.4)
    pub importance_weight: f32,
    /// Weight of freshness in the total (default: 0.3)
    pub freshness_weight: f32,
    /// Weight of confidence in the total (default: 0.3)
    pub confidence_weight: f32,
    /// Freshness decay rate per day (default: 0.01)
    pub decay_lambda: f32,
    /// Bonus per recorded access (default: 0.02)
    pub access_bonus_per_hit: f32,
    /// Cap on the access bonus (default: 0.2)
    pub access_bonus_cap: f32,
    pub type_base: TypeBase,
    pub keyword_boosts: Vec<KeywordBoost>,
    pub long_threshold: f32,
    pub short_threshold: f32,
    pub working_threshold: f32,
    pub decay_freshness_below: f32,
    pub decay_importance_below: f32,
    pub archive_freshness_below: f32,
    pub archive_total_below: f32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            importance_weight: 0.4,
            freshness_weight: 0.3,
            confidence_weight: 0.3,
            decay_lambda: 0.01,
            access_bonus_per_hit: 0.02,
            access_bonus_cap: 0.2,
            type_base: TypeBase::default(),
            keyword_boosts: default_keyword_boosts(),
            long_threshold: 0.8,
            short_threshold: 0.5,
            working_threshold: 0.2,
            decay_freshness_below: 0.5,
            decay_importance_below: 0.7,
            archive_freshness_below: 0.2,
            archive_total_below: 0.3,
        }
    }
}

impl ScoringConfig {
    /// Create a new scoring config with custom total weights
    pub fn new(importance_weight: f32, freshness_weight: f32, confidence_weight: f32) -> Self {
        Self {
            importance_weight,
            freshness_weight,
            confidence_weight,
            ..Default::default()
        }
    }

    pub fn with_decay_lambda(mut self, lambda: f32) -> Self {
        self.decay_lambda = lambda.max(0.0);
        self
    }

    pub fn with_keyword_boost(mut self, keyword: impl Into<String>, boost: f32) -> Self {
        self.keyword_boosts.push(KeywordBoost::new(keyword, boost));
        self
    }
}

fn default_keyword_boosts() -> Vec<KeywordBoost> {
    [
        ("important", 0.1),
        ("重要", 0.1),
        ("must", 0.1),
        ("必须", 0.1),
        ("deadline", 0.1),
        ("截止", 0.1),
        ("definitely", 0.05),
        ("一定", 0.05),
    ]
    .into_iter()
    .map(|(k, b)| KeywordBoost::new(k, b))
    .collect()
}

/// Everything the scorer needs to know about a memory or candidate
#[derive(Debug, Clone, Copy)]
pub struct ScoreInput<'a> {
    pub memory_type: MemoryType,
    pub content: &'a str,
    pub importance: f32,
    pub confidence: f32,
    pub access_count: u32,
    pub created_at: DateTime<Utc>,
}

impl<'a> ScoreInput<'a> {
    pub fn from_memory(memory: &'a Memory, confidence: f32) -> Self {
        Self {
            memory_type: memory.memory_type,
            content: &memory.content,
            importance: memory.importance,
            confidence,
            access_count: memory.access_count,
            created_at: memory.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub importance: f32,
    pub freshness: f32,
    pub confidence: f32,
    pub access_bonus: f32,
}

/// Result of scoring. Persisted only as a metadata snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub total: f32,
    pub breakdown: ScoreBreakdown,
    pub tier: Tier,
    pub should_decay: bool,
    pub should_archive: bool,
}

impl ScoreResult {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Scoring seam used by the manager, extraction and decay.
pub trait MemoryScoring: Send + Sync {
    fn score(&self, input: &ScoreInput<'_>, now: DateTime<Utc>) -> ScoreResult;

    fn freshness(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> f32;

    fn access_bonus(&self, access_count: u32) -> f32;
}

/// Live-tunable scorer
#[derive(Debug, Default)]
pub struct Scorer {
    config: RwLock<ScoringConfig>,
}

impl Scorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> ScoringConfig {
        self.read().clone()
    }

    pub fn set_config(&self, config: ScoringConfig) {
        *self.write() = config;
    }

    pub fn set_weights(&self, importance: f32, freshness: f32, confidence: f32) {
        let mut config = self.write();
        config.importance_weight = importance;
        config.freshness_weight = freshness;
        config.confidence_weight = confidence;
    }

    pub fn set_decay_lambda(&self, lambda: f32) {
        self.write().decay_lambda = lambda.max(0.0);
    }

    pub fn set_type_base(&self, memory_type: MemoryType, base: Option<f32>) {
        self.write().type_base.set(memory_type, base);
    }

    pub fn set_access_bonus(&self, per_hit: f32, cap: f32) {
        let mut config = self.write();
        config.access_bonus_per_hit = per_hit.max(0.0);
        config.access_bonus_cap = cap.max(0.0);
    }

    pub fn add_keyword_boost(&self, keyword: impl Into<String>, boost: f32) {
        self.write()
            .keyword_boosts
            .push(KeywordBoost::new(keyword, boost));
    }

    /// Blend the caller's importance with the type base and keyword boosts
    pub fn importance(&self, memory_type: MemoryType, content: &str, importance: f32) -> f32 {
        importance_with(&self.read(), memory_type, content, importance)
    }

    pub fn tier(&self, memory_type: MemoryType, total: f32) -> Tier {
        tier_with(&self.read(), memory_type, total)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ScoringConfig> {
        self.config.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ScoringConfig> {
        self.config.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl MemoryScoring for Scorer {
    fn score(&self, input: &ScoreInput<'_>, now: DateTime<Utc>) -> ScoreResult {
        let config = self.read();

        let importance = importance_with(&config, input.memory_type, input.content, input.importance);
        let freshness = freshness_with(&config, input.created_at, now);
        let confidence = clamp_unit(input.confidence);
        let access_bonus = access_bonus_with(&config, input.access_count);

        let total = clamp_unit(
            importance * config.importance_weight
                + freshness * config.freshness_weight
                + confidence * config.confidence_weight
                + access_bonus,
        );

        ScoreResult {
            total,
            breakdown: ScoreBreakdown {
                importance,
                freshness,
                confidence,
                access_bonus,
            },
            tier: tier_with(&config, input.memory_type, total),
            should_decay: freshness < config.decay_freshness_below
                && importance < config.decay_importance_below,
            should_archive: freshness < config.archive_freshness_below
                && total < config.archive_total_below,
        }
    }

    fn freshness(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
        freshness_with(&self.read(), created_at, now)
    }

    fn access_bonus(&self, access_count: u32) -> f32 {
        access_bonus_with(&self.read(), access_count)
    }
}

fn importance_with(
    config: &ScoringConfig,
    memory_type: MemoryType,
    content: &str,
    importance: f32,
) -> f32 {
    let caller = clamp_unit(importance);
    let Some(base) = config.type_base.get(memory_type) else {
        return caller;
    };

    let lowered = content.to_lowercase();
    let boosts: f32 = config
        .keyword_boosts
        .iter()
        .filter(|b| !b.keyword.is_empty() && lowered.contains(&b.keyword.to_lowercase()))
        .map(|b| b.boost)
        .sum();

    clamp_unit((base + boosts + caller) / 2.0)
}

fn freshness_with(config: &ScoringConfig, created_at: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
    let days = days_between(created_at, now);
    clamp_unit((-(config.decay_lambda as f64) * days).exp() as f32)
}

fn access_bonus_with(config: &ScoringConfig, access_count: u32) -> f32 {
    (access_count as f32 * config.access_bonus_per_hit).min(config.access_bonus_cap)
}

fn tier_with(config: &ScoringConfig, memory_type: MemoryType, total: f32) -> Tier {
    if memory_type == MemoryType::Decision {
        return Tier::Long;
    }
    if total >= config.long_threshold {
        Tier::Long
    } else if total >= config.short_threshold {
        Tier::Short
    } else if total >= config.working_threshold {
        Tier::Working
    } else {
        Tier::Archive
    }
}

/// Scorer that leaves importance untouched and never ages memories.
///
/// Selected when lifecycle scoring is switched off.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughScorer;

impl MemoryScoring for PassthroughScorer {
    fn score(&self, input: &ScoreInput<'_>, _now: DateTime<Utc>) -> ScoreResult {
        let importance = clamp_unit(input.importance);
        let tier = if input.memory_type == MemoryType::Decision {
            Tier::Long
        } else {
            Tier::Short
        };
        ScoreResult {
            total: importance,
            breakdown: ScoreBreakdown {
                importance,
                freshness: 1.0,
                confidence: clamp_unit(input.confidence),
                access_bonus: 0.0,
            },
            tier,
            should_decay: false,
            should_archive: false,
        }
    }

    fn freshness(&self, _created_at: DateTime<Utc>, _now: DateTime<Utc>) -> f32 {
        1.0
    }

    fn access_bonus(&self, _access_count: u32) -> f32 {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn input(memory_type: MemoryType, importance: f32, age_days: i64, now: DateTime<Utc>) -> ScoreInput<'static> {
        ScoreInput {
            memory_type,
            content: "plain content",
            importance,
            confidence: 1.0,
            access_count: 0,
            created_at: now - Duration::days(age_days),
        }
    }

    mod config {
        use super::*;

        #[test]
        fn test_scoring_config_default() {
            let config = ScoringConfig::default();
            assert_eq!(config.importance_weight, 0.4);
            assert_eq!(config.freshness_weight, 0.3);
            assert_eq!(config.confidence_weight, 0.3);
            assert_eq!(config.decay_lambda, 0.01);
            assert_eq!(config.type_base.get(MemoryType::Decision), Some(0.8));
            assert_eq!(config.type_base.get(MemoryType::Summary), None);
        }

        #[test]
        fn test_scoring_config_new() {
            let config = ScoringConfig::new(0.5, 0.25, 0.25).with_decay_lambda(-1.0);
            assert_eq!(config.importance_weight, 0.5);
            assert_eq!(config.decay_lambda, 0.0);
        }

        #[test]
        fn test_live_tuning() {
            let scorer = Scorer::default();
            scorer.set_decay_lambda(0.5);
            scorer.set_type_base(MemoryType::Summary, Some(2.0));
            assert_eq!(scorer.config().decay_lambda, 0.5);
            assert_eq!(scorer.config().type_base.summary, Some(1.0));
        }
    }

    mod importance {
        use super::*;

        #[test]
        fn test_blends_with_type_base() {
            let scorer = Scorer::default();
            let value = scorer.importance(MemoryType::Fact, "GPA: 3.80", 0.9);
            assert!((value - 0.75).abs() < 1e-6);
        }

        #[test]
        fn test_passthrough_without_base() {
            let scorer = Scorer::default();
            assert_eq!(scorer.importance(MemoryType::Summary, "x", 0.33), 0.33);
        }

        #[test]
        fn test_keyword_boost_is_case_insensitive() {
            let scorer = Scorer::default();
            let plain = scorer.importance(MemoryType::Preference, "budget", 0.5);
            let boosted = scorer.importance(MemoryType::Preference, "IMPORTANT budget", 0.5);
            assert!((boosted - plain - 0.05).abs() < 1e-6);
        }

        #[test]
        fn test_importance_clamped() {
            let scorer = Scorer::default();
            let value = scorer.importance(
                MemoryType::Decision,
                "important must deadline 重要 必须 截止",
                1.0,
            );
            assert_eq!(value, 1.0);
        }
    }

    mod score {
        use super::*;

        #[test]
        fn test_total_formula() {
            let scorer = Scorer::default();
            let now = Utc::now();
            let result = scorer.score(&input(MemoryType::Summary, 0.5, 0, now), now);
            // 0.5*0.4 + 1.0*0.3 + 1.0*0.3
            assert!((result.total - 0.8).abs() < 1e-6);
            assert_eq!(result.tier, Tier::Long);
        }

        #[test]
        fn test_decision_always_long() {
            let scorer = Scorer::default();
            let now = Utc::now();
            let mut low = input(MemoryType::Decision, 0.0, 3650, now);
            low.confidence = 0.0;
            let result = scorer.score(&low, now);
            assert!(result.total < 0.5);
            assert_eq!(result.tier, Tier::Long);
        }

        #[test]
        fn test_tier_thresholds() {
            let scorer = Scorer::default();
            assert_eq!(scorer.tier(MemoryType::Fact, 0.8), Tier::Long);
            assert_eq!(scorer.tier(MemoryType::Fact, 0.5), Tier::Short);
            assert_eq!(scorer.tier(MemoryType::Fact, 0.2), Tier::Working);
            assert_eq!(scorer.tier(MemoryType::Fact, 0.19), Tier::Archive);
        }

        #[test]
        fn test_access_bonus_capped() {
            let scorer = Scorer::default();
            assert!((scorer.access_bonus(3) - 0.06).abs() < 1e-6);
            assert_eq!(scorer.access_bonus(10), 0.2);
            assert_eq!(scorer.access_bonus(500), 0.2);
        }

        #[test]
        fn test_total_always_in_unit_range() {
            let scorer = Scorer::default();
            let now = Utc::now();
            for importance in [-3.0, 0.0, 0.4, 1.0, 7.0] {
                for confidence in [-1.0, 0.0, 0.5, 1.0, 4.0] {
                    for access_count in [0, 5, 1000] {
                        let mut i = input(MemoryType::Fact, importance, 10, now);
                        i.confidence = confidence;
                        i.access_count = access_count;
                        let total = scorer.score(&i, now).total;
                        assert!((0.0..=1.0).contains(&total), "total {total} out of range");
                    }
                }
            }
        }

        #[test]
        fn test_freshness_strictly_decreasing() {
            let scorer = Scorer::default();
            let now = Utc::now();
            let mut previous = f32::MAX;
            for days in [0, 1, 10, 100, 365] {
                let freshness = scorer.freshness(now - Duration::days(days), now);
                assert!(freshness < previous);
                previous = freshness;
            }
        }

        #[test]
        fn test_decay_and_archive_flags() {
            let scorer = Scorer::default();
            let now = Utc::now();

            let mut old = input(MemoryType::Feedback, 0.0, 400, now);
            old.confidence = 0.0;
            let result = scorer.score(&old, now);
            assert!(result.should_decay);
            assert!(result.should_archive);

            let fresh = scorer.score(&input(MemoryType::Fact, 0.5, 0, now), now);
            assert!(!fresh.should_decay);
            assert!(!fresh.should_archive);
        }

        #[test]
        fn test_snapshot_roundtrip() {
            let scorer = Scorer::default();
            let now = Utc::now();
            let result = scorer.score(&input(MemoryType::Fact, 0.5, 2, now), now);
            let back: ScoreResult = serde_json::from_value(result.to_json()).unwrap();
            assert_eq!(back, result);
        }
    }

    #[test]
    fn test_passthrough_scorer() {
        let now = Utc::now();
        let result = PassthroughScorer.score(&input(MemoryType::Fact, 0.42, 1000, now), now);
        assert_eq!(result.total, 0.42);
        assert_eq!(result.breakdown.freshness, 1.0);
        assert!(!result.should_decay);
        assert_eq!(PassthroughScorer.access_bonus(50), 0.0);
    }
}
