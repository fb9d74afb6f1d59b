//! Conflict detection and resolution between candidates and stored memories
//!
//! Detection looks for a key conflict, then an exact duplicate, then a
//! semantic near-duplicate. Resolution turns the detection and a strategy
//! into a [`Resolution`] the manager applies.

mod resolver;
pub mod rules;
pub mod score;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::memory::{ConflictStrategy, Memory, MemoryInput};

pub use resolver::ConflictResolver;
pub use rules::{ConflictKey, DEFAULT_DEDUPE_RULES, DedupeRule};
pub use score::{SniffedScore, sniff_score};

/// Configuration for conflict detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictConfig {
    /// Cosine similarity at or above which memories are near-duplicates (default: 0.9)
    pub semantic_threshold: f32,
    /// Neighbors inspected during semantic detection
    pub semantic_limit: usize,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            semantic_threshold: 0.9,
            semantic_limit: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictType {
    /// Same dedupe key
    Key,
    /// Same owner, type and content
    Exact,
    /// Embedding similarity above the threshold
    Semantic,
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictType::Key => "KEY",
            ConflictType::Exact => "EXACT",
            ConflictType::Semantic => "SEMANTIC",
        };
        f.write_str(name)
    }
}

/// Outcome of conflict detection for one candidate
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictDetection {
    pub conflict_type: Option<ConflictType>,
    pub existing: Option<Memory>,
    pub similarity: f32,
    pub suggested_strategy: ConflictStrategy,
    /// Key the conflict was found under, carried onto updated memories
    pub dedupe_key: Option<String>,
}

impl ConflictDetection {
    pub fn none() -> Self {
        Self {
            conflict_type: None,
            existing: None,
            similarity: 0.0,
            suggested_strategy: ConflictStrategy::KeepBoth,
            dedupe_key: None,
        }
    }

    pub fn has_conflict(&self) -> bool {
        self.existing.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionAction {
    Create,
    Update,
    Merge,
    Skip,
    Pending,
}

impl fmt::Display for ResolutionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResolutionAction::Create => "CREATE",
            ResolutionAction::Update => "UPDATE",
            ResolutionAction::Merge => "MERGE",
            ResolutionAction::Skip => "SKIP",
            ResolutionAction::Pending => "PENDING",
        };
        f.write_str(name)
    }
}

/// What to do with a candidate
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Persist the candidate as a new memory
    Create(MemoryInput),
    /// Persist the rewritten existing memory under its id
    Update(Memory),
    /// Persist the merged existing memory under its id
    Merge(Memory),
    /// Keep the existing memory, drop the candidate
    Skip { existing_id: Uuid, reason: String },
    /// Persist the candidate flagged for confirmation
    Pending(MemoryInput),
}

impl Resolution {
    pub fn action(&self) -> ResolutionAction {
        match self {
            Resolution::Create(_) => ResolutionAction::Create,
            Resolution::Update(_) => ResolutionAction::Update,
            Resolution::Merge(_) => ResolutionAction::Merge,
            Resolution::Skip { .. } => ResolutionAction::Skip,
            Resolution::Pending(_) => ResolutionAction::Pending,
        }
    }
}

/// Conflict seam used by the manager
#[async_trait]
pub trait ConflictPolicy: Send + Sync {
    async fn detect_conflict(
        &self,
        owner_id: &str,
        candidate: &MemoryInput,
    ) -> Result<ConflictDetection>;

    fn resolve_conflict(
        &self,
        candidate: MemoryInput,
        detection: &ConflictDetection,
        strategy_override: Option<ConflictStrategy>,
        now: DateTime<Utc>,
    ) -> Resolution;
}

/// Policy that never sees a conflict; every candidate is created
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllConflicts;

#[async_trait]
impl ConflictPolicy for AcceptAllConflicts {
    async fn detect_conflict(
        &self,
        _owner_id: &str,
        _candidate: &MemoryInput,
    ) -> Result<ConflictDetection> {
        Ok(ConflictDetection::none())
    }

    fn resolve_conflict(
        &self,
        candidate: MemoryInput,
        _detection: &ConflictDetection,
        _strategy_override: Option<ConflictStrategy>,
        _now: DateTime<Utc>,
    ) -> Resolution {
        Resolution::Create(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryType;

    #[tokio::test]
    async fn test_accept_all_creates() {
        let candidate = MemoryInput::new(MemoryType::Fact, "academic", "SAT: 1400");
        let detection = AcceptAllConflicts
            .detect_conflict("u1", &candidate)
            .await
            .unwrap();
        assert!(!detection.has_conflict());
        assert_eq!(detection.suggested_strategy, ConflictStrategy::KeepBoth);

        let resolution =
            AcceptAllConflicts.resolve_conflict(candidate, &detection, None, Utc::now());
        assert_eq!(resolution.action(), ResolutionAction::Create);
    }
}
